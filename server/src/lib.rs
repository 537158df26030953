//! # Remote Control Server Library
//!
//! This library provides the remote-control service of a supervised Minecraft
//! server. A single authenticated TCP client can start and stop the game
//! server, forward console commands, poll its status and pull its logs.
//!
//! ## Core Responsibilities
//!
//! ### Connection Authentication
//! Every connection must prove knowledge of a shared key within a short
//! handshake window. The key is derived from the local wall clock at minute
//! precision and regenerated whenever the service starts listening again:
//! - A correct key is answered with `remote|success`
//! - A wrong key, a non-key first message or silence ends the connection
//!   with a `remote|Verification fail|<reason>` verdict
//! - After any rejection the service listens again under a fresh key
//!
//! ### Command Dispatch
//! Authenticated messages are routed by their tag:
//! - `button` starts or stops the game server process
//! - `command` writes a line to the server console
//! - `mcServerStatus` reports whether the server is running
//! - `mcServerLogs` and `mcLogsUpdate` export the console, in full or as a delta
//! - `file` streams the server's `logs/latest.log` with a binary header
//!
//! ### Process Supervision
//! The game server runs as a child process. Its output is collected into an
//! in-memory console that remote clients read back.
//!
//! ## Architecture Design
//!
//! ### Single Consumer Event Loop
//! All state lives in one [`network::RemoteServer`]. Background tasks (accept,
//! socket reader, socket writer, handshake timer, child process I/O) and the
//! operator handle only send [`network::ServerEvent`]s into one channel, which
//! the service drains one event at a time. Events carry the session id they
//! belong to, so anything arriving for a session that is already gone is
//! dropped.
//!
//! ### One Session At A Time
//! The listening socket is closed the moment a connection is accepted and
//! reopened only when that session ends. A second client is refused by the
//! operating system rather than by the service.
//!
//! ### Ordered Output
//! Replies and transfer bodies share one outbound queue per session. The
//! writer task drains it in order, so a transfer never interleaves with a
//! reply and a slow peer throttles how fast a file is read.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The service loop, its event enumeration and the operator handle.
//!
//! ### Session Module (`session`)
//! Per-connection state machine and the reader, writer and timer tasks.
//!
//! ### Listener Module (`listener`)
//! Accept-one listener with rebinding on the same port.
//!
//! ### Dispatcher Module (`dispatcher`)
//! Request handlers and the state they operate on.
//!
//! ### Transfer Module (`transfer`)
//! Chunked sender with progress accounting.
//!
//! ### Supervisor and Console Modules (`supervisor`, `console`)
//! Child process control and the console buffer, both behind traits so tests
//! can substitute scripted implementations.
//!
//! ### Config and Error Modules (`config`, `error`)
//! JSON/CLI configuration and the error taxonomy.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::RemoteConfig;
//! use server::console::ConsoleLog;
//! use server::network::{EventChannel, RemoteServer};
//! use server::supervisor::ChildSupervisor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RemoteConfig::default();
//!     let channel = EventChannel::new();
//!     let supervisor = ChildSupervisor::new(config.launch.clone(), channel.sender());
//!
//!     let mut server = RemoteServer::new(
//!         config,
//!         channel,
//!         Box::new(supervisor),
//!         Box::new(ConsoleLog::new()),
//!     );
//!
//!     // Listens on 0.0.0.0:7777 and serves clients until shut down
//!     // through a `RemoteHandle`.
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! The key only depends on the current minute, so anyone who knows the
//! scheme and the server's clock can compute it. The service is meant for
//! trusted networks.

pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod network;
pub mod session;
pub mod supervisor;
pub mod transfer;
