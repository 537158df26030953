//! Service event loop coordinating the listener, the session and the game server

use crate::config::RemoteConfig;
use crate::console::LogStore;
use crate::dispatcher::{dispatch, ServiceContext};
use crate::error::{AuthFailure, RemoteError, Result};
use crate::listener::Listener;
use crate::session::{Session, SessionState};
use crate::supervisor::{ProcessEvent, ProcessSupervisor, ServerStatus};
use log::{debug, error, info, warn};
use shared::{Message, SharedKey, Tag};
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Messages sent from background tasks to the service loop
#[derive(Debug)]
pub enum ServerEvent {
    Accepted {
        stream: TcpStream,
        peer: SocketAddr,
    },
    AcceptFailed {
        error: io::Error,
    },
    MessageReceived {
        session_id: u64,
        bytes: Vec<u8>,
    },
    PeerClosed {
        session_id: u64,
    },
    HandshakeTimeout {
        session_id: u64,
    },
    TransferFinished {
        session_id: u64,
        result: Result<u64>,
    },
    Process(ProcessEvent),
    Operator(OperatorCommand),
}

/// Requests from the local operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Drops the session and stops listening.
    ForceDisconnect,
    /// Drops the session and listens again with a fresh key.
    Restart,
    StopListening,
    RefreshKey,
    StartProcess,
    StopProcess,
    Console(String),
    ClearConsole,
    Shutdown,
}

impl OperatorCommand {
    /// Parses one line of the operator console. Lines starting with `/` are
    /// service commands; anything else goes to the game server.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        match line.trim() {
            "" => None,
            "/start" => Some(OperatorCommand::StartProcess),
            "/stop" => Some(OperatorCommand::StopProcess),
            "/disconnect" => Some(OperatorCommand::ForceDisconnect),
            "/stop-listening" => Some(OperatorCommand::StopListening),
            "/restart" => Some(OperatorCommand::Restart),
            "/key" => Some(OperatorCommand::RefreshKey),
            "/clear" => Some(OperatorCommand::ClearConsole),
            "/quit" => Some(OperatorCommand::Shutdown),
            other if other.starts_with('/') => None,
            _ => Some(OperatorCommand::Console(line.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Listening,
    Connected,
    Disconnected,
}

/// Notifications for whoever presents the service to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    RemoteStatus(RemoteStatus),
    KeyGenerated(String),
    ConnectionLog(String),
    ServerStatus(ServerStatus),
    ConsoleLine(String),
    /// A `file|` request produced no transfer, or a transfer broke off.
    TransferFailed(String),
    /// Any other authenticated request that could not be carried out.
    RequestFailed(String),
}

/// The service event channel. Created before the server so process
/// supervisors can be handed a sender.
pub struct EventChannel {
    tx: mpsc::UnboundedSender<ServerEvent>,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl EventChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<ServerEvent> {
        self.tx.clone()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable operator handle onto a running service
#[derive(Debug, Clone)]
pub struct RemoteHandle {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl RemoteHandle {
    /// Returns `false` once the service loop is gone.
    pub fn send(&self, command: OperatorCommand) -> bool {
        self.tx.send(ServerEvent::Operator(command)).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.send(OperatorCommand::Shutdown)
    }
}

/// Remote-control service owning the key, the session and the game server
pub struct RemoteServer {
    config: RemoteConfig,
    key: SharedKey,
    listener: Listener,
    session: Option<Session>,
    next_session_id: u64,
    keep_listening: bool,
    ctx: ServiceContext,

    // Communication channel
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl RemoteServer {
    pub fn new(
        config: RemoteConfig,
        channel: EventChannel,
        supervisor: Box<dyn ProcessSupervisor>,
        console: Box<dyn LogStore>,
    ) -> Self {
        let ctx = ServiceContext::new(
            supervisor,
            console,
            config.launch.latest_log_path(),
            config.chunk_size,
        );

        RemoteServer {
            listener: Listener::new(config.bind_addr()),
            key: SharedKey::generate(),
            session: None,
            next_session_id: 0,
            keep_listening: config.listen_on_start,
            ctx,
            config,
            event_tx: channel.tx,
            event_rx: channel.rx,
        }
    }

    pub fn handle(&self) -> RemoteHandle {
        RemoteHandle {
            tx: self.event_tx.clone(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ServiceEvent> {
        self.ctx.subscribe()
    }

    pub fn key(&self) -> &SharedKey {
        &self.key
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> SessionState {
        match &self.session {
            Some(session) => session.state(),
            None if self.listener.is_open() => SessionState::Listening,
            None => SessionState::Disconnected,
        }
    }

    /// Opens the listener before [`run`](Self::run), returning the bound address.
    pub async fn listen(&mut self) -> Result<SocketAddr> {
        self.keep_listening = true;
        self.start_listening().await
    }

    /// Main service loop processing events until shutdown
    pub async fn run(&mut self) -> Result<()> {
        if self.keep_listening && !self.listener.is_open() && self.session.is_none() {
            self.start_listening().await?;
        }
        info!("Remote control service running");

        while let Some(event) = self.event_rx.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Returns `false` when the loop should stop
    async fn handle_event(&mut self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::Accepted { stream, peer } => self.on_accept(stream, peer).await,
            ServerEvent::AcceptFailed { error } => {
                error!("Failed to accept remote connection: {}", error);
                self.listener.close().await;
                if self.keep_listening && self.session.is_none() {
                    self.relisten().await;
                }
            }
            ServerEvent::MessageReceived { session_id, bytes } => {
                self.on_message(session_id, &bytes).await
            }
            ServerEvent::PeerClosed { session_id } => {
                if self.is_active(session_id) {
                    self.ctx
                        .connection_log("========RemoteServerDisconnect!!========");
                    self.end_session().await;
                }
            }
            ServerEvent::HandshakeTimeout { session_id } => {
                let expired = match self.session.as_mut() {
                    Some(session) if session.id() == session_id => session.expire_handshake(),
                    _ => false,
                };
                if expired {
                    self.reject(AuthFailure::Timeout).await;
                } else {
                    debug!("Ignoring stale handshake timer of session {}", session_id);
                }
            }
            ServerEvent::TransferFinished { session_id, result } => {
                self.on_transfer_finished(session_id, result)
            }
            ServerEvent::Process(event) => self.ctx.handle_process_event(event),
            ServerEvent::Operator(OperatorCommand::Shutdown) => return false,
            ServerEvent::Operator(command) => self.on_operator(command).await,
        }
        true
    }

    fn is_active(&self, session_id: u64) -> bool {
        matches!(&self.session, Some(session) if session.id() == session_id)
    }

    async fn on_accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let was_open = self.listener.is_open();
        self.listener.close().await;

        if !was_open || self.session.is_some() {
            warn!("Refusing connection from {}", peer);
            return;
        }

        self.next_session_id += 1;
        let session = Session::spawn(
            self.next_session_id,
            stream,
            peer,
            self.event_tx.clone(),
            self.config.handshake_timeout(),
        );
        self.session = Some(session);

        self.ctx
            .connection_log(format!("Remote client connected from {}", peer));
        self.ctx.emit(ServiceEvent::RemoteStatus(RemoteStatus::Connected));
    }

    async fn on_message(&mut self, session_id: u64, bytes: &[u8]) {
        let session = match self.session.as_mut() {
            Some(session) if session.id() == session_id => session,
            _ => {
                debug!("Dropping message for stale session {}", session_id);
                return;
            }
        };

        let message = match Message::parse(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed message from {}: {}", session.peer(), e);
                self.ctx.connection_log(format!(
                    "\"error format\"->{}",
                    String::from_utf8_lossy(bytes)
                ));
                return;
            }
        };

        if session.state() == SessionState::AwaitingKey {
            match session.verify_key(&message, &self.key) {
                Ok(()) => {
                    session.reply(&Tag::Remote, &[b"success"]);
                    self.ctx
                        .connection_log("========Verification Successful========");
                }
                Err(failure) => self.reject(failure).await,
            }
        } else if session.is_authenticated() {
            let wants_file = message.tag == Tag::File;
            if let Err(e) = dispatch(&mut self.ctx, session, message).await {
                if wants_file {
                    self.report_transfer_failure(e);
                } else {
                    error!("Request from {} failed: {}", session.peer(), e);
                    self.ctx.emit(ServiceEvent::RequestFailed(e.to_string()));
                }
            }
        } else {
            debug!("Dropping message in state {:?}", session.state());
        }
    }

    fn on_transfer_finished(&mut self, session_id: u64, result: Result<u64>) {
        if let Some(session) = self.session.as_mut().filter(|s| s.id() == session_id) {
            session.finish_transfer();
            debug!(
                "Session {} has {} transfer(s) left",
                session_id,
                session.transfers_in_flight()
            );
        }
        match result {
            Ok(bytes) => debug!("Transfer on session {} sent {} bytes", session_id, bytes),
            Err(e) => self.report_transfer_failure(e),
        }
    }

    fn report_transfer_failure(&self, e: RemoteError) {
        error!("Transfer failed: {}", e);
        self.ctx.emit(ServiceEvent::TransferFailed(e.to_string()));
    }

    /// Sends the verdict, drops the session and listens again
    async fn reject(&mut self, failure: AuthFailure) {
        if let Some(session) = &self.session {
            session.reply(&Tag::Remote, &[b"Verification fail", failure.reason().as_bytes()]);
        }
        let error = RemoteError::Auth(failure);
        debug!("Rejecting session: {:?}", error);
        self.ctx.connection_log(format!("Reason : {}", error));
        self.end_session().await;
    }

    async fn end_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            info!(
                "Session {} with {} closed after {:.1}s",
                session.id(),
                session.peer(),
                session.connected_for().as_secs_f32()
            );
        }

        if self.keep_listening {
            self.relisten().await;
        } else {
            self.ctx
                .emit(ServiceEvent::RemoteStatus(RemoteStatus::Disconnected));
        }
    }

    async fn relisten(&mut self) {
        if let Err(e) = self.start_listening().await {
            error!("Unable to listen for remote control: {}", e);
            self.ctx
                .emit(ServiceEvent::RemoteStatus(RemoteStatus::Disconnected));
        }
    }

    async fn start_listening(&mut self) -> Result<SocketAddr> {
        let addr = self.listener.start(self.event_tx.clone()).await?;
        self.refresh_key();
        self.ctx
            .connection_log(format!("Listening for remote control on {}", addr));
        self.ctx
            .emit(ServiceEvent::RemoteStatus(RemoteStatus::Listening));
        Ok(addr)
    }

    fn refresh_key(&mut self) {
        self.key = SharedKey::generate();
        let hex = self.key.to_hex();
        self.ctx.connection_log(format!("key is: {}", hex));
        self.ctx.emit(ServiceEvent::KeyGenerated(hex));
    }

    async fn on_operator(&mut self, command: OperatorCommand) {
        match command {
            OperatorCommand::ForceDisconnect => {
                if let Some(mut session) = self.session.take() {
                    session.close();
                    self.ctx
                        .connection_log("========RemoteServerForceDisconnect!!========");
                }
                self.keep_listening = false;
                self.listener.close().await;
                self.ctx
                    .emit(ServiceEvent::RemoteStatus(RemoteStatus::Disconnected));
            }
            OperatorCommand::StopListening => {
                self.keep_listening = false;
                self.listener.close().await;
                self.ctx.connection_log("Stopped listening for remote control");
                if self.session.is_none() {
                    self.ctx
                        .emit(ServiceEvent::RemoteStatus(RemoteStatus::Disconnected));
                }
            }
            OperatorCommand::Restart => {
                if let Some(mut session) = self.session.take() {
                    session.close();
                }
                self.listener.close().await;
                self.keep_listening = true;
                self.ctx.connection_log("========RemoteServerReStart========");
                self.relisten().await;
            }
            OperatorCommand::RefreshKey => self.refresh_key(),
            OperatorCommand::StartProcess => self.ctx.start_process(),
            OperatorCommand::StopProcess => self.ctx.stop_process(),
            OperatorCommand::Console(text) => {
                if let Err(e) = self.ctx.send_console_command(&text) {
                    warn!("Console command \"{}\" not sent: {}", text, e);
                }
            }
            OperatorCommand::ClearConsole => self.ctx.clear_console(),
            OperatorCommand::Shutdown => {}
        }
    }

    async fn shutdown(&mut self) {
        info!("Remote control service shutting down");
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.listener.close().await;
        self.ctx.kill_process();
    }
}
