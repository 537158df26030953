//! State of the single remote-control connection.
//!
//! A [`Session`] owns the tasks attached to one accepted socket:
//! - a reader forwarding every read to the service loop as one message
//! - a writer draining the ordered outbound queue (frames and transfers)
//!   which abandons a running transfer as soon as the session closes
//! - the handshake timer
//!
//! The session itself never blocks. State changes happen on the service loop
//! in response to the events those tasks emit.

use crate::error::AuthFailure;
use crate::network::ServerEvent;
use crate::transfer::TransferJob;
use log::{debug, info, warn};
use shared::{Message, SharedKey, Tag};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Largest single read handed to the dispatcher as one message.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a peer to connect.
    Listening,
    AwaitingKey,
    Authenticated,
    /// Authenticated with at least one transfer queued or running.
    Transferring,
    Disconnected,
}

/// Work item for the writer task, executed in queue order.
#[derive(Debug)]
pub enum Outbound {
    Frame(Vec<u8>),
    Transfer(TransferJob),
    /// Shuts down the write side once everything queued before it is sent.
    Close,
}

pub struct Session {
    id: u64,
    state: SessionState,
    peer: SocketAddr,
    connected_at: Instant,
    transfers_in_flight: usize,
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: Option<JoinHandle<()>>,
    handshake_timer: Option<JoinHandle<()>>,
    /// Fired on close; the writer drops whatever transfer it is streaming.
    cancel_writer: Option<oneshot::Sender<()>>,
}

impl Session {
    /// Creates a session in `AwaitingKey` that queues its output on `outbound`.
    pub fn new(id: u64, peer: SocketAddr, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            state: SessionState::AwaitingKey,
            peer,
            connected_at: Instant::now(),
            transfers_in_flight: 0,
            outbound,
            reader: None,
            handshake_timer: None,
            cancel_writer: None,
        }
    }

    /// Attaches a session to an accepted socket and arms the handshake timer.
    pub fn spawn(
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        events: mpsc::UnboundedSender<ServerEvent>,
        handshake_timeout: Duration,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let mut session = Self::new(id, peer, outbound_tx);
        session.cancel_writer = Some(cancel_tx);
        session.reader = Some(tokio::spawn(read_messages(id, read_half, events.clone())));
        tokio::spawn(write_outbound(
            id,
            write_half,
            outbound_rx,
            cancel_rx,
            events.clone(),
        ));
        session.handshake_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(handshake_timeout).await;
            let _ = events.send(ServerEvent::HandshakeTimeout { session_id: id });
        }));

        debug!("Session {} attached to {}", id, peer);
        session
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state,
            SessionState::Authenticated | SessionState::Transferring
        )
    }

    pub fn transfers_in_flight(&self) -> usize {
        self.transfers_in_flight
    }

    /// Judges the first message of the connection against `key`.
    ///
    /// Only a `key` message whose payload equals the key byte for byte passes.
    /// The handshake timer is cancelled either way.
    pub fn verify_key(&mut self, message: &Message, key: &SharedKey) -> Result<(), AuthFailure> {
        self.cancel_handshake_timer();

        let verdict = match message.tag {
            Tag::Key if key.matches(&message.payload) => Ok(()),
            Tag::Key => Err(AuthFailure::WrongKey),
            _ => Err(AuthFailure::NoKey),
        };

        match verdict {
            Ok(()) => {
                info!("Session {} from {} verified", self.id, self.peer);
                self.state = SessionState::Authenticated;
            }
            Err(failure) => {
                warn!(
                    "Session {} from {} failed verification: {}",
                    self.id, self.peer, failure
                );
                self.state = SessionState::Disconnected;
            }
        }
        verdict
    }

    /// Applies a fired handshake timer. Returns `false` when the session had
    /// already left `AwaitingKey`, so the timer is stale.
    pub fn expire_handshake(&mut self) -> bool {
        if self.state != SessionState::AwaitingKey {
            return false;
        }
        self.handshake_timer = None;
        self.state = SessionState::Disconnected;
        true
    }

    /// Queues raw bytes for the peer.
    pub fn send(&self, bytes: Vec<u8>) {
        if self.outbound.send(Outbound::Frame(bytes)).is_err() {
            debug!("Session {} writer is gone, dropping frame", self.id);
        }
    }

    pub fn reply(&self, tag: &Tag, fields: &[&[u8]]) {
        self.send(Message::join(tag, fields));
    }

    /// Queues a transfer behind everything already pending.
    pub fn begin_transfer(&mut self, job: TransferJob) {
        info!(
            "Session {} queued transfer of {} ({} bytes)",
            self.id,
            job.source_name(),
            job.total_bytes()
        );
        if self.outbound.send(Outbound::Transfer(job)).is_err() {
            debug!("Session {} writer is gone, dropping transfer", self.id);
            return;
        }
        self.transfers_in_flight += 1;
        if self.state == SessionState::Authenticated {
            self.state = SessionState::Transferring;
        }
    }

    pub fn finish_transfer(&mut self) {
        self.transfers_in_flight = self.transfers_in_flight.saturating_sub(1);
        if self.transfers_in_flight == 0 && self.state == SessionState::Transferring {
            self.state = SessionState::Authenticated;
        }
    }

    /// Stops reading, flushes queued frames and closes the socket.
    ///
    /// Transfers still queued or streaming are abandoned.
    pub fn close(&mut self) {
        self.cancel_handshake_timer();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.transfers_in_flight > 0 {
            info!(
                "Session {} closing with {} transfer(s) in flight",
                self.id, self.transfers_in_flight
            );
        }
        let _ = self.outbound.send(Outbound::Close);
        if let Some(cancel) = self.cancel_writer.take() {
            let _ = cancel.send(());
        }
        self.transfers_in_flight = 0;
        self.state = SessionState::Disconnected;
    }

    fn cancel_handshake_timer(&mut self) {
        if let Some(timer) = self.handshake_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_handshake_timer();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_messages(
    session_id: u64,
    mut read_half: OwnedReadHalf,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match read_half.read(&mut buffer).await {
            Ok(0) => break,
            Ok(len) => {
                let event = ServerEvent::MessageReceived {
                    session_id,
                    bytes: buffer[..len].to_vec(),
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("Session {} read failed: {}", session_id, e);
                break;
            }
        }
    }

    let _ = events.send(ServerEvent::PeerClosed { session_id });
}

async fn write_outbound<W>(
    session_id: u64,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut cancel: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ServerEvent>,
) where
    W: AsyncWrite + Unpin,
{
    // A dropped sender counts as a cancel too
    let mut cancelled = false;

    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    warn!("Session {} write failed: {}", session_id, e);
                    break;
                }
            }
            Outbound::Transfer(mut job) => {
                if cancelled {
                    debug!(
                        "Session {} dropping queued transfer of {}",
                        session_id,
                        job.source_name()
                    );
                    continue;
                }

                let sent = tokio::select! {
                    biased;
                    _ = &mut cancel => None,
                    result = job.send(&mut writer) => Some(result),
                };
                match sent {
                    Some(result) => {
                        let _ = events.send(ServerEvent::TransferFinished { session_id, result });
                    }
                    None => {
                        cancelled = true;
                        info!(
                            "Session {} abandoned transfer of {} with {} bytes unsent",
                            session_id,
                            job.source_name(),
                            job.bytes_remaining()
                        );
                    }
                }
            }
            Outbound::Close => break,
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Session {} shutdown failed: {}", session_id, e);
    }
}
