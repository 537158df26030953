//! Accept-one TCP listener.
//!
//! The listening socket exists only while no session is active: it accepts a
//! single connection and is dropped before the connection is reported, so a
//! second client is refused by the operating system.

use crate::error::{RemoteError, Result};
use crate::network::ServerEvent;
use log::debug;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Listener {
    addr: String,
    bound: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            bound: None,
            task: None,
        }
    }

    /// Binds and waits for one connection in the background.
    ///
    /// After the first bind the resolved address is reused, so a configured
    /// port of 0 keeps the same port across restarts.
    pub async fn start(&mut self, events: mpsc::UnboundedSender<ServerEvent>) -> Result<SocketAddr> {
        self.close().await;

        let addr = self
            .bound
            .map(|bound| bound.to_string())
            .unwrap_or_else(|| self.addr.clone());
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RemoteError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;

        self.bound = Some(local);
        self.task = Some(tokio::spawn(accept_one(listener, events)));
        debug!("Listening on {}", local);

        Ok(local)
    }

    /// Stops listening. Waits for the accept task so the port is released.
    pub async fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!("Listener on {} closed", self.addr);
        }
    }

    pub fn is_open(&self) -> bool {
        self.task.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_one(listener: TcpListener, events: mpsc::UnboundedSender<ServerEvent>) {
    let event = match listener.accept().await {
        Ok((stream, peer)) => ServerEvent::Accepted { stream, peer },
        Err(error) => ServerEvent::AcceptFailed { error },
    };
    drop(listener);
    let _ = events.send(event);
}
