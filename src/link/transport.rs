//! Transport channel to the rig controller.
//!
//! The sync engine only ever sees the `AxisLink` trait: a connected,
//! best-effort string channel where an empty receive means "nothing pending
//! this cycle". The production implementation is a nonblocking UDP socket;
//! `MemoryLink` is an in-process loopback used by tests and dry runs.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::UdpSocket;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Connection settings for the rig controller link.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct LinkConfig {
    /// Host name or address of the axis server
    pub server_host: String,
    /// Port the axis server listens on
    pub server_port: u16,
    /// Local port this client binds for replies
    pub client_port: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 11000,
            client_port: 11001,
        }
    }
}

// Link errors
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to connect link: {0}")]
    ConnectError(String),

    #[error("Failed to send payload: {0}")]
    SendError(String),

    #[error("Failed to receive payload: {0}")]
    ReceiveError(String),
}

/// Opaque send/receive-string channel to the remote peer.
///
/// `receive_string` is non-blocking: it returns `Ok("")` when nothing is
/// pending, which the engine treats the same as "no updates this cycle".
pub trait AxisLink: Send {
    fn send_string(&mut self, payload: &str) -> Result<(), LinkError>;
    fn receive_string(&mut self) -> Result<String, LinkError>;
}

/// UDP implementation of the axis link.
pub struct UdpAxisLink {
    socket: UdpSocket,
}

impl UdpAxisLink {
    /// Binds the local client port and connects the socket to the axis
    /// server. The socket is switched to nonblocking mode so a quiet link
    /// never stalls the engine tick.
    pub fn connect(config: &LinkConfig) -> Result<Self, LinkError> {
        info!(
            "Connecting axis link to {}:{} from local port {}",
            config.server_host, config.server_port, config.client_port
        );

        let socket = UdpSocket::bind(("0.0.0.0", config.client_port))
            .map_err(|e| LinkError::ConnectError(format!("bind failed: {}", e)))?;

        socket
            .connect((config.server_host.as_str(), config.server_port))
            .map_err(|e| LinkError::ConnectError(format!("connect failed: {}", e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| LinkError::ConnectError(format!("set_nonblocking failed: {}", e)))?;

        info!("Axis link connected");
        Ok(Self { socket })
    }
}

impl AxisLink for UdpAxisLink {
    fn send_string(&mut self, payload: &str) -> Result<(), LinkError> {
        debug!("Link send: {}", payload);
        match self.socket.send(payload.as_bytes()) {
            Ok(_) => Ok(()),
            // An unreachable peer is not fatal for a lossy link; the next
            // cycle supersedes this datagram anyway
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::ConnectionRefused => {
                warn!("Link send dropped: {}", e);
                Ok(())
            }
            Err(e) => Err(LinkError::SendError(e.to_string())),
        }
    }

    fn receive_string(&mut self) -> Result<String, LinkError> {
        let mut buffer = [0u8; 2048];
        match self.socket.recv(&mut buffer) {
            Ok(received) => {
                let payload = String::from_utf8_lossy(&buffer[..received]).into_owned();
                debug!("Link receive: {}", payload);
                Ok(payload)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(String::new()),
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                // ICMP port-unreachable from an absent server surfaces here
                debug!("Link receive while peer unavailable: {}", e);
                Ok(String::new())
            }
            Err(e) => Err(LinkError::ReceiveError(e.to_string())),
        }
    }
}

/// In-process loopback link.
///
/// Everything sent is collected on the shared side; strings pushed with
/// `push_incoming` are handed out one per receive. Clones share the same
/// queues, so a test can keep a handle while the engine owns the link.
#[derive(Debug, Default, Clone)]
pub struct MemoryLink {
    inner: std::sync::Arc<std::sync::Mutex<MemoryLinkInner>>,
}

#[derive(Debug, Default)]
struct MemoryLinkInner {
    incoming: VecDeque<String>,
    sent: Vec<String>,
}

impl MemoryLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_incoming(&self, payload: &str) {
        self.inner
            .lock()
            .expect("memory link poisoned")
            .incoming
            .push_back(payload.to_string());
    }

    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().expect("memory link poisoned").sent.clone()
    }
}

impl AxisLink for MemoryLink {
    fn send_string(&mut self, payload: &str) -> Result<(), LinkError> {
        self.inner
            .lock()
            .map_err(|e| LinkError::SendError(e.to_string()))?
            .sent
            .push(payload.to_string());
        Ok(())
    }

    fn receive_string(&mut self) -> Result<String, LinkError> {
        Ok(self
            .inner
            .lock()
            .map_err(|e| LinkError::ReceiveError(e.to_string()))?
            .incoming
            .pop_front()
            .unwrap_or_default())
    }
}
