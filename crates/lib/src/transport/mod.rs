//! Account transport capability: connect, send text, download media, and a typed event stream.
//!
//! The account protocol itself is not implemented here. A [`Connector`] produces one
//! [`Connection`] per session; the engine drives everything else from the event stream.

mod bridge;
mod message;

pub use bridge::BridgeConnector;
pub use message::{AudioMedia, ChatKind, DocumentMedia, InboundEvent, MessageContent, VisualMedia};

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Close status the protocol uses for a credential that is no longer valid.
pub const UNAUTHORIZED_STATUS: u16 = 401;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport connect failed: {0}")]
    Connect(String),
    #[error("transport disconnected")]
    Disconnected,
    #[error("transport rejected request: {0}")]
    Rejected(String),
    #[error("transport protocol error: {0}")]
    Protocol(String),
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Updated credential material; written under the session's credential directory as `file`.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialUpdate {
    pub file: String,
    pub data: Vec<u8>,
}

/// Why a connection closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseReason {
    pub status_code: Option<u16>,
    pub message: Option<String>,
}

impl CloseReason {
    /// Unauthorized close with no restart hint: the credential is invalid and must not be retried.
    pub fn is_terminal(&self) -> bool {
        let restart_required = self
            .message
            .as_deref()
            .is_some_and(|m| m.contains("restart required"));
        self.status_code == Some(UNAUTHORIZED_STATUS) && !restart_required
    }
}

/// Delivery kind of a message batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// New messages.
    Notify,
    /// History sync or already-read messages.
    Append,
}

#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub kind: BatchKind,
    pub events: Vec<InboundEvent>,
}

/// Events emitted by a connection, in order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    CredentialsChanged(CredentialUpdate),
    QrIssued(String),
    ConnectionOpened,
    ConnectionClosed(CloseReason),
    MessagesReceived(MessageBatch),
}

/// Live connection handle for one session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message to a chat id.
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError>;
    /// Download the decrypted bytes of the media attached to `event`.
    async fn download_media(&self, event: &InboundEvent) -> Result<Vec<u8>, TransportError>;
    /// Close the underlying connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// A freshly opened connection: the handle plus its event stream.
///
/// The stream is unbounded: the session worker awaits transport requests (media downloads)
/// while events keep arriving, and their responses must not queue behind unread events.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports. One call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        session_id: &str,
        credential_dir: &Path,
    ) -> Result<Connection, TransportError>;
}

/// Normalize a recipient: full chat ids pass through; a bare number is reduced to digits and
/// given the direct-chat suffix. None when there is no user part or no digits.
pub fn normalize_recipient(to: &str) -> Option<String> {
    let to = to.trim();
    if to.contains('@') {
        return (!to.starts_with('@')).then(|| to.to_string());
    }
    let digits: String = to.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("{}@s.whatsapp.net", digits))
}
