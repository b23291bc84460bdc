//! Session engine: connection state machine, per-session stores, and the registry that
//! ties transports to the relay pipeline.

mod config_store;
mod credentials;
mod registry;
mod state;

pub use config_store::{resolve_endpoint, SessionConfig, SessionConfigStore};
pub use credentials::CredentialStore;
pub use registry::{Session, SessionHandle, SessionRegistry};
pub use state::{transition, ConnectionState, Effect, Step};

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session {0} is being deleted, try again shortly")]
    DeletionPending(String),
    #[error("invalid recipient: {0:?}")]
    InvalidRecipient(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session storage: {0}")]
    Storage(#[from] std::io::Error),
}

/// Session ids name files and directories: ASCII letters, digits, `_`, `-` and `.`, with no
/// leading dot and no `..`.
pub fn validate_session_id(id: &str) -> Result<(), EngineError> {
    let allowed = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if id.is_empty() || !allowed || id.starts_with('.') || id.contains("..") {
        return Err(EngineError::InvalidSessionId(id.to_string()));
    }
    Ok(())
}
