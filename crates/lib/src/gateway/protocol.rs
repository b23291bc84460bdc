//! Gateway HTTP API bodies and error responses.

use crate::sessions::{ConnectionState, EngineError, SessionConfig};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Body of `POST /api/session/:id`. Every field is optional; an empty body keeps the
/// stored config (or the default endpoint).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default, alias = "webhook")]
    pub webhook_url: Option<String>,
    #[serde(default, alias = "workspaceID")]
    pub workspace_id: Option<String>,
    #[serde(default, alias = "canalID")]
    pub channel_id: Option<String>,
}

impl CreateSessionRequest {
    /// The config to store, or None when the request carries no routing fields.
    pub fn into_config(self) -> Option<SessionConfig> {
        let config = SessionConfig {
            webhook_url: non_empty(self.webhook_url),
            workspace_id: non_empty(self.workspace_id),
            channel_id: non_empty(self.channel_id),
        };
        if config.webhook_url.is_none() && config.workspace_id.is_none() && config.channel_id.is_none() {
            None
        } else {
            Some(config)
        }
    }
}

/// Body of `POST /api/session/:id/send`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: String,
    pub status: ConnectionState,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedView {
    pub message: String,
    pub id: String,
    pub status: ConnectionState,
}

/// An error returned to API callers: status plus a short message. Internal details are
/// logged, never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidSessionId(_) | EngineError::InvalidRecipient(_) => {
                Self::bad_request(e.to_string())
            }
            EngineError::SessionNotFound(_) => Self::not_found(e.to_string()),
            EngineError::DeletionPending(_) => Self::new(StatusCode::CONFLICT, e.to_string()),
            EngineError::Transport(_) | EngineError::Storage(_) => {
                log::error!("gateway: request failed: {}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn create_request_accepts_legacy_field_names() {
        let req: CreateSessionRequest =
            serde_json::from_str(r#"{"webhook":"http://h/x","workspaceID":"w1","canalID":"c1"}"#).unwrap();
        let config = req.into_config().unwrap();
        assert_eq!(config.webhook_url.as_deref(), Some("http://h/x"));
        assert_eq!(config.workspace_id.as_deref(), Some("w1"));
        assert_eq!(config.channel_id.as_deref(), Some("c1"));
    }

    #[test]
    fn empty_create_request_stores_nothing() {
        let req: CreateSessionRequest = serde_json::from_str(r#"{"webhookUrl":"  "}"#).unwrap();
        assert!(req.into_config().is_none());
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::InvalidSessionId("a/b".into()), StatusCode::BAD_REQUEST),
            (EngineError::SessionNotFound("s1".into()), StatusCode::NOT_FOUND),
            (EngineError::DeletionPending("s1".into()), StatusCode::CONFLICT),
            (
                EngineError::Transport(TransportError::Disconnected),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ApiError::from(EngineError::Storage(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/secret/path",
        )));
        assert_eq!(err.message, "internal error");
    }
}
