//! Webhook dispatch: POST the relay envelope to the session's endpoint.
//! Best effort: no retry, a failed post is logged and dropped.

use crate::relay::payload::RelayPayload;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned {0}: {1}")]
    Status(reqwest::StatusCode, String),
}

#[derive(Clone, Default)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Post and wait for the response.
    pub async fn dispatch(&self, endpoint: &str, payload: &RelayPayload) -> Result<(), DispatchError> {
        let res = self.client.post(endpoint).json(payload).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(DispatchError::Status(status, body));
        }
        log::debug!("webhook {}: {} accepted ({})", endpoint, payload.message().id, status);
        Ok(())
    }

    /// Post in the background; failures are only logged.
    pub fn dispatch_detached(&self, endpoint: String, payload: RelayPayload) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(&endpoint, &payload).await {
                log::warn!(
                    "webhook delivery of {} to {} failed: {}",
                    payload.message().id,
                    endpoint,
                    e
                );
            }
        })
    }
}
