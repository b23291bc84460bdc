//! Per-batch relay: classify each event in arrival order, fetch and store media, build the
//! envelope and dispatch it. Media posts are awaited before the next event starts; text posts
//! run in the background. No event failure escapes the batch.

use crate::relay::classify::{classify, Decision};
use crate::relay::diagnostics::{UnclassifiedLog, UnclassifiedRecord};
use crate::relay::dispatch::WebhookDispatcher;
use crate::relay::media::{self, MediaStore};
use crate::relay::payload::{RelayBody, RelayKind, RelayPayload};
use crate::transport::{BatchKind, InboundEvent, MessageBatch, Transport};

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Media posted and accepted.
    Relayed(RelayKind),
    /// Media post failed; the payload is dropped.
    Dropped(RelayKind),
    /// Text post handed to a background task.
    Queued,
    GroupText,
    FromSelf,
    Unclassified,
}

/// The session an event batch belongs to.
pub struct RelayContext<'a> {
    pub session_id: &'a str,
    pub endpoint: &'a str,
    pub transport: &'a dyn Transport,
}

#[derive(Clone)]
pub struct RelayPipeline {
    media: MediaStore,
    diagnostics: UnclassifiedLog,
    dispatcher: WebhookDispatcher,
}

impl RelayPipeline {
    pub fn new(media: MediaStore, diagnostics: UnclassifiedLog, dispatcher: WebhookDispatcher) -> Self {
        Self {
            media,
            diagnostics,
            dispatcher,
        }
    }

    /// Process a batch. Only `notify` batches are relayed; one outcome per event, in order.
    pub async fn handle_batch(&self, ctx: &RelayContext<'_>, batch: &MessageBatch) -> Vec<Outcome> {
        if batch.kind != BatchKind::Notify {
            log::debug!(
                "session {}: skipping {} already-read message(s)",
                ctx.session_id,
                batch.events.len()
            );
            return Vec::new();
        }
        let mut outcomes = Vec::with_capacity(batch.events.len());
        for event in &batch.events {
            outcomes.push(self.handle_event(ctx, event).await);
        }
        outcomes
    }

    async fn handle_event(&self, ctx: &RelayContext<'_>, event: &InboundEvent) -> Outcome {
        match classify(event) {
            Decision::Image(m) => {
                let bytes = self.fetch_media(ctx, event).await;
                let encoded = media::encode(&m.mime_type, m.file_sha256.as_deref(), bytes.as_deref());
                self.relay_media(ctx, event, RelayBody::image(m, encoded)).await
            }
            Decision::Video(m) => {
                let bytes = self.fetch_media(ctx, event).await;
                let encoded = media::encode(&m.mime_type, m.file_sha256.as_deref(), bytes.as_deref());
                self.relay_media(ctx, event, RelayBody::video(m, encoded)).await
            }
            Decision::Document(m) => {
                let bytes = self.fetch_media(ctx, event).await;
                let encoded = media::encode(&m.mime_type, m.file_sha256.as_deref(), bytes.as_deref());
                self.relay_media(ctx, event, RelayBody::document(m, encoded)).await
            }
            Decision::Audio(m) => {
                let bytes = self.fetch_media(ctx, event).await;
                let encoded = media::encode(&m.mime_type, m.file_sha256.as_deref(), bytes.as_deref());
                self.relay_media(ctx, event, RelayBody::audio(m, encoded)).await
            }
            Decision::Text { body, persist } => {
                if persist {
                    let path = self.media.path_for(ctx.session_id, event, "txt");
                    match self.media.write(&path, body.as_bytes()).await {
                        Ok(()) => log::debug!("session {}: status text saved to {}", ctx.session_id, path.display()),
                        Err(e) => log::warn!("session {}: saving status text failed: {}", ctx.session_id, e),
                    }
                }
                log::info!(
                    "session {}: text from {} ({})",
                    ctx.session_id,
                    event.chat_id,
                    event.display_name()
                );
                let payload = RelayPayload::new(ctx.session_id, event, RelayBody::text(body));
                self.dispatcher
                    .dispatch_detached(ctx.endpoint.to_string(), payload);
                Outcome::Queued
            }
            Decision::GroupText(body) => {
                log::info!(
                    "session {}: group message in {} from {}: {}",
                    ctx.session_id,
                    event.chat_id,
                    event.display_name(),
                    body
                );
                Outcome::GroupText
            }
            Decision::FromSelf => {
                log::debug!(
                    "session {}: sent by this account to {}: {}",
                    ctx.session_id,
                    event.chat_id,
                    event.raw
                );
                Outcome::FromSelf
            }
            Decision::Unclassified => {
                log::debug!("session {}: unclassified event: {}", ctx.session_id, event.raw);
                let record = UnclassifiedRecord {
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    session_id: ctx.session_id.to_string(),
                    sender: event.chat_id.clone(),
                    display_name: event.push_name.clone(),
                    payload: event.raw.clone(),
                };
                if let Err(e) = self.diagnostics.append(&record).await {
                    log::warn!(
                        "session {}: writing {} failed: {}",
                        ctx.session_id,
                        self.diagnostics.path().display(),
                        e
                    );
                }
                Outcome::Unclassified
            }
        }
    }

    /// Download and store an event's media. None when the download failed.
    async fn fetch_media(&self, ctx: &RelayContext<'_>, event: &InboundEvent) -> Option<Vec<u8>> {
        let bytes = match ctx.transport.download_media(event).await {
            Ok(b) => b,
            Err(e) => {
                log::warn!(
                    "session {}: media download for {} failed: {}",
                    ctx.session_id,
                    event.id,
                    e
                );
                return None;
            }
        };
        let path = self
            .media
            .path_for(ctx.session_id, event, &media::extension(&event.content));
        match self.media.write(&path, &bytes).await {
            Ok(()) => log::debug!("session {}: media saved to {}", ctx.session_id, path.display()),
            Err(e) => log::warn!(
                "session {}: saving media to {} failed: {}",
                ctx.session_id,
                path.display(),
                e
            ),
        }
        Some(bytes)
    }

    async fn relay_media(&self, ctx: &RelayContext<'_>, event: &InboundEvent, body: RelayBody) -> Outcome {
        let kind = body.kind();
        let payload = RelayPayload::new(ctx.session_id, event, body);
        match self.dispatcher.dispatch(ctx.endpoint, &payload).await {
            Ok(()) => Outcome::Relayed(kind),
            Err(e) => {
                log::warn!(
                    "session {}: webhook delivery of {} to {} failed: {}",
                    ctx.session_id,
                    event.id,
                    ctx.endpoint,
                    e
                );
                Outcome::Dropped(kind)
            }
        }
    }
}
