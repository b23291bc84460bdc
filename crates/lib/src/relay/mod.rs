//! Message relay: classification, media pipeline, envelope, and webhook dispatch.

mod classify;
mod diagnostics;
mod dispatch;
mod media;
mod payload;
mod pipeline;

pub use classify::{classify, is_allowed_document, Decision, DOCUMENT_MIME_ALLOWLIST};
pub use diagnostics::{UnclassifiedLog, UnclassifiedRecord};
pub use dispatch::{DispatchError, WebhookDispatcher};
pub use media::MediaStore;
pub use payload::{RelayBody, RelayKind, RelayMessage, RelayPayload};
pub use pipeline::{Outcome, RelayContext, RelayPipeline};
