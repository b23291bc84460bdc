//! Classification of one inbound event. First match wins:
//! media (image, video, allow-listed document, audio; never for newsletters), then text,
//! then self-sent, then unclassified.

use crate::transport::{AudioMedia, ChatKind, DocumentMedia, InboundEvent, MessageContent, VisualMedia};

/// Document mime types that are downloaded and relayed.
pub const DOCUMENT_MIME_ALLOWLIST: [&str; 5] = [
    "application/pdf",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/csv",
    "text/plain",
];

pub fn is_allowed_document(mime_type: &str) -> bool {
    DOCUMENT_MIME_ALLOWLIST.contains(&mime_type)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision<'a> {
    Image(&'a VisualMedia),
    Video(&'a VisualMedia),
    Document(&'a DocumentMedia),
    Audio(&'a AudioMedia),
    /// Relay as text; `persist` when the event is a status broadcast.
    Text { body: &'a str, persist: bool },
    /// Group chat text: logged only.
    GroupText(&'a str),
    /// Sent by this account with nothing to relay.
    FromSelf,
    Unclassified,
}

pub fn classify(event: &InboundEvent) -> Decision<'_> {
    let chat = event.chat_kind();

    if chat != ChatKind::Newsletter {
        match &event.content {
            MessageContent::Image(m) => return Decision::Image(m),
            MessageContent::Video(m) => return Decision::Video(m),
            MessageContent::Document(m) if is_allowed_document(&m.mime_type) => {
                return Decision::Document(m)
            }
            MessageContent::Audio(m) => return Decision::Audio(m),
            _ => {}
        }
    }

    if let Some(body) = extractable_text(&event.content) {
        return if chat == ChatKind::Group {
            Decision::GroupText(body)
        } else {
            Decision::Text {
                body,
                persist: chat == ChatKind::Status,
            }
        };
    }

    if event.from_me {
        Decision::FromSelf
    } else {
        Decision::Unclassified
    }
}

/// Text body, extended text, or an image/video caption that no media case consumed.
fn extractable_text(content: &MessageContent) -> Option<&str> {
    match content {
        MessageContent::Text(t) | MessageContent::ExtendedText(t) => Some(t),
        MessageContent::Image(m) | MessageContent::Video(m) => m.caption.as_deref(),
        MessageContent::Document(_) | MessageContent::Audio(_) | MessageContent::Unrecognized => None,
    }
}
