//! Relay envelope posted to the webhook, in the cloud-messaging webhook shape:
//! `object` / `entry[].changes[].value.{metadata, contacts, messages}`.
//! Each message carries `type` plus exactly one matching content object.

use crate::transport::{AudioMedia, DocumentMedia, InboundEvent, VisualMedia};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayKind {
    Text,
    Image,
    Video,
    Document,
    Audio,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayPayload {
    object: &'static str,
    entry: Vec<Entry>,
}

#[derive(Debug, Clone, Serialize)]
struct Entry {
    id: String,
    changes: Vec<Change>,
}

#[derive(Debug, Clone, Serialize)]
struct Change {
    value: ChangeValue,
    field: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ChangeValue {
    messaging_product: &'static str,
    metadata: Metadata,
    contacts: Vec<Contact>,
    messages: Vec<RelayMessage>,
}

#[derive(Debug, Clone, Serialize)]
struct Metadata {
    display_phone_number: String,
    phone_number_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct Contact {
    profile: Profile,
    wa_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct Profile {
    name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayMessage {
    pub from: String,
    pub id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub body: RelayBody,
}

/// Content of one relayed message; serialized as `"type": "<kind>", "<kind>": { ... }`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayBody {
    Text { text: TextBody },
    Image { image: MediaBody },
    Video { video: MediaBody },
    Document { document: DocumentBody },
    Audio { audio: AudioBody },
}

#[derive(Debug, Clone, Serialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaBody {
    pub mime_type: String,
    pub sha256: Option<String>,
    pub caption: String,
    pub base64: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentBody {
    pub mime_type: String,
    pub sha256: Option<String>,
    pub file_name: Option<String>,
    pub base64: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioBody {
    pub mime_type: String,
    pub sha256: Option<String>,
    pub voice: bool,
    pub duration: String,
    pub base64: String,
}

/// Encoded media ready for the envelope: data URI (empty when the download failed) and hash.
#[derive(Debug, Clone, Default)]
pub struct EncodedMedia {
    pub data_uri: String,
    pub sha256: Option<String>,
}

impl RelayBody {
    pub fn text(body: impl Into<String>) -> Self {
        RelayBody::Text {
            text: TextBody { body: body.into() },
        }
    }

    pub fn image(media: &VisualMedia, encoded: EncodedMedia) -> Self {
        RelayBody::Image {
            image: visual_body(media, encoded),
        }
    }

    pub fn video(media: &VisualMedia, encoded: EncodedMedia) -> Self {
        RelayBody::Video {
            video: visual_body(media, encoded),
        }
    }

    pub fn document(media: &DocumentMedia, encoded: EncodedMedia) -> Self {
        RelayBody::Document {
            document: DocumentBody {
                mime_type: media.mime_type.clone(),
                sha256: encoded.sha256,
                file_name: media.file_name.clone(),
                base64: encoded.data_uri,
            },
        }
    }

    pub fn audio(media: &AudioMedia, encoded: EncodedMedia) -> Self {
        RelayBody::Audio {
            audio: AudioBody {
                mime_type: media.mime_type.clone(),
                sha256: encoded.sha256,
                voice: media.voice,
                duration: media.seconds.unwrap_or(0).to_string(),
                base64: encoded.data_uri,
            },
        }
    }

    pub fn kind(&self) -> RelayKind {
        match self {
            RelayBody::Text { .. } => RelayKind::Text,
            RelayBody::Image { .. } => RelayKind::Image,
            RelayBody::Video { .. } => RelayKind::Video,
            RelayBody::Document { .. } => RelayKind::Document,
            RelayBody::Audio { .. } => RelayKind::Audio,
        }
    }
}

fn visual_body(media: &VisualMedia, encoded: EncodedMedia) -> MediaBody {
    MediaBody {
        mime_type: media.mime_type.clone(),
        sha256: encoded.sha256,
        caption: media.caption.clone().unwrap_or_default(),
        base64: encoded.data_uri,
    }
}

impl RelayPayload {
    /// Wrap one event's content for `session_id`.
    pub fn new(session_id: &str, event: &InboundEvent, body: RelayBody) -> Self {
        let wa_id = event.sender_id().to_string();
        let message = RelayMessage {
            from: wa_id.clone(),
            id: event.id.clone(),
            timestamp: event.timestamp_string(),
            body,
        };
        Self {
            object: "whatsapp_business_account",
            entry: vec![Entry {
                id: session_id.to_string(),
                changes: vec![Change {
                    value: ChangeValue {
                        messaging_product: "whatsapp",
                        metadata: Metadata {
                            display_phone_number: session_id.to_string(),
                            phone_number_id: session_id.to_string(),
                        },
                        contacts: vec![Contact {
                            profile: Profile {
                                name: event.display_name().to_string(),
                            },
                            wa_id,
                        }],
                        messages: vec![message],
                    },
                    field: "messages",
                }],
            }],
        }
    }

    /// The single relayed message.
    pub fn message(&self) -> &RelayMessage {
        &self.entry[0].changes[0].value.messages[0]
    }

    pub fn kind(&self) -> RelayKind {
        self.message().body.kind()
    }
}
