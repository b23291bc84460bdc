//! Inbound message model: one raw record from the transport, decided into a tagged content
//! variant once at ingestion so the classifier can match it exhaustively.

use serde_json::Value;

/// Where a chat id points: a group, a newsletter, a status broadcast, or a direct chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Group,
    Newsletter,
    Status,
    Direct,
}

impl ChatKind {
    /// Classify a chat id (e.g. `5511999@s.whatsapp.net`, `123-456@g.us`, `status@broadcast`).
    pub fn of(chat_id: &str) -> Self {
        if chat_id.contains("@g.us") {
            ChatKind::Group
        } else if chat_id.contains("newsletter") {
            ChatKind::Newsletter
        } else if chat_id.contains("status") {
            ChatKind::Status
        } else {
            ChatKind::Direct
        }
    }
}

/// Media attributes shared by images and videos.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisualMedia {
    pub mime_type: String,
    pub file_sha256: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMedia {
    pub mime_type: String,
    pub file_sha256: Option<String>,
    pub file_name: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioMedia {
    pub mime_type: String,
    pub file_sha256: Option<String>,
    /// Push-to-talk (voice note).
    pub voice: bool,
    pub seconds: Option<u64>,
}

/// Content union of an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// Plain conversation text.
    Text(String),
    /// Extended text (links, quotes, mentions); only the text is kept.
    ExtendedText(String),
    Image(VisualMedia),
    Video(VisualMedia),
    Document(DocumentMedia),
    Audio(AudioMedia),
    /// Anything else (reactions, stickers, protocol messages, missing body).
    Unrecognized,
}

/// One inbound message record.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub id: String,
    /// Chat the event came from (remote jid).
    pub chat_id: String,
    pub from_me: bool,
    /// Sender display name, when the transport knows it.
    pub push_name: Option<String>,
    /// Seconds since epoch.
    pub timestamp: Option<u64>,
    pub content: MessageContent,
    /// The event as the transport delivered it; kept for diagnostics and media download.
    pub raw: Value,
}

impl InboundEvent {
    /// Parse the WhatsApp-web JSON shape (`key`, `pushName`, `messageTimestamp`, `message`).
    /// Returns None when the record has no `key.remoteJid`.
    pub fn from_wire(raw: Value) -> Option<Self> {
        let key = raw.get("key")?;
        let chat_id = key.get("remoteJid")?.as_str()?.to_string();
        let id = key
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let from_me = key.get("fromMe").and_then(Value::as_bool).unwrap_or(false);
        let push_name = raw
            .get("pushName")
            .and_then(Value::as_str)
            .map(str::to_string);
        let timestamp = raw.get("messageTimestamp").and_then(parse_timestamp);
        let content = raw
            .get("message")
            .map(parse_content)
            .unwrap_or(MessageContent::Unrecognized);
        Some(Self {
            id,
            chat_id,
            from_me,
            push_name,
            timestamp,
            content,
            raw,
        })
    }

    pub fn chat_kind(&self) -> ChatKind {
        ChatKind::of(&self.chat_id)
    }

    /// User part of the chat id (text before `@`).
    pub fn sender_id(&self) -> &str {
        self.chat_id.split('@').next().unwrap_or_default()
    }

    /// Display name or empty string.
    pub fn display_name(&self) -> &str {
        self.push_name.as_deref().unwrap_or_default()
    }

    /// Timestamp as decimal seconds, empty when absent.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.map(|t| t.to_string()).unwrap_or_default()
    }
}

/// Timestamps arrive as a number, a decimal string, or a `{low, high}` long.
fn parse_timestamp(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(o) => {
            let low = o.get("low")?.as_i64()? as u32 as u64;
            let high = o.get("high").and_then(Value::as_i64).unwrap_or(0) as u32 as u64;
            Some((high << 32) | low)
        }
        _ => None,
    }
}

fn str_field(obj: &Value, name: &str) -> Option<String> {
    obj.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn u64_field(obj: &Value, name: &str) -> Option<u64> {
    obj.get(name).and_then(parse_timestamp)
}

/// Decide the content variant. Order matters: text bodies first, then media in the order the
/// classifier checks them.
fn parse_content(message: &Value) -> MessageContent {
    if let Some(text) = str_field(message, "conversation") {
        return MessageContent::Text(text);
    }
    if let Some(text) = message
        .get("extendedTextMessage")
        .and_then(|m| str_field(m, "text"))
    {
        return MessageContent::ExtendedText(text);
    }
    if let Some(m) = message.get("imageMessage").filter(|m| m.is_object()) {
        return MessageContent::Image(visual(m));
    }
    if let Some(m) = message.get("videoMessage").filter(|m| m.is_object()) {
        return MessageContent::Video(visual(m));
    }
    if let Some(m) = message.get("documentMessage").filter(|m| m.is_object()) {
        return MessageContent::Document(DocumentMedia {
            mime_type: str_field(m, "mimetype").unwrap_or_default(),
            file_sha256: str_field(m, "fileSha256"),
            file_name: str_field(m, "fileName"),
            caption: str_field(m, "caption"),
        });
    }
    if let Some(m) = message.get("audioMessage").filter(|m| m.is_object()) {
        return MessageContent::Audio(AudioMedia {
            mime_type: str_field(m, "mimetype").unwrap_or_default(),
            file_sha256: str_field(m, "fileSha256"),
            voice: m.get("ptt").and_then(Value::as_bool).unwrap_or(false),
            seconds: u64_field(m, "seconds"),
        });
    }
    MessageContent::Unrecognized
}

fn visual(m: &Value) -> VisualMedia {
    VisualMedia {
        mime_type: str_field(m, "mimetype").unwrap_or_default(),
        file_sha256: str_field(m, "fileSha256"),
        caption: str_field(m, "caption"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_kinds() {
        assert_eq!(ChatKind::of("5511999@s.whatsapp.net"), ChatKind::Direct);
        assert_eq!(ChatKind::of("1203-99@g.us"), ChatKind::Group);
        assert_eq!(ChatKind::of("status@broadcast"), ChatKind::Status);
        assert_eq!(ChatKind::of("12036@newsletter"), ChatKind::Newsletter);
    }

    #[test]
    fn parses_conversation_text() {
        let ev = InboundEvent::from_wire(json!({
            "key": { "remoteJid": "551199@s.whatsapp.net", "fromMe": false, "id": "ABC" },
            "pushName": "Ana",
            "messageTimestamp": 1700000000u64,
            "message": { "conversation": "hi" }
        }))
        .unwrap();
        assert_eq!(ev.id, "ABC");
        assert_eq!(ev.sender_id(), "551199");
        assert_eq!(ev.display_name(), "Ana");
        assert_eq!(ev.timestamp_string(), "1700000000");
        assert_eq!(ev.content, MessageContent::Text("hi".into()));
    }

    #[test]
    fn parses_image_with_caption_and_long_timestamp() {
        let ev = InboundEvent::from_wire(json!({
            "key": { "remoteJid": "551199@s.whatsapp.net", "id": "IMG1" },
            "messageTimestamp": { "low": 1700000000, "high": 0, "unsigned": true },
            "message": { "imageMessage": { "mimetype": "image/jpeg", "caption": "look", "fileSha256": "aGFzaA==" } }
        }))
        .unwrap();
        assert_eq!(ev.timestamp, Some(1_700_000_000));
        match ev.content {
            MessageContent::Image(img) => {
                assert_eq!(img.mime_type, "image/jpeg");
                assert_eq!(img.caption.as_deref(), Some("look"));
                assert_eq!(img.file_sha256.as_deref(), Some("aGFzaA=="));
            }
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[test]
    fn missing_body_is_unrecognized_and_timestamp_defaults_empty() {
        let ev = InboundEvent::from_wire(json!({
            "key": { "remoteJid": "551199@s.whatsapp.net", "fromMe": true, "id": "X" }
        }))
        .unwrap();
        assert!(ev.from_me);
        assert_eq!(ev.content, MessageContent::Unrecognized);
        assert_eq!(ev.timestamp_string(), "");
    }

    #[test]
    fn record_without_chat_id_is_rejected() {
        assert!(InboundEvent::from_wire(json!({ "key": { "id": "X" } })).is_none());
    }

    #[test]
    fn audio_voice_note() {
        let ev = InboundEvent::from_wire(json!({
            "key": { "remoteJid": "551199@s.whatsapp.net", "id": "A1" },
            "message": { "audioMessage": { "mimetype": "audio/ogg; codecs=opus", "ptt": true, "seconds": 7 } }
        }))
        .unwrap();
        assert_eq!(
            ev.content,
            MessageContent::Audio(AudioMedia {
                mime_type: "audio/ogg; codecs=opus".into(),
                file_sha256: None,
                voice: true,
                seconds: Some(7),
            })
        );
    }
}
