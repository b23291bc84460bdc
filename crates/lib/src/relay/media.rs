//! Received media on disk and its wire encoding.
//!
//! Layout: `<root>/<event id>.<ext>` for ordinary chats and
//! `<root>/status/<session>_<display name>_<event id>.<ext>` for status broadcasts.
//! Directories are created on first write.

use crate::relay::payload::EncodedMedia;
use crate::transport::{ChatKind, InboundEvent, MessageContent};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

const STATUS_DIR: &str = "status";
const UNNAMED: &str = "unnamed";

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Target path for an event's media (or status text) with extension `ext`.
    pub fn path_for(&self, session_id: &str, event: &InboundEvent, ext: &str) -> PathBuf {
        let event_id = path_safe(&event.id);
        if event.chat_kind() == ChatKind::Status {
            let name = event
                .push_name
                .as_deref()
                .filter(|n| !n.is_empty())
                .unwrap_or(UNNAMED);
            self.root.join(STATUS_DIR).join(format!(
                "{}_{}_{}.{}",
                session_id,
                path_safe(name),
                event_id,
                ext
            ))
        } else {
            self.root.join(format!("{}.{}", event_id, ext))
        }
    }

    pub async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await
    }
}

/// Keep a value usable as one path component.
fn path_safe(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    cleaned.replace("..", "_")
}

/// File extension for an event's content.
pub fn extension(content: &MessageContent) -> String {
    match content {
        MessageContent::Image(_) => "jpg".to_string(),
        MessageContent::Video(_) => "mp4".to_string(),
        MessageContent::Audio(a) => {
            if a.mime_type.contains("ogg") {
                "ogg".to_string()
            } else {
                "mp3".to_string()
            }
        }
        MessageContent::Document(d) => d
            .file_name
            .as_deref()
            .and_then(|n| Path::new(n).extension())
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(path_safe)
            .unwrap_or_else(|| "pdf".to_string()),
        MessageContent::Text(_) | MessageContent::ExtendedText(_) | MessageContent::Unrecognized => {
            "txt".to_string()
        }
    }
}

/// `data:<mime>;base64,<payload>`.
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Encode downloaded bytes for the envelope. The declared hash wins; otherwise the base64
/// SHA-256 of the bytes. No bytes means an empty data field.
pub fn encode(mime_type: &str, declared_sha256: Option<&str>, bytes: Option<&[u8]>) -> EncodedMedia {
    let sha256 = declared_sha256.map(str::to_string).or_else(|| {
        bytes.map(|b| base64::engine::general_purpose::STANDARD.encode(Sha256::digest(b)))
    });
    EncodedMedia {
        data_uri: bytes.map(|b| data_uri(mime_type, b)).unwrap_or_default(),
        sha256,
    }
}
