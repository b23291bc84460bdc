//! Session config store: one JSON record per session id (`<dir>/<id>.json`) holding the
//! webhook URL or the workspace/channel pair the session relays to.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Per-session relay destination settings. Accepts the legacy keys (`webhook`, `workspaceID`, `canalID`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default, alias = "webhook", skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, alias = "workspaceID", skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, alias = "canalID", skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl SessionConfig {
    /// Workspace + channel wins, then the custom webhook, then `base`.
    pub fn endpoint(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        match (non_empty(&self.workspace_id), non_empty(&self.channel_id)) {
            (Some(workspace), Some(channel)) => format!("{}/{}/{}", base, workspace, channel),
            _ => non_empty(&self.webhook_url)
                .map(str::to_string)
                .unwrap_or_else(|| base.to_string()),
        }
    }
}

/// Destination endpoint for a session; `base` when there is no config.
pub fn resolve_endpoint(config: Option<&SessionConfig>, base: &str) -> String {
    match config {
        Some(c) => c.endpoint(base),
        None => base.trim_end_matches('/').to_string(),
    }
}

/// File-backed store of session configs.
#[derive(Debug, Clone)]
pub struct SessionConfigStore {
    dir: PathBuf,
}

impl SessionConfigStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Config for `id`; None when no record exists. A malformed record is an error.
    pub async fn get(&self, id: &str) -> io::Result<Option<SessionConfig>> {
        let s = match tokio::fs::read_to_string(self.path(id)).await {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Write (replace) the record for `id`.
    pub async fn put(&self, id: &str, config: &SessionConfig) -> io::Result<()> {
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path(id), json).await
    }

    /// Remove the record for `id`. Returns whether one existed.
    pub async fn remove(&self, id: &str) -> io::Result<bool> {
        match tokio::fs::remove_file(self.path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
