//! Append-only diagnostic log of events the classifier could not map (JSON Lines).

use fs2::FileExt;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnclassifiedRecord {
    pub timestamp: String,
    pub session_id: String,
    pub sender: String,
    pub display_name: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct UnclassifiedLog {
    path: PathBuf,
}

impl UnclassifiedLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub async fn append(&self, record: &UnclassifiedRecord) -> io::Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.lock_exclusive()?;
    let result = file.write_all(line.as_bytes()).and_then(|_| file.flush());
    let _ = file.unlock();
    result
}
