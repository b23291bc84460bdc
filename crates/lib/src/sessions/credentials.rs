//! Credential directories: one per session id, contents owned by the transport.

use crate::transport::CredentialUpdate;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Write updated credential material. Synchronous: the update is on disk before the
    /// session's next event is processed.
    pub fn persist(&self, id: &str, update: &CredentialUpdate) -> io::Result<()> {
        let name = update.file.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(|c| c == '/' || c == '\\') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid credential file name: {:?}", name),
            ));
        }
        let dir = self.dir(id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(name), &update.data)
    }

    /// Remove the whole credential directory. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> io::Result<bool> {
        match tokio::fs::remove_dir_all(self.dir(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
