//! File-backed key-value store: one JSON file per key.
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash mid-write leaves the previous value intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{KeyValueStore, StoreError, StoreKey};

/// Directory name used under the platform data directory.
const APP_DIR: &str = "lifeline";

/// Store rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a store under the platform data directory
    /// (e.g. `~/.local/share/lifeline`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the platform has no data directory.
    pub fn in_default_location() -> Result<Self, StoreError> {
        let base = dirs::data_dir()
            .ok_or_else(|| StoreError::Unavailable("no data directory on this platform".into()))?;
        Ok(Self::new(base.join(APP_DIR)))
    }

    /// The directory holding the record files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: StoreKey) -> PathBuf {
        self.root.join(format!("{}.json", key.as_str()))
    }
}

impl KeyValueStore for FileStore {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::ReadFailed {
                key,
                reason: e.to_string(),
            }),
        }
    }

    async fn put(&self, key: StoreKey, value: String) -> Result<(), StoreError> {
        let write_failed = |e: std::io::Error| StoreError::WriteFailed {
            key,
            reason: e.to_string(),
        };
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(write_failed)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await.map_err(write_failed)?;
        tokio::fs::rename(&tmp, &path).await.map_err(write_failed)
    }

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::WriteFailed {
                key,
                reason: e.to_string(),
            }),
        }
    }
}
