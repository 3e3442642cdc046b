//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DeckhandError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout of a deckhand instance
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Snapshot of the record store
    pub fn store_file(&self) -> File {
        File::new(self.base_dir.join("store.json"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Archive of applied manifests
    pub fn manifests_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("manifests"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), DeckhandError> {
        Dir::new(&self.base_dir).create().await?;
        self.logs_dir().create().await?;
        self.manifests_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/var/lib/deckhand")
    }
}
