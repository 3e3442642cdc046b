//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::DeckhandError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), DeckhandError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Reference a file inside this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }
}
