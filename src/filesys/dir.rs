//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::ManagerError;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), ManagerError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), ManagerError> {
        fs::remove_dir_all(&self.path).await?;
        Ok(())
    }

    /// List names of subdirectories, sorted
    pub async fn list_dir_names(&self) -> Result<Vec<String>, ManagerError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> crate::filesys::file::File {
        crate::filesys::file::File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
