//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::ManagerError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, ManagerError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, ManagerError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write string to file
    pub async fn write_string(&self, contents: &str) -> Result<(), ManagerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Write JSON to file
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), ManagerError> {
        let contents = serde_json::to_string_pretty(value)?;
        self.write_string(&contents).await
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), ManagerError> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }

    /// Atomic replacement: write a temporary sibling, then rename over the
    /// target. World-readable (0644) on Unix.
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), ManagerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Atomic JSON replacement
    pub async fn write_json_atomic<T: Serialize>(&self, value: &T) -> Result<(), ManagerError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }
}
