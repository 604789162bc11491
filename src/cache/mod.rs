//! On-disk result cache
//!
//! A flat directory of files named `<sha256-hex>.<format>`. The hash covers
//! the full serialized [`TransformOptions`], so any differing field yields a
//! different file. Presence of the file is the only hit signal; entries are
//! never evicted by this process.
//!
//! Writers stage output in `<name>.<uuid>.tmp` and rename into place, so a
//! reader never observes a half-written entry. A [`StagedFile`] that is never
//! committed removes itself when dropped, including when the job task unwinds.
//! Concurrent writers for the same key resolve as last-writer-wins.

use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::options::TransformOptions;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// SHA-256 hex digest of the options, serialized with sorted keys
pub fn fingerprint(options: &TransformOptions) -> Result<String, CacheError> {
    // Value's object map is ordered, which makes the encoding field-order independent
    let value = serde_json::to_value(options)?;
    let encoded = serde_json::to_vec(&value)?;

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(hex::encode(hasher.finalize()))
}

/// A staging file that is deleted on drop unless committed
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed staged cache file");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove staged cache file"
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    directory: PathBuf,
}

impl DiskCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Create the cache directory if it does not exist yet
    pub async fn ensure_dir(&self) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        Ok(())
    }

    /// `<fingerprint>.<format>`
    pub fn file_name(&self, options: &TransformOptions) -> Result<String, CacheError> {
        Ok(format!("{}.{}", fingerprint(options)?, options.format()))
    }

    pub fn path_for(&self, options: &TransformOptions) -> Result<PathBuf, CacheError> {
        Ok(self.directory.join(self.file_name(options)?))
    }

    pub async fn contains(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Unique staging path next to the final entry
    pub fn temp_path_for(&self, final_path: &Path) -> PathBuf {
        let file_name = final_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.directory
            .join(format!("{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
    }

    /// Reserve a staging file for `final_path`
    pub fn stage(&self, final_path: &Path) -> StagedFile {
        StagedFile {
            path: self.temp_path_for(final_path),
            committed: false,
        }
    }

    /// Atomically move a staged file into place. On error the staged file is
    /// dropped and removed.
    pub async fn commit(&self, mut staged: StagedFile, final_path: &Path) -> Result<(), CacheError> {
        tokio::fs::rename(&staged.path, final_path).await?;
        staged.committed = true;
        Ok(())
    }
}
