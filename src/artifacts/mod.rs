//! Temporary on-disk artifacts for uploaded images.
//!
//! The classifier reads images by path, so each upload is written to a
//! uniquely named file for the duration of one request. Release is
//! best-effort: a file that cannot be removed is logged and counted, never
//! reported to the caller.

use crate::config::ArtifactConfig;
use crate::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Random characters in each artifact name.
const NAME_ENTROPY: usize = 16;

/// Creates and removes upload artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    prefix: String,
    suffix: String,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::from_config(&ArtifactConfig::default())
    }
}

impl ArtifactStore {
    /// Creates a store writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let defaults = ArtifactConfig::default();
        Self {
            dir: dir.into(),
            prefix: defaults.prefix,
            suffix: defaults.suffix,
        }
    }

    /// Creates a store from configuration; the system temp dir when unset.
    #[must_use]
    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self {
            dir: config.dir.clone().unwrap_or_else(std::env::temp_dir),
            prefix: config.prefix.clone(),
            suffix: config.suffix.clone(),
        }
    }

    /// Sets the file name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the file name suffix.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Directory artifacts are created in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `bytes` to a new uniquely named file.
    ///
    /// Creation is exclusive, so concurrent requests never share a file. If
    /// the write fails the partial file is removed before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn acquire(&self, bytes: &[u8]) -> Result<TemporaryArtifact> {
        let mut file = tempfile::Builder::new()
            .prefix(&self.prefix)
            .suffix(&self.suffix)
            .rand_bytes(NAME_ENTROPY)
            .tempfile_in(&self.dir)
            .map_err(|e| Error::OperationFailed {
                operation: "artifact_create".to_string(),
                cause: format!("{}: {e}", self.dir.display()),
            })?;

        // Dropping the NamedTempFile on error deletes the partial file.
        file.write_all(bytes)
            .and_then(|()| file.flush())
            .map_err(|e| Error::OperationFailed {
                operation: "artifact_write".to_string(),
                cause: e.to_string(),
            })?;

        let (_, path) = file.keep().map_err(|e| Error::OperationFailed {
            operation: "artifact_persist".to_string(),
            cause: e.to_string(),
        })?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Artifact written");

        Ok(TemporaryArtifact {
            path,
            released: false,
        })
    }

    /// Deletes the artifact if it still exists. Never fails.
    pub fn release(&self, mut artifact: TemporaryArtifact) {
        artifact.remove();
    }
}

/// A file owned by exactly one in-flight request.
///
/// Removed by [`ArtifactStore::release`], or on drop if release never ran.
#[derive(Debug)]
pub struct TemporaryArtifact {
    path: PathBuf,
    released: bool,
}

impl TemporaryArtifact {
    /// Path handed to the classifier.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Artifact deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => {
                metrics::counter!("artifact_cleanup_failures_total").increment(1);
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not delete artifact"
                );
            },
        }
    }
}

impl Drop for TemporaryArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}
