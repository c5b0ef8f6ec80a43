//! Run configuration shared by single-file and batch operations

use crate::error::{ErrorCategory, LayercryptError, Result};
use crate::pipeline::validate_layer_count;
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Layers applied when the caller does not ask for a specific count
pub const DEFAULT_LAYERS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Number of layers for encryption. Ignored when decrypting.
    pub layers: u32,
    /// Upper bound on files processed concurrently by a batch.
    pub jobs: usize,
    /// Remove each input file once its output has been committed.
    pub delete_original: bool,
    /// Directory for derived output paths. Defaults to the input's directory.
    pub output_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            layers: DEFAULT_LAYERS,
            jobs: default_jobs(),
            delete_original: false,
            output_dir: None,
        }
    }
}

impl Settings {
    /// Reject unusable values before any file is touched.
    pub fn validate(&self) -> Result<()> {
        validate_layer_count(self.layers)?;
        if self.jobs == 0 {
            return Err(LayercryptError::new(
                ErrorCategory::User,
                "worker count must be at least 1",
            ));
        }
        if let Some(dir) = &self.output_dir {
            if !dir.is_dir() {
                return Err(LayercryptError::new(
                    ErrorCategory::User,
                    format!("output directory {} does not exist", dir.display()),
                ));
            }
        }
        Ok(())
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
