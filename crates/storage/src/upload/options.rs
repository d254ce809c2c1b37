//! Upload engine configuration.

use std::path::PathBuf;

use rusty_uploader_common::{
    DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE, DEFAULT_UPLOAD_THREADS, DEFAULT_WINDOW_SIZE,
    MAX_SINGLE_PUT_SIZE,
};

use crate::checkpoint::default_checkpoint_dir;
use crate::error::StorageError;

/// Options for an upload run.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Number of concurrent transfer workers.
    pub threads: usize,
    /// Requested size of each multipart part.
    pub part_size: u64,
    /// Files larger than this use a multipart upload. At most 5 GiB.
    pub multipart_threshold: u64,
    /// Byte budget for parts of one file in flight at once.
    pub window_size: u64,
    /// Where checkpoints are kept; `None` uses the user cache directory.
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            threads: DEFAULT_UPLOAD_THREADS,
            part_size: DEFAULT_PART_SIZE,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            window_size: DEFAULT_WINDOW_SIZE,
            checkpoint_dir: None,
        }
    }
}

impl UploadOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent workers.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the part size in bytes.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Set the part size from a human readable string such as `128MiB`.
    ///
    /// # Errors
    /// `InvalidConfig` if the string is not a byte size.
    pub fn with_part_size_str(mut self, part_size: &str) -> Result<Self, StorageError> {
        self.part_size = parse_byte_size(part_size)?;
        Ok(self)
    }

    /// Set the multipart threshold in bytes.
    pub fn with_multipart_threshold(mut self, threshold: u64) -> Self {
        self.multipart_threshold = threshold;
        self
    }

    /// Set the in-flight window in bytes.
    pub fn with_window_size(mut self, window_size: u64) -> Self {
        self.window_size = window_size;
        self
    }

    /// Set the checkpoint directory.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    /// Checkpoint directory to use.
    ///
    /// # Errors
    /// `InvalidConfig` if none is set and the platform has no cache directory.
    pub fn resolved_checkpoint_dir(&self) -> Result<PathBuf, StorageError> {
        self.checkpoint_dir
            .clone()
            .or_else(default_checkpoint_dir)
            .ok_or_else(|| StorageError::InvalidConfig {
                message: "no checkpoint directory configured and no user cache directory"
                    .to_string(),
            })
    }

    /// Check the options for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.threads == 0 {
            return Err(StorageError::InvalidConfig {
                message: "threads must be greater than zero".to_string(),
            });
        }
        if self.part_size == 0 {
            return Err(StorageError::InvalidConfig {
                message: "part size must be greater than zero".to_string(),
            });
        }
        if self.window_size == 0 {
            return Err(StorageError::InvalidConfig {
                message: "window size must be greater than zero".to_string(),
            });
        }
        if self.multipart_threshold > MAX_SINGLE_PUT_SIZE {
            return Err(StorageError::InvalidConfig {
                message: format!(
                    "multipart threshold {} exceeds the single PUT limit {}",
                    self.multipart_threshold, MAX_SINGLE_PUT_SIZE
                ),
            });
        }
        Ok(())
    }
}

/// Parse a byte size like `128MiB`, `5MB`, `1.5 GiB` or `4096`.
///
/// Units are case-insensitive. `K`/`KB`, `M`/`MB`, ... are powers of 1000;
/// `Ki`/`KiB`, `Mi`/`MiB`, ... are powers of 1024.
pub fn parse_byte_size(input: &str) -> Result<u64, StorageError> {
    let invalid = || StorageError::InvalidConfig {
        message: format!("invalid byte size: {:?}", input),
    };

    let trimmed: &str = input.trim();
    let split: usize = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number.parse::<f64>().map_err(|_| invalid())?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "ki" | "kib" => 1 << 10,
        "m" | "mb" => 1_000_000,
        "mi" | "mib" => 1 << 20,
        "g" | "gb" => 1_000_000_000,
        "gi" | "gib" => 1 << 30,
        "t" | "tb" => 1_000_000_000_000,
        "ti" | "tib" => 1 << 40,
        _ => return Err(invalid()),
    };

    let bytes: f64 = value * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}
