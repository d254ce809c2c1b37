//! Error types for storage operations.

use std::path::{Path, PathBuf};

use rusty_uploader_common::PathError;
use thiserror::Error;

use crate::checkpoint::CheckpointError;

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Object or multipart upload not found in the store.
    #[error("Object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Access denied.
    #[error("Access denied to s3://{bucket}/{key}: {message}")]
    AccessDenied {
        bucket: String,
        key: String,
        message: String,
    },

    /// Uploaded size does not match the local file size.
    #[error("Size mismatch for {key}: expected {expected} bytes, got {actual}")]
    SizeMismatch { key: String, expected: u64, actual: u64 },

    /// Integrity checksum echoed by the store differs from the one sent.
    #[error("Checksum mismatch for part {part_number}: sent {expected}, store reported {actual}")]
    ChecksumMismatch {
        part_number: u32,
        expected: String,
        actual: String,
    },

    /// Network error.
    #[error("Network error: {message}")]
    NetworkError { message: String, retryable: bool },

    /// Local I/O error.
    #[error("I/O error for {path}: {message}")]
    IoError { path: String, message: String },

    /// Operation cancelled by user.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Pre-signed upload URL could not be interpreted.
    #[error("Invalid upload url: {message}")]
    InvalidUploadUrl { message: String },

    /// Object is larger than a multipart upload can hold.
    #[error("Upload size {size} exceeds the maximum allowed object size {max}")]
    ObjectTooLarge { size: u64, max: u64 },

    /// Checkpoint persistence failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl StorageError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::NetworkError { retryable, .. } => *retryable,
            StorageError::NotFound { .. } => false,
            StorageError::AccessDenied { .. } => false,
            StorageError::SizeMismatch { .. } => false,
            StorageError::ChecksumMismatch { .. } => false,
            StorageError::IoError { .. } => false,
            StorageError::Cancelled => false,
            StorageError::InvalidConfig { .. } => false,
            StorageError::InvalidUploadUrl { .. } => false,
            StorageError::ObjectTooLarge { .. } => false,
            StorageError::Checkpoint(_) => false,
            StorageError::Other { .. } => false,
        }
    }

    /// Create an IoError for a path.
    ///
    /// # Arguments
    /// * `path` - Path where the error occurred
    /// * `err` - The underlying IO error
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        StorageError::IoError {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError {
            path: String::new(),
            message: err.to_string(),
        }
    }
}

impl From<CheckpointError> for StorageError {
    fn from(err: CheckpointError) -> Self {
        StorageError::Checkpoint(err.to_string())
    }
}

impl From<PathError> for StorageError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::InvalidPath { path } => StorageError::IoError {
                path,
                message: "invalid path".to_string(),
            },
            PathError::IoError { path, message } => StorageError::IoError { path, message },
        }
    }
}

/// A file that did not make it to the store during a run.
#[derive(Debug, Clone)]
pub struct UploadFailure {
    /// Local path of the file.
    pub path: PathBuf,
    /// The error that stopped it.
    pub error: StorageError,
}

impl UploadFailure {
    /// Create a new upload failure.
    pub fn new(path: impl Into<PathBuf>, error: StorageError) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_retryable_flag() {
        let err: StorageError = StorageError::NetworkError {
            message: "timeout".to_string(),
            retryable: true,
        };
        assert!(err.is_retryable());
        assert!(!StorageError::Cancelled.is_retryable());
    }

    #[test]
    fn test_size_mismatch_message() {
        let err: StorageError = StorageError::SizeMismatch {
            key: "records/a.bin".to_string(),
            expected: 500,
            actual: 400,
        };
        assert_eq!(
            err.to_string(),
            "Size mismatch for records/a.bin: expected 500 bytes, got 400"
        );
    }

    #[test]
    fn test_io_error_keeps_path() {
        let err: StorageError = StorageError::io(
            Path::new("/data/a.bin"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("/data/a.bin"));
    }
}
