//! Resumable multipart upload engine for S3-compatible object stores.
//!
//! This crate is backend-agnostic: it drives uploads through the
//! [`StorageClient`] trait, which the `rusty-uploader-storage-s3` crate
//! implements on the AWS SDK.
//!
//! # Checkpoints
//!
//! Progress of every multipart upload is persisted in a small SQLite database
//! per file, so an interrupted run can continue where it stopped. Before a
//! checkpoint is reused it is reconciled with the parts the store actually
//! holds; a stale checkpoint is discarded and the upload restarts.
//!
//! # Concurrency
//!
//! A fixed pool of workers transfers parts. Per file, a sliding window bounds
//! the bytes in flight. A single coordinator task owns all per-file state and
//! is the only writer of checkpoints.

pub mod checkpoint;
mod error;
pub mod monitor;
mod parts;
mod presigned;
mod traits;
mod types;
pub mod upload;
mod window;

pub use checkpoint::{
    default_checkpoint_dir, Checkpoint, CheckpointBackend, CheckpointError, CheckpointKey,
    CheckpointStore, SqliteCheckpointStore,
};
pub use error::{StorageError, UploadFailure};
pub use monitor::{
    MonitorEntry, MonitorEvent, MonitorHandle, MonitorMode, MonitorTable, ProgressMonitor,
};
pub use parts::{upload_strategy, PartLayout, PartRange, UploadStrategy};
pub use presigned::{parse_tagging, parse_upload_url};
pub use traits::{ListedPart, PartBody, StorageClient};
pub use types::{
    content_type_for_path, encode_tagging, AwsCredentials, CompletedPart, FileId, FileInfo,
    FileSummary, ObjectTags, RemoteFile, RetrySettings, StorageSettings, UploadReport,
    UploadRequest, UploadStatus, UploadTarget,
};
pub use upload::{
    checksum_sha256, parse_byte_size, TaskOutput, TaskResult, UploadManager, UploadOptions,
    UploadTask,
};
pub use window::PartWindow;
