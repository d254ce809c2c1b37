//! Resumable upload engine.
//!
//! An upload run is a small pipeline of tokio tasks:
//!
//! - the planner hashes each requested file, skips content the remote already
//!   has and reconciles multipart checkpoints with the store;
//! - the completion coordinator owns all file state, feeds parts through each
//!   file's part window into a bounded task queue and records results;
//! - a fixed pool of workers performs the PUTs.
//!
//! # Example
//!
//! ```ignore
//! use rusty_uploader_storage::{UploadManager, UploadOptions, UploadRequest};
//!
//! let manager = UploadManager::open(client, UploadOptions::default())?;
//! let report = manager.upload_files(requests).await;
//! if report.failed_count() > 0 {
//!     eprintln!("{}", report);
//! }
//! ```

mod completion;
mod options;
mod planner;
mod worker;

pub use options::{parse_byte_size, UploadOptions};
pub use worker::{checksum_sha256, TaskOutput, TaskResult, UploadTask};

use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::error::StorageError;
use crate::monitor::MonitorHandle;
use crate::traits::StorageClient;
use crate::types::{UploadReport, UploadRequest};

use completion::Coordinator;
use planner::{PlannedFile, Planner};

/// Uploads files to an S3-compatible store, resuming interrupted multipart
/// uploads from local checkpoints.
pub struct UploadManager {
    client: Arc<dyn StorageClient>,
    checkpoints: CheckpointStore,
    options: UploadOptions,
    monitor: MonitorHandle,
    cancel: CancellationToken,
}

impl UploadManager {
    /// Create a manager with an explicit checkpoint store.
    ///
    /// # Arguments
    /// * `client` - Storage client for S3 operations
    /// * `checkpoints` - Where multipart progress is persisted
    /// * `options` - Upload options
    ///
    /// # Errors
    /// `InvalidConfig` if the options fail validation.
    pub fn new(
        client: Arc<dyn StorageClient>,
        checkpoints: CheckpointStore,
        options: UploadOptions,
    ) -> Result<Self, StorageError> {
        options.validate()?;
        Ok(Self {
            client,
            checkpoints,
            options,
            monitor: MonitorHandle::hidden(),
            cancel: CancellationToken::new(),
        })
    }

    /// Create a manager using the SQLite checkpoint store in
    /// `options.checkpoint_dir` (or the user cache directory).
    pub fn open(
        client: Arc<dyn StorageClient>,
        options: UploadOptions,
    ) -> Result<Self, StorageError> {
        let dir = options.resolved_checkpoint_dir()?;
        let checkpoints: CheckpointStore = CheckpointStore::open_sqlite(dir)?;
        Self::new(client, checkpoints, options)
    }

    /// Report progress to a monitor.
    pub fn with_monitor(mut self, monitor: MonitorHandle) -> Self {
        self.monitor = monitor;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Upload every file produced by `requests`.
    ///
    /// Files are planned one at a time in stream order while earlier files
    /// transfer. Per-file errors never abort the run; they are collected in
    /// the returned report.
    pub async fn run<S>(&self, requests: S) -> UploadReport
    where
        S: Stream<Item = UploadRequest> + Send + 'static,
    {
        let threads: usize = self.options.threads;
        let (plan_tx, plan_rx) = mpsc::channel::<PlannedFile>(1);
        let (task_tx, task_rx) = mpsc::channel::<UploadTask>(threads);
        let (result_tx, result_rx) = mpsc::unbounded_channel::<TaskResult>();

        let planner: Planner = Planner::new(
            self.client.clone(),
            self.checkpoints.clone(),
            self.options.clone(),
            self.monitor.clone(),
            self.cancel.clone(),
        );
        let planner_task = tokio::spawn(planner.run(requests, plan_tx));

        let workers = worker::spawn_workers(
            threads,
            self.client.clone(),
            task_rx,
            result_tx,
            self.monitor.clone(),
            self.cancel.clone(),
        );

        let coordinator: Coordinator = Coordinator::new(
            self.client.clone(),
            self.checkpoints.clone(),
            self.monitor.clone(),
            self.options.window_size,
            self.cancel.clone(),
        );
        let report: UploadReport = coordinator.run(plan_rx, task_tx, result_rx).await;

        if let Err(e) = planner_task.await {
            log::warn!("Upload planner task failed: {}", e);
        }
        for worker in workers {
            if let Err(e) = worker.await {
                log::warn!("Upload worker task failed: {}", e);
            }
        }
        report
    }

    /// Upload a fixed list of files.
    pub async fn upload_files(&self, requests: Vec<UploadRequest>) -> UploadReport {
        self.run(futures::stream::iter(requests)).await
    }
}
