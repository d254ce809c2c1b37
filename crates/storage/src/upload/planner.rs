//! Per-file upload planning.
//!
//! The planner turns each [`UploadRequest`] into a [`PlannedFile`]: it hashes
//! the file, skips content the remote catalog already has, and for large
//! files decides whether an earlier multipart upload can be resumed.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rusty_uploader_common::{normalize_upload_path, sha256_file, PathError, MAX_OBJECT_SIZE};

use crate::checkpoint::{Checkpoint, CheckpointKey, CheckpointStore};
use crate::error::StorageError;
use crate::monitor::MonitorHandle;
use crate::parts::{upload_strategy, PartLayout, UploadStrategy};
use crate::traits::{ListedPart, StorageClient};
use crate::types::{
    content_type_for_path, FileId, FileInfo, UploadRequest, UploadStatus, UploadTarget,
};

use super::options::UploadOptions;

/// How a file will be transferred.
#[derive(Debug)]
pub(crate) enum Plan {
    /// Remote already has identical content.
    PreviouslyUploaded,
    /// One PUT of the whole file.
    SingleShot { reader: Arc<File> },
    /// Multipart upload, possibly resuming an earlier one.
    Multipart {
        key: CheckpointKey,
        checkpoint: Checkpoint,
        layout: PartLayout,
        reader: Arc<File>,
    },
}

/// A request after planning, handed to the completion coordinator.
#[derive(Debug)]
pub(crate) struct PlannedFile {
    pub id: FileId,
    pub info: FileInfo,
    pub target: UploadTarget,
    pub plan: Result<Plan, StorageError>,
}

pub(crate) struct Planner {
    client: Arc<dyn StorageClient>,
    checkpoints: CheckpointStore,
    options: UploadOptions,
    monitor: MonitorHandle,
    cancel: CancellationToken,
}

impl Planner {
    pub fn new(
        client: Arc<dyn StorageClient>,
        checkpoints: CheckpointStore,
        options: UploadOptions,
        monitor: MonitorHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            checkpoints,
            options,
            monitor,
            cancel,
        }
    }

    /// Plan every request in order, assigning sequential file ids.
    ///
    /// Stops at the end of the stream, on cancellation, or when the
    /// coordinator stops listening.
    pub async fn run<S>(self, requests: S, planned: mpsc::Sender<PlannedFile>)
    where
        S: Stream<Item = UploadRequest> + Send + 'static,
    {
        let mut requests = Box::pin(requests);
        let mut next_id: usize = 0;

        loop {
            let request: UploadRequest = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                request = requests.next() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let id: FileId = FileId(next_id);
            next_id += 1;

            let file: PlannedFile = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                file = self.plan(id, request) => file,
            };
            if planned.send(file).await.is_err() {
                break;
            }
        }
    }

    /// Plan a single file.
    pub async fn plan(&self, id: FileId, mut request: UploadRequest) -> PlannedFile {
        let normalized: Result<PathBuf, PathError> = normalize_upload_path(&request.path);
        let path: PathBuf = match &normalized {
            Ok(path) => path.clone(),
            Err(_) => request.path.clone(),
        };
        if request.target.content_type.is_none() {
            request.target.content_type = Some(content_type_for_path(&path));
        }
        let mut info: FileInfo = FileInfo {
            path: path.clone(),
            size: 0,
            sha256: String::new(),
            uploaded: 0,
            status: UploadStatus::Unprocessed,
        };
        self.monitor.add_file(id, path.clone());

        let plan: Result<Plan, StorageError> = match normalized {
            Ok(_) => self.prepare(id, &mut info, &request).await,
            Err(e) => Err(e.into()),
        };
        match &plan {
            Ok(Plan::PreviouslyUploaded) => {
                info.status = UploadStatus::PreviouslyUploaded;
                self.monitor.set_status(id, info.status);
            }
            Ok(_) => {
                info.status = UploadStatus::UploadInProgress;
                self.monitor.start_upload(id, info.size, info.uploaded);
            }
            Err(e) => {
                log::debug!("planning {} failed: {}", path.display(), e);
                info.status = UploadStatus::UploadFailed;
                self.monitor.set_status(id, info.status);
            }
        }

        PlannedFile {
            id,
            info,
            target: request.target,
            plan,
        }
    }

    async fn prepare(
        &self,
        id: FileId,
        info: &mut FileInfo,
        request: &UploadRequest,
    ) -> Result<Plan, StorageError> {
        let path: PathBuf = info.path.clone();

        let (sha256, size) = match &request.sha256 {
            Some(sha256) => {
                let metadata = tokio::fs::metadata(&path)
                    .await
                    .map_err(|e| StorageError::io(&path, e))?;
                (sha256.clone(), metadata.len())
            }
            None => {
                let hash_path: PathBuf = path.clone();
                tokio::task::spawn_blocking(move || sha256_file(&hash_path))
                    .await
                    .map_err(|e| StorageError::Other {
                        message: format!("hash task failed: {}", e),
                    })?
                    .map_err(|e| StorageError::io(&path, e))?
            }
        };
        info.sha256 = sha256;
        info.size = size;

        if let Some(remote) = &request.remote {
            if remote.sha256 == info.sha256 && remote.size == info.size {
                log::debug!("{} previously uploaded, skipping", path.display());
                return Ok(Plan::PreviouslyUploaded);
            }
        }

        if info.size > MAX_OBJECT_SIZE {
            return Err(StorageError::ObjectTooLarge {
                size: info.size,
                max: MAX_OBJECT_SIZE,
            });
        }

        match upload_strategy(info.size, self.options.multipart_threshold) {
            UploadStrategy::SingleShot => {
                let reader: Arc<File> = open_reader(&path)?;
                Ok(Plan::SingleShot { reader })
            }
            UploadStrategy::Multipart => {
                let layout: PartLayout = PartLayout::new(info.size, self.options.part_size)?;
                let key: CheckpointKey = CheckpointKey::new(
                    request.target.record_id(),
                    info.sha256.clone(),
                    path.display().to_string(),
                );
                let checkpoint: Checkpoint =
                    self.resume_or_initiate(id, &key, &request.target, &layout).await?;
                info.uploaded = checkpoint.uploaded_size;
                let reader: Arc<File> = open_reader(&path)?;
                Ok(Plan::Multipart {
                    key,
                    checkpoint,
                    layout,
                    reader,
                })
            }
        }
    }

    /// Reuse the stored checkpoint if the store still agrees with it,
    /// otherwise discard it and start a new multipart upload.
    async fn resume_or_initiate(
        &self,
        id: FileId,
        key: &CheckpointKey,
        target: &UploadTarget,
        layout: &PartLayout,
    ) -> Result<Checkpoint, StorageError> {
        if let Some(checkpoint) = self.checkpoints.load(key).await {
            let listed: Result<Vec<ListedPart>, StorageError> = self
                .client
                .list_parts(&target.bucket, &target.key, &checkpoint.upload_id)
                .await;
            match listed {
                Ok(remote) if checkpoint.is_resumable(&remote, layout.part_size) => {
                    log::debug!(
                        "file {:?} reusing upload id {} with {} of {} parts done",
                        id,
                        checkpoint.upload_id,
                        checkpoint.parts.len(),
                        layout.total_parts
                    );
                    return Ok(checkpoint);
                }
                Ok(remote) => log::debug!(
                    "discarding stale checkpoint for {}: store lists {} parts, checkpoint has {}",
                    key.path,
                    remote.len(),
                    checkpoint.parts.len()
                ),
                Err(e) => log::debug!(
                    "discarding checkpoint for {}: list parts failed: {}",
                    key.path,
                    e
                ),
            }
            if let Err(e) = self.checkpoints.delete(key).await {
                log::warn!("Failed to remove stale checkpoint for {}: {}", key.path, e);
            }
        }

        let upload_id: String = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StorageError::Cancelled),
            upload_id = self
                .client
                .initiate_multipart_upload(
                    &target.bucket,
                    &target.key,
                    &target.tags,
                    target.content_type.as_deref(),
                ) => upload_id?,
        };
        log::debug!("file {:?} started upload id {}", id, upload_id);
        Ok(Checkpoint::new(upload_id, layout.part_size))
    }
}

fn open_reader(path: &Path) -> Result<Arc<File>, StorageError> {
    File::open(path)
        .map(Arc::new)
        .map_err(|e| StorageError::io(path, e))
}
