//! Completion coordinator.
//!
//! The coordinator is the only owner of per-file upload state. It admits
//! planned files, feeds their parts into the worker queue as the part window
//! allows, records every worker result, persists checkpoints and finalizes
//! multipart uploads. Because it is the single consumer of results, checkpoint
//! writes for a file are totally ordered.

use std::fs::File;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{Checkpoint, CheckpointKey, CheckpointStore};
use crate::error::{StorageError, UploadFailure};
use crate::monitor::MonitorHandle;
use crate::parts::{PartLayout, PartRange};
use crate::traits::StorageClient;
use crate::types::{
    CompletedPart, FileId, FileInfo, FileSummary, UploadReport, UploadStatus, UploadTarget,
};
use crate::window::PartWindow;

use super::planner::{Plan, PlannedFile};
use super::worker::{TaskOutput, TaskResult, UploadTask};

/// Transfer state of a file that still has work or results outstanding.
enum Transfer {
    Single {
        reader: Arc<File>,
        dispatched: bool,
        in_flight: bool,
    },
    Multipart(MultipartState),
}

struct MultipartState {
    key: CheckpointKey,
    checkpoint: Checkpoint,
    layout: PartLayout,
    window: PartWindow,
    reader: Arc<File>,
}

impl Transfer {
    fn in_flight(&self) -> usize {
        match self {
            Transfer::Single { in_flight, .. } => usize::from(*in_flight),
            Transfer::Multipart(state) => state.window.in_flight_count(),
        }
    }
}

/// Arena entry for one file, indexed by its `FileId`.
struct FileEntry {
    info: FileInfo,
    target: Arc<UploadTarget>,
    error: Option<StorageError>,
    transfer: Option<Transfer>,
}

pub(crate) struct Coordinator {
    client: Arc<dyn StorageClient>,
    checkpoints: CheckpointStore,
    monitor: MonitorHandle,
    window_size: u64,
    cancel: CancellationToken,
    files: Vec<FileEntry>,
    /// Files with a live transfer, in admission order.
    active: Vec<FileId>,
}

impl Coordinator {
    pub fn new(
        client: Arc<dyn StorageClient>,
        checkpoints: CheckpointStore,
        monitor: MonitorHandle,
        window_size: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            checkpoints,
            monitor,
            window_size,
            cancel,
            files: Vec::new(),
            active: Vec::new(),
        }
    }

    /// Drive uploads until the planner is done and every admitted file has
    /// reached a terminal state, or until cancellation.
    pub async fn run(
        mut self,
        mut planned: mpsc::Receiver<PlannedFile>,
        tasks: mpsc::Sender<UploadTask>,
        mut results: mpsc::UnboundedReceiver<TaskResult>,
    ) -> UploadReport {
        let cancel: CancellationToken = self.cancel.clone();
        let mut pending: Option<UploadTask> = None;
        let mut planner_done: bool = false;

        loop {
            if let Some(task) = pending.take() {
                if self.files[task.file_id.0].info.status == UploadStatus::UploadInProgress {
                    pending = Some(task);
                } else {
                    self.abandon(task);
                }
            }
            if pending.is_none() {
                pending = self.next_task();
            }
            if pending.is_none() && planner_done && self.active.is_empty() {
                break;
            }
            // Admit new files only when nothing already admitted can be sent
            let want_files: bool = !planner_done && pending.is_none();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.fail_active(StorageError::Cancelled);
                    break;
                }
                result = results.recv() => match result {
                    Some(result) => self.handle_result(result).await,
                    None => {
                        self.fail_active(StorageError::Other {
                            message: "upload workers stopped".to_string(),
                        });
                        break;
                    }
                },
                permit = tasks.reserve(), if pending.is_some() => match permit {
                    Ok(permit) => {
                        if let Some(task) = pending.take() {
                            permit.send(task);
                        }
                    }
                    Err(_) => {
                        self.fail_active(StorageError::Other {
                            message: "upload workers stopped".to_string(),
                        });
                        break;
                    }
                },
                file = planned.recv(), if want_files => match file {
                    Some(file) => self.admit(file).await,
                    None => planner_done = true,
                },
            }
        }

        self.into_report()
    }

    async fn admit(&mut self, planned: PlannedFile) {
        let PlannedFile {
            id,
            info,
            target,
            plan,
        } = planned;
        debug_assert_eq!(id.0, self.files.len());

        let mut entry: FileEntry = FileEntry {
            info,
            target: Arc::new(target),
            error: None,
            transfer: None,
        };

        let mut finished: bool = false;
        match plan {
            Ok(Plan::PreviouslyUploaded) => {}
            Ok(Plan::SingleShot { reader }) => {
                entry.transfer = Some(Transfer::Single {
                    reader,
                    dispatched: false,
                    in_flight: false,
                });
            }
            Ok(Plan::Multipart {
                key,
                checkpoint,
                layout,
                reader,
            }) => {
                let window: PartWindow = PartWindow::new(
                    layout.total_parts,
                    layout.part_size,
                    self.window_size,
                    checkpoint.part_numbers(),
                );
                finished = window.is_finished();
                entry.transfer = Some(Transfer::Multipart(MultipartState {
                    key,
                    checkpoint,
                    layout,
                    window,
                    reader,
                }));
            }
            Err(e) => {
                entry.info.status = UploadStatus::UploadFailed;
                entry.error = Some(e);
            }
        }

        let has_transfer: bool = entry.transfer.is_some();
        self.files.push(entry);
        if has_transfer {
            self.active.push(id);
        }
        if finished {
            // Every part was accepted in an earlier run
            self.finalize(id).await;
            self.deactivate_if_drained(id);
        }
    }

    /// Next task any active file is allowed to send, oldest file first.
    fn next_task(&mut self) -> Option<UploadTask> {
        for &id in &self.active {
            let entry: &mut FileEntry = &mut self.files[id.0];
            if entry.info.status != UploadStatus::UploadInProgress {
                continue;
            }
            let target: Arc<UploadTarget> = entry.target.clone();
            let path = entry.info.path.clone();
            let size: u64 = entry.info.size;
            match entry.transfer.as_mut() {
                Some(Transfer::Single {
                    reader,
                    dispatched,
                    in_flight,
                }) if !*dispatched => {
                    *dispatched = true;
                    *in_flight = true;
                    return Some(UploadTask {
                        file_id: id,
                        path,
                        target,
                        upload_id: None,
                        part_number: None,
                        total_parts: 1,
                        offset: 0,
                        length: size,
                        reader: reader.clone(),
                    });
                }
                Some(Transfer::Multipart(state)) => {
                    let range: Option<PartRange> = state
                        .window
                        .next_dispatchable()
                        .and_then(|part_number| state.layout.range(part_number));
                    if let Some(range) = range {
                        log::debug!(
                            "dispatching {} part {}/{}",
                            path.display(),
                            range.part_number,
                            state.layout.total_parts
                        );
                        return Some(UploadTask {
                            file_id: id,
                            path,
                            target,
                            upload_id: Some(state.checkpoint.upload_id.clone()),
                            part_number: Some(range.part_number),
                            total_parts: state.layout.total_parts,
                            offset: range.offset,
                            length: range.length,
                            reader: state.reader.clone(),
                        });
                    }
                }
                _ => {}
            }
        }
        None
    }

    async fn handle_result(&mut self, result: TaskResult) {
        let TaskResult {
            file_id: id,
            part_number,
            outcome,
        } = result;
        let Some(entry) = self.files.get_mut(id.0) else {
            log::warn!("result for unknown file {:?}", id);
            return;
        };

        // A failed file only drains its in-flight parts
        let failed: bool = entry.info.status == UploadStatus::UploadFailed;
        let accepted: bool = !failed && outcome.is_ok();

        match (entry.transfer.as_mut(), part_number) {
            (None, _) => {
                log::debug!("discarding result for settled file {:?}", id);
                return;
            }
            (Some(Transfer::Single { in_flight, .. }), _) => *in_flight = false,
            (Some(Transfer::Multipart(state)), Some(part_number)) => {
                if accepted {
                    state.window.complete(part_number);
                } else {
                    state.window.release(part_number);
                }
            }
            (Some(Transfer::Multipart(_)), None) => {}
        }

        match outcome {
            Err(e) => {
                if let Some(part_number) = part_number {
                    log::debug!("part {} of file {:?} failed: {}", part_number, id, e);
                }
                self.fail(id, e);
            }
            Ok(_) if failed => {}
            Ok(TaskOutput::Object) => self.complete_single(id),
            Ok(TaskOutput::Part(part)) => {
                if let Err(e) = self.record_part(id, part).await {
                    self.fail(id, e);
                } else if self.is_finished(id) {
                    self.finalize(id).await;
                }
            }
        }

        self.deactivate_if_drained(id);
    }

    fn complete_single(&mut self, id: FileId) {
        let entry: &mut FileEntry = &mut self.files[id.0];
        if !matches!(entry.transfer, Some(Transfer::Single { .. })) {
            return;
        }
        entry.info.uploaded = entry.info.size;
        entry.info.status = UploadStatus::UploadCompleted;
        entry.transfer = None;
        self.monitor
            .set_progress(id, UploadStatus::UploadCompleted, entry.info.uploaded);
        log::debug!("uploaded {}", entry.info.path.display());
    }

    /// Append an accepted part to the file's checkpoint and persist it.
    async fn record_part(&mut self, id: FileId, part: CompletedPart) -> Result<(), StorageError> {
        let entry: &mut FileEntry = &mut self.files[id.0];
        let Some(Transfer::Multipart(state)) = entry.transfer.as_mut() else {
            return Ok(());
        };
        state.checkpoint.record_part(part);
        entry.info.uploaded = state.checkpoint.uploaded_size;
        self.monitor
            .set_progress(id, UploadStatus::UploadInProgress, entry.info.uploaded);
        self.checkpoints
            .save(&state.key, &state.checkpoint)
            .await
            .map_err(StorageError::from)
    }

    fn is_finished(&self, id: FileId) -> bool {
        match &self.files[id.0].transfer {
            Some(Transfer::Multipart(state)) => state.window.is_finished(),
            _ => false,
        }
    }

    /// Verify the uploaded size and complete the multipart upload.
    async fn finalize(&mut self, id: FileId) {
        let entry: &mut FileEntry = &mut self.files[id.0];
        let Some(Transfer::Multipart(state)) = entry.transfer.as_ref() else {
            return;
        };

        entry.info.status = UploadStatus::MultipartCompletionInProgress;
        self.monitor
            .set_status(id, UploadStatus::MultipartCompletionInProgress);

        if state.checkpoint.uploaded_size != entry.info.size {
            let error: StorageError = StorageError::SizeMismatch {
                key: entry.target.key.clone(),
                expected: entry.info.size,
                actual: state.checkpoint.uploaded_size,
            };
            self.fail(id, error);
            return;
        }

        let parts: Vec<CompletedPart> = state.checkpoint.sorted_parts();
        let upload_id: String = state.checkpoint.upload_id.clone();
        let key: CheckpointKey = state.key.clone();
        let target: Arc<UploadTarget> = entry.target.clone();

        let completed: Result<(), StorageError> = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StorageError::Cancelled),
            result = self.client.complete_multipart_upload(
                &target.bucket,
                &target.key,
                &upload_id,
                &parts,
            ) => result,
        };
        if let Err(e) = completed {
            // Checkpoint is kept for the next run
            self.fail(id, e);
            return;
        }

        if let Err(e) = self.checkpoints.delete(&key).await {
            log::warn!("Failed to remove checkpoint for {}: {}", key.path, e);
        }

        let entry: &mut FileEntry = &mut self.files[id.0];
        entry.info.status = UploadStatus::UploadCompleted;
        entry.info.uploaded = entry.info.size;
        entry.transfer = None;
        self.monitor
            .set_progress(id, UploadStatus::UploadCompleted, entry.info.uploaded);
        log::debug!(
            "completed multipart upload {} for {}",
            upload_id,
            entry.info.path.display()
        );
    }

    /// Give back the window slot of a task that will never be sent.
    fn abandon(&mut self, task: UploadTask) {
        let entry: &mut FileEntry = &mut self.files[task.file_id.0];
        match (entry.transfer.as_mut(), task.part_number) {
            (Some(Transfer::Single { in_flight, .. }), _) => *in_flight = false,
            (Some(Transfer::Multipart(state)), Some(part_number)) => {
                state.window.release(part_number);
            }
            _ => {}
        }
        self.deactivate_if_drained(task.file_id);
    }

    /// Mark a file failed. The first error is the one reported.
    fn fail(&mut self, id: FileId, error: StorageError) {
        let entry: &mut FileEntry = &mut self.files[id.0];
        if entry.info.status == UploadStatus::UploadFailed {
            return;
        }
        log::debug!("upload {} failed: {}", entry.info.path.display(), error);
        entry.info.status = UploadStatus::UploadFailed;
        entry.error = Some(error);
        self.monitor
            .set_progress(id, UploadStatus::UploadFailed, entry.info.uploaded);
    }

    fn fail_active(&mut self, error: StorageError) {
        let active: Vec<FileId> = std::mem::take(&mut self.active);
        for id in active {
            self.fail(id, error.clone());
            self.files[id.0].transfer = None;
        }
    }

    /// Drop the transfer of a settled file once nothing is in flight.
    fn deactivate_if_drained(&mut self, id: FileId) {
        let entry: &mut FileEntry = &mut self.files[id.0];
        let drained: bool = match &entry.transfer {
            None => true,
            Some(transfer) => entry.info.status.is_terminal() && transfer.in_flight() == 0,
        };
        if drained {
            entry.transfer = None;
            self.active.retain(|active| *active != id);
        }
    }

    fn into_report(self) -> UploadReport {
        let mut report: UploadReport = UploadReport::default();
        for entry in self.files {
            report.files.push(FileSummary {
                path: entry.info.path.clone(),
                size: entry.info.size,
                uploaded: entry.info.uploaded,
                status: entry.info.status,
            });
            if let Some(error) = entry.error {
                report.failures.push(UploadFailure::new(entry.info.path, error));
            }
        }
        report
    }
}
