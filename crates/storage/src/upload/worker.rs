//! Transfer workers.
//!
//! A fixed number of workers pull [`UploadTask`]s from one shared channel.
//! Each task reads its byte range from the file's shared handle and sends it
//! as a whole object or a single part. Workers only report outcomes; the
//! completion coordinator owns all file state.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use rusty_uploader_common::{progress_fn, DeltaThrottle, ProgressCallback, Sha256Hasher, MIB};

use crate::error::StorageError;
use crate::monitor::MonitorHandle;
use crate::traits::{PartBody, StorageClient};
use crate::types::{CompletedPart, FileId, UploadTarget};

/// Read buffer size for part bodies.
const READ_CHUNK: usize = MIB as usize;

/// One unit of transfer work.
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// File this task belongs to.
    pub file_id: FileId,
    /// Local path, for error messages.
    pub path: PathBuf,
    /// Destination bucket, key and tags.
    pub target: Arc<UploadTarget>,
    /// Multipart upload id; `None` for a single PUT.
    pub upload_id: Option<String>,
    /// 1-based part number; `None` for a single PUT.
    pub part_number: Option<u32>,
    /// Number of parts in the upload (1 for a single PUT).
    pub total_parts: u32,
    /// Byte offset into the file.
    pub offset: u64,
    /// Number of bytes to send.
    pub length: u64,
    /// Handle shared by every task of the file.
    pub reader: Arc<File>,
}

/// What a successful task produced.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    /// The whole object was stored.
    Object,
    /// One part was accepted.
    Part(CompletedPart),
}

/// Outcome of one task, sent back to the coordinator.
#[derive(Debug)]
pub struct TaskResult {
    pub file_id: FileId,
    pub part_number: Option<u32>,
    pub outcome: Result<TaskOutput, StorageError>,
}

/// Spawn `threads` workers sharing one task receiver.
pub(crate) fn spawn_workers(
    threads: usize,
    client: Arc<dyn StorageClient>,
    tasks: mpsc::Receiver<UploadTask>,
    results: mpsc::UnboundedSender<TaskResult>,
    monitor: MonitorHandle,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let tasks: Arc<Mutex<mpsc::Receiver<UploadTask>>> = Arc::new(Mutex::new(tasks));
    (0..threads)
        .map(|worker_id| {
            tokio::spawn(run_worker(
                worker_id,
                client.clone(),
                tasks.clone(),
                results.clone(),
                monitor.clone(),
                cancel.clone(),
            ))
        })
        .collect()
}

async fn run_worker(
    worker_id: usize,
    client: Arc<dyn StorageClient>,
    tasks: Arc<Mutex<mpsc::Receiver<UploadTask>>>,
    results: mpsc::UnboundedSender<TaskResult>,
    monitor: MonitorHandle,
    cancel: CancellationToken,
) {
    loop {
        let task: Option<UploadTask> = {
            let mut rx = tasks.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else {
            break;
        };

        log::debug!(
            "worker {} uploading {} part {:?}/{}",
            worker_id,
            task.path.display(),
            task.part_number,
            task.total_parts
        );
        let outcome: Result<TaskOutput, StorageError> =
            execute_task(client.as_ref(), &task, &monitor, &cancel).await;

        let result: TaskResult = TaskResult {
            file_id: task.file_id,
            part_number: task.part_number,
            outcome,
        };
        if results.send(result).is_err() {
            break;
        }
    }
    log::debug!("worker {} stopped", worker_id);
}

/// Read the task's byte range and send it.
pub(crate) async fn execute_task(
    client: &dyn StorageClient,
    task: &UploadTask,
    monitor: &MonitorHandle,
    cancel: &CancellationToken,
) -> Result<TaskOutput, StorageError> {
    if cancel.is_cancelled() {
        return Err(StorageError::Cancelled);
    }

    let progress_monitor: MonitorHandle = monitor.clone();
    let progress_cancel: CancellationToken = cancel.clone();
    let file_id: FileId = task.file_id;
    let progress = progress_fn(move |delta: &u64| {
        progress_monitor.update_bytes(file_id, *delta);
        !progress_cancel.is_cancelled()
    });

    let reader: Arc<File> = task.reader.clone();
    let path: PathBuf = task.path.clone();
    let (offset, length) = (task.offset, task.length);
    let (data, checksum): (Vec<u8>, String) = tokio::task::spawn_blocking(move || {
        read_range(&reader, &path, offset, length, &progress)
    })
    .await
    .map_err(|e| StorageError::Other {
        message: format!("read task failed: {}", e),
    })??;

    let body: PartBody = PartBody {
        data,
        checksum_sha256: Some(checksum.clone()),
    };
    let target: &UploadTarget = task.target.as_ref();

    match (&task.upload_id, task.part_number) {
        (Some(upload_id), Some(part_number)) => {
            let mut part: CompletedPart = tokio::select! {
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                part = client.upload_part(
                    &target.bucket,
                    &target.key,
                    upload_id,
                    part_number,
                    body,
                ) => part?,
            };
            if let Some(echoed) = &part.checksum_sha256 {
                if *echoed != checksum {
                    return Err(StorageError::ChecksumMismatch {
                        part_number,
                        expected: checksum,
                        actual: echoed.clone(),
                    });
                }
            }
            part.part_number = part_number;
            part.size = task.length;
            log::debug!(
                "uploaded {} part {}/{} etag {}",
                task.path.display(),
                part_number,
                task.total_parts,
                part.etag
            );
            Ok(TaskOutput::Part(part))
        }
        _ => {
            tokio::select! {
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                result = client.put_object(
                    &target.bucket,
                    &target.key,
                    body,
                    &target.tags,
                    target.content_type.as_deref(),
                ) => result?,
            };
            Ok(TaskOutput::Object)
        }
    }
}

/// Base64 SHA-256 of a body, the `x-amz-checksum-sha256` format.
pub fn checksum_sha256(data: &[u8]) -> String {
    let mut hasher: Sha256Hasher = Sha256Hasher::new();
    hasher.update(data);
    BASE64.encode(hasher.finish())
}

/// Read `length` bytes at `offset` with positional reads, returning the bytes
/// and their base64 SHA-256.
///
/// Byte deltas are reported through `progress` in coarse steps; returning
/// false from the callback cancels the read.
pub(crate) fn read_range(
    file: &File,
    path: &Path,
    offset: u64,
    length: u64,
    progress: &dyn ProgressCallback<u64>,
) -> Result<(Vec<u8>, String), StorageError> {
    let mut data: Vec<u8> = vec![0u8; length as usize];
    let mut hasher: Sha256Hasher = Sha256Hasher::new();
    let mut throttle: DeltaThrottle = DeltaThrottle::new(length);
    let mut filled: usize = 0;

    while filled < data.len() {
        let end: usize = (filled + READ_CHUNK).min(data.len());
        let n: usize = read_at(file, &mut data[filled..end], offset + filled as u64)
            .map_err(|e| StorageError::io(path, e))?;
        if n == 0 {
            return Err(StorageError::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "file ended at {} bytes, expected {}",
                        offset + filled as u64,
                        offset + length
                    ),
                ),
            ));
        }
        hasher.update(&data[filled..filled + n]);
        filled += n;

        if let Some(delta) = throttle.advance(n as u64) {
            if !progress.on_progress(&delta) {
                return Err(StorageError::Cancelled);
            }
        }
    }
    Ok((data, BASE64.encode(hasher.finish())))
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    loop {
        match file.read_at(buf, offset) {
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    loop {
        match file.seek_read(buf, offset) {
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectTags;
    use async_trait::async_trait;
    use rusty_uploader_common::NoOpProgress;
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Records calls; optionally echoes a wrong checksum.
    #[derive(Default)]
    struct RecordingClient {
        bodies: StdMutex<Vec<(Option<u32>, Vec<u8>)>>,
        corrupt_echo: bool,
    }

    #[async_trait]
    impl StorageClient for RecordingClient {
        async fn initiate_multipart_upload(
            &self,
            _bucket: &str,
            _key: &str,
            _tags: &ObjectTags,
            _content_type: Option<&str>,
        ) -> Result<String, StorageError> {
            Ok("upload".to_string())
        }

        async fn list_parts(
            &self,
            _bucket: &str,
            _key: &str,
            _upload_id: &str,
        ) -> Result<Vec<crate::traits::ListedPart>, StorageError> {
            Ok(Vec::new())
        }

        async fn upload_part(
            &self,
            _bucket: &str,
            _key: &str,
            _upload_id: &str,
            part_number: u32,
            body: PartBody,
        ) -> Result<CompletedPart, StorageError> {
            let mut part: CompletedPart =
                CompletedPart::new(part_number, format!("\"etag-{}\"", part_number), 0);
            part.checksum_sha256 = if self.corrupt_echo {
                Some("AAAA".to_string())
            } else {
                body.checksum_sha256.clone()
            };
            self.bodies.lock().unwrap().push((Some(part_number), body.data));
            Ok(part)
        }

        async fn complete_multipart_upload(
            &self,
            _bucket: &str,
            _key: &str,
            _upload_id: &str,
            _parts: &[CompletedPart],
        ) -> Result<(), StorageError> {
            Ok(())
        }

        async fn put_object(
            &self,
            _bucket: &str,
            _key: &str,
            body: PartBody,
            _tags: &ObjectTags,
            _content_type: Option<&str>,
        ) -> Result<(), StorageError> {
            self.bodies.lock().unwrap().push((None, body.data));
            Ok(())
        }
    }

    fn temp_file(content: &[u8]) -> (tempfile::NamedTempFile, Arc<File>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        let reader: Arc<File> = Arc::new(File::open(file.path()).unwrap());
        (file, reader)
    }

    fn part_task(reader: Arc<File>, part_number: u32, offset: u64, length: u64) -> UploadTask {
        UploadTask {
            file_id: FileId(0),
            path: PathBuf::from("/data/a.bin"),
            target: Arc::new(UploadTarget::new("bucket", "key")),
            upload_id: Some("upload".to_string()),
            part_number: Some(part_number),
            total_parts: 3,
            offset,
            length,
            reader,
        }
    }

    #[test]
    fn test_checksum_sha256_known_value() {
        // SHA-256("hello world") in base64
        assert_eq!(
            checksum_sha256(b"hello world"),
            "uU0nuZNNPgilLlLX2n2r+sSE7+N6U4DukIj3rOLvzek="
        );
    }

    #[test]
    fn test_read_range_reads_exact_slice() {
        let content: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let (_file, reader) = temp_file(&content);

        let (data, checksum) =
            read_range(&reader, Path::new("a"), 1000, 2500, &NoOpProgress).unwrap();
        assert_eq!(data, &content[1000..3500]);
        assert_eq!(checksum, checksum_sha256(&content[1000..3500]));
    }

    #[test]
    fn test_read_range_reports_all_bytes() {
        let content: Vec<u8> = vec![7u8; 3 * READ_CHUNK + 17];
        let (_file, reader) = temp_file(&content);

        let reported: AtomicU64 = AtomicU64::new(0);
        let progress = progress_fn(|delta: &u64| {
            reported.fetch_add(*delta, Ordering::Relaxed);
            true
        });
        let (data, checksum) =
            read_range(&reader, Path::new("a"), 0, content.len() as u64, &progress).unwrap();
        assert_eq!(data.len(), content.len());
        // Hashed chunk by chunk across several reads
        assert_eq!(checksum, checksum_sha256(&content));
        assert_eq!(reported.load(Ordering::Relaxed), content.len() as u64);
    }

    #[test]
    fn test_read_range_cancelled_by_callback() {
        let content: Vec<u8> = vec![1u8; 2 * READ_CHUNK];
        let (_file, reader) = temp_file(&content);
        let progress = progress_fn(|_delta: &u64| false);

        let result = read_range(&reader, Path::new("a"), 0, content.len() as u64, &progress);
        assert!(matches!(result, Err(StorageError::Cancelled)));
    }

    #[test]
    fn test_read_range_past_end_of_file() {
        let (_file, reader) = temp_file(b"short");
        let result = read_range(&reader, Path::new("a"), 2, 10, &NoOpProgress);
        assert!(matches!(result, Err(StorageError::IoError { .. })));
    }

    #[tokio::test]
    async fn test_execute_part_task() {
        let content: Vec<u8> = b"0123456789abcdef".to_vec();
        let (_file, reader) = temp_file(&content);
        let client: RecordingClient = RecordingClient::default();

        let output: TaskOutput = execute_task(
            &client,
            &part_task(reader, 2, 4, 4),
            &MonitorHandle::hidden(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        match output {
            TaskOutput::Part(part) => {
                assert_eq!(part.part_number, 2);
                assert_eq!(part.size, 4);
                assert_eq!(part.checksum_sha256, Some(checksum_sha256(b"4567")));
            }
            TaskOutput::Object => panic!("expected a part"),
        }
        assert_eq!(client.bodies.lock().unwrap()[0], (Some(2), b"4567".to_vec()));
    }

    #[tokio::test]
    async fn test_execute_single_put_task() {
        let (_file, reader) = temp_file(b"whole file");
        let client: RecordingClient = RecordingClient::default();
        let mut task: UploadTask = part_task(reader, 1, 0, 10);
        task.upload_id = None;
        task.part_number = None;
        task.total_parts = 1;

        let output: TaskOutput = execute_task(
            &client,
            &task,
            &MonitorHandle::hidden(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(matches!(output, TaskOutput::Object));
        assert_eq!(client.bodies.lock().unwrap()[0], (None, b"whole file".to_vec()));
    }

    #[tokio::test]
    async fn test_execute_detects_checksum_mismatch() {
        let (_file, reader) = temp_file(b"0123456789");
        let client: RecordingClient = RecordingClient {
            corrupt_echo: true,
            ..Default::default()
        };

        let result = execute_task(
            &client,
            &part_task(reader, 1, 0, 10),
            &MonitorHandle::hidden(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(StorageError::ChecksumMismatch { part_number: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_after_cancel() {
        let (_file, reader) = temp_file(b"0123456789");
        let client: RecordingClient = RecordingClient::default();
        let cancel: CancellationToken = CancellationToken::new();
        cancel.cancel();

        let result = execute_task(
            &client,
            &part_task(reader, 1, 0, 10),
            &MonitorHandle::hidden(),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert!(client.bodies.lock().unwrap().is_empty());
    }
}
