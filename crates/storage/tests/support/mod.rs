//! In-memory S3-compatible store for driving the upload engine in tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rusty_uploader_storage::{
    checksum_sha256, CompletedPart, ListedPart, ObjectTags, PartBody, StorageClient, StorageError,
};
use tokio_util::sync::CancellationToken;

/// A multipart upload the store has initiated but not completed.
#[derive(Debug, Default, Clone)]
struct PendingUpload {
    bucket: String,
    key: String,
    tags: ObjectTags,
    content_type: Option<String>,
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: HashMap<(String, String), Vec<u8>>,
    object_tags: HashMap<(String, String), ObjectTags>,
    object_content_types: HashMap<(String, String), String>,
    uploads: HashMap<String, PendingUpload>,
    next_upload: usize,
    put_objects: usize,
    initiates: usize,
    completes: usize,
    /// (upload id, part number) for every accepted part, in call order.
    part_calls: Vec<(String, u32)>,
    /// Reject parts once this many have been accepted since the last reset.
    fail_after_parts: Option<usize>,
    /// Cancel this token once this many parts have been accepted.
    cancel_after_parts: Option<(usize, CancellationToken)>,
    /// Never answer `CompleteMultipartUpload`; cancel this token on the call.
    stall_completion: Option<CancellationToken>,
}

/// Store double with fault injection and call accounting.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    part_delay: Mutex<Option<Duration>>,
    parts_in_flight: AtomicUsize,
    max_parts_in_flight: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every part after `n` parts have been accepted.
    pub fn fail_after_parts(&self, n: usize) {
        self.state.lock().unwrap().fail_after_parts = Some(n);
    }

    /// Cancel `token` as soon as `n` parts have been accepted.
    pub fn cancel_after_parts(&self, n: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after_parts = Some((n, token));
    }

    /// Hold every part request for `delay` before accepting it.
    pub fn delay_parts(&self, delay: Duration) {
        *self.part_delay.lock().unwrap() = Some(delay);
    }

    /// Hang on `CompleteMultipartUpload`, cancelling `token` when it is called.
    pub fn stall_completion(&self, token: CancellationToken) {
        self.state.lock().unwrap().stall_completion = Some(token);
    }

    /// Clear faults and call counters, keeping stored data.
    pub fn reset_counters(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_after_parts = None;
        state.cancel_after_parts = None;
        state.stall_completion = None;
        state.put_objects = 0;
        state.initiates = 0;
        state.completes = 0;
        state.part_calls.clear();
        self.max_parts_in_flight.store(0, Ordering::SeqCst);
    }

    /// Forget an in-progress upload, as if it expired.
    pub fn expire_upload(&self, upload_id: &str) {
        self.state.lock().unwrap().uploads.remove(upload_id);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_tags(&self, bucket: &str, key: &str) -> Option<ObjectTags> {
        self.state
            .lock()
            .unwrap()
            .object_tags
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .object_content_types
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn put_count(&self) -> usize {
        self.state.lock().unwrap().put_objects
    }

    pub fn initiate_count(&self) -> usize {
        self.state.lock().unwrap().initiates
    }

    pub fn complete_count(&self) -> usize {
        self.state.lock().unwrap().completes
    }

    pub fn part_calls(&self) -> Vec<(String, u32)> {
        self.state.lock().unwrap().part_calls.clone()
    }

    /// Part numbers accepted since the last reset, sorted.
    pub fn uploaded_part_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self.part_calls().into_iter().map(|(_, n)| n).collect();
        numbers.sort_unstable();
        numbers
    }

    pub fn pending_upload_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.keys().cloned().collect()
    }

    pub fn max_parts_in_flight(&self) -> usize {
        self.max_parts_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageClient for MemoryStore {
    async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        tags: &ObjectTags,
        content_type: Option<&str>,
    ) -> Result<String, StorageError> {
        let mut state = self.state.lock().unwrap();
        state.initiates += 1;
        state.next_upload += 1;
        let upload_id: String = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                tags: tags.clone(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<ListedPart>, StorageError> {
        let state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        Ok(upload
            .parts
            .iter()
            .map(|(number, (etag, data))| ListedPart {
                part_number: *number,
                size: data.len() as u64,
                etag: Some(etag.clone()),
            })
            .collect())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: PartBody,
    ) -> Result<CompletedPart, StorageError> {
        let now: usize = self.parts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_parts_in_flight.fetch_max(now, Ordering::SeqCst);
        // Let other workers overlap with this request
        let delay: Option<Duration> = *self.part_delay.lock().unwrap();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => {
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                }
            }
        }
        let result: Result<CompletedPart, StorageError> =
            self.accept_part(bucket, key, upload_id, part_number, body);
        self.parts_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let stall: Option<CancellationToken> = self.state.lock().unwrap().stall_completion.clone();
        if let Some(token) = stall {
            token.cancel();
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        let upload: PendingUpload =
            state
                .uploads
                .remove(upload_id)
                .ok_or_else(|| StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })?;

        let mut object: Vec<u8> = Vec::new();
        let mut previous: u32 = 0;
        for part in parts {
            if part.part_number <= previous {
                return Err(StorageError::Other {
                    message: "parts must be in ascending order".to_string(),
                });
            }
            previous = part.part_number;
            let (etag, data) = upload.parts.get(&part.part_number).ok_or_else(|| {
                StorageError::Other {
                    message: format!("part {} was never uploaded", part.part_number),
                }
            })?;
            if *etag != part.etag {
                return Err(StorageError::Other {
                    message: format!("etag mismatch for part {}", part.part_number),
                });
            }
            object.extend_from_slice(data);
        }

        let object_key: (String, String) = (upload.bucket, upload.key);
        state.object_tags.insert(object_key.clone(), upload.tags);
        if let Some(content_type) = upload.content_type {
            state
                .object_content_types
                .insert(object_key.clone(), content_type);
        }
        state.objects.insert(object_key, object);
        state.completes += 1;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: PartBody,
        tags: &ObjectTags,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        verify_checksum(&body, 0)?;
        let mut state = self.state.lock().unwrap();
        state.put_objects += 1;
        let object_key: (String, String) = (bucket.to_string(), key.to_string());
        state.object_tags.insert(object_key.clone(), tags.clone());
        if let Some(content_type) = content_type {
            state
                .object_content_types
                .insert(object_key.clone(), content_type.to_string());
        }
        state.objects.insert(object_key, body.data);
        Ok(())
    }
}

impl MemoryStore {
    fn accept_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: PartBody,
    ) -> Result<CompletedPart, StorageError> {
        verify_checksum(&body, part_number)?;
        let mut state = self.state.lock().unwrap();

        if let Some(limit) = state.fail_after_parts {
            if state.part_calls.len() >= limit {
                return Err(StorageError::NetworkError {
                    message: "connection reset by peer".to_string(),
                    retryable: true,
                });
            }
        }

        let upload: &mut PendingUpload =
            state
                .uploads
                .get_mut(upload_id)
                .ok_or_else(|| StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })?;
        let etag: String = format!("\"{}-{}\"", upload_id, part_number);
        let size: u64 = body.data.len() as u64;
        upload.parts.insert(part_number, (etag.clone(), body.data));
        state.part_calls.push((upload_id.to_string(), part_number));

        if let Some((limit, token)) = &state.cancel_after_parts {
            if state.part_calls.len() >= *limit {
                token.cancel();
            }
        }

        let mut part: CompletedPart = CompletedPart::new(part_number, etag, size);
        part.checksum_sha256 = body.checksum_sha256;
        Ok(part)
    }
}

fn verify_checksum(body: &PartBody, part_number: u32) -> Result<(), StorageError> {
    let actual: String = checksum_sha256(&body.data);
    match &body.checksum_sha256 {
        Some(sent) if *sent != actual => Err(StorageError::ChecksumMismatch {
            part_number,
            expected: sent.clone(),
            actual,
        }),
        _ => Ok(()),
    }
}

/// Deterministic, non-repeating-looking file content.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + seed as usize * 7) % 251) as u8)
        .collect()
}

/// Write `data` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path: PathBuf = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Number of checkpoint databases in `dir`.
pub fn checkpoint_count(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "db"))
            .count(),
        Err(_) => 0,
    }
}
