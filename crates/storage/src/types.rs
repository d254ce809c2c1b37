//! Shared data structures for upload operations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use rusty_uploader_common::RECORD_ID_TAG;
use serde::{Deserialize, Serialize};

use crate::error::UploadFailure;

/// Object tags attached to an uploaded object.
pub type ObjectTags = BTreeMap<String, String>;

/// Configuration settings for the S3 client.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Endpoint of the S3-compatible store. `None` uses the AWS default.
    pub endpoint: Option<String>,
    /// Region (S3-compatible stores often ignore it).
    pub region: String,
    /// Static credentials; `None` uses the default provider chain.
    pub credentials: Option<AwsCredentials>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    pub force_path_style: bool,
    /// Transport retry settings for object-store calls.
    pub retry: RetrySettings,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".into(),
            credentials: None,
            force_path_style: true,
            retry: RetrySettings::default(),
        }
    }
}

/// Static credentials, typically issued as a short-lived security token.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Retry settings for object-store requests.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Maximum number of attempts per request (1 disables retries).
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
        }
    }
}

/// Destination of one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Tags forwarded to the object.
    pub tags: ObjectTags,
    /// MIME type stored with the object; filled from the file extension
    /// when not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl UploadTarget {
    /// Create a new upload target without tags.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            tags: ObjectTags::new(),
            content_type: None,
        }
    }

    /// Add a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the MIME type of the object.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Record id the object belongs to, or an empty string.
    pub fn record_id(&self) -> &str {
        self.tags.get(RECORD_ID_TAG).map(String::as_str).unwrap_or("")
    }

    /// Tags encoded as an `x-amz-tagging` value (`k1=v1&k2=v2`).
    pub fn tagging(&self) -> Option<String> {
        encode_tagging(&self.tags)
    }
}

/// MIME type for a file based on its extension, `application/octet-stream`
/// when unknown.
pub fn content_type_for_path(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Encode tags as an `x-amz-tagging` value, `None` when there are none.
pub fn encode_tagging(tags: &ObjectTags) -> Option<String> {
    if tags.is_empty() {
        return None;
    }
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in tags {
        serializer.append_pair(k, v);
    }
    Some(serializer.finish())
}

/// What the remote catalog already knows about a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// SHA-256 hex digest recorded remotely.
    pub sha256: String,
    /// Size recorded remotely.
    pub size: u64,
}

/// One resolved file handed to the upload engine.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Local path of the file.
    pub path: PathBuf,
    /// Where the file goes.
    pub target: UploadTarget,
    /// SHA-256 hex digest, when the caller already computed it.
    pub sha256: Option<String>,
    /// Remote catalog entry for the same destination, if any.
    pub remote: Option<RemoteFile>,
}

impl UploadRequest {
    /// Create a request for `path` going to `target`.
    pub fn new(path: impl Into<PathBuf>, target: UploadTarget) -> Self {
        Self {
            path: path.into(),
            target,
            sha256: None,
            remote: None,
        }
    }

    /// Supply a precomputed content digest.
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    /// Supply the remote catalog entry.
    pub fn with_remote(mut self, remote: RemoteFile) -> Self {
        self.remote = Some(remote);
        self
    }
}

/// A part the store has accepted.
///
/// Serialized with the field names S3 uses in `CompleteMultipartUpload`, which
/// is also the checkpoint's on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// ETag returned by the store.
    #[serde(rename = "ETag")]
    pub etag: String,
    /// Bytes in the part.
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "ChecksumCRC32", default, skip_serializing_if = "Option::is_none")]
    pub checksum_crc32: Option<String>,
    #[serde(rename = "ChecksumCRC32C", default, skip_serializing_if = "Option::is_none")]
    pub checksum_crc32c: Option<String>,
    #[serde(rename = "ChecksumSHA1", default, skip_serializing_if = "Option::is_none")]
    pub checksum_sha1: Option<String>,
    #[serde(rename = "ChecksumSHA256", default, skip_serializing_if = "Option::is_none")]
    pub checksum_sha256: Option<String>,
}

impl CompletedPart {
    /// Create a part record with no checksums.
    pub fn new(part_number: u32, etag: impl Into<String>, size: u64) -> Self {
        Self {
            part_number,
            etag: etag.into(),
            size,
            checksum_crc32: None,
            checksum_crc32c: None,
            checksum_sha1: None,
            checksum_sha256: None,
        }
    }
}

/// Upload state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStatus {
    /// Observed, not yet planned.
    #[default]
    Unprocessed,
    /// Remote catalog already has identical content.
    PreviouslyUploaded,
    /// Bytes are being transferred.
    UploadInProgress,
    /// All parts are in; finalizing the multipart upload.
    MultipartCompletionInProgress,
    /// Object is in the store.
    UploadCompleted,
    /// Gave up on this file for the current run.
    UploadFailed,
}

impl UploadStatus {
    /// Whether no further transition can happen in this run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::PreviouslyUploaded
                | UploadStatus::UploadCompleted
                | UploadStatus::UploadFailed
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: &str = match self {
            UploadStatus::Unprocessed => "Preparing for upload",
            UploadStatus::PreviouslyUploaded => "Previously uploaded, skipping",
            UploadStatus::UploadInProgress => "Uploading",
            UploadStatus::MultipartCompletionInProgress => "Completing multipart upload",
            UploadStatus::UploadCompleted => "Upload completed",
            UploadStatus::UploadFailed => "Upload failed",
        };
        f.write_str(text)
    }
}

/// Stable per-run identifier of a file, assigned when it is first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub usize);

/// In-memory record of one file during a run.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Local path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// SHA-256 hex digest.
    pub sha256: String,
    /// Bytes the store has acknowledged.
    pub uploaded: u64,
    /// Current state.
    pub status: UploadStatus,
}

/// Final state of one file after a run.
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub path: PathBuf,
    pub size: u64,
    pub uploaded: u64,
    pub status: UploadStatus,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    /// Every observed file, in discovery order.
    pub files: Vec<FileSummary>,
    /// Files that failed, with the reason.
    pub failures: Vec<UploadFailure>,
}

impl UploadReport {
    /// Number of files that failed.
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// Number of files in the given state.
    pub fn count(&self, status: UploadStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    /// Summary entry for a path.
    pub fn file(&self, path: &std::path::Path) -> Option<&FileSummary> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Whether every file was uploaded or skipped.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for UploadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Total: {}, Skipped: {}, Success: {}, Failed: {}",
            self.files.len(),
            self.count(UploadStatus::PreviouslyUploaded),
            self.count(UploadStatus::UploadCompleted),
            self.failed_count()
        )?;
        if !self.failures.is_empty() {
            writeln!(f, "\n{} files failed to upload", self.failures.len())?;
            for failure in &self.failures {
                writeln!(
                    f,
                    "Upload {} failed with: \n{}\n",
                    failure.path.display(),
                    failure.error
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn test_upload_target_record_id() {
        let target: UploadTarget =
            UploadTarget::new("default", "records/1/a.bin").with_tag(RECORD_ID_TAG, "rec-1");
        assert_eq!(target.record_id(), "rec-1");
        assert_eq!(UploadTarget::new("b", "k").record_id(), "");
    }

    #[test]
    fn test_upload_target_tagging_encoding() {
        let target: UploadTarget = UploadTarget::new("default", "k")
            .with_tag("a", "x y")
            .with_tag("b", "1&2");
        assert_eq!(target.tagging().as_deref(), Some("a=x+y&b=1%262"));
        assert_eq!(UploadTarget::new("default", "k").tagging(), None);
    }

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(content_type_for_path(Path::new("/data/a.json")), "application/json");
        assert_eq!(content_type_for_path(Path::new("/data/notes.TXT")), "text/plain");
        assert_eq!(
            content_type_for_path(Path::new("/data/scan.zzqx")),
            "application/octet-stream"
        );
        assert_eq!(
            content_type_for_path(Path::new("/data/no_extension")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_completed_part_json_field_names() {
        let mut part: CompletedPart = CompletedPart::new(3, "\"etag-3\"", 10);
        part.checksum_sha256 = Some("abc=".to_string());
        let json: String = serde_json::to_string(&part).unwrap();
        assert!(json.contains("\"PartNumber\":3"));
        assert!(json.contains("\"ETag\":\"\\\"etag-3\\\"\""));
        assert!(json.contains("\"ChecksumSHA256\":\"abc=\""));
        assert!(!json.contains("ChecksumCRC32"));

        let back: CompletedPart = serde_json::from_str(&json).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn test_completed_part_tolerates_missing_size() {
        let part: CompletedPart =
            serde_json::from_str(r#"{"PartNumber":1,"ETag":"e1"}"#).unwrap();
        assert_eq!(part.size, 0);
        assert_eq!(part.checksum_crc32, None);
    }

    #[test]
    fn test_status_terminal() {
        assert!(UploadStatus::UploadFailed.is_terminal());
        assert!(UploadStatus::PreviouslyUploaded.is_terminal());
        assert!(!UploadStatus::MultipartCompletionInProgress.is_terminal());
    }

    #[test]
    fn test_report_display_lists_failures() {
        let report: UploadReport = UploadReport {
            files: vec![
                FileSummary {
                    path: PathBuf::from("/a"),
                    size: 1,
                    uploaded: 1,
                    status: UploadStatus::UploadCompleted,
                },
                FileSummary {
                    path: PathBuf::from("/b"),
                    size: 1,
                    uploaded: 0,
                    status: UploadStatus::UploadFailed,
                },
            ],
            failures: vec![UploadFailure::new("/b", StorageError::Cancelled)],
        };
        let text: String = report.to_string();
        assert!(text.starts_with("Total: 2, Skipped: 0, Success: 1, Failed: 1"));
        assert!(text.contains("Upload /b failed with: \nOperation cancelled"));
        assert!(!report.is_success());
    }
}
