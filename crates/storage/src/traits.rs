//! Storage traits/interfaces for S3 multipart operations.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{CompletedPart, ObjectTags};

/// A part the store reports as received for an in-progress upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// Size in bytes.
    pub size: u64,
    /// ETag of the part.
    pub etag: Option<String>,
}

/// Body and integrity data for one PUT.
#[derive(Debug, Clone)]
pub struct PartBody {
    /// Bytes to send.
    pub data: Vec<u8>,
    /// Base64 SHA-256 of `data`, sent as `x-amz-checksum-sha256`.
    pub checksum_sha256: Option<String>,
}

/// Low-level S3 multipart operations - implemented by each backend.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Start a multipart upload and return its upload id.
    async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        tags: &ObjectTags,
        content_type: Option<&str>,
    ) -> Result<String, StorageError>;

    /// List the parts the store has received for `upload_id`.
    ///
    /// Returns `NotFound` (or another error) when the upload id is unknown.
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<ListedPart>, StorageError>;

    /// Upload one part.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: PartBody,
    ) -> Result<CompletedPart, StorageError>;

    /// Assemble the object from `parts`, which must be sorted by part number.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError>;

    /// Upload a whole object in one request.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: PartBody,
        tags: &ObjectTags,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;
}
