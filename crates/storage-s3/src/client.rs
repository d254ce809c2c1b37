//! AWS SDK S3 client implementation.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    ChecksumAlgorithm, CompletedMultipartUpload, CompletedPart as S3CompletedPart,
};
use aws_sdk_s3::Client as S3Client;

use rusty_uploader_storage::{
    encode_tagging, CompletedPart, ListedPart, ObjectTags, PartBody, StorageClient, StorageError,
    StorageSettings,
};

use crate::error::S3ClientError;

/// Provider name reported for static credentials.
const CREDENTIALS_PROVIDER: &str = "rusty-uploader";

/// StorageClient implementation using AWS SDK for Rust.
///
/// Works against AWS S3 and S3-compatible stores (MinIO, Ceph, ...). Retries
/// are handled by the SDK according to `StorageSettings::retry`.
pub struct S3StorageClient {
    /// The underlying S3 client.
    s3_client: S3Client,
}

impl S3StorageClient {
    /// Create a new S3 storage client.
    ///
    /// Without explicit credentials the default AWS credential chain is used.
    ///
    /// # Arguments
    /// * `settings` - Endpoint, region, credentials and retry settings
    pub async fn new(settings: StorageSettings) -> Result<Self, StorageError> {
        let config_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        let config_loader = if let Some(ref creds) = settings.credentials {
            let credentials: Credentials = Credentials::new(
                &creds.access_key_id,
                &creds.secret_access_key,
                creds.session_token.clone(),
                None,
                CREDENTIALS_PROVIDER,
            );
            config_loader.credentials_provider(credentials)
        } else {
            config_loader
        };

        let sdk_config: SdkConfig = config_loader.load().await;
        Ok(Self::from_client(S3Client::from_conf(s3_config(
            &sdk_config,
            &settings,
        ))))
    }

    /// Create a client from an existing S3Client (for testing).
    ///
    /// # Arguments
    /// * `s3_client` - Pre-configured S3 client
    pub fn from_client(s3_client: S3Client) -> Self {
        Self { s3_client }
    }
}

/// Build the S3 service config on top of the shared SDK config.
fn s3_config(sdk_config: &SdkConfig, settings: &StorageSettings) -> aws_sdk_s3::Config {
    let retry: RetryConfig = RetryConfig::standard()
        .with_max_attempts(settings.retry.max_attempts.max(1))
        .with_initial_backoff(Duration::from_millis(settings.retry.initial_backoff_ms));

    let mut builder = aws_sdk_s3::config::Builder::from(sdk_config)
        .force_path_style(settings.force_path_style)
        .retry_config(retry);
    if let Some(ref endpoint) = settings.endpoint {
        builder = builder.endpoint_url(endpoint);
    }
    builder.build()
}

/// Drop empty checksum values echoed by the store.
fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

#[async_trait]
impl StorageClient for S3StorageClient {
    async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        tags: &ObjectTags,
        content_type: Option<&str>,
    ) -> Result<String, StorageError> {
        let tagging: Option<String> = encode_tagging(tags);

        let output = self
            .s3_client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_tagging(tagging)
            .set_content_type(content_type.map(str::to_string))
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .send()
            .await
            .map_err(|err| S3ClientError::from_sdk(err, bucket, key))?;

        let upload_id: String = output
            .upload_id()
            .map(str::to_string)
            .ok_or(S3ClientError::MissingField("UploadId"))?;
        log::debug!("created multipart upload {} for s3://{}/{}", upload_id, bucket, key);
        Ok(upload_id)
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<ListedPart>, StorageError> {
        let mut parts: Vec<ListedPart> = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .s3_client
                .list_parts()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .set_part_number_marker(marker.take())
                .send()
                .await
                .map_err(|err| S3ClientError::from_sdk(err, bucket, key))?;

            for part in output.parts() {
                let Some(part_number) = part.part_number() else {
                    continue;
                };
                parts.push(ListedPart {
                    part_number: part_number as u32,
                    size: part.size().unwrap_or(0).max(0) as u64,
                    etag: part.e_tag().map(str::to_string),
                });
            }

            if output.is_truncated() != Some(true) {
                break;
            }
            match output.next_part_number_marker() {
                Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(parts)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: PartBody,
    ) -> Result<CompletedPart, StorageError> {
        let size: u64 = body.data.len() as u64;
        let output = self
            .s3_client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .content_length(size as i64)
            .set_checksum_sha256(body.checksum_sha256)
            .body(ByteStream::from(body.data))
            .send()
            .await
            .map_err(|err| S3ClientError::from_sdk(err, bucket, key))?;

        let etag: String = output
            .e_tag()
            .map(str::to_string)
            .ok_or(S3ClientError::MissingField("ETag"))?;

        let mut part: CompletedPart = CompletedPart::new(part_number, etag, size);
        part.checksum_crc32 = non_empty(output.checksum_crc32());
        part.checksum_crc32c = non_empty(output.checksum_crc32_c());
        part.checksum_sha1 = non_empty(output.checksum_sha1());
        part.checksum_sha256 = non_empty(output.checksum_sha256());
        Ok(part)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let completed: Vec<S3CompletedPart> = parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(&part.etag)
                    .set_checksum_crc32(part.checksum_crc32.clone())
                    .set_checksum_crc32_c(part.checksum_crc32c.clone())
                    .set_checksum_sha1(part.checksum_sha1.clone())
                    .set_checksum_sha256(part.checksum_sha256.clone())
                    .build()
            })
            .collect();

        self.s3_client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| S3ClientError::from_sdk(err, bucket, key))?;

        log::debug!("completed multipart upload {} for s3://{}/{}", upload_id, bucket, key);
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
        let tagging: Option<String> = encode_tagging(tags);

        self.s3_client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(body.data.len() as i64)
            .set_checksum_sha256(body.checksum_sha256)
            .set_tagging(tagging)
            .set_content_type(content_type.map(str::to_string))
            .body(ByteStream::from(body.data))
            .send()
            .await
            .map_err(|err| S3ClientError::from_sdk(err, bucket, key))?;

        Ok(())
    }
}
