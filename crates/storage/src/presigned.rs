//! Pre-signed upload URL parsing.
//!
//! The metadata service hands out URLs of the form
//! `https://<endpoint>/<bucket>/<key>?X-Amz-Tagging=<urlencoded tags>&...`.
//! The engine never uses the signature itself; it only needs the bucket, the
//! key and the tags to forward to its own PUT/multipart calls.

use percent_encoding::percent_decode_str;
use url::Url;

use rusty_uploader_common::TAGGING_QUERY_PARAM;

use crate::error::StorageError;
use crate::types::{ObjectTags, UploadTarget};

/// Extract the upload target encoded in a pre-signed URL.
///
/// # Arguments
/// * `upload_url` - Pre-signed PUT URL (path-style addressing)
///
/// # Errors
/// `InvalidUploadUrl` when the URL does not parse or has no bucket/key.
pub fn parse_upload_url(upload_url: &str) -> Result<UploadTarget, StorageError> {
    let parsed: Url = Url::parse(upload_url).map_err(|e| StorageError::InvalidUploadUrl {
        message: format!("parse upload url failed: {}", e),
    })?;

    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| StorageError::InvalidUploadUrl {
            message: "upload url has no path".to_string(),
        })?;

    let bucket: String = segments
        .next()
        .filter(|s| !s.is_empty())
        .map(percent_decode)
        .ok_or_else(|| StorageError::InvalidUploadUrl {
            message: "upload url has no bucket".to_string(),
        })?;

    let key: String = segments.map(percent_decode).collect::<Vec<String>>().join("/");
    if key.is_empty() {
        return Err(StorageError::InvalidUploadUrl {
            message: "upload url has no object key".to_string(),
        });
    }

    let tags: ObjectTags = parsed
        .query_pairs()
        .find(|(name, _)| name == TAGGING_QUERY_PARAM)
        .map(|(_, value)| parse_tagging(&value))
        .unwrap_or_default();

    Ok(UploadTarget {
        bucket,
        key,
        tags,
        content_type: None,
    })
}

/// Decode an `x-amz-tagging` value (`k1=v1&k2=v2`) into tags.
///
/// Repeated keys keep their first value.
pub fn parse_tagging(tagging: &str) -> ObjectTags {
    let mut tags: ObjectTags = ObjectTags::new();
    for (k, v) in url::form_urlencoded::parse(tagging.as_bytes()) {
        tags.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    tags
}

/// Path segments keep a literal '+', unlike form-encoded query values.
fn percent_decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
