//! Error types for the S3 client.

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use rusty_uploader_storage::StorageError;
use thiserror::Error;

/// Service error codes worth retrying.
const RETRYABLE_CODES: &[&str] = &[
    "InternalError",
    "RequestTimeout",
    "ServiceUnavailable",
    "SlowDown",
    "RequestTimeTooSkewed",
];

/// Errors specific to the S3 storage client.
#[derive(Error, Debug)]
pub enum S3ClientError {
    /// Bucket, key or multipart upload does not exist.
    #[error("Not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Credentials were rejected.
    #[error("Access denied to s3://{bucket}/{key}: {message}")]
    AccessDenied {
        bucket: String,
        key: String,
        message: String,
    },

    /// The store answered with an error.
    #[error("S3 error {code}: {message}")]
    Service {
        code: String,
        message: String,
        retryable: bool,
    },

    /// The request never got a usable response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request could not be built.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A response lacked a field the protocol requires.
    #[error("Response missing {0}")]
    MissingField(&'static str),
}

impl S3ClientError {
    /// Classify an SDK error for an operation on `bucket`/`key`.
    pub fn from_sdk<E, R>(err: SdkError<E, R>, bucket: &str, key: &str) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let message: String = DisplayErrorContext(&err).to_string();
        match &err {
            SdkError::ServiceError(service) => {
                let code: String = service.err().code().unwrap_or("Unknown").to_string();
                match code.as_str() {
                    "NoSuchUpload" | "NoSuchKey" | "NoSuchBucket" | "NotFound" => {
                        S3ClientError::NotFound {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                        }
                    }
                    "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" => {
                        S3ClientError::AccessDenied {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                            message,
                        }
                    }
                    _ => S3ClientError::Service {
                        retryable: RETRYABLE_CODES.contains(&code.as_str()),
                        code,
                        message,
                    },
                }
            }
            SdkError::ConstructionFailure(_) => S3ClientError::ConfigError(message),
            _ => S3ClientError::Transport(message),
        }
    }
}

impl From<S3ClientError> for StorageError {
    fn from(err: S3ClientError) -> Self {
        match err {
            S3ClientError::NotFound { bucket, key } => StorageError::NotFound { bucket, key },
            S3ClientError::AccessDenied {
                bucket,
                key,
                message,
            } => StorageError::AccessDenied {
                bucket,
                key,
                message,
            },
            S3ClientError::Service {
                code,
                message,
                retryable,
            } => StorageError::NetworkError {
                message: format!("{}: {}", code, message),
                retryable,
            },
            S3ClientError::Transport(message) => StorageError::NetworkError {
                message,
                retryable: true,
            },
            S3ClientError::ConfigError(message) => StorageError::InvalidConfig { message },
            S3ClientError::MissingField(field) => StorageError::Other {
                message: format!("S3 response missing {}", field),
            },
        }
    }
}
