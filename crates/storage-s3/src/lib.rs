//! AWS SDK S3 backend for the rusty-uploader storage engine.
//!
//! This crate provides a `StorageClient` implementation using the AWS SDK for
//! Rust, usable with AWS S3 and S3-compatible stores.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rusty_uploader_storage::{StorageSettings, UploadManager, UploadOptions};
//! use rusty_uploader_storage_s3::S3StorageClient;
//!
//! let settings = StorageSettings {
//!     endpoint: Some("https://storage.example.com".to_string()),
//!     ..Default::default()
//! };
//! let client = Arc::new(S3StorageClient::new(settings).await?);
//! let manager = UploadManager::open(client, UploadOptions::default())?;
//! ```

mod client;
mod error;

pub use client::S3StorageClient;
pub use error::S3ClientError;
