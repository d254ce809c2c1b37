//! Shared types and utilities for rusty-uploader.
//!
//! This crate provides common functionality used across the uploader crates:
//! - Content hashing (SHA-256 file digests, XXH128 key digests)
//! - Path normalization for checkpoint scoping
//! - Generic progress callback trait
//! - Shared size constants and error types

pub mod constants;
pub mod error;
pub mod hash;
pub mod path_utils;
pub mod progress;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::PathError;
pub use hash::{hash_string, sha256_file, Sha256Hasher};
pub use path_utils::{lexical_normalize, normalize_upload_path, to_absolute};
pub use progress::{progress_fn, DeltaThrottle, FnProgress, NoOpProgress, ProgressCallback};
