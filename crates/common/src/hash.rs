//! Hash computation utilities.
//!
//! Two digests are used by the uploader:
//! - SHA-256 of file contents, which is what the remote catalog records and
//!   what the previously-uploaded check compares against.
//! - XXH128 of short strings, used to derive stable checkpoint file names.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Compute XXH128 hash of a string.
///
/// # Arguments
/// * `data` - String to hash
///
/// # Returns
/// 32-character lowercase hex string (128 bits).
pub fn hash_string(data: &str) -> String {
    let hash: u128 = xxhash_rust::xxh3::xxh3_128(data.as_bytes());
    format!("{:032x}", hash)
}

/// Compute the SHA-256 digest and size of a file.
///
/// Reads the file in chunks to avoid loading entire file into memory.
///
/// # Arguments
/// * `path` - Path to the file to hash
///
/// # Returns
/// Tuple of (64-character lowercase hex digest, bytes read).
///
/// # Errors
/// Returns error if file cannot be read.
pub fn sha256_file(path: &Path) -> Result<(String, u64), std::io::Error> {
    let mut file: std::fs::File = std::fs::File::open(path)?;
    let mut hasher: Sha256Hasher = Sha256Hasher::new();
    let mut buffer: Vec<u8> = vec![0u8; 64 * 1024]; // 64KB buffer
    let mut size: u64 = 0;

    loop {
        let bytes_read: usize = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok((hasher.finish_hex(), size))
}

/// Streaming hasher for incremental SHA-256 hashing.
///
/// Used for per-part integrity checksums, where the part is hashed chunk by
/// chunk as it is read from disk.
pub struct Sha256Hasher {
    inner: Sha256,
}

impl Sha256Hasher {
    /// Create a new streaming hasher.
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    /// Update the hasher with additional data.
    ///
    /// # Arguments
    /// * `data` - Bytes to add to the hash computation
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize and return the raw 32-byte digest.
    pub fn finish(self) -> [u8; 32] {
        self.inner.finalize().into()
    }

    /// Finalize and return the digest as a 64-char hex string.
    pub fn finish_hex(self) -> String {
        hex::encode(self.finish())
    }
}

impl Default for Sha256Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_hash_string_length() {
        let hash: String = hash_string("");
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn test_hash_string_deterministic() {
        assert_eq!(hash_string("record-1abc/tmp/a.bin"), hash_string("record-1abc/tmp/a.bin"));
        assert_ne!(hash_string("record-1abc/tmp/a.bin"), hash_string("record-2abc/tmp/a.bin"));
    }

    #[test]
    fn test_sha256_hasher_known_vector() {
        let mut hasher: Sha256Hasher = Sha256Hasher::new();
        hasher.update(b"hello world");
        assert_eq!(
            hasher.finish_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_hasher_incremental() {
        let mut incremental: Sha256Hasher = Sha256Hasher::new();
        incremental.update(b"hello ");
        incremental.update(b"world");

        let mut direct: Sha256Hasher = Sha256Hasher::new();
        direct.update(b"hello world");

        assert_eq!(incremental.finish_hex(), direct.finish_hex());
    }

    #[test]
    fn test_sha256_file() {
        let dir: tempfile::TempDir = tempfile::tempdir().unwrap();
        let file_path: std::path::PathBuf = dir.path().join("test.txt");

        let mut file: std::fs::File = std::fs::File::create(&file_path).unwrap();
        file.write_all(b"hello world").unwrap();
        drop(file);

        let (digest, size): (String, u64) = sha256_file(&file_path).unwrap();
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(size, 11);
    }

    #[test]
    fn test_sha256_file_not_found() {
        let result: Result<(String, u64), std::io::Error> =
            sha256_file(Path::new("/nonexistent/file.txt"));
        assert!(result.is_err());
    }
}
