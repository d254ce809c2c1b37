//! Checkpoint entry and key types.

use std::collections::BTreeSet;

use rusty_uploader_common::hash_string;

use crate::traits::ListedPart;
use crate::types::CompletedPart;

/// Identity of one outstanding multipart upload on this machine.
///
/// The same local file going to two records, or the same path after its
/// content changed, gets a separate checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    /// Destination record id (from the object tags).
    pub record_id: String,
    /// SHA-256 of the file contents.
    pub content_hash: String,
    /// Normalized absolute path of the file.
    pub path: String,
}

impl CheckpointKey {
    /// Create a new checkpoint key.
    ///
    /// # Arguments
    /// * `record_id` - Destination record id
    /// * `content_hash` - SHA-256 hex digest of the file
    /// * `path` - Normalized absolute file path
    pub fn new(
        record_id: impl Into<String>,
        content_hash: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            content_hash: content_hash.into(),
            path: path.into(),
        }
    }

    /// File name stem derived from the key (XXH128 of the triple).
    pub fn file_stem(&self) -> String {
        hash_string(&format!("{}{}{}", self.record_id, self.content_hash, self.path))
    }
}

/// Persisted progress of one multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Multipart upload id issued by the store.
    pub upload_id: String,
    /// Sum of the sizes of `parts`.
    pub uploaded_size: u64,
    /// Part size the upload was started with.
    pub part_size: u64,
    /// Parts the store has accepted, in completion order.
    pub parts: Vec<CompletedPart>,
}

impl Checkpoint {
    /// Create an empty checkpoint for a fresh upload id.
    pub fn new(upload_id: impl Into<String>, part_size: u64) -> Self {
        Self {
            upload_id: upload_id.into(),
            uploaded_size: 0,
            part_size,
            parts: Vec::new(),
        }
    }

    /// Part numbers already accepted.
    pub fn part_numbers(&self) -> BTreeSet<u32> {
        self.parts.iter().map(|p| p.part_number).collect()
    }

    /// Record an accepted part.
    ///
    /// A part number recorded twice replaces the earlier entry, so
    /// `uploaded_size` stays the sum of distinct parts.
    pub fn record_part(&mut self, part: CompletedPart) {
        if let Some(existing) = self
            .parts
            .iter_mut()
            .find(|p| p.part_number == part.part_number)
        {
            self.uploaded_size = self.uploaded_size - existing.size + part.size;
            *existing = part;
        } else {
            self.uploaded_size += part.size;
            self.parts.push(part);
        }
    }

    /// Parts sorted by part number, as `CompleteMultipartUpload` requires.
    pub fn sorted_parts(&self) -> Vec<CompletedPart> {
        let mut parts: Vec<CompletedPart> = self.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        parts
    }

    /// Whether this checkpoint can resume against the store's part list.
    ///
    /// The store must know the upload (non-empty list), every recorded part
    /// must be among the listed ones, and the part size must be unchanged.
    pub fn is_resumable(&self, remote: &[ListedPart], part_size: u64) -> bool {
        if remote.is_empty() || self.part_size != part_size {
            return false;
        }
        let remote_numbers: BTreeSet<u32> = remote.iter().map(|p| p.part_number).collect();
        self.part_numbers().is_subset(&remote_numbers)
    }
}
