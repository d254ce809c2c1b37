//! Part layout for multipart uploads.
//!
//! This module contains pure logic for the single-shot vs. multipart decision
//! and for splitting a file into parts. No I/O operations - just decision
//! making.

use rusty_uploader_common::{MAX_OBJECT_SIZE, MAX_PARTS_COUNT, MIB};

use crate::error::StorageError;

/// Byte range of one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number.
    pub part_number: u32,
    /// Byte offset within the file.
    pub offset: u64,
    /// Length of this part in bytes.
    pub length: u64,
}

/// How a file is split into parts.
///
/// All parts are `part_size` bytes except the last, which holds the
/// remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLayout {
    /// Total file size.
    pub file_size: u64,
    /// Size of every part but the last.
    pub part_size: u64,
    /// Number of parts.
    pub total_parts: u32,
    /// Size of the last part.
    pub last_part_size: u64,
}

impl PartLayout {
    /// Compute the layout for `file_size` bytes with the requested part size.
    ///
    /// If the requested size would need more than 10 000 parts the part size
    /// is grown, in whole MiB, until the count fits.
    ///
    /// # Errors
    /// `ObjectTooLarge` above 5 TiB, `InvalidConfig` for a zero part size.
    pub fn new(file_size: u64, requested_part_size: u64) -> Result<Self, StorageError> {
        if file_size > MAX_OBJECT_SIZE {
            return Err(StorageError::ObjectTooLarge {
                size: file_size,
                max: MAX_OBJECT_SIZE,
            });
        }
        if requested_part_size == 0 {
            return Err(StorageError::InvalidConfig {
                message: "part size must be greater than zero".to_string(),
            });
        }

        let mut part_size: u64 = requested_part_size;
        if file_size.div_ceil(part_size) > MAX_PARTS_COUNT {
            let min_size: u64 = file_size.div_ceil(MAX_PARTS_COUNT);
            part_size = min_size.div_ceil(MIB) * MIB;
        }

        let total_parts: u64 = file_size.div_ceil(part_size).max(1);
        let last_part_size: u64 = file_size - (total_parts - 1) * part_size;

        Ok(Self {
            file_size,
            part_size,
            total_parts: total_parts as u32,
            last_part_size,
        })
    }

    /// Byte range of a 1-based part number.
    pub fn range(&self, part_number: u32) -> Option<PartRange> {
        if part_number == 0 || part_number > self.total_parts {
            return None;
        }
        let offset: u64 = (part_number as u64 - 1) * self.part_size;
        let length: u64 = if part_number == self.total_parts {
            self.last_part_size
        } else {
            self.part_size
        };
        Some(PartRange {
            part_number,
            offset,
            length,
        })
    }

    /// All part ranges in order.
    pub fn ranges(&self) -> impl Iterator<Item = PartRange> + '_ {
        (1..=self.total_parts).filter_map(move |n| self.range(n))
    }
}

/// Upload strategy based on file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Whole file in one PUT.
    SingleShot,
    /// Multipart upload with checkpointed progress.
    Multipart,
}

/// Determine upload strategy based on file size.
///
/// Files of exactly `threshold` bytes still use a single PUT.
pub fn upload_strategy(size: u64, threshold: u64) -> UploadStrategy {
    if size > threshold {
        UploadStrategy::Multipart
    } else {
        UploadStrategy::SingleShot
    }
}
