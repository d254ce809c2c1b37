//! Shared constants used across rusty-uploader crates.

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// One gibibyte.
pub const GIB: u64 = 1024 * MIB;

/// Default multipart part size (128 MiB).
pub const DEFAULT_PART_SIZE: u64 = 128 * MIB;

/// Default size above which a file is uploaded in parts (128 MiB).
///
/// Files of exactly this size still go through a single PUT.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 128 * MIB;

/// Default byte span of parts allowed in flight per file (1 GiB).
pub const DEFAULT_WINDOW_SIZE: u64 = GIB;

/// Default number of upload workers.
pub const DEFAULT_UPLOAD_THREADS: usize = 4;

/// Maximum number of parts in one multipart upload.
pub const MAX_PARTS_COUNT: u64 = 10_000;

/// Maximum size of a single object (5 TiB).
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * GIB;

/// Largest object a single PUT may carry (5 GiB).
pub const MAX_SINGLE_PUT_SIZE: u64 = 5 * GIB;

/// Object tag carrying the destination record id.
///
/// Checkpoints are scoped by this tag so the same local file uploaded to two
/// records keeps two independent multipart uploads.
pub const RECORD_ID_TAG: &str = "X-COS-RECORD-ID";

/// Query parameter of a pre-signed URL carrying URL-encoded object tags.
pub const TAGGING_QUERY_PARAM: &str = "X-Amz-Tagging";
