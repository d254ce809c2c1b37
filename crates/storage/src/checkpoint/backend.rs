//! Checkpoint backend trait.

use async_trait::async_trait;

use super::entry::{Checkpoint, CheckpointKey};
use super::error::CheckpointError;

/// Pluggable backend for checkpoint storage.
///
/// Unlike a cache, a lost write here means re-uploading data, so every
/// method reports errors and the caller decides how to degrade.
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    /// Look up the checkpoint for a key.
    ///
    /// # Returns
    /// `Ok(None)` when no multipart upload is outstanding for the key.
    async fn load(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Persist the full checkpoint in one atomic write.
    async fn save(&self, key: &CheckpointKey, checkpoint: &Checkpoint)
        -> Result<(), CheckpointError>;

    /// Remove the checkpoint. Removing a missing checkpoint is not an error.
    async fn delete(&self, key: &CheckpointKey) -> Result<(), CheckpointError>;
}
