//! Checkpoints for resumable multipart uploads.
//!
//! A checkpoint records the upload id and the parts the store has accepted,
//! so a later run can continue an interrupted upload instead of starting
//! over. This module provides the checkpoint facade with a pluggable backend
//! interface.

mod backend;
mod entry;
mod error;
mod sqlite;

pub use backend::CheckpointBackend;
pub use entry::{Checkpoint, CheckpointKey};
pub use error::CheckpointError;
pub use sqlite::SqliteCheckpointStore;

use std::path::PathBuf;
use std::sync::Arc;

/// Application directory name under the user cache directory.
pub const CACHE_APP_DIR: &str = "rusty-uploader";

/// Default checkpoint directory: `<user cache dir>/rusty-uploader/uploads`.
pub fn default_checkpoint_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join(CACHE_APP_DIR).join("uploads"))
}

/// Checkpoint store shared by the planner and the completion coordinator.
#[derive(Clone)]
pub struct CheckpointStore {
    backend: Arc<dyn CheckpointBackend>,
}

impl CheckpointStore {
    /// Create a checkpoint store over the given backend.
    pub fn new(backend: impl CheckpointBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Open the SQLite store in `dir`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn open_sqlite(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        Ok(Self::new(SqliteCheckpointStore::open(dir)?))
    }

    /// Look up the checkpoint for a key.
    ///
    /// An unreadable checkpoint is logged and treated as absent, which makes
    /// the caller start a fresh upload.
    pub async fn load(&self, key: &CheckpointKey) -> Option<Checkpoint> {
        match self.backend.load(key).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                log::warn!("Checkpoint load error for {}: {}", key.path, e);
                None
            }
        }
    }

    /// Persist a checkpoint.
    pub async fn save(
        &self,
        key: &CheckpointKey,
        checkpoint: &Checkpoint,
    ) -> Result<(), CheckpointError> {
        self.backend.save(key, checkpoint).await
    }

    /// Remove the checkpoint, after a completed upload or when it went stale.
    pub async fn delete(&self, key: &CheckpointKey) -> Result<(), CheckpointError> {
        self.backend.delete(key).await
    }
}
