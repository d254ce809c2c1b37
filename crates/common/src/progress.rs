//! Generic progress callback trait and byte-delta throttling.

use std::marker::PhantomData;

/// Generic progress callback trait.
///
/// Type parameter `T` is the progress data type. Readers feeding an upload
/// report byte deltas (`u64`); other stages may report richer structs.
pub trait ProgressCallback<T>: Send + Sync {
    /// Called with progress updates.
    ///
    /// # Arguments
    /// * `progress` - Progress data for the current operation
    ///
    /// # Returns
    /// - `true` to continue the operation
    /// - `false` to cancel the operation
    fn on_progress(&self, progress: &T) -> bool;
}

/// A no-op progress callback that always continues.
pub struct NoOpProgress;

impl<T> ProgressCallback<T> for NoOpProgress {
    fn on_progress(&self, _progress: &T) -> bool {
        true
    }
}

/// A progress callback that wraps a closure.
pub struct FnProgress<F, T> {
    callback: F,
    _marker: PhantomData<fn(&T)>,
}

impl<F, T> FnProgress<F, T>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    /// Create a new closure-based progress callback.
    ///
    /// # Arguments
    /// * `callback` - Closure that receives progress and returns whether to continue
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _marker: PhantomData,
        }
    }
}

impl<F, T> ProgressCallback<T> for FnProgress<F, T>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn on_progress(&self, progress: &T) -> bool {
        (self.callback)(progress)
    }
}

/// Create a progress callback from a closure.
///
/// # Arguments
/// * `f` - Closure that receives progress and returns whether to continue
pub fn progress_fn<F, T>(f: F) -> FnProgress<F, T>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    FnProgress::new(f)
}

/// Coalesces small byte deltas into coarser progress updates.
///
/// A delta is released once more than 1/20th of `total` has accumulated, or
/// when the stream reaches `total`, so a 128 MiB part produces about twenty
/// updates instead of one per read buffer.
#[derive(Debug, Clone)]
pub struct DeltaThrottle {
    total: u64,
    seen: u64,
    reported: u64,
}

impl DeltaThrottle {
    /// Create a throttle for a stream of `total` bytes.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            seen: 0,
            reported: 0,
        }
    }

    /// Record `n` more bytes; returns the delta to report, if any.
    pub fn advance(&mut self, n: u64) -> Option<u64> {
        self.seen += n;
        let pending: u64 = self.seen - self.reported;
        if pending > 0 && (pending > self.total / 20 || self.seen >= self.total) {
            self.reported = self.seen;
            Some(pending)
        } else {
            None
        }
    }

    /// Bytes recorded so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }
}
