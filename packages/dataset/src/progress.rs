//! Progress reporting for dataset loads.
//!
//! Loading a national block file decodes around a million records, so the
//! loader reports through [`ProgressCallback`]. The CLI renders it with
//! `indicatif`; the server and tests use [`NullProgress`].

use std::sync::Arc;

/// Receives progress from a long-running load.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected records (enables percentage/ETA).
    fn set_total(&self, total: u64);

    /// Set the current position (absolute, not delta).
    fn set_position(&self, pos: u64);

    /// Advance progress by `delta` records.
    fn inc(&self, delta: u64);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
