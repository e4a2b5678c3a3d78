//! Progress-callback trait for job, chunk and page events.
//!
//! Pass an [`Arc<dyn JobProgressCallback>`] to
//! [`crate::scheduler::ChunkScheduler::with_progress`] to receive events as
//! the job moves through its chunks. The CLI uses it to drive a progress bar;
//! a service could forward events to a channel or a database record.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ocr_batch::JobProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page_num, total_pages, text_len);
//!     }
//! }
//! ```

use crate::error::{FailureKind, SkipReason};
use std::sync::Arc;

/// Called by the scheduler and batch runner as a job progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Page numbers are 1-indexed; chunk numbers are
/// 1-indexed ordinals.
pub trait JobProgressCallback: Send + Sync {
    /// Called once after chunk partitioning.
    fn on_job_start(&self, total_pages: usize, total_chunks: usize) {
        let _ = (total_pages, total_chunks);
    }

    fn on_chunk_start(&self, chunk_num: usize, total_chunks: usize, pages: std::ops::Range<usize>) {
        let _ = (chunk_num, total_chunks, pages);
    }

    /// Called when a page produced text.
    ///
    /// # Arguments
    /// * `page_num`    : 1-indexed page number
    /// * `total_pages` : pages selected for the job
    /// * `text_len`    : byte length of the cleaned page text
    fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
        let _ = (page_num, total_pages, text_len);
    }

    /// Called when a page ends in a terminal failure.
    fn on_page_error(&self, page_num: usize, total_pages: usize, kind: FailureKind, error: &str) {
        let _ = (page_num, total_pages, kind, error);
    }

    /// Called when admission control vetoes a batch.
    fn on_batch_skipped(&self, pages: std::ops::Range<usize>, reason: SkipReason) {
        let _ = (pages, reason);
    }

    /// Called after a chunk's artifact is persisted.
    fn on_chunk_complete(&self, chunk_num: usize, total_chunks: usize) {
        let _ = (chunk_num, total_chunks);
    }

    /// Called once on every exit path.
    ///
    /// # Arguments
    /// * `total_pages`   : pages selected for the job
    /// * `success_count` : pages that produced text
    fn on_job_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Shared callback handle.
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        completes: AtomicUsize,
        errors: AtomicUsize,
        skipped_pages: AtomicUsize,
        chunks_done: AtomicUsize,
    }

    impl JobProgressCallback for TrackingCallback {
        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _text_len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(
            &self,
            _page_num: usize,
            _total_pages: usize,
            _kind: FailureKind,
            _error: &str,
        ) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_skipped(&self, pages: std::ops::Range<usize>, _reason: SkipReason) {
            self.skipped_pages.fetch_add(pages.len(), Ordering::SeqCst);
        }

        fn on_chunk_complete(&self, _chunk_num: usize, _total_chunks: usize) {
            self.chunks_done.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_job_start(5, 1);
        cb.on_chunk_start(1, 1, 0..5);
        cb.on_page_complete(1, 5, 42);
        cb.on_page_error(2, 5, FailureKind::Timeout, "generation timed out");
        cb.on_batch_skipped(2..3, SkipReason::MemoryPressure);
        cb.on_chunk_complete(1, 1);
        cb.on_job_complete(5, 3);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_page_complete(1, 3, 100);
        tracker.on_page_complete(2, 3, 200);
        tracker.on_page_error(3, 3, FailureKind::Critical, "engine dead");
        tracker.on_batch_skipped(3..5, SkipReason::MemoryPressure);
        tracker.on_chunk_complete(1, 1);

        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skipped_pages.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.chunks_done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_job_start(10, 1);
        cb.on_page_complete(1, 10, 512);
    }
}
