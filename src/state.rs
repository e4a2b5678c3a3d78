//! Job state: progress, failures and finished artifacts, pollable at any time.
//!
//! The scheduler and batch runner write through a [`JobStateHandle`]; a UI or
//! signal handler holding a clone of the same handle can read a
//! [`JobStateSnapshot`] while the job runs, after it is cancelled, or after it
//! fails.

use crate::error::FailureKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// One terminal page failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// 0-based absolute page index.
    pub page: usize,
    /// 0-based chunk ordinal.
    pub chunk: usize,
    pub kind: FailureKind,
}

/// Mutable record of one job's progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobState {
    /// Chunk artifacts in the order they were written.
    pub completed_files: Vec<PathBuf>,
    pub failures: Vec<FailureRecord>,
    /// 1-based ordinal of the chunk being processed; 0 when idle.
    pub current_chunk: usize,
    pub total_chunks: usize,
    /// Chunks fully persisted so far.
    pub completed_chunks: usize,
    pub active: bool,
}

/// Point-in-time copy of [`JobState`] for callers.
pub type JobStateSnapshot = JobState;

/// Shared handle to a job's state.
#[derive(Debug, Clone, Default)]
pub struct JobStateHandle {
    inner: Arc<Mutex<JobState>>,
}

impl JobStateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy the current state.
    pub fn snapshot(&self) -> JobStateSnapshot {
        self.lock().clone()
    }

    /// Start a job: forget the previous one and fix the chunk count.
    pub fn begin(&self, total_chunks: usize) {
        let mut s = self.lock();
        *s = JobState {
            total_chunks,
            active: true,
            ..JobState::default()
        };
    }

    pub fn enter_chunk(&self, chunk_index: usize) {
        let mut s = self.lock();
        s.current_chunk = (chunk_index + 1).min(s.total_chunks);
    }

    pub fn complete_chunk(&self, artifact: Option<PathBuf>) {
        let mut s = self.lock();
        if let Some(path) = artifact {
            s.completed_files.push(path);
        }
        s.completed_chunks = (s.completed_chunks + 1).min(s.total_chunks);
    }

    /// Record a page that exhausted its attempts. A page is recorded at most once.
    pub fn record_failure(&self, page: usize, chunk: usize, kind: FailureKind) {
        let mut s = self.lock();
        if s.failures.iter().any(|f| f.page == page) {
            return;
        }
        s.failures.push(FailureRecord { page, chunk, kind });
    }

    pub fn completed_files(&self) -> Vec<PathBuf> {
        self.lock().completed_files.clone()
    }

    /// 1-indexed failed page numbers, ascending.
    pub fn failed_page_numbers(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.lock().failures.iter().map(|f| f.page + 1).collect();
        pages.sort_unstable();
        pages
    }

    /// End-of-job reset. Artifacts and failures stay readable until the next `begin`.
    pub fn finish(&self) {
        let mut s = self.lock();
        s.active = false;
        s.current_chunk = 0;
        s.total_chunks = 0;
    }
}

/// Calls [`JobStateHandle::finish`] when dropped, so every exit path resets
/// the state, including early returns and unwinding.
pub(crate) struct FinishGuard<'a> {
    state: &'a JobStateHandle,
}

impl<'a> FinishGuard<'a> {
    pub(crate) fn new(state: &'a JobStateHandle) -> Self {
        Self { state }
    }
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.state.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_resets_previous_job() {
        let state = JobStateHandle::new();
        state.begin(3);
        state.record_failure(4, 0, FailureKind::Timeout);
        state.complete_chunk(Some(PathBuf::from("a_001.md")));
        state.begin(2);
        let snap = state.snapshot();
        assert!(snap.failures.is_empty());
        assert!(snap.completed_files.is_empty());
        assert_eq!(snap.total_chunks, 2);
        assert!(snap.active);
    }

    #[test]
    fn current_chunk_never_exceeds_total() {
        let state = JobStateHandle::new();
        state.begin(2);
        state.enter_chunk(0);
        assert_eq!(state.snapshot().current_chunk, 1);
        state.enter_chunk(5);
        assert_eq!(state.snapshot().current_chunk, 2);
    }

    #[test]
    fn failures_are_recorded_once_per_page() {
        let state = JobStateHandle::new();
        state.begin(1);
        state.record_failure(2, 0, FailureKind::Critical);
        state.record_failure(2, 0, FailureKind::Timeout);
        state.record_failure(0, 0, FailureKind::Transient);
        let snap = state.snapshot();
        assert_eq!(snap.failures.len(), 2);
        assert_eq!(snap.failures[0].kind, FailureKind::Critical);
        assert_eq!(state.failed_page_numbers(), vec![1, 3]);
    }

    #[test]
    fn guard_finishes_but_keeps_artifacts() {
        let state = JobStateHandle::new();
        {
            let _guard = FinishGuard::new(&state);
            state.begin(3);
            state.enter_chunk(1);
            state.complete_chunk(Some(PathBuf::from("doc_001.md")));
        }
        let snap = state.snapshot();
        assert!(!snap.active);
        assert_eq!(snap.current_chunk, 0);
        assert_eq!(snap.total_chunks, 0);
        assert_eq!(snap.completed_files, vec![PathBuf::from("doc_001.md")]);
    }

    #[test]
    fn snapshot_serialises() {
        let state = JobStateHandle::new();
        state.begin(1);
        let json = serde_json::to_string(&state.snapshot()).expect("serialise");
        assert!(json.contains("\"total_chunks\":1"));
    }
}
