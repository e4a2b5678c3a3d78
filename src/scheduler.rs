//! Chunk scheduler: the job-level state machine.
//!
//! ```text
//! Initializing ──▶ RunningChunk ──▶ BetweenChunks ──▶ RunningChunk ──▶ … ──▶ Completed
//!                       │                                   │
//!                       └── cancel ──▶ Cancelled            └── error/panic ──▶ Failed
//! ```
//!
//! * **Initializing**: count pages, apply `max_pages`, partition into chunks,
//!   reset the job state.
//! * **RunningChunk**: restart the engine (every chunk but the first), then
//!   for each batch check for cancellation, ask admission control, and run
//!   the batch.
//! * **BetweenChunks**: persist the chunk, reclaim memory, pause.
//! * **Completed**: a multi-chunk job also zips its chunk files into
//!   `<base>_all.zip`.
//! * **Cancelled**: persist the interrupted chunk's pages separately and
//!   return the finished artifacts.
//! * **Failed**: an error or panic escaping chunk processing. The finished
//!   artifacts still come back with the error.
//!
//! Every exit path resets the job state through a drop guard.

use crate::admission::{Admission, AdmissionController, MemoryProbe};
use crate::bundle::{bundle_name, write_bundle};
use crate::cancel::CancellationToken;
use crate::config::JobConfig;
use crate::engine::executor::panic_message;
use crate::engine::{EngineFactory, EngineLifecycle, RequestExecutor};
use crate::error::{JobError, SkipReason};
use crate::output::{
    assemble_chunk, ChunkArtifact, JobOutcome, JobOutput, JobSummary, PageOutcome, PageResult,
};
use crate::pipeline::batch::BatchRunner;
use crate::pipeline::chunk::{plan_chunks, Chunk};
use crate::pipeline::render::PageSource;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::prompts::DOCUMENT_TO_MARKDOWN;
use crate::state::{FinishGuard, JobStateHandle};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What to run: the per-job inputs that are not host policy.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Prompt template, sent verbatim.
    pub prompt: String,
    /// Let the backend tile page images into crops.
    pub crop: bool,
    /// Process only the first N pages; 0 means all.
    pub max_pages: usize,
    /// Stem for artifact file names (`<base>_001.md`, …). Default: `document`.
    pub base_name: Option<String>,
}

impl Default for JobRequest {
    fn default() -> Self {
        Self {
            prompt: DOCUMENT_TO_MARKDOWN.to_string(),
            crop: true,
            max_pages: 0,
            base_name: None,
        }
    }
}

impl JobRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    fn base_name(&self) -> &str {
        self.base_name.as_deref().unwrap_or("document")
    }
}

/// Runs jobs against one page source with engines from one factory.
pub struct ChunkScheduler {
    config: JobConfig,
    source: Arc<dyn PageSource>,
    factory: Arc<dyn EngineFactory>,
    probe: Arc<dyn MemoryProbe>,
    progress: ProgressCallback,
}

/// How the chunk loop ended, before the outcome is assembled.
enum Finish {
    Completed(JobOutput),
    Cancelled(Option<ChunkArtifact>),
}

/// Page counters accumulated across chunks.
#[derive(Default)]
struct Tally {
    total_pages: usize,
    processed: usize,
    skipped: usize,
}

impl Tally {
    fn absorb(&mut self, pages: &[PageResult]) {
        for page in pages {
            match page.outcome {
                PageOutcome::Text(_) => self.processed += 1,
                PageOutcome::Skipped(_) => self.skipped += 1,
                PageOutcome::Failed { .. } => {}
            }
        }
    }
}

impl ChunkScheduler {
    pub fn new(
        config: JobConfig,
        source: Arc<dyn PageSource>,
        factory: Arc<dyn EngineFactory>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self {
            config,
            source,
            factory,
            probe,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Run one job to completion, cancellation or failure.
    ///
    /// Never returns `Err`: a job-level failure is [`JobOutcome::Failed`] and
    /// carries the artifacts finished before it.
    pub async fn run(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
        state: &JobStateHandle,
    ) -> JobOutcome {
        state.begin(0);
        let _finish = FinishGuard::new(state);
        let mut lifecycle = EngineLifecycle::new(
            Arc::clone(&self.factory),
            self.config.engine.clone(),
            Arc::clone(&self.probe),
            self.config.restart_settle,
        );
        let mut tally = Tally::default();

        let drive = self.drive(request, cancel, state, &mut lifecycle, &mut tally);
        let driven = AssertUnwindSafe(drive).catch_unwind().await;
        lifecycle.release().await;

        let completed = state.completed_files();
        let mut summary = JobSummary {
            total_pages: tally.total_pages,
            processed_pages: tally.processed,
            failed_pages: state.failed_page_numbers(),
            skipped_pages: tally.skipped,
            artifacts: completed.len(),
            preview: self.config.failure_preview,
        };

        let outcome = match driven {
            Ok(Ok(Finish::Completed(output))) => {
                summary.artifacts = output.artifact_count();
                info!("Job complete: {}", summary);
                JobOutcome::Completed { output, summary }
            }
            Ok(Ok(Finish::Cancelled(partial))) => {
                info!("Job cancelled: {}", summary);
                JobOutcome::Cancelled {
                    completed,
                    partial,
                    summary,
                }
            }
            Ok(Err(error)) => {
                error!("Job failed: {} ({})", error, summary);
                JobOutcome::Failed {
                    completed,
                    error,
                    summary,
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                let error = JobError::Internal(format!("job panicked: {message}"));
                error!("Job failed: {} ({})", error, summary);
                JobOutcome::Failed {
                    completed,
                    error,
                    summary,
                }
            }
        };

        self.progress.on_job_complete(tally.total_pages, tally.processed);
        outcome
    }

    async fn drive(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
        state: &JobStateHandle,
        lifecycle: &mut EngineLifecycle,
        tally: &mut Tally,
    ) -> Result<Finish, JobError> {
        // ── Initializing ─────────────────────────────────────────────────────
        let total = self.source.page_count().await?;
        let num_pages = match request.max_pages {
            0 => total,
            n => n.min(total),
        };
        if num_pages == 0 {
            return Err(JobError::EmptyPageRange {
                total,
                requested: request.max_pages,
            });
        }

        let chunks = plan_chunks(num_pages, self.config.chunk_size);
        let total_chunks = chunks.len();
        state.begin(total_chunks);
        tally.total_pages = num_pages;
        info!(
            "Processing {} of {} pages in {} chunk(s) of up to {}",
            num_pages, total, total_chunks, self.config.chunk_size
        );
        self.progress.on_job_start(num_pages, total_chunks);

        let mut admission =
            AdmissionController::new(Arc::clone(&self.probe), self.config.admission);
        let executor = RequestExecutor::new(self.config.request_timeout);
        let runner = BatchRunner {
            source: self.source.as_ref(),
            executor: &executor,
            probe: self.probe.as_ref(),
            state,
            progress: self.progress.as_ref(),
            retry_delay: self.config.retry_delay,
            total_pages: num_pages,
        };
        let single = total_chunks == 1;
        let mut combined = None;

        for chunk in &chunks {
            if cancel.take() {
                info!("Cancellation observed before chunk {}", chunk.index + 1);
                return Ok(Finish::Cancelled(None));
            }

            // ── RunningChunk ─────────────────────────────────────────────────
            state.enter_chunk(chunk.index);
            self.progress.on_chunk_start(chunk.index + 1, total_chunks, chunk.range());
            info!(
                "Chunk {}/{}: pages {}-{}",
                chunk.index + 1,
                total_chunks,
                chunk.start + 1,
                chunk.end
            );

            if chunk.index > 0 {
                // A failed restart leaves no handle; the first batch retries it.
                if let Err(e) = lifecycle.ensure_ready(true).await {
                    warn!("Restart before chunk {} failed: {}", chunk.index + 1, e);
                }
            }

            let batch_size = self.config.effective_batch_size(chunk.len());
            debug!("Chunk {} batch size {}", chunk.index + 1, batch_size);
            let mut pages: Vec<PageResult> = Vec::with_capacity(chunk.len());

            for batch in chunk.batches(batch_size) {
                if cancel.take() {
                    info!(
                        "Cancellation observed in chunk {} before page {}",
                        chunk.index + 1,
                        batch.start + 1
                    );
                    let partial = self.persist_partial(request, chunk, &pages, single).await?;
                    return Ok(Finish::Cancelled(partial));
                }

                let results = match admission.check() {
                    Admission::Admitted => {
                        let prompt = &request.prompt;
                        runner.run(lifecycle, batch, chunk.index, prompt, request.crop).await
                    }
                    verdict => {
                        info!("Pages {}-{} skipped: {:?}", batch.start + 1, batch.end, verdict);
                        let reason = SkipReason::MemoryPressure;
                        self.progress.on_batch_skipped(batch.clone(), reason);
                        batch.map(|p| PageResult::skipped(p, reason)).collect()
                    }
                };
                // Counted as they arrive so a mid-chunk failure still reports them.
                tally.absorb(&results);
                pages.extend(results);
            }

            // ── BetweenChunks ────────────────────────────────────────────────
            let text = assemble_chunk(&pages);
            drop(pages);

            if single {
                combined = Some(text);
                state.complete_chunk(None);
            } else {
                let name = artifact_name(request.base_name(), chunk, false);
                let path = self.config.output_dir.join(name);
                write_atomic(&path, &text).await?;
                info!("Chunk {} saved to {}", chunk.index + 1, path.display());
                state.complete_chunk(Some(path));
            }
            self.progress.on_chunk_complete(chunk.index + 1, total_chunks);

            self.probe.reclaim();
            if chunk.index + 1 < total_chunks && !self.config.chunk_pause.is_zero() {
                tokio::time::sleep(self.config.chunk_pause).await;
            }
        }

        // ── Completed ────────────────────────────────────────────────────────
        let output = match combined {
            Some(text) => JobOutput::Combined(text),
            None => {
                let files = state.completed_files();
                let bundle = self.config.output_dir.join(bundle_name(request.base_name()));
                write_bundle(&bundle, &files).await?;
                JobOutput::Artifacts { files, bundle }
            }
        };
        Ok(Finish::Completed(output))
    }

    /// Persist the pages of an interrupted chunk. Never added to the
    /// completed artifact list.
    async fn persist_partial(
        &self,
        request: &JobRequest,
        chunk: &Chunk,
        pages: &[PageResult],
        single: bool,
    ) -> Result<Option<ChunkArtifact>, JobError> {
        if pages.is_empty() {
            return Ok(None);
        }
        let text = assemble_chunk(pages);
        if single {
            return Ok(Some(ChunkArtifact::Text(text)));
        }
        let path = self.config.output_dir.join(artifact_name(request.base_name(), chunk, true));
        write_atomic(&path, &text).await?;
        info!("Partial chunk {} saved to {}", chunk.index + 1, path.display());
        Ok(Some(ChunkArtifact::File(path)))
    }
}

/// `<base>_<NNN>.md`, or `<base>_<NNN>.partial.md` for an interrupted chunk.
pub fn artifact_name(base: &str, chunk: &Chunk, partial: bool) -> String {
    let suffix = if partial { ".partial" } else { "" };
    format!("{}_{:03}{}.md", base, chunk.index + 1, suffix)
}

/// Write via a temporary sibling and rename, so readers never see half a file.
async fn write_atomic(path: &Path, text: &str) -> Result<(), JobError> {
    let fail = |source: std::io::Error| JobError::ArtifactWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    let tmp_path: PathBuf = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, text).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_are_one_based_and_padded() {
        let c = Chunk { index: 0, start: 0, end: 20 };
        assert_eq!(artifact_name("report", &c, false), "report_001.md");
        let c = Chunk { index: 11, start: 220, end: 240 };
        assert_eq!(artifact_name("report", &c, true), "report_012.partial.md");
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc_001.md");
        write_atomic(&path, "--- Page 1 ---\nhello\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "--- Page 1 ---\nhello\n");
        assert!(!path.with_extension("md.tmp").exists());
    }
}
