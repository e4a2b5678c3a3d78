//! Entry points for running an OCR job over a local PDF.
//!
//! These wire the concrete collaborators together: pdfium for pages, an
//! `edgequake_llm` provider for generation and `/proc/meminfo` for admission
//! control. Callers with their own backend or page source build a
//! [`ChunkScheduler`] directly.

use crate::admission::SystemMemoryProbe;
use crate::cancel::CancellationToken;
use crate::config::JobConfig;
use crate::engine::llm::LlmEngineFactory;
use crate::engine::EngineFactory;
use crate::error::JobError;
use crate::output::JobOutcome;
use crate::pipeline::render::PdfPageSource;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::scheduler::{ChunkScheduler, JobRequest};
use crate::state::JobStateHandle;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Run an OCR job over a PDF file.
///
/// # Arguments
/// * `path`    : local PDF file
/// * `request` : prompt, cropping flag and page limit
/// * `config`  : chunking, timeouts and memory policy
/// * `cancel`  : checked at every chunk and batch boundary
/// * `state`   : pollable while the job runs and after it returns
///
/// # Errors
/// Returns `Err(JobError)` only when the file cannot be opened as a PDF.
/// Everything after that, including a failed job, is a [`JobOutcome`].
pub async fn run_pdf_job(
    path: impl AsRef<Path>,
    request: JobRequest,
    config: &JobConfig,
    cancel: &CancellationToken,
    state: &JobStateHandle,
) -> Result<JobOutcome, JobError> {
    run_pdf_job_with(
        path,
        request,
        config,
        Arc::new(LlmEngineFactory::new()),
        Arc::new(NoopProgressCallback),
        cancel,
        state,
    )
    .await
}

/// [`run_pdf_job`] with an explicit engine factory and progress callback.
pub async fn run_pdf_job_with(
    path: impl AsRef<Path>,
    mut request: JobRequest,
    config: &JobConfig,
    factory: Arc<dyn EngineFactory>,
    progress: ProgressCallback,
    cancel: &CancellationToken,
    state: &JobStateHandle,
) -> Result<JobOutcome, JobError> {
    let source = PdfPageSource::open(path, config)?;
    info!("Starting OCR job: {}", source.path().display());
    if request.base_name.is_none() {
        request.base_name = Some(source.base_name());
    }

    let scheduler = ChunkScheduler::new(
        config.clone(),
        Arc::new(source),
        factory,
        Arc::new(SystemMemoryProbe),
    )
    .with_progress(progress);
    Ok(scheduler.run(&request, cancel, state).await)
}

/// Synchronous wrapper around [`run_pdf_job`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_pdf_job_sync(
    path: impl AsRef<Path>,
    request: JobRequest,
    config: &JobConfig,
    cancel: &CancellationToken,
    state: &JobStateHandle,
) -> Result<JobOutcome, JobError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| JobError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run_pdf_job(path, request, config, cancel, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_pdf_is_an_error_not_an_outcome() {
        let state = JobStateHandle::new();
        let err = run_pdf_job(
            "/no/such/file.pdf",
            JobRequest::default(),
            &JobConfig::default(),
            &CancellationToken::new(),
            &state,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, JobError::FileNotFound { .. }));
        assert!(!state.snapshot().active);
    }
}
