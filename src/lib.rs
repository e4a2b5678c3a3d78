//! # edgequake-ocr-batch
//!
//! OCR long PDFs page by page against a slow, stateful Vision Language Model
//! backend, without losing finished work when the backend misbehaves.
//!
//! ## Why this crate?
//!
//! A 300-page document cannot be sent to a generation backend in one go. The
//! backend holds device memory, fragments it over long sessions, sometimes
//! dies outright and sometimes just stops answering. This crate splits the
//! document into chunks, restarts the backend between them, retries pages
//! once, vetoes batches under memory pressure, and writes each chunk to disk
//! as soon as it is done.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Plan      pages → chunks → batches (adaptive batch size)
//!  ├─ 2. Admit     memory check before every batch
//!  ├─ 3. Render    rasterise the batch via pdfium (spawn_blocking)
//!  ├─ 4. Generate  one call per page, hard timeout, one retry
//!  ├─ 5. Clean     strip grounding spans, fences, invisible chars
//!  ├─ 6. Persist   one artifact per chunk, restart engine, next chunk
//!  └─ 7. Bundle    zip the chunk files of a multi-chunk job
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ocr_batch::{run_pdf_job, CancellationToken, JobConfig, JobOutcome, JobRequest, JobStateHandle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = JobConfig::builder().chunk_size(20).build()?;
//!     let cancel = CancellationToken::new();
//!     let state = JobStateHandle::new();
//!
//!     let outcome = run_pdf_job("report.pdf", JobRequest::default(), &config, &cancel, &state).await?;
//!     eprintln!("{}", outcome.summary());
//!     if let JobOutcome::Completed { output, .. } = outcome {
//!         println!("{:?}", output);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr-batch` binary (clap + indicatif + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod admission;
pub mod bundle;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod scheduler;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use admission::{Admission, AdmissionController, MemoryPressure, MemoryProbe, SystemMemoryProbe};
pub use cancel::CancellationToken;
pub use config::{AdmissionThresholds, EngineConfig, JobConfig, JobConfigBuilder};
pub use convert::{run_pdf_job, run_pdf_job_sync, run_pdf_job_with};
pub use engine::{
    EngineFactory, EngineHealth, EngineLifecycle, GenerationEngine, GenerationOutcome,
    GenerationRequest, OutputStream, RequestExecutor,
};
pub use error::{BackendInitError, EngineError, FailureKind, JobError, SkipReason};
pub use output::{ChunkArtifact, JobOutcome, JobOutput, JobSummary, PageOutcome, PageResult};
pub use pipeline::render::{PageSource, PdfPageSource, RenderedPage};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use scheduler::{ChunkScheduler, JobRequest};
pub use state::{FailureRecord, JobState, JobStateHandle, JobStateSnapshot};
