//! Error types for the edgequake-ocr-batch library.
//!
//! Failures are split by how far they are allowed to travel:
//!
//! * [`JobError`]: **Fatal to the job**: the document cannot be opened,
//!   pdfium cannot be bound, an artifact cannot be written, or something
//!   panicked. Even then the scheduler returns the artifacts it already
//!   finished alongside the error.
//!
//! * [`BackendInitError`]: **Fatal to one initialization attempt**. The
//!   lifecycle manager never retries in place; the next batch or chunk
//!   boundary tries again.
//!
//! * [`FailureKind`] / [`SkipReason`]: **Page-level**: stored inside
//!   [`crate::output::PageResult`], never propagated. A bad page never takes
//!   the batch down, a bad batch never takes the chunk down.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All job-level errors returned by the scheduler.
#[derive(Debug, Error)]
pub enum JobError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF could not be opened or parsed.
    #[error("PDF '{path}' could not be opened: {detail}")]
    DocumentUnreadable { path: PathBuf, detail: String },

    /// The requested page subset is empty.
    #[error("Nothing to process: document has {total} pages, {requested} requested")]
    EmptyPageRange { total: usize, requested: usize },

    // ── Artifact errors ───────────────────────────────────────────────────
    /// Could not create or write a chunk artifact.
    #[error("Failed to write artifact '{path}': {source}")]
    ArtifactWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (including panics caught at the job boundary).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The generation engine could not be constructed.
///
/// Typical causes: device memory unavailable, model weights missing, no
/// provider configured.
#[derive(Debug, Clone, Error)]
#[error("Backend initialization failed: {detail}")]
pub struct BackendInitError {
    pub detail: String,
}

impl BackendInitError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// A raw error raised by the generation backend.
///
/// Carries only the message; [`crate::engine::executor::classify_error`]
/// decides whether it is [`FailureKind::Critical`] or [`FailureKind::Transient`].
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a page ended without text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The generation call exceeded its deadline.
    Timeout,
    /// An ordinary backend error; retry in place may succeed.
    Transient,
    /// The backend session is compromised (dead loop, OOM, device fault).
    Critical,
    /// The backend could not be (re)initialized for this batch.
    EngineInitFailed,
    /// The page image could not be produced.
    Render,
}

impl FailureKind {
    /// Whether this failure should bump the engine's consecutive-error count.
    pub fn counts_against_engine(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::Critical)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Timeout => "Timeout",
            FailureKind::Transient => "Transient",
            FailureKind::Critical => "Critical",
            FailureKind::EngineInitFailed => "EngineInitFailed",
            FailureKind::Render => "RenderError",
        };
        f.write_str(s)
    }
}

/// Why a page was deliberately not attempted. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    MemoryPressure,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MemoryPressure => f.write_str("MemoryPressure"),
        }
    }
}
