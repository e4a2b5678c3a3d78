//! Result types: per-page outcomes, chunk artifacts and the job outcome.

use crate::error::{FailureKind, JobError, SkipReason};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The result of one page, keyed by its absolute 0-based index.
///
/// Produced exactly once per page per job; a retry replaces the first
/// attempt's outcome instead of adding a second result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub page_index: usize,
    pub outcome: PageOutcome,
    /// Generation attempts spent on this page (0 if never dispatched).
    pub attempts: u8,
}

/// What happened to a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PageOutcome {
    Text(String),
    Failed { kind: FailureKind, detail: String },
    Skipped(SkipReason),
}

impl PageResult {
    pub fn text(page_index: usize, text: impl Into<String>, attempts: u8) -> Self {
        Self {
            page_index,
            outcome: PageOutcome::Text(text.into()),
            attempts,
        }
    }

    pub fn failed(
        page_index: usize,
        kind: FailureKind,
        detail: impl Into<String>,
        attempts: u8,
    ) -> Self {
        Self {
            page_index,
            outcome: PageOutcome::Failed {
                kind,
                detail: detail.into(),
            },
            attempts,
        }
    }

    pub fn skipped(page_index: usize, reason: SkipReason) -> Self {
        Self {
            page_index,
            outcome: PageOutcome::Skipped(reason),
            attempts: 0,
        }
    }

    /// 1-indexed page number for display.
    pub fn page_num(&self) -> usize {
        self.page_index + 1
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PageOutcome::Text(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.outcome {
            PageOutcome::Failed { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Render the page as a block of chunk output.
    pub fn render_block(&self) -> String {
        let body = match &self.outcome {
            PageOutcome::Text(text) => text.trim_end().to_string(),
            PageOutcome::Failed { kind, detail } => {
                format!("Error processing page ({kind}): {detail}")
            }
            PageOutcome::Skipped(reason) => format!("Page skipped ({reason})"),
        };
        format!("--- Page {} ---\n{}\n", self.page_num(), body)
    }
}

/// Join page results into the text of one chunk, in page order.
pub fn assemble_chunk(pages: &[PageResult]) -> String {
    pages
        .iter()
        .map(PageResult::render_block)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A persisted chunk: in memory for single-chunk jobs, on disk otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChunkArtifact {
    Text(String),
    File(PathBuf),
}

/// The deliverable of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobOutput {
    /// One chunk: the combined text itself.
    Combined(String),
    /// Several chunks: one file per chunk, in chunk order, plus a zip of them.
    Artifacts { files: Vec<PathBuf>, bundle: PathBuf },
}

impl JobOutput {
    /// Number of generated artifacts (the combined text counts as one).
    pub fn artifact_count(&self) -> usize {
        match self {
            JobOutput::Combined(_) => 1,
            JobOutput::Artifacts { files, .. } => files.len(),
        }
    }
}

/// How a job ended. Completed work is carried on every variant.
#[derive(Debug)]
pub enum JobOutcome {
    Completed {
        output: JobOutput,
        summary: JobSummary,
    },
    Cancelled {
        /// Artifacts of chunks that finished before cancellation.
        completed: Vec<PathBuf>,
        /// Pages of the interrupted chunk, persisted separately.
        partial: Option<ChunkArtifact>,
        summary: JobSummary,
    },
    Failed {
        completed: Vec<PathBuf>,
        error: JobError,
        summary: JobSummary,
    },
}

impl JobOutcome {
    pub fn summary(&self) -> &JobSummary {
        match self {
            JobOutcome::Completed { summary, .. }
            | JobOutcome::Cancelled { summary, .. }
            | JobOutcome::Failed { summary, .. } => summary,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

/// Job-wide counters shown to the user at the end of every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Pages selected for the job.
    pub total_pages: usize,
    /// Pages that produced text.
    pub processed_pages: usize,
    /// 1-indexed numbers of pages with a terminal failure, ascending.
    pub failed_pages: Vec<usize>,
    /// Pages vetoed by admission control.
    pub skipped_pages: usize,
    /// Artifacts generated (the combined text counts as one).
    pub artifacts: usize,
    /// Maximum page numbers listed by `Display`.
    pub preview: usize,
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Generated {} artifact(s) from {}/{} pages",
            self.artifacts, self.processed_pages, self.total_pages
        )?;
        if self.skipped_pages > 0 {
            write!(f, "; {} page(s) skipped under memory pressure", self.skipped_pages)?;
        }
        if self.failed_pages.is_empty() {
            return write!(f, "; no failed pages");
        }
        let shown: Vec<String> = self
            .failed_pages
            .iter()
            .take(self.preview)
            .map(|p| p.to_string())
            .collect();
        write!(f, "; {} page(s) failed: {}", self.failed_pages.len(), shown.join(", "))?;
        if self.failed_pages.len() > self.preview {
            write!(f, ", … (+{} more)", self.failed_pages.len() - self.preview)?;
        }
        Ok(())
    }
}
