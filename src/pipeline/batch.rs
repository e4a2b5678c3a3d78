//! Batch runner: render a page range, dispatch each page with one retry, and
//! turn every outcome into a [`PageResult`].
//!
//! Nothing escapes this boundary. Render problems, a backend that cannot be
//! (re)built and pages that fail twice all become page results, and terminal
//! failures are recorded in the job state.
//!
//! Retry policy per page, two attempts at most:
//!
//! | First attempt | Before the retry                      |
//! |---------------|---------------------------------------|
//! | `Critical`    | forced restart, retry on fresh handle |
//! | `Timeout`     | short delay, retry on same handle     |
//! | `Transient`   | short delay, retry on same handle     |

use super::encode::build_request;
use super::postprocess::clean_page_text;
use super::render::PageSource;
use crate::admission::MemoryProbe;
use crate::engine::{EngineLifecycle, GenerationEngine, GenerationRequest, RequestExecutor};
use crate::error::FailureKind;
use crate::output::PageResult;
use crate::progress::JobProgressCallback;
use crate::state::JobStateHandle;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Borrowed collaborators for running the batches of one job.
pub struct BatchRunner<'a> {
    pub source: &'a dyn PageSource,
    pub executor: &'a RequestExecutor,
    pub probe: &'a dyn MemoryProbe,
    pub state: &'a JobStateHandle,
    pub progress: &'a dyn JobProgressCallback,
    pub retry_delay: Duration,
    /// Pages selected for the job, for progress reporting.
    pub total_pages: usize,
}

/// What the batch is made of once rendering is done.
enum Prepared {
    Request(GenerationRequest),
    RenderFailed(String),
}

impl BatchRunner<'_> {
    /// Run one batch. Returns exactly one result per page in `range`, in order.
    pub async fn run(
        &self,
        lifecycle: &mut EngineLifecycle,
        range: Range<usize>,
        chunk_index: usize,
        prompt: &str,
        crop: bool,
    ) -> Vec<PageResult> {
        debug!("Batch {:?} (chunk {})", range, chunk_index + 1);
        let prepared = self.prepare(range, prompt, crop).await;
        let results = self.dispatch(lifecycle, prepared, chunk_index).await;
        self.probe.reclaim();
        results
    }

    async fn prepare(
        &self,
        range: Range<usize>,
        prompt: &str,
        crop: bool,
    ) -> Vec<(usize, Prepared)> {
        let mut rendered = match self.source.render(range.clone()).await {
            Ok(pages) => pages
                .into_iter()
                .map(|p| (p.index, p.image))
                .collect::<HashMap<_, _>>(),
            Err(e) => {
                warn!("Rendering pages {:?} failed: {}", range, e);
                let detail = e.to_string();
                return range
                    .map(|page| (page, Prepared::RenderFailed(detail.clone())))
                    .collect();
            }
        };

        // Each image is dropped as soon as its request is built.
        range
            .map(|page| {
                let prepared = match rendered.remove(&page) {
                    Some(Ok(img)) => match build_request(page, &img, prompt, crop) {
                        Ok(req) => Prepared::Request(req),
                        Err(e) => Prepared::RenderFailed(format!("image encoding failed: {e}")),
                    },
                    Some(Err(e)) => Prepared::RenderFailed(e),
                    None => Prepared::RenderFailed("page was not rendered".to_string()),
                };
                (page, prepared)
            })
            .collect()
    }

    async fn dispatch(
        &self,
        lifecycle: &mut EngineLifecycle,
        prepared: Vec<(usize, Prepared)>,
        chunk_index: usize,
    ) -> Vec<PageResult> {
        let mut results = Vec::with_capacity(prepared.len());
        let mut init_error: Option<String> = None;

        for (page, item) in prepared {
            let request = match item {
                Prepared::RenderFailed(detail) => {
                    results.push(self.terminal(page, chunk_index, FailureKind::Render, detail, 0));
                    continue;
                }
                Prepared::Request(req) => req,
            };

            // Once the engine cannot be built, the rest of the batch is not attempted.
            if let Some(detail) = &init_error {
                let kind = FailureKind::EngineInitFailed;
                results.push(self.terminal(page, chunk_index, kind, detail.clone(), 0));
                continue;
            }

            let force = lifecycle.needs_restart();
            let engine = match lifecycle.ensure_ready(force).await {
                Ok(handle) => handle,
                Err(e) => {
                    error!("Engine unavailable for page {}: {}", page + 1, e);
                    let detail = e.to_string();
                    let kind = FailureKind::EngineInitFailed;
                    results.push(self.terminal(page, chunk_index, kind, detail.clone(), 0));
                    init_error = Some(detail);
                    continue;
                }
            };

            let (result, restart_error) =
                self.run_page(lifecycle, engine, &request, chunk_index).await;
            if restart_error.is_some() {
                init_error = restart_error;
            }
            results.push(result);
        }
        results
    }

    /// Two attempts at one page. Also returns the restart error, if a restart
    /// between the attempts failed.
    async fn run_page(
        &self,
        lifecycle: &mut EngineLifecycle,
        engine: Arc<dyn GenerationEngine>,
        request: &GenerationRequest,
        chunk_index: usize,
    ) -> (PageResult, Option<String>) {
        let page = request.page_index;
        let timeout = self.executor.timeout();

        let first = self.executor.execute(engine.as_ref(), request, lifecycle.health_mut()).await;
        let (kind, detail) = match first.into_result(timeout) {
            Ok(text) => return (self.success(page, &text, 1), None),
            Err(failure) => failure,
        };

        // A critical failure has already marked the engine; the retry must
        // run on a fresh one.
        let engine = if lifecycle.needs_restart() {
            info!(
                "Page {}: {} failure, restarting engine before retry ({})",
                page + 1,
                kind,
                detail
            );
            drop(engine);
            match lifecycle.ensure_ready(true).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    error!("Restart after {} failure on page {} failed: {}", kind, page + 1, e);
                    let result = self.terminal(page, chunk_index, kind, detail, 1);
                    return (result, Some(e.to_string()));
                }
            }
        } else {
            debug!("Page {}: {} failure, retrying after {:?}", page + 1, kind, self.retry_delay);
            if !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
            engine
        };

        let second = self.executor.execute(engine.as_ref(), request, lifecycle.health_mut()).await;
        let result = match second.into_result(timeout) {
            Ok(text) => self.success(page, &text, 2),
            Err((kind, detail)) => self.terminal(page, chunk_index, kind, detail, 2),
        };
        (result, None)
    }

    fn success(&self, page: usize, raw: &str, attempts: u8) -> PageResult {
        let text = clean_page_text(raw);
        self.progress.on_page_complete(page + 1, self.total_pages, text.len());
        PageResult::text(page, text, attempts)
    }

    fn terminal(
        &self,
        page: usize,
        chunk_index: usize,
        kind: FailureKind,
        detail: String,
        attempts: u8,
    ) -> PageResult {
        warn!("Page {} failed ({}): {}", page + 1, kind, detail);
        self.state.record_failure(page, chunk_index, kind);
        self.progress.on_page_error(page + 1, self.total_pages, kind, &detail);
        PageResult::failed(page, kind, detail, attempts)
    }
}
