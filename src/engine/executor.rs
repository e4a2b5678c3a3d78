//! Request executor: one generation call, one deadline, one typed outcome.
//!
//! The executor never retries and never returns an error. Whatever the
//! backend does (yields text, raises, hangs or panics) comes back as a
//! [`GenerationOutcome`] and is reflected in the engine's
//! [`EngineHealth`]. Retrying is the batch runner's job because only it knows
//! which page a failure belongs to.

use super::{EngineHealth, GenerationEngine, GenerationRequest};
use crate::error::FailureKind;
use futures::{FutureExt, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of a single generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Success(String),
    Timeout,
    Transient(String),
    Critical(String),
}

impl GenerationOutcome {
    /// The failure kind, or `None` on success.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            GenerationOutcome::Success(_) => None,
            GenerationOutcome::Timeout => Some(FailureKind::Timeout),
            GenerationOutcome::Transient(_) => Some(FailureKind::Transient),
            GenerationOutcome::Critical(_) => Some(FailureKind::Critical),
        }
    }

    pub fn detail(&self, timeout: Duration) -> String {
        match self {
            GenerationOutcome::Success(_) => String::new(),
            GenerationOutcome::Timeout => {
                format!("generation timed out after {}s", timeout.as_secs())
            }
            GenerationOutcome::Transient(msg) | GenerationOutcome::Critical(msg) => msg.clone(),
        }
    }

    /// The generated text, or the failure kind with its detail.
    pub fn into_result(self, timeout: Duration) -> Result<String, (FailureKind, String)> {
        match self {
            GenerationOutcome::Success(text) => Ok(text),
            GenerationOutcome::Timeout => Err((FailureKind::Timeout, self.detail(timeout))),
            GenerationOutcome::Transient(msg) => Err((FailureKind::Transient, msg)),
            GenerationOutcome::Critical(msg) => Err((FailureKind::Critical, msg)),
        }
    }
}

// Signatures of a compromised session: dead background loop, allocator
// exhaustion, or a device fault.
static RE_CRITICAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(engine\s*(is\s*)?dead|background\s+loop|out\s+of\s+memory|\boom\b|cuda\s+error|device-side\s+assert|illegal\s+memory\s+access|cublas|nccl\s+error|device\s+lost)",
    )
    .unwrap()
});

static RE_TIMEOUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(timed\s+out|timeout)").unwrap());

/// Classify a backend error message.
pub fn classify_error(message: &str) -> FailureKind {
    if RE_CRITICAL.is_match(message) {
        FailureKind::Critical
    } else if RE_TIMEOUT.is_match(message) {
        FailureKind::Timeout
    } else {
        FailureKind::Transient
    }
}

/// Issues generation calls under a fixed deadline.
#[derive(Debug)]
pub struct RequestExecutor {
    timeout: Duration,
    next_id: AtomicU64,
}

impl RequestExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one request against `engine`, updating `health` with the result.
    pub async fn execute(
        &self,
        engine: &dyn GenerationEngine,
        request: &GenerationRequest,
        health: &mut EngineHealth,
    ) -> GenerationOutcome {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request_id = format!("request-p{}-{:06}", request.page_index, seq);
        let start = Instant::now();

        let call = async {
            let mut stream = engine.generate(request, &request_id);
            let mut last = String::new();
            while let Some(item) = stream.next().await {
                last = item?;
            }
            Ok::<_, crate::error::EngineError>(last)
        };

        let guarded = AssertUnwindSafe(call).catch_unwind();
        let outcome = match tokio::time::timeout(self.timeout, guarded).await {
            Err(_) => GenerationOutcome::Timeout,
            Ok(Err(panic)) => GenerationOutcome::Critical(format!(
                "backend panicked: {}",
                panic_message(panic.as_ref())
            )),
            Ok(Ok(Err(e))) => match classify_error(&e.message) {
                FailureKind::Critical => GenerationOutcome::Critical(e.message),
                FailureKind::Timeout => GenerationOutcome::Timeout,
                _ => GenerationOutcome::Transient(e.message),
            },
            Ok(Ok(Ok(text))) => GenerationOutcome::Success(text),
        };

        match outcome.failure_kind() {
            None => {
                health.record_success();
                debug!("{}: done in {:?}", request_id, start.elapsed());
            }
            Some(kind) => {
                health.record_failure(kind);
                warn!(
                    "{}: {} after {:?}: {}",
                    request_id,
                    kind,
                    start.elapsed(),
                    outcome.detail(self.timeout)
                );
            }
        }
        outcome
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OutputStream;
    use crate::error::EngineError;
    use futures::future::BoxFuture;

    enum Script {
        Partials(Vec<&'static str>),
        Fail(&'static str),
        Hang,
        Panic,
    }

    struct ScriptedEngine(Script);

    impl GenerationEngine for ScriptedEngine {
        fn generate<'a>(&'a self, _r: &'a GenerationRequest, _id: &'a str) -> OutputStream<'a> {
            match &self.0 {
                Script::Partials(parts) => Box::pin(futures::stream::iter(
                    parts.iter().map(|p| Ok::<_, EngineError>(p.to_string())).collect::<Vec<_>>(),
                )),
                Script::Fail(msg) => Box::pin(futures::stream::iter(vec![
                    Ok("partial".to_string()),
                    Err(EngineError::new(*msg)),
                ])),
                Script::Hang => Box::pin(futures::stream::pending::<Result<String, EngineError>>()),
                Script::Panic => Box::pin(futures::stream::once(async {
                    if true {
                        panic!("kernel launch failed");
                    }
                    Ok::<String, EngineError>(String::new())
                })),
            }
        }

        fn shutdown(&self) -> BoxFuture<'_, Result<(), EngineError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            page_index: 2,
            prompt: "Free OCR.".into(),
            image: None,
            crop: false,
        }
    }

    async fn run(script: Script, health: &mut EngineHealth) -> GenerationOutcome {
        let executor = RequestExecutor::new(Duration::from_millis(50));
        executor.execute(&ScriptedEngine(script), &request(), health).await
    }

    #[test]
    fn classification_signatures() {
        for msg in [
            "AsyncEngineDeadError: Background loop has errored already.",
            "CUDA out of memory. Tried to allocate 2.00 GiB",
            "CUDA error: an illegal memory access was encountered",
        ] {
            assert_eq!(classify_error(msg), FailureKind::Critical, "{msg}");
        }
        assert_eq!(classify_error("Request timed out"), FailureKind::Timeout);
        assert_eq!(classify_error("invalid prompt token"), FailureKind::Transient);
        assert_eq!(classify_error("zoom level unsupported"), FailureKind::Transient);
    }

    #[tokio::test]
    async fn last_partial_output_wins_and_resets_errors() {
        let mut health = EngineHealth {
            consecutive_errors: 3,
            ..Default::default()
        };
        let script = Script::Partials(vec!["# Ti", "# Title", "# Title\n\nBody"]);
        let out = run(script, &mut health).await;
        assert_eq!(out, GenerationOutcome::Success("# Title\n\nBody".into()));
        assert_eq!(health.consecutive_errors, 0);
        assert!(health.last_success_at.is_some());
    }

    #[tokio::test]
    async fn hang_becomes_timeout() {
        let mut health = EngineHealth::default();
        let out = run(Script::Hang, &mut health).await;
        assert_eq!(out, GenerationOutcome::Timeout);
        assert_eq!(health.consecutive_errors, 1);
        assert!(!health.requires_restart);
    }

    #[tokio::test]
    async fn dead_engine_marks_restart_immediately() {
        let mut health = EngineHealth::default();
        let out = run(Script::Fail("engine dead: background loop stopped"), &mut health).await;
        assert!(matches!(out, GenerationOutcome::Critical(_)));
        assert!(health.requires_restart);
        assert_eq!(health.consecutive_errors, 1);
    }

    #[tokio::test]
    async fn ordinary_error_is_transient_and_not_counted() {
        let mut health = EngineHealth::default();
        let out = run(Script::Fail("tokenizer rejected input"), &mut health).await;
        assert_eq!(out, GenerationOutcome::Transient("tokenizer rejected input".into()));
        assert_eq!(health.consecutive_errors, 0);
        assert!(!health.requires_restart);
    }

    #[tokio::test]
    async fn panic_is_contained_as_critical() {
        let mut health = EngineHealth::default();
        let out = run(Script::Panic, &mut health).await;
        match out {
            GenerationOutcome::Critical(msg) => {
                assert!(msg.contains("kernel launch failed"), "got: {msg}")
            }
            other => panic!("expected critical, got {other:?}"),
        }
        assert!(health.requires_restart);
    }
}
