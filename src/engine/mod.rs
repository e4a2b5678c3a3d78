//! The generation backend: trait seams, lifecycle manager and request executor.
//!
//! ```text
//! EngineFactory ──initialize──▶ GenerationEngine ──generate──▶ partial outputs…
//!        ▲                             │
//!        └──── EngineLifecycle ◀───────┘ shutdown / restart / health
//! ```
//!
//! * [`lifecycle`] owns the single engine handle and its [`lifecycle::EngineHealth`].
//! * [`executor`] issues one call under a deadline and classifies the result.
//! * [`llm`] adapts an `edgequake_llm` provider to [`GenerationEngine`].

pub mod executor;
pub mod lifecycle;
pub mod llm;

use crate::config::EngineConfig;
use crate::error::{BackendInitError, EngineError};
use edgequake_llm::ImageData;
use futures::future::BoxFuture;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

pub use executor::{GenerationOutcome, RequestExecutor};
pub use lifecycle::{EngineHealth, EngineLifecycle, LastErrorKind};

/// Stream of partial generations. Each item supersedes the previous one;
/// the last item is authoritative.
pub type OutputStream<'a> = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send + 'a>>;

/// One page's generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// 0-based absolute page index the request belongs to.
    pub page_index: usize,
    /// Prompt template, verbatim.
    pub prompt: String,
    /// Encoded page image; present only when the prompt references an image.
    pub image: Option<ImageData>,
    /// Let the backend tile the image into crops.
    pub crop: bool,
}

/// A live handle to the external generation engine.
pub trait GenerationEngine: Send + Sync {
    /// Start one generation. Errors may surface as stream items.
    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
        request_id: &'a str,
    ) -> OutputStream<'a>;

    /// Release backend resources. Best-effort.
    fn shutdown(&self) -> BoxFuture<'_, Result<(), EngineError>>;
}

/// Builds engines. Called once per (re)initialization.
pub trait EngineFactory: Send + Sync {
    fn initialize<'a>(
        &'a self,
        config: &'a EngineConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn GenerationEngine>, BackendInitError>>;
}
