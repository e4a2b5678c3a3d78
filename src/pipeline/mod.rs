//! Pipeline stages below the scheduler.
//!
//! ## Data Flow
//!
//! ```text
//! chunk ──▶ render ──▶ encode ──▶ batch (engine) ──▶ postprocess
//! (plan)    (pdfium)   (base64)   (retry/restart)    (cleanup)
//! ```
//!
//! 1. [`chunk`]  : split the selected pages into chunks and batches
//! 2. [`render`] : rasterise one batch's pages; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`] : turn each page into a generation request
//! 4. [`batch`]  : dispatch the requests with page-level retry and restart
//! 5. [`postprocess`] : deterministic cleanup of the generated text

pub mod batch;
pub mod chunk;
pub mod encode;
pub mod postprocess;
pub mod render;
