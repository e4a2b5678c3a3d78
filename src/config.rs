//! Configuration types for a chunked OCR job.
//!
//! Every knob lives in [`JobConfig`], built via [`JobConfigBuilder`]. The
//! memory thresholds, delays and engine limits are policy, not physics: they
//! were tuned against a single-GPU deployment and are expected to be changed
//! per host.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one OCR job.
///
/// # Example
/// ```rust
/// use edgequake_ocr_batch::JobConfig;
/// use std::time::Duration;
///
/// let config = JobConfig::builder()
///     .chunk_size(20)
///     .batch_size(2)
///     .request_timeout(Duration::from_secs(90))
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 20);
/// ```
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Pages per chunk. Each chunk after the first starts on a freshly
    /// restarted backend. Default: 10.
    pub chunk_size: usize,

    /// Requested pages per batch before adaptive capping. Default: 1.
    pub batch_size: usize,

    /// Chunks longer than this run with batches of at most 2 pages. Default: 10.
    pub medium_chunk_pages: usize,

    /// Chunks longer than this run with single-page batches. Default: 20.
    pub large_chunk_pages: usize,

    /// Hard deadline for one generation call. Default: 120 s.
    pub request_timeout: Duration,

    /// Delay before retrying a page on the same handle after a timeout or
    /// transient failure. Default: 1 s.
    pub retry_delay: Duration,

    /// Cooldown after a forced restart, before the new engine is built.
    /// Default: 5 s.
    pub restart_settle: Duration,

    /// Pause between chunks so the backend can settle. Default: 2 s.
    pub chunk_pause: Duration,

    /// Rendering DPI for pdfium. Default: 144.
    pub dpi: u32,

    /// Longest edge of a rendered page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory that receives per-chunk artifacts. Default: `output`.
    pub output_dir: PathBuf,

    /// Number of failed page numbers shown in the summary. Default: 10.
    pub failure_preview: usize,

    /// Memory-pressure policy.
    pub admission: AdmissionThresholds,

    /// Limits applied whenever the engine is (re)built.
    pub engine: EngineConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            batch_size: 1,
            medium_chunk_pages: 10,
            large_chunk_pages: 20,
            request_timeout: Duration::from_secs(120),
            retry_delay: Duration::from_secs(1),
            restart_settle: Duration::from_secs(5),
            chunk_pause: Duration::from_secs(2),
            dpi: 144,
            max_rendered_pixels: 2000,
            password: None,
            output_dir: PathBuf::from("output"),
            failure_preview: 10,
            admission: AdmissionThresholds::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl JobConfig {
    /// Create a new builder for `JobConfig`.
    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder {
            config: Self::default(),
        }
    }

    /// Batch size for a chunk of `chunk_len` pages.
    ///
    /// Long chunks accumulate backend state, so their batches shrink to bound
    /// worst-case memory: 1 page above `large_chunk_pages`, 2 above
    /// `medium_chunk_pages`, otherwise the configured batch size.
    pub fn effective_batch_size(&self, chunk_len: usize) -> usize {
        let requested = self.batch_size.max(1);
        if chunk_len > self.large_chunk_pages {
            1
        } else if chunk_len > self.medium_chunk_pages {
            requested.min(2)
        } else {
            requested
        }
    }
}

/// Builder for [`JobConfig`].
#[derive(Debug)]
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl JobConfigBuilder {
    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn medium_chunk_pages(mut self, n: usize) -> Self {
        self.config.medium_chunk_pages = n;
        self
    }

    pub fn large_chunk_pages(mut self, n: usize) -> Self {
        self.config.large_chunk_pages = n;
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.config.request_timeout = d;
        self
    }

    pub fn retry_delay(mut self, d: Duration) -> Self {
        self.config.retry_delay = d;
        self
    }

    pub fn restart_settle(mut self, d: Duration) -> Self {
        self.config.restart_settle = d;
        self
    }

    pub fn chunk_pause(mut self, d: Duration) -> Self {
        self.config.chunk_pause = d;
        self
    }

    /// Zero every settle, pause and retry delay. Used by tests and dry runs.
    pub fn no_delays(mut self) -> Self {
        self.config.retry_delay = Duration::ZERO;
        self.config.restart_settle = Duration::ZERO;
        self.config.chunk_pause = Duration::ZERO;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn failure_preview(mut self, n: usize) -> Self {
        self.config.failure_preview = n;
        self
    }

    pub fn admission(mut self, thresholds: AdmissionThresholds) -> Self {
        self.config.admission = thresholds;
        self
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.config.engine = engine;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<JobConfig, JobError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(JobError::InvalidConfig("chunk size must be ≥ 1".into()));
        }
        if c.medium_chunk_pages > c.large_chunk_pages {
            return Err(JobError::InvalidConfig(format!(
                "medium chunk threshold ({}) exceeds large chunk threshold ({})",
                c.medium_chunk_pages, c.large_chunk_pages
            )));
        }
        if c.request_timeout.is_zero() {
            return Err(JobError::InvalidConfig("request timeout must be non-zero".into()));
        }
        c.admission.validate()?;
        Ok(self.config)
    }
}

/// Memory thresholds consulted by the admission controller before each batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdmissionThresholds {
    /// Device allocation ratio (0.0–1.0) above which a batch is vetoed. Default: 0.75.
    pub device_ratio: f64,
    /// System memory percent above which a warning is logged. Default: 80.
    pub system_warning_percent: f64,
    /// System memory percent above which a batch is vetoed outright. Default: 90.
    pub system_critical_percent: f64,
    /// High-pressure streak at which batches are skipped without sampling. Default: 2.
    pub streak_veto: u32,
}

impl Default for AdmissionThresholds {
    fn default() -> Self {
        Self {
            device_ratio: 0.75,
            system_warning_percent: 80.0,
            system_critical_percent: 90.0,
            streak_veto: 2,
        }
    }
}

impl AdmissionThresholds {
    fn validate(&self) -> Result<(), JobError> {
        if !(0.0..=1.0).contains(&self.device_ratio) {
            return Err(JobError::InvalidConfig(format!(
                "device ratio threshold must be within 0–1, got {}",
                self.device_ratio
            )));
        }
        if self.system_warning_percent > self.system_critical_percent {
            return Err(JobError::InvalidConfig(format!(
                "system warning threshold ({}%) exceeds critical threshold ({}%)",
                self.system_warning_percent, self.system_critical_percent
            )));
        }
        if self.streak_veto == 0 {
            return Err(JobError::InvalidConfig("streak veto must be ≥ 1".into()));
        }
        Ok(())
    }
}

/// Limits applied each time the generation engine is constructed.
///
/// The defaults are deliberately conservative: one in-flight sequence, a
/// bounded token budget, and eager execution so no graph capture happens at
/// startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model identifier. If None, the backend default is used.
    pub model: Option<String>,
    /// Provider name for hosted backends (e.g. "openai", "ollama").
    pub provider_name: Option<String>,
    /// Maximum concurrently scheduled sequences. Default: 1.
    pub max_num_seqs: usize,
    /// Token budget per scheduler step. Default: 8192.
    pub max_num_batched_tokens: usize,
    /// Maximum context length. Default: 8192.
    pub max_model_len: usize,
    /// Skip graph capture. Default: true.
    pub enforce_eager: bool,
    /// Fraction of device memory the engine may reserve. Default: 0.75.
    pub gpu_memory_utilization: f32,
    /// Output-token cap per page. Default: 4096.
    pub max_tokens: usize,
    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            max_num_seqs: 1,
            max_num_batched_tokens: 8192,
            max_model_len: 8192,
            enforce_eager: true,
            gpu_memory_utilization: 0.75,
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let c = JobConfig::builder().build().expect("defaults are valid");
        assert_eq!(c.chunk_size, 10);
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.admission.device_ratio, 0.75);
        assert_eq!(c.admission.system_critical_percent, 90.0);
        assert!(c.engine.enforce_eager);
        assert_eq!(c.engine.max_num_seqs, 1);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let err = JobConfig::builder().chunk_size(0).build().unwrap_err();
        assert!(err.to_string().contains("chunk size"));
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let err = JobConfig::builder()
            .medium_chunk_pages(30)
            .large_chunk_pages(20)
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidConfig(_)));

        let err = JobConfig::builder()
            .admission(AdmissionThresholds {
                system_warning_percent: 95.0,
                ..Default::default()
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("warning"));
    }

    #[test]
    fn batch_size_adapts_to_chunk_length() {
        let c = JobConfig::builder().batch_size(5).build().unwrap();
        assert_eq!(c.effective_batch_size(8), 5);
        assert_eq!(c.effective_batch_size(10), 5);
        assert_eq!(c.effective_batch_size(15), 2);
        assert_eq!(c.effective_batch_size(25), 1);
    }

    #[test]
    fn medium_cap_never_raises_batch_size() {
        let c = JobConfig::builder().batch_size(1).build().unwrap();
        assert_eq!(c.effective_batch_size(15), 1);
    }

    #[test]
    fn no_delays_zeroes_all_waits() {
        let c = JobConfig::builder().no_delays().build().unwrap();
        assert!(c.retry_delay.is_zero());
        assert!(c.restart_settle.is_zero());
        assert!(c.chunk_pause.is_zero());
        assert!(!c.request_timeout.is_zero());
    }
}
