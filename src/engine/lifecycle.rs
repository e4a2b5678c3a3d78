//! Engine lifecycle: lazy start, forced restart and health bookkeeping.
//!
//! Long sessions fragment device memory and occasionally wedge the engine's
//! background loop. The scheduler therefore restarts the engine between
//! chunks and whenever a call classified as critical marks it unhealthy.
//! Only a successful initialization clears that mark.

use super::{EngineFactory, GenerationEngine};
use crate::admission::MemoryProbe;
use crate::config::EngineConfig;
use crate::error::{BackendInitError, FailureKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Kind of the most recent engine-facing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastErrorKind {
    #[default]
    None,
    Timeout,
    Transient,
    Critical,
}

/// Health of the current engine session.
#[derive(Debug, Clone, Default)]
pub struct EngineHealth {
    pub consecutive_errors: u32,
    pub last_error_kind: LastErrorKind,
    pub requires_restart: bool,
    pub last_success_at: Option<Instant>,
}

impl EngineHealth {
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.last_error_kind = LastErrorKind::None;
        self.last_success_at = Some(Instant::now());
    }

    pub fn record_failure(&mut self, kind: FailureKind) {
        self.last_error_kind = match kind {
            FailureKind::Timeout => LastErrorKind::Timeout,
            FailureKind::Critical => LastErrorKind::Critical,
            _ => LastErrorKind::Transient,
        };
        if kind.counts_against_engine() {
            self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        }
        if kind == FailureKind::Critical {
            self.requires_restart = true;
        }
    }
}

/// Owns the process-wide engine handle for one job.
pub struct EngineLifecycle {
    factory: Arc<dyn EngineFactory>,
    config: EngineConfig,
    memory: Arc<dyn MemoryProbe>,
    settle: Duration,
    handle: Option<Arc<dyn GenerationEngine>>,
    health: EngineHealth,
    initializations: u32,
    /// The most recent initialization attempt failed.
    init_failed: bool,
}

impl EngineLifecycle {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        config: EngineConfig,
        memory: Arc<dyn MemoryProbe>,
        settle: Duration,
    ) -> Self {
        Self {
            factory,
            config,
            memory,
            settle,
            handle: None,
            health: EngineHealth::default(),
            initializations: 0,
            init_failed: false,
        }
    }

    pub fn health(&self) -> &EngineHealth {
        &self.health
    }

    pub fn health_mut(&mut self) -> &mut EngineHealth {
        &mut self.health
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Successful initializations so far.
    pub fn initializations(&self) -> u32 {
        self.initializations
    }

    /// Whether the next batch must restart before dispatching: the engine was
    /// marked unhealthy or the last initialization failed. A lifecycle that
    /// has never started an engine only needs a plain `ensure_ready(false)`.
    pub fn needs_restart(&self) -> bool {
        self.health.requires_restart || self.init_failed
    }

    /// Return a ready engine, building or rebuilding it as needed.
    ///
    /// With `force_restart` the current handle, if any, is shut down (failure
    /// is logged, not returned) and dropped. Device memory is then reclaimed
    /// and the settle interval elapses before a fresh engine is built, also
    /// when an earlier failed attempt left no handle behind.
    pub async fn ensure_ready(
        &mut self,
        force_restart: bool,
    ) -> Result<Arc<dyn GenerationEngine>, BackendInitError> {
        if !force_restart {
            if let Some(handle) = &self.handle {
                return Ok(Arc::clone(handle));
            }
        }

        if force_restart {
            match self.handle.take() {
                Some(old) => {
                    info!("Restarting generation engine");
                    if let Err(e) = old.shutdown().await {
                        warn!("Engine shutdown failed, discarding handle anyway: {}", e);
                    }
                }
                None => info!("Reinitializing generation engine (no live handle)"),
            }
            self.memory.reclaim();
            if !self.settle.is_zero() {
                debug!("Waiting {:?} for the device to settle", self.settle);
                tokio::time::sleep(self.settle).await;
            }
        }

        debug!(
            "Initializing engine: max_num_seqs={} max_num_batched_tokens={} eager={}",
            self.config.max_num_seqs, self.config.max_num_batched_tokens, self.config.enforce_eager
        );
        let engine = match self.factory.initialize(&self.config).await {
            Ok(engine) => engine,
            Err(e) => {
                warn!("{}", e);
                self.init_failed = true;
                return Err(e);
            }
        };

        self.init_failed = false;
        self.health = EngineHealth::default();
        self.initializations += 1;
        self.handle = Some(Arc::clone(&engine));
        info!("Generation engine ready (initialization #{})", self.initializations);
        Ok(engine)
    }

    /// Shut down the current handle, if any. Used at job end.
    pub async fn release(&mut self) {
        if let Some(old) = self.handle.take() {
            if let Err(e) = old.shutdown().await {
                warn!("Engine shutdown at job end failed: {}", e);
            }
            self.memory.reclaim();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::MemoryProbe;
    use crate::engine::{GenerationRequest, OutputStream};
    use crate::error::EngineError;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    struct QuietEngine {
        fail_shutdown: bool,
        shutdowns: Arc<AtomicUsize>,
    }

    impl GenerationEngine for QuietEngine {
        fn generate<'a>(&'a self, _r: &'a GenerationRequest, _id: &'a str) -> OutputStream<'a> {
            Box::pin(futures::stream::iter(vec![Ok::<_, EngineError>("ok".to_string())]))
        }

        fn shutdown(&self) -> BoxFuture<'_, Result<(), EngineError>> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail_shutdown;
            Box::pin(async move {
                if fail {
                    Err(EngineError::new("background loop already dead"))
                } else {
                    Ok(())
                }
            })
        }
    }

    struct CountingFactory {
        builds: AtomicU32,
        fail_from: Option<u32>,
        fail_shutdown: bool,
        shutdowns: Arc<AtomicUsize>,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                builds: AtomicU32::new(0),
                fail_from: None,
                fail_shutdown: false,
                shutdowns: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl EngineFactory for CountingFactory {
        fn initialize<'a>(
            &'a self,
            _config: &'a EngineConfig,
        ) -> BoxFuture<'a, Result<Arc<dyn GenerationEngine>, BackendInitError>> {
            let n = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
            let fail = self.fail_from.is_some_and(|from| n >= from);
            let engine = QuietEngine {
                fail_shutdown: self.fail_shutdown,
                shutdowns: Arc::clone(&self.shutdowns),
            };
            Box::pin(async move {
                if fail {
                    Err(BackendInitError::new("CUDA out of memory"))
                } else {
                    Ok(Arc::new(engine) as Arc<dyn GenerationEngine>)
                }
            })
        }
    }

    #[derive(Default)]
    struct CountingProbe {
        reclaims: AtomicUsize,
    }

    impl MemoryProbe for CountingProbe {
        fn device_ratio(&self) -> Option<f64> {
            None
        }
        fn system_percent(&self) -> Option<f64> {
            None
        }
        fn reclaim(&self) {
            self.reclaims.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn lifecycle(factory: Arc<CountingFactory>, probe: Arc<CountingProbe>) -> EngineLifecycle {
        EngineLifecycle::new(factory, EngineConfig::default(), probe, Duration::ZERO)
    }

    #[test]
    fn existing_handle_is_reused_without_force() {
        let factory = Arc::new(CountingFactory::new());
        let mut lc = lifecycle(Arc::clone(&factory), Arc::new(CountingProbe::default()));
        tokio_test::block_on(async {
            lc.ensure_ready(false).await.expect("first init");
            lc.ensure_ready(false).await.expect("reuse");
        });
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert_eq!(lc.initializations(), 1);
    }

    #[test]
    fn forced_restart_shuts_down_reclaims_and_clears_health() {
        let factory = Arc::new(CountingFactory::new());
        let probe = Arc::new(CountingProbe::default());
        let mut lc = lifecycle(Arc::clone(&factory), Arc::clone(&probe));
        tokio_test::block_on(async {
            lc.ensure_ready(false).await.expect("init");
            lc.health_mut().record_failure(FailureKind::Critical);
            assert!(lc.needs_restart());
            lc.ensure_ready(true).await.expect("restart");
        });
        assert_eq!(factory.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(probe.reclaims.load(Ordering::SeqCst), 1);
        assert!(!lc.health().requires_restart);
        assert_eq!(lc.health().consecutive_errors, 0);
        assert_eq!(lc.initializations(), 2);
    }

    #[test]
    fn shutdown_failure_is_not_fatal() {
        let mut factory = CountingFactory::new();
        factory.fail_shutdown = true;
        let factory = Arc::new(factory);
        let mut lc = lifecycle(Arc::clone(&factory), Arc::new(CountingProbe::default()));
        tokio_test::block_on(async {
            lc.ensure_ready(false).await.expect("init");
            lc.ensure_ready(true).await.expect("restart despite shutdown error");
        });
        assert_eq!(lc.initializations(), 2);
    }

    #[test]
    fn failed_restart_leaves_no_handle_and_keeps_restart_flag() {
        let mut factory = CountingFactory::new();
        factory.fail_from = Some(2);
        let factory = Arc::new(factory);
        let mut lc = lifecycle(Arc::clone(&factory), Arc::new(CountingProbe::default()));
        tokio_test::block_on(async {
            lc.ensure_ready(false).await.expect("init");
            lc.health_mut().record_failure(FailureKind::Critical);
            let err = lc.ensure_ready(true).await.err().expect("restart fails");
            assert!(err.to_string().contains("out of memory"));
        });
        assert!(!lc.has_handle());
        assert!(lc.health().requires_restart);
        assert!(lc.needs_restart());
    }

    #[tokio::test(start_paused = true)]
    async fn forced_restart_without_handle_still_reclaims_and_settles() {
        let mut factory = CountingFactory::new();
        factory.fail_from = Some(1);
        let factory = Arc::new(factory);
        let probe = Arc::new(CountingProbe::default());
        let settle = Duration::from_secs(5);
        let mut lc = EngineLifecycle::new(
            Arc::clone(&factory) as Arc<dyn EngineFactory>,
            EngineConfig::default(),
            Arc::clone(&probe) as Arc<dyn MemoryProbe>,
            settle,
        );

        // First start: nothing to clean up, no wait.
        let start = tokio::time::Instant::now();
        assert!(!lc.needs_restart());
        assert!(lc.ensure_ready(false).await.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(probe.reclaims.load(Ordering::SeqCst), 0);
        assert!(lc.needs_restart());

        let start = tokio::time::Instant::now();
        assert!(lc.ensure_ready(true).await.is_err());
        assert!(lc.ensure_ready(true).await.is_err());
        assert!(!lc.has_handle());
        assert_eq!(probe.reclaims.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= settle * 2, "elapsed {:?}", start.elapsed());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 3);
        assert_eq!(factory.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn health_counts_only_timeouts_and_critical() {
        let mut h = EngineHealth::default();
        h.record_failure(FailureKind::Transient);
        assert_eq!(h.consecutive_errors, 0);
        assert_eq!(h.last_error_kind, LastErrorKind::Transient);
        h.record_failure(FailureKind::Timeout);
        assert_eq!(h.consecutive_errors, 1);
        assert!(!h.requires_restart);
        h.record_failure(FailureKind::Critical);
        assert_eq!(h.consecutive_errors, 2);
        assert!(h.requires_restart);
        h.record_success();
        assert_eq!(h.consecutive_errors, 0);
        assert!(h.last_success_at.is_some());
        // Success alone never clears the restart mark.
        assert!(h.requires_restart);
    }
}
