//! Admission control: veto a batch before it starts when memory is tight.
//!
//! Two samples are taken. The device allocation ratio is the fine-grained
//! signal; crossing it triggers a reclamation pass, bumps the
//! high-pressure streak and vetoes the batch. System memory is the coarse
//! backstop: above the critical line nothing runs, above the warning line a
//! warning is logged.
//!
//! Once the streak reaches [`AdmissionThresholds::streak_veto`], batches are
//! skipped without sampling at all. Each such skip relaxes the streak by one,
//! so the controller samples again after the backlog has drained instead of
//! locking itself out.

use crate::config::AdmissionThresholds;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of memory readings. Implemented per host/accelerator.
pub trait MemoryProbe: Send + Sync {
    /// Allocated / total device memory (0.0–1.0), or `None` without a device.
    fn device_ratio(&self) -> Option<f64>;

    /// Used system memory in percent, or `None` if unknown.
    fn system_percent(&self) -> Option<f64>;

    /// Release cached device allocations.
    fn reclaim(&self);
}

/// Probe for hosts without an accelerator: system memory from `/proc/meminfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemoryProbe;

impl SystemMemoryProbe {
    fn parse_meminfo(text: &str) -> Option<f64> {
        let field = |name: &str| -> Option<f64> {
            text.lines()
                .find(|l| l.starts_with(name))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<f64>().ok())
        };
        let total = field("MemTotal:")?;
        let available = field("MemAvailable:")?;
        if total <= 0.0 {
            return None;
        }
        Some(((total - available) / total * 100.0).clamp(0.0, 100.0))
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn device_ratio(&self) -> Option<f64> {
        None
    }

    fn system_percent(&self) -> Option<f64> {
        let text = std::fs::read_to_string("/proc/meminfo").ok()?;
        Self::parse_meminfo(&text)
    }

    fn reclaim(&self) {}
}

/// Consecutive high-pressure samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryPressure {
    pub high_pressure_streak: u32,
}

impl MemoryPressure {
    fn raise(&mut self) {
        self.high_pressure_streak = self.high_pressure_streak.saturating_add(1);
    }

    fn relax(&mut self) {
        self.high_pressure_streak = self.high_pressure_streak.saturating_sub(1);
    }
}

/// Verdict for one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admitted,
    /// Device allocation ratio over threshold.
    DeviceVeto { ratio: f64 },
    /// System memory over the critical line.
    SystemVeto { percent: f64 },
    /// Streak at or above the veto level; no sample taken.
    StreakVeto { streak: u32 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Samples memory before each batch and decides whether it may run.
pub struct AdmissionController {
    probe: Arc<dyn MemoryProbe>,
    thresholds: AdmissionThresholds,
    pressure: MemoryPressure,
}

impl AdmissionController {
    pub fn new(probe: Arc<dyn MemoryProbe>, thresholds: AdmissionThresholds) -> Self {
        Self {
            probe,
            thresholds,
            pressure: MemoryPressure::default(),
        }
    }

    pub fn pressure(&self) -> MemoryPressure {
        self.pressure
    }

    pub fn probe(&self) -> &Arc<dyn MemoryProbe> {
        &self.probe
    }

    /// Sample memory once and update the streak. Returns whether to admit.
    pub fn admit(&mut self) -> bool {
        self.sample().is_admitted()
    }

    fn sample(&mut self) -> Admission {
        if let Some(ratio) = self.probe.device_ratio() {
            if ratio > self.thresholds.device_ratio {
                self.probe.reclaim();
                self.pressure.raise();
                warn!(
                    "Device memory at {:.0}% (limit {:.0}%), streak {}",
                    ratio * 100.0,
                    self.thresholds.device_ratio * 100.0,
                    self.pressure.high_pressure_streak
                );
                return Admission::DeviceVeto { ratio };
            }
        }
        self.pressure.relax();

        if let Some(percent) = self.probe.system_percent() {
            if percent > self.thresholds.system_critical_percent {
                warn!("System memory critical at {:.1}%", percent);
                return Admission::SystemVeto { percent };
            }
            if percent > self.thresholds.system_warning_percent {
                warn!("System memory high at {:.1}%", percent);
            } else {
                debug!("System memory at {:.1}%", percent);
            }
        }
        Admission::Admitted
    }

    /// Gate one batch: the streak veto first, then a fresh sample.
    pub fn check(&mut self) -> Admission {
        let streak = self.pressure.high_pressure_streak;
        if streak >= self.thresholds.streak_veto {
            self.pressure.relax();
            warn!("Skipping batch: memory pressure streak {}", streak);
            return Admission::StreakVeto { streak };
        }
        self.sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedProbe {
        device: Mutex<Option<f64>>,
        system: Option<f64>,
        reclaims: AtomicUsize,
        samples: AtomicUsize,
    }

    impl FixedProbe {
        fn new(device: Option<f64>, system: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                device: Mutex::new(device),
                system,
                reclaims: AtomicUsize::new(0),
                samples: AtomicUsize::new(0),
            })
        }
    }

    impl MemoryProbe for FixedProbe {
        fn device_ratio(&self) -> Option<f64> {
            self.samples.fetch_add(1, Ordering::SeqCst);
            *self.device.lock().unwrap()
        }
        fn system_percent(&self) -> Option<f64> {
            self.system
        }
        fn reclaim(&self) {
            self.reclaims.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller(probe: Arc<FixedProbe>) -> AdmissionController {
        AdmissionController::new(probe, AdmissionThresholds::default())
    }

    #[test]
    fn calm_memory_always_admits() {
        let mut ac = controller(FixedProbe::new(Some(0.4), Some(50.0)));
        assert!(ac.admit());
        assert!(ac.admit());
        assert_eq!(ac.pressure().high_pressure_streak, 0);
    }

    #[test]
    fn sustained_pressure_never_lowers_streak() {
        let probe = FixedProbe::new(Some(0.9), Some(50.0));
        let mut ac = controller(Arc::clone(&probe));
        assert!(!ac.admit());
        let first = ac.pressure().high_pressure_streak;
        assert!(!ac.admit());
        assert!(ac.pressure().high_pressure_streak >= first);
        assert_eq!(ac.pressure().high_pressure_streak, 2);
        assert_eq!(probe.reclaims.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn system_critical_vetoes_regardless_of_streak() {
        let mut ac = controller(FixedProbe::new(None, Some(95.0)));
        assert_eq!(ac.check(), Admission::SystemVeto { percent: 95.0 });
        assert_eq!(ac.pressure().high_pressure_streak, 0);
    }

    #[test]
    fn system_warning_still_admits() {
        let mut ac = controller(FixedProbe::new(None, Some(85.0)));
        assert!(ac.admit());
    }

    #[test]
    fn streak_veto_skips_without_sampling_then_recovers() {
        let probe = FixedProbe::new(Some(0.9), None);
        let mut ac = controller(Arc::clone(&probe));
        assert!(!ac.admit());
        assert!(!ac.admit());
        let sampled = probe.samples.load(Ordering::SeqCst);

        assert_eq!(ac.check(), Admission::StreakVeto { streak: 2 });
        assert_eq!(probe.samples.load(Ordering::SeqCst), sampled);

        *probe.device.lock().unwrap() = Some(0.3);
        assert!(ac.check().is_admitted());
        assert_eq!(ac.pressure().high_pressure_streak, 0);
    }

    #[test]
    fn meminfo_parsing() {
        let text = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        let pct = SystemMemoryProbe::parse_meminfo(text).unwrap();
        assert!((pct - 75.0).abs() < 1e-9);
        assert_eq!(SystemMemoryProbe::parse_meminfo("garbage"), None);
    }
}
