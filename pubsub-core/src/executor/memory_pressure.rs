//! Memory-pressure classification driving per-tick permit scaling.

use std::sync::{Mutex, PoisonError};
use sysinfo::System;

/// Memory utilization probe.
///
/// Injected into the executor so schedulers stay testable with fixed
/// readings; production wiring uses [`SystemMemoryTelemetry`].
pub trait MemoryTelemetry: Send + Sync {
    /// Current memory utilization as a percentage in `0.0..=100.0`.
    fn utilization_percent(&self) -> f64;
}

/// Pressure bands derived from utilization against the configured thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryPressure {
    Normal,
    High,
    VeryHigh,
    Critical,
}

impl MemoryPressure {
    /// Classifies a utilization reading: below `high` is `Normal`, at or
    /// above `critical` is `Critical`, and the band between the two splits
    /// into `High` and `VeryHigh` at the midpoint.
    pub fn classify(utilization: f64, high: f64, critical: f64) -> Self {
        if utilization >= critical {
            return Self::Critical;
        }
        if utilization < high {
            return Self::Normal;
        }
        let midpoint = (high + critical) / 2.0;
        if utilization < midpoint {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    /// Scales a full per-tick permission count down for this band, rounding
    /// up so a non-zero allowance survives small counts.
    pub(crate) fn scale_permits(self, permits: u32) -> u32 {
        match self {
            Self::Normal => permits,
            Self::High => (permits * 2).div_ceil(3),
            Self::VeryHigh => permits.div_ceil(3),
            Self::Critical => 0,
        }
    }
}

/// Process-wide memory telemetry backed by `sysinfo`.
pub struct SystemMemoryTelemetry {
    system: Mutex<System>,
}

impl SystemMemoryTelemetry {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTelemetry for SystemMemoryTelemetry {
    fn utilization_percent(&self) -> f64 {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        system.used_memory() as f64 / total as f64 * 100.0
    }
}
