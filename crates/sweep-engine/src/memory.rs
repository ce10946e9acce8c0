//! Resident-memory monitoring against a soft ceiling.
//!
//! Crossing the ceiling is never fatal: the monitor logs a warning and emits a
//! [`RunEvent::MemoryWarning`] on the run's event channel.

use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::warn;

use sweep_types::SweepError;

use crate::events::RunEvent;

/// Source of resident-set-size readings, in MB.
pub trait MemoryProbe: Send + Sync {
    fn resident_mb(&self) -> Option<f64>;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> Option<f64> + Send + Sync,
{
    fn resident_mb(&self) -> Option<f64> {
        self()
    }
}

/// Reads `VmRSS` from `/proc/self/status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMemoryProbe;

impl MemoryProbe for ProcMemoryProbe {
    fn resident_mb(&self) -> Option<f64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss_mb(&status)
    }
}

fn parse_vm_rss_mb(status: &str) -> Option<f64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024.0)
}

/// Samples memory after each batch round and tracks the peak.
pub struct MemoryMonitor {
    limit_mb: f64,
    probe: Arc<dyn MemoryProbe>,
    events: Option<Sender<RunEvent>>,
    peak_mb: f64,
    warnings: usize,
}

impl MemoryMonitor {
    pub fn new(limit_mb: f64, probe: Arc<dyn MemoryProbe>, events: Option<Sender<RunEvent>>) -> Self {
        Self {
            limit_mb,
            probe,
            events,
            peak_mb: 0.0,
            warnings: 0,
        }
    }

    /// Take one sample. Returns the overage as a [`SweepError::CapacityExceeded`]
    /// for the caller to log or inspect; the run is expected to continue.
    pub fn check(&mut self) -> Option<SweepError> {
        let used_mb = self.probe.resident_mb()?;
        if used_mb > self.peak_mb {
            self.peak_mb = used_mb;
        }
        if used_mb <= self.limit_mb {
            return None;
        }

        self.warnings += 1;
        warn!(
            used_mb,
            limit_mb = self.limit_mb,
            "Resident memory above configured ceiling; continuing"
        );
        if let Some(tx) = &self.events {
            let _ = tx.send(RunEvent::MemoryWarning {
                used_mb,
                limit_mb: self.limit_mb,
            });
        }
        Some(SweepError::CapacityExceeded {
            used_mb,
            limit_mb: self.limit_mb,
        })
    }

    pub fn peak_mb(&self) -> f64 {
        self.peak_mb
    }

    pub fn warnings(&self) -> usize {
        self.warnings
    }
}
