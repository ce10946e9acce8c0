//! CPU profiling: core counts, current utilization, and a worker-count
//! recommendation.
//!
//! Sampling is modelled as a plain [`CpuSample`] value returned by a
//! [`CpuProbe`], so the scaling loop can be driven by scripted samples in tests.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// A point-in-time view of the machine's CPU capacity and load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    pub physical_cores: usize,
    pub logical_cores: usize,
    /// `min(physical_cores, cap)`, never below 1.
    pub recommended_workers: usize,
    /// Busy share of all cores over the sampling window, 0–100. `None` when
    /// the platform cannot report it.
    pub current_utilization_pct: Option<f64>,
}

impl CpuSample {
    /// Fallback used when nothing can be measured: a single worker.
    pub fn conservative() -> Self {
        Self {
            physical_cores: 1,
            logical_cores: 1,
            recommended_workers: 1,
            current_utilization_pct: None,
        }
    }
}

/// Source of CPU samples.
pub trait CpuProbe: Send + Sync {
    fn detect(&self) -> CpuSample;
}

// ---- System probe ----

/// Reads core counts from the OS and utilization from `/proc/stat`.
#[derive(Debug, Clone)]
pub struct CpuProfiler {
    worker_cap: usize,
    sampling_window: Duration,
}

impl CpuProfiler {
    pub fn new(worker_cap: usize) -> Self {
        Self {
            worker_cap: worker_cap.max(1),
            sampling_window: Duration::from_millis(50),
        }
    }

    pub fn with_sampling_window(mut self, window: Duration) -> Self {
        self.sampling_window = window;
        self
    }

    fn sample_utilization(&self) -> Option<f64> {
        let before = read_cpu_times()?;
        std::thread::sleep(self.sampling_window);
        let after = read_cpu_times()?;
        utilization_between(before, after)
    }
}

impl Default for CpuProfiler {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl CpuProbe for CpuProfiler {
    fn detect(&self) -> CpuSample {
        let logical_cores = num_cpus::get();
        let physical_cores = num_cpus::get_physical();
        if logical_cores == 0 || physical_cores == 0 {
            return CpuSample::conservative();
        }

        let sample = CpuSample {
            physical_cores,
            logical_cores,
            recommended_workers: physical_cores.min(self.worker_cap).max(1),
            current_utilization_pct: self.sample_utilization(),
        };
        debug!(?sample, "CPU sample");
        sample
    }
}

/// Aggregate jiffies from the first `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

fn read_cpu_times() -> Option<CpuTimes> {
    let contents = std::fs::read_to_string("/proc/stat").ok()?;
    parse_proc_stat(&contents)
}

fn parse_proc_stat(contents: &str) -> Option<CpuTimes> {
    let line = contents.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait count as not busy
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: fields.iter().sum(),
    })
}

fn utilization_between(before: CpuTimes, after: CpuTimes) -> Option<f64> {
    let total = after.total.checked_sub(before.total)?;
    let idle = after.idle.checked_sub(before.idle)?;
    if total == 0 {
        return None;
    }
    let busy = total.saturating_sub(idle) as f64 / total as f64;
    Some((busy * 100.0).clamp(0.0, 100.0))
}

// ---- Scripted probe ----

/// Replays a fixed sequence of utilization readings, repeating the last one
/// once exhausted. Useful for deterministic runs and tests.
#[derive(Debug)]
pub struct ScriptedCpuProbe {
    cores: usize,
    readings: Mutex<VecDeque<Option<f64>>>,
    last: Mutex<Option<f64>>,
}

impl ScriptedCpuProbe {
    pub fn new(cores: usize, readings: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self {
            cores: cores.max(1),
            readings: Mutex::new(readings.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    /// A probe that always reports the same utilization.
    pub fn constant(cores: usize, utilization_pct: f64) -> Self {
        Self::new(cores, [Some(utilization_pct)])
    }
}

impl CpuProbe for ScriptedCpuProbe {
    fn detect(&self) -> CpuSample {
        let reading = match self.readings.lock().pop_front() {
            Some(reading) => {
                *self.last.lock() = reading;
                reading
            }
            None => *self.last.lock(),
        };
        CpuSample {
            physical_cores: self.cores,
            logical_cores: self.cores,
            recommended_workers: self.cores,
            current_utilization_pct: reading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proc_stat_aggregate_line() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        let times = parse_proc_stat(stat).unwrap();
        assert_eq!(times.idle, 850);
        assert_eq!(times.total, 1000);
    }

    #[test]
    fn rejects_malformed_proc_stat() {
        assert!(parse_proc_stat("intr 1 2 3").is_none());
        assert!(parse_proc_stat("cpu  1 2").is_none());
        assert!(parse_proc_stat("cpu  a b c d").is_none());
    }

    #[test]
    fn utilization_from_deltas() {
        let before = CpuTimes { idle: 800, total: 1000 };
        let after = CpuTimes { idle: 850, total: 1200 };
        // 200 jiffies elapsed, 50 idle -> 75% busy
        assert_eq!(utilization_between(before, after), Some(75.0));
        assert_eq!(utilization_between(before, before), None);
    }

    #[test]
    fn system_profiler_respects_cap() {
        let sample = CpuProfiler::new(1)
            .with_sampling_window(Duration::from_millis(1))
            .detect();
        assert_eq!(sample.recommended_workers, 1);
        assert!(sample.logical_cores >= sample.recommended_workers);
        if let Some(pct) = sample.current_utilization_pct {
            assert!((0.0..=100.0).contains(&pct));
        }
    }

    #[test]
    fn scripted_probe_repeats_last_reading() {
        let probe = ScriptedCpuProbe::new(4, [Some(10.0), Some(90.0)]);
        assert_eq!(probe.detect().current_utilization_pct, Some(10.0));
        assert_eq!(probe.detect().current_utilization_pct, Some(90.0));
        assert_eq!(probe.detect().current_utilization_pct, Some(90.0));
        assert_eq!(probe.detect().recommended_workers, 4);
    }

    #[test]
    fn conservative_sample_is_single_worker() {
        let sample = CpuSample::conservative();
        assert_eq!(sample.recommended_workers, 1);
        assert!(sample.current_utilization_pct.is_none());
    }
}
