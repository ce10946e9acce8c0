//! Progress tracking for a running sweep.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sweep_types::EvaluationResult;

/// Invoked on the scheduler thread after each completed combination with
/// `(completed, total, latest)`. Keep it cheap: expensive work should be
/// queued elsewhere.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &EvaluationResult) + Send + Sync>;

#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    completed: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record(&self, success: bool, cache_hit: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn progress(&self) -> Progress {
        let completed = self.completed();
        let elapsed = self.started.elapsed().as_secs_f64();
        let per_sec = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };
        let remaining = self.total.saturating_sub(completed);
        let eta_secs = if per_sec > 0.0 {
            remaining as f64 / per_sec
        } else {
            0.0
        };

        Progress {
            total: self.total,
            completed,
            failed: self.failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            elapsed_secs: elapsed,
            eta_secs,
            combinations_per_sec: per_sec,
        }
    }
}

/// Progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub elapsed_secs: f64,
    pub eta_secs: f64,
    pub combinations_per_sec: f64,
}

impl Progress {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new(10);

        tracker.record(true, false);
        tracker.record(true, true);
        tracker.record(false, false);

        let progress = tracker.progress();
        assert_eq!(progress.total, 10);
        assert_eq!(progress.completed, 3);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.cache_hits, 1);
        assert!((progress.percentage() - 30.0).abs() < 0.1);
    }

    #[test]
    fn empty_run_is_complete() {
        let progress = ProgressTracker::new(0).progress();
        assert_eq!(progress.percentage(), 100.0);
        assert_eq!(progress.eta_secs, 0.0);
    }
}
