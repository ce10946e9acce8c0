//! Per-round batch sizing.
//!
//! With adaptive chunking on, the next round's per-worker batch size is
//! chosen so one batch takes roughly one control interval, letting the
//! scaler react between rounds without starving workers of work.

use std::time::Duration;

pub const MIN_BATCH: usize = 1;
pub const MAX_BATCH: usize = 1024;

#[derive(Debug, Clone)]
pub struct AdaptiveChunker {
    adaptive: bool,
    target: Duration,
    batch_size: usize,
    /// Running mean of per-combination seconds and its sample count.
    mean_eval_secs: f64,
    samples: u64,
}

impl AdaptiveChunker {
    pub fn new(initial_batch: usize, adaptive: bool, target: Duration) -> Self {
        Self {
            adaptive,
            target,
            batch_size: initial_batch.clamp(MIN_BATCH, MAX_BATCH),
            mean_eval_secs: 0.0,
            samples: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn mean_eval_secs(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.mean_eval_secs)
    }

    /// Fold in the evaluation times of a finished round, then resize.
    pub fn observe(&mut self, eval_secs: impl IntoIterator<Item = f64>) {
        for secs in eval_secs {
            self.samples += 1;
            self.mean_eval_secs += (secs - self.mean_eval_secs) / self.samples as f64;
        }
        if !self.adaptive || self.samples == 0 {
            return;
        }

        let per_eval = self.mean_eval_secs.max(1e-6);
        let ideal = (self.target.as_secs_f64() / per_eval).round() as usize;
        self.batch_size = ideal.clamp(MIN_BATCH, MAX_BATCH);
    }
}
