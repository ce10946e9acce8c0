//! Worker-count scaling decisions derived from CPU samples.

use serde::{Deserialize, Serialize};

use crate::cpu::CpuSample;

/// Message sent on the pool's control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingDecision {
    Grow,
    Shrink,
    Hold,
}

/// Utilization thresholds for growing and shrinking the pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    /// Grow below this utilization (percent).
    pub grow_below_pct: f64,
    /// Shrink above this utilization (percent).
    pub shrink_above_pct: f64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            grow_below_pct: 50.0,
            shrink_above_pct: 80.0,
        }
    }
}

impl ScalingPolicy {
    /// Decide one step of resizing. Unknown utilization holds.
    pub fn decide(&self, sample: &CpuSample, current_workers: usize, max_workers: usize) -> ScalingDecision {
        let Some(utilization) = sample.current_utilization_pct else {
            return ScalingDecision::Hold;
        };
        if utilization < self.grow_below_pct && current_workers < max_workers {
            ScalingDecision::Grow
        } else if utilization > self.shrink_above_pct && current_workers > 1 {
            ScalingDecision::Shrink
        } else {
            ScalingDecision::Hold
        }
    }
}
