//! Events emitted during a run for external consumption (logging, UI,
//! alerting).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progress::Progress;
use crate::scaling::ScalingDecision;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    Started {
        run_id: Uuid,
        total_combinations: usize,
        workers: usize,
    },
    Scaled {
        decision: ScalingDecision,
        workers: usize,
        utilization_pct: f64,
    },
    /// Snapshot taken after each round.
    Progress(Progress),
    MemoryWarning {
        used_mb: f64,
        limit_mb: f64,
    },
    DeadlineReached {
        completed: usize,
        total: usize,
    },
    Finished {
        run_id: Uuid,
        completed: usize,
        failed: usize,
    },
}
