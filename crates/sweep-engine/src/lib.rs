//! # sweep-engine
//!
//! Parallel exhaustive grid search over trading-strategy parameters.
//!
//! Enumerates every combination of the configured parameter spaces, evaluates
//! them on a worker pool that resizes itself from CPU utilization, caches
//! results by canonical parameter signature, and aggregates everything into a
//! ranked [`OptimizationReport`] with throughput, speedup, and load-balance
//! figures.

mod cache;
mod chunking;
mod cpu;
mod distributor;
mod evaluator;
mod events;
mod grid;
mod memory;
mod optimizer;
mod pool;
mod progress;
mod report;
mod scaling;

pub use cache::{CacheLookup, CacheStats, CachedOutcome, ResultCache};
pub use chunking::{AdaptiveChunker, MAX_BATCH, MIN_BATCH};
pub use cpu::{CpuProbe, CpuProfiler, CpuSample, ScriptedCpuProbe};
pub use distributor::{CostEstimator, Distribution, ParameterCountCost, WorkDistributor, WorkerLoad};
pub use evaluator::{Evaluation, Evaluator, ObjectiveFunction};
pub use events::RunEvent;
pub use grid::{GridEnumerator, GridIter};
pub use memory::{MemoryMonitor, MemoryProbe, ProcMemoryProbe};
pub use optimizer::ParallelOptimizer;
pub use pool::{gather, DynamicWorkerPool, PoolStats, TaskHandle, WorkerState, WorkerStats};
pub use progress::{Progress, ProgressCallback, ProgressTracker};
pub use report::{
    finalize, load_balance_efficiency, resolve, FilterCriteria, MetricField, OptimizationReport,
    PerformanceStats, ReportRow, ReportSummary, RunContext, RunStatus,
};
pub use scaling::{ScalingDecision, ScalingPolicy};

pub use sweep_types;
