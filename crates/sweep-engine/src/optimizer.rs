//! Parallel optimization orchestrator.
//!
//! Ties the pieces together for one run: enumerate the grid, size and start
//! the worker pool, hand out batches round by round, resize the pool on a
//! control tick, watch memory and the run deadline, and build the report.

use crossbeam_channel::{select, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, info, warn};

use sweep_types::{config_error, EvaluationResult, RunConfig, SweepError, SweepResult};

use crate::cache::ResultCache;
use crate::chunking::{AdaptiveChunker, MAX_BATCH, MIN_BATCH};
use crate::cpu::{CpuProbe, CpuProfiler};
use crate::distributor::{CostEstimator, WorkDistributor};
use crate::evaluator::{Evaluation, Evaluator, ObjectiveFunction};
use crate::events::RunEvent;
use crate::grid::GridEnumerator;
use crate::memory::{MemoryMonitor, MemoryProbe, ProcMemoryProbe};
use crate::pool::{gather, DynamicWorkerPool, TaskHandle};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::report::{finalize, OptimizationReport, RunContext, RunStatus};
use crate::scaling::{ScalingDecision, ScalingPolicy};

/// Rounds are sized so each worker gets about this many batches over the run
/// when no batch size is configured.
const DEFAULT_BATCHES_PER_WORKER: usize = 4;

/// Upper bound on the up-front reservation for results; larger grids grow
/// the vector as results arrive.
const INITIAL_RESULT_CAPACITY: usize = 4096;

pub struct ParallelOptimizer<D> {
    config: RunConfig,
    objective_fn: Arc<dyn ObjectiveFunction<D>>,
    data: Arc<D>,
    cache: Arc<ResultCache>,
    distributor: WorkDistributor,
    policy: ScalingPolicy,
    cpu_probe: Arc<dyn CpuProbe>,
    memory_probe: Arc<dyn MemoryProbe>,
    progress: Option<ProgressCallback>,
    events: Option<Sender<RunEvent>>,
}

impl<D: Send + Sync + 'static> ParallelOptimizer<D> {
    pub fn new(config: RunConfig, objective_fn: Arc<dyn ObjectiveFunction<D>>, data: Arc<D>) -> Self {
        let worker_cap = config.max_workers.unwrap_or(usize::MAX);
        Self {
            config,
            objective_fn,
            data,
            cache: Arc::new(ResultCache::new()),
            distributor: WorkDistributor::default(),
            policy: ScalingPolicy::default(),
            cpu_probe: Arc::new(CpuProfiler::new(worker_cap)),
            memory_probe: Arc::new(ProcMemoryProbe),
            progress: None,
            events: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cost_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.distributor = WorkDistributor::new(estimator);
        self
    }

    pub fn with_scaling_policy(mut self, policy: ScalingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cpu_probe(mut self, probe: Arc<dyn CpuProbe>) -> Self {
        self.cpu_probe = probe;
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = probe;
        self
    }

    pub fn with_event_sink(mut self, events: Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Share a cache with other optimizers. Only kept across runs when
    /// `persist_cache` is set.
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run the full sweep and return the report.
    ///
    /// Fails only on invalid configuration or when the pool cannot start.
    /// Individual evaluation failures become sentinel results.
    pub fn run(&self) -> SweepResult<OptimizationReport> {
        self.config.validate()?;
        let mut grid = GridEnumerator::new(self.config.parameter_spaces.clone())?;
        let total = grid.len();

        let mut context = RunContext::new(self.config.strategy_type.clone(), self.config.objective);
        context.baseline_eval_secs = self.config.baseline_eval_seconds;
        let started = Instant::now();

        let cache = self.run_cache();
        let mut evaluator = Evaluator::new(
            Arc::clone(&self.objective_fn),
            Arc::clone(&self.data),
            self.config.objective,
            Duration::try_from_secs_f64(self.config.timeout_seconds)
                .map_err(|e| config_error!("timeout_seconds: {e}"))?,
        );
        if let Some(cache) = &cache {
            evaluator = evaluator.with_cache(Arc::clone(cache));
        }
        let evaluator = Arc::new(evaluator);

        let sample = self.cpu_probe.detect();
        let max_workers = self.config.max_workers.unwrap_or(sample.recommended_workers).max(1);
        let initial_workers = sample.recommended_workers.clamp(1, max_workers);
        let pool = DynamicWorkerPool::new(max_workers, initial_workers)?;

        let control_interval = Duration::from_millis(self.config.control_interval_ms);
        let initial_batch = self.config.batch_size.unwrap_or_else(|| {
            total
                .div_ceil(max_workers * DEFAULT_BATCHES_PER_WORKER)
                .clamp(MIN_BATCH, MAX_BATCH)
        });
        let mut chunker = AdaptiveChunker::new(initial_batch, self.config.adaptive_chunking, control_interval);
        let mut memory = MemoryMonitor::new(
            self.config.memory_limit_mb,
            Arc::clone(&self.memory_probe),
            self.events.clone(),
        );
        // A deadline too far out to represent as an instant never fires.
        let deadline = match self.config.deadline_seconds {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(|limit| started.checked_add(limit))
                .map_err(|e| config_error!("deadline_seconds: {e}"))?,
            None => None,
        };

        info!(
            run_id = %context.run_id,
            strategy = %self.config.strategy_type,
            objective = %self.config.objective,
            total_combinations = total,
            max_workers,
            initial_workers,
            "Starting parameter sweep"
        );
        self.emit(RunEvent::Started {
            run_id: context.run_id,
            total_combinations: total,
            workers: initial_workers,
        });

        let tracker = ProgressTracker::new(total as u64);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<Evaluation>();
        let ticker = crossbeam_channel::tick(control_interval);
        let cancel = Arc::new(AtomicBool::new(false));
        let mut evaluations: Vec<Evaluation> = Vec::with_capacity(total.min(INITIAL_RESULT_CAPACITY));
        let mut worker_loads = vec![0.0; max_workers];
        let mut round = 0usize;

        while !cancel.load(Ordering::Acquire) && grid.remaining() > 0 {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                cancel.store(true, Ordering::Release);
                break;
            }
            let workers = pool.apply_pending();
            let combinations = grid.suggest(chunker.batch_size().saturating_mul(workers));
            round += 1;

            let distribution = self
                .distributor
                .distribute(combinations, workers, self.config.load_balance);
            let expected = distribution.total_combinations();
            let mut handles: Vec<TaskHandle<usize>> = Vec::with_capacity(distribution.batches.len());
            for (batch, load) in distribution.batches.into_iter().zip(&distribution.loads) {
                worker_loads[load.worker] += load.cost;
                let evaluator = Arc::clone(&evaluator);
                let results = result_tx.clone();
                let cancel = Arc::clone(&cancel);
                let worker = load.worker;
                handles.push(pool.submit(move || {
                    let _span = debug_span!("batch", round, worker, size = batch.len()).entered();
                    let mut evaluated = 0;
                    let mut first_error = None;
                    for combination in batch {
                        if cancel.load(Ordering::Acquire) {
                            break;
                        }
                        let evaluation = evaluator.evaluate(&combination);
                        if let (None, Err(error)) = (&first_error, &evaluation.outcome) {
                            first_error = Some(error.clone());
                        }
                        let _ = results.send(evaluation);
                        evaluated += 1;
                    }
                    // The batch keeps going past failures; only its outcome
                    // reports the first one.
                    match first_error {
                        Some(error) => Err(error),
                        None => Ok(evaluated),
                    }
                })?);
            }

            let mut round_secs = Vec::with_capacity(expected);
            let mut received = 0;
            while received < expected && !cancel.load(Ordering::Acquire) {
                select! {
                    recv(result_rx) -> message => {
                        if let Ok(evaluation) = message {
                            received += 1;
                            if !evaluation.is_cache_hit() {
                                round_secs.push(evaluation.elapsed_secs);
                            }
                            self.record(&tracker, total, evaluation, &mut evaluations);
                        }
                    }
                    recv(ticker) -> _ => self.rescale(&pool),
                }
                if received < expected && deadline.is_some_and(|d| Instant::now() >= d) {
                    cancel.store(true, Ordering::Release);
                }
            }

            // Batches stop at their next cancellation check; anything they
            // sent before stopping is still kept.
            for outcome in gather(handles) {
                if let Err(error) = outcome {
                    debug!(round, %error, "Batch finished with failures");
                }
            }
            for evaluation in result_rx.try_iter() {
                if !evaluation.is_cache_hit() {
                    round_secs.push(evaluation.elapsed_secs);
                }
                self.record(&tracker, total, evaluation, &mut evaluations);
            }

            self.emit(RunEvent::Progress(tracker.progress()));
            memory.check();
            chunker.observe(round_secs);
            debug!(
                round,
                workers,
                completed = tracker.completed(),
                next_batch = chunker.batch_size(),
                "Round finished"
            );
        }

        // A deadline that fires after the last result arrived still counts
        // as a completed run.
        let status = if evaluations.len() < total {
            let error = SweepError::RunTimeout {
                deadline_seconds: self.config.deadline_seconds.unwrap_or_default(),
                completed: evaluations.len(),
                total,
            };
            warn!(%error, "Returning partial results");
            self.emit(RunEvent::DeadlineReached {
                completed: evaluations.len(),
                total,
            });
            RunStatus::TimedOut
        } else {
            RunStatus::Completed
        };

        drop(result_tx);
        let pool_stats = pool.shutdown();
        // Slots above the highest active count never received work.
        worker_loads.truncate(pool_stats.max_workers_seen);

        context.status = status;
        context.worker_loads = worker_loads;
        context.cache = cache.as_ref().map(|c| c.stats());
        context.pool = Some(pool_stats);
        context.peak_memory_mb = memory.peak_mb();
        context.memory_warnings = memory.warnings();

        let report = finalize(evaluations, started.elapsed(), total, context);
        info!(
            run_id = %report.run_id,
            completed = report.completed_combinations,
            failed = report.failed_combinations,
            secs = report.execution_time_secs,
            throughput = report.performance.throughput,
            speedup = report.performance.speedup,
            best_score = report.best_result.as_ref().map(|r| r.score),
            "Parameter sweep finished"
        );
        self.emit(RunEvent::Finished {
            run_id: report.run_id,
            completed: report.completed_combinations,
            failed: report.failed_combinations,
        });
        Ok(report)
    }

    /// The cache for this run: the optimizer's own when persisting, a fresh
    /// one otherwise. Failures cached by a previous run are retried.
    fn run_cache(&self) -> Option<Arc<ResultCache>> {
        if !self.config.cache_enabled {
            return None;
        }
        if !self.config.persist_cache {
            return Some(Arc::new(ResultCache::new()));
        }
        let purged = self.cache.purge_failures();
        if purged > 0 {
            debug!(purged, "Dropped cached failures from previous run");
        }
        Some(Arc::clone(&self.cache))
    }

    /// One control tick: sample the CPU and step the pool size.
    fn rescale(&self, pool: &DynamicWorkerPool) {
        let sample = self.cpu_probe.detect();
        let decision = self
            .policy
            .decide(&sample, pool.current_workers(), pool.max_workers());
        if decision == ScalingDecision::Hold {
            return;
        }
        let _ = pool.controller().send(decision);
        let workers = pool.apply_pending();
        self.emit(RunEvent::Scaled {
            decision,
            workers,
            utilization_pct: sample.current_utilization_pct.unwrap_or_default(),
        });
    }

    fn record(
        &self,
        tracker: &ProgressTracker,
        total: usize,
        evaluation: Evaluation,
        evaluations: &mut Vec<Evaluation>,
    ) {
        tracker.record(!evaluation.is_failure(), evaluation.is_cache_hit());
        if let Some(callback) = &self.progress {
            let completed = tracker.completed() as usize;
            let notified = match &evaluation.outcome {
                Ok(result) => catch_unwind(AssertUnwindSafe(|| callback(completed, total, result))),
                Err(error) => {
                    let sentinel = EvaluationResult::sentinel(
                        evaluation.combination.clone(),
                        error.clone(),
                        evaluation.elapsed_secs,
                    );
                    catch_unwind(AssertUnwindSafe(|| callback(completed, total, &sentinel)))
                }
            };
            if notified.is_err() {
                warn!(completed, "Progress callback panicked");
            }
        }
        evaluations.push(evaluation);
    }
}
