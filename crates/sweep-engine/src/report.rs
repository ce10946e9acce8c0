//! Aggregation of evaluation outcomes into the final run report.
//!
//! Failed evaluations become sentinel results here. Ranking is always
//! "highest stored score first": direction was already folded into the score
//! by the evaluator, so no objective-specific case exists at selection time.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use sweep_types::{config_error, EvaluationResult, Objective, SweepError, SweepResult};

use crate::cache::CacheStats;
use crate::evaluator::Evaluation;
use crate::pool::PoolStats;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    /// The run deadline passed; combinations never attempted are absent.
    TimedOut,
}

/// Everything about a run besides its evaluations that the report needs.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub strategy_type: String,
    pub objective: Objective,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// Total assigned cost per worker slot over the run.
    pub worker_loads: Vec<f64>,
    pub baseline_eval_secs: Option<f64>,
    pub cache: Option<CacheStats>,
    pub pool: Option<PoolStats>,
    pub peak_memory_mb: f64,
    pub memory_warnings: usize,
}

impl RunContext {
    pub fn new(strategy_type: impl Into<String>, objective: Objective) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            strategy_type: strategy_type.into(),
            objective,
            status: RunStatus::Completed,
            started_at: Utc::now(),
            worker_loads: Vec::new(),
            baseline_eval_secs: None,
            cache: None,
            pool: None,
            peak_memory_mb: 0.0,
            memory_warnings: 0,
        }
    }
}

/// Throughput, speedup, balance, and resource figures for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Combinations per second of wall-clock time.
    pub throughput: f64,
    pub speedup: f64,
    pub estimated_sequential_secs: f64,
    pub avg_eval_secs: f64,
    pub load_balance_efficiency: f64,
    pub peak_memory_mb: f64,
    pub memory_warnings: usize,
    pub cache: Option<CacheStats>,
    pub min_workers: usize,
    pub max_workers: usize,
    pub final_workers: usize,
    pub scale_ups: u64,
    pub scale_downs: u64,
    /// Pool tasks that finished with at least one failed combination.
    pub failed_batches: u64,
}

/// Aggregate over every evaluated combination of one run. Read-only once
/// built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub run_id: Uuid,
    pub strategy_type: String,
    pub objective: Objective,
    pub status: RunStatus,
    pub total_combinations: usize,
    /// Attempted combinations, failures included.
    pub completed_combinations: usize,
    pub failed_combinations: usize,
    pub execution_time_secs: f64,
    pub best_result: Option<EvaluationResult>,
    pub worst_result: Option<EvaluationResult>,
    /// Mean score over successful evaluations.
    pub mean_score: Option<f64>,
    /// Ranked best first.
    pub results: Vec<EvaluationResult>,
    pub performance: PerformanceStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The summary record consumed by persistence and presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub run_id: Uuid,
    pub strategy_type: String,
    pub objective: Objective,
    pub status: RunStatus,
    pub total_combinations: usize,
    pub completed_combinations: usize,
    pub failed_combinations: usize,
    pub execution_time_secs: f64,
    pub best_result: Option<EvaluationResult>,
    pub worst_result: Option<EvaluationResult>,
    pub mean_score: Option<f64>,
    pub performance: PerformanceStats,
}

/// One row of the tabular report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub rank: usize,
    pub parameters: Vec<(String, f64)>,
    pub return_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: u64,
    pub score: f64,
    pub execution_time: f64,
    pub failed: bool,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Result fields that can be filtered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    ReturnPct,
    SharpeRatio,
    MaxDrawdown,
    WinRate,
    ProfitFactor,
    TradeCount,
    Score,
    ExecutionTime,
}

impl MetricField {
    pub const ALL: [MetricField; 8] = [
        MetricField::ReturnPct,
        MetricField::SharpeRatio,
        MetricField::MaxDrawdown,
        MetricField::WinRate,
        MetricField::ProfitFactor,
        MetricField::TradeCount,
        MetricField::Score,
        MetricField::ExecutionTime,
    ];

    pub fn value(&self, result: &EvaluationResult) -> f64 {
        match self {
            MetricField::ReturnPct => result.return_pct,
            MetricField::SharpeRatio => result.sharpe_ratio,
            MetricField::MaxDrawdown => result.max_drawdown,
            MetricField::WinRate => result.win_rate,
            MetricField::ProfitFactor => result.profit_factor,
            MetricField::TradeCount => result.trade_count as f64,
            MetricField::Score => result.score,
            MetricField::ExecutionTime => result.execution_time,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricField::ReturnPct => "return_pct",
            MetricField::SharpeRatio => "sharpe_ratio",
            MetricField::MaxDrawdown => "max_drawdown",
            MetricField::WinRate => "win_rate",
            MetricField::ProfitFactor => "profit_factor",
            MetricField::TradeCount => "trade_count",
            MetricField::Score => "score",
            MetricField::ExecutionTime => "execution_time",
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricField {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricField::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| config_error!("unknown metric field: {s}"))
    }
}

/// Inclusive `(min, max)` bounds per field. Every bound must hold.
pub type FilterCriteria = BTreeMap<MetricField, (f64, f64)>;

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

/// Turn one evaluation into its canonical record, substituting a sentinel
/// for failures.
pub fn resolve(evaluation: Evaluation) -> EvaluationResult {
    match evaluation.outcome {
        Ok(result) => result,
        Err(error) => EvaluationResult::sentinel(evaluation.combination, error, evaluation.elapsed_secs),
    }
}

/// Best-first ordering: score descending, then faster execution, then
/// parameter signature.
fn rank(results: Vec<EvaluationResult>) -> Vec<EvaluationResult> {
    let mut keyed: Vec<(String, EvaluationResult)> = results
        .into_par_iter()
        .map(|r| (r.signature(), r))
        .collect();
    keyed.par_sort_by(|(sig_a, a), (sig_b, b)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.execution_time.total_cmp(&b.execution_time))
            .then_with(|| sig_a.cmp(sig_b))
    });
    keyed.into_iter().map(|(_, r)| r).collect()
}

/// `1 - stddev / mean` over per-worker loads, clamped to `[0, 1]`. Defined as
/// `1.0` when there are no loads or they are all zero.
pub fn load_balance_efficiency(loads: &[f64]) -> f64 {
    if loads.is_empty() {
        return 1.0;
    }
    let n = loads.len() as f64;
    let mean = loads.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 1.0;
    }
    let variance = loads.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Build the report for one run.
pub fn finalize(
    evaluations: Vec<Evaluation>,
    elapsed: Duration,
    total_combinations: usize,
    context: RunContext,
) -> OptimizationReport {
    let results = rank(evaluations.into_iter().map(resolve).collect());

    let failed_combinations = results.iter().filter(|r| r.is_failed()).count();
    let mean_score = mean(results.iter().filter(|r| !r.is_failed()).map(|r| r.score));

    let elapsed_secs = elapsed.as_secs_f64();
    let avg_eval_secs = context
        .baseline_eval_secs
        .or_else(|| {
            mean(
                results
                    .iter()
                    .filter(|r| !r.is_failed())
                    .map(|r| r.execution_time),
            )
        })
        .unwrap_or(0.0);
    // Partial runs are measured on what was evaluated, not on the grid size.
    let evaluated = results.len() as f64;
    let estimated_sequential_secs = evaluated * avg_eval_secs;
    let (throughput, speedup) = if elapsed_secs > 0.0 {
        (
            evaluated / elapsed_secs,
            estimated_sequential_secs / elapsed_secs,
        )
    } else {
        (0.0, 0.0)
    };

    let (min_workers, max_workers, final_workers, scale_ups, scale_downs, failed_batches) = match &context.pool {
        Some(pool) => (
            pool.min_workers_seen,
            pool.max_workers_seen,
            pool.current_workers,
            pool.grows,
            pool.shrinks,
            pool.workers.iter().map(|w| w.failed).sum(),
        ),
        None => (0, 0, 0, 0, 0, 0),
    };

    let performance = PerformanceStats {
        throughput,
        speedup,
        estimated_sequential_secs,
        avg_eval_secs,
        load_balance_efficiency: load_balance_efficiency(&context.worker_loads),
        peak_memory_mb: context.peak_memory_mb,
        memory_warnings: context.memory_warnings,
        cache: context.cache,
        min_workers,
        max_workers,
        final_workers,
        scale_ups,
        scale_downs,
        failed_batches,
    };

    OptimizationReport {
        run_id: context.run_id,
        strategy_type: context.strategy_type,
        objective: context.objective,
        status: context.status,
        total_combinations,
        completed_combinations: results.len(),
        failed_combinations,
        execution_time_secs: elapsed_secs,
        best_result: results.first().cloned(),
        worst_result: results.last().cloned(),
        mean_score,
        results,
        performance,
        started_at: context.started_at,
        finished_at: Utc::now(),
    }
}

impl OptimizationReport {
    /// The `n` best results, best first.
    pub fn top_n(&self, n: usize) -> &[EvaluationResult] {
        &self.results[..n.min(self.results.len())]
    }

    /// Results whose every constrained field lies within its inclusive
    /// bounds, in rank order.
    pub fn filter_by(&self, criteria: &FilterCriteria) -> Vec<&EvaluationResult> {
        self.results
            .iter()
            .filter(|r| {
                criteria.iter().all(|(field, (lo, hi))| {
                    let v = field.value(r);
                    v >= *lo && v <= *hi
                })
            })
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        self.completed_combinations < self.total_combinations
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            run_id: self.run_id,
            strategy_type: self.strategy_type.clone(),
            objective: self.objective,
            status: self.status,
            total_combinations: self.total_combinations,
            completed_combinations: self.completed_combinations,
            failed_combinations: self.failed_combinations,
            execution_time_secs: self.execution_time_secs,
            best_result: self.best_result.clone(),
            worst_result: self.worst_result.clone(),
            mean_score: self.mean_score,
            performance: self.performance.clone(),
        }
    }

    pub fn to_rows(&self) -> Vec<ReportRow> {
        self.results
            .iter()
            .enumerate()
            .map(|(i, r)| ReportRow {
                rank: i + 1,
                parameters: r.parameters.iter().map(|(n, v)| (n.to_string(), v)).collect(),
                return_pct: r.return_pct,
                sharpe_ratio: r.sharpe_ratio,
                max_drawdown: r.max_drawdown,
                win_rate: r.win_rate,
                profit_factor: r.profit_factor,
                trade_count: r.trade_count,
                score: r.score,
                execution_time: r.execution_time,
                failed: r.is_failed(),
                error: r.error().map(ToString::to_string),
            })
            .collect()
    }

    /// Write one CSV row per result. Parameter columns follow the first
    /// result's declaration order.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> SweepResult<()> {
        let param_names: Vec<String> = self
            .results
            .first()
            .map(|r| r.parameters.names().map(str::to_string).collect())
            .unwrap_or_default();

        let mut csv = csv::Writer::from_writer(writer);
        let mut header = vec!["rank".to_string()];
        header.extend(param_names.iter().cloned());
        header.extend(
            [
                "return_pct",
                "sharpe_ratio",
                "max_drawdown",
                "win_rate",
                "profit_factor",
                "trade_count",
                "score",
                "execution_time",
                "status",
                "error",
            ]
            .map(String::from),
        );
        csv.write_record(&header)?;

        for row in self.to_rows() {
            let mut record = vec![row.rank.to_string()];
            for name in &param_names {
                let value = row
                    .parameters
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default();
                record.push(value);
            }
            record.extend([
                row.return_pct.to_string(),
                row.sharpe_ratio.to_string(),
                row.max_drawdown.to_string(),
                row.win_rate.to_string(),
                row.profit_factor.to_string(),
                row.trade_count.to_string(),
                row.score.to_string(),
                row.execution_time.to_string(),
                if row.failed { "failed" } else { "ok" }.to_string(),
                row.error.unwrap_or_default(),
            ]);
            csv.write_record(&record)?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn to_json(&self) -> SweepResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
