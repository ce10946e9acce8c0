//! Metrics produced by the objective function and the per-combination result
//! record built from them.

use serde::{Deserialize, Serialize};

use crate::errors::EvalError;
use crate::parameters::ParameterCombination;

/// Stored score of a failed evaluation. Always ranks below any real score.
pub const SENTINEL_SCORE: f64 = -1.0e9;
/// Return reported for a failed evaluation (total loss).
pub const SENTINEL_RETURN_PCT: f64 = -100.0;

/// Metrics returned by the objective function for one combination.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub return_pct: f64,
    pub sharpe_ratio: f64,
    /// Peak-to-trough loss, as a percentage. The sign is ignored when scoring.
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: u64,
}

/// Outcome of one combination's evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EvaluationStatus {
    Succeeded,
    Failed { error: EvalError },
}

/// Canonical result record for one combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub parameters: ParameterCombination,
    pub return_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: u64,
    /// Direction-normalized objective value: larger is always better.
    pub score: f64,
    /// Wall-clock seconds spent in the objective function.
    pub execution_time: f64,
    pub status: EvaluationStatus,
}

impl EvaluationResult {
    pub fn from_metrics(
        parameters: ParameterCombination,
        metrics: &MetricsRecord,
        score: f64,
        execution_time: f64,
    ) -> Self {
        Self {
            parameters,
            return_pct: metrics.return_pct,
            sharpe_ratio: metrics.sharpe_ratio,
            max_drawdown: metrics.max_drawdown,
            win_rate: metrics.win_rate,
            profit_factor: metrics.profit_factor,
            trade_count: metrics.trade_count,
            score,
            execution_time,
            status: EvaluationStatus::Succeeded,
        }
    }

    /// Worst-case placeholder for a combination whose evaluation failed.
    pub fn sentinel(parameters: ParameterCombination, error: EvalError, execution_time: f64) -> Self {
        Self {
            parameters,
            return_pct: SENTINEL_RETURN_PCT,
            sharpe_ratio: 0.0,
            max_drawdown: 100.0,
            win_rate: 0.0,
            profit_factor: 0.0,
            trade_count: 0,
            score: SENTINEL_SCORE,
            execution_time,
            status: EvaluationStatus::Failed { error },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, EvaluationStatus::Failed { .. })
    }

    pub fn error(&self) -> Option<&EvalError> {
        match &self.status {
            EvaluationStatus::Failed { error } => Some(error),
            EvaluationStatus::Succeeded => None,
        }
    }

    /// Canonical parameter signature, used for deterministic tie-breaking.
    pub fn signature(&self) -> String {
        self.parameters.cache_key().as_str().to_string()
    }
}
