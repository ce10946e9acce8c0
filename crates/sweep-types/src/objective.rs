//! Optimization objectives and the direction they are optimized in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SweepError;
use crate::metrics::MetricsRecord;

/// Whether we are maximizing or minimizing the raw metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

/// Which metric a run optimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    MaximizeReturn,
    #[default]
    MaximizeSharpe,
    MinimizeDrawdown,
    MaximizeWinRate,
    MaximizeProfitFactor,
}

impl Objective {
    pub const ALL: [Objective; 5] = [
        Objective::MaximizeReturn,
        Objective::MaximizeSharpe,
        Objective::MinimizeDrawdown,
        Objective::MaximizeWinRate,
        Objective::MaximizeProfitFactor,
    ];

    pub fn direction(&self) -> ObjectiveDirection {
        match self {
            Objective::MinimizeDrawdown => ObjectiveDirection::Minimize,
            _ => ObjectiveDirection::Maximize,
        }
    }

    /// The metric this objective looks at, before direction is applied.
    pub fn raw_metric(&self, metrics: &MetricsRecord) -> f64 {
        match self {
            Objective::MaximizeReturn => metrics.return_pct,
            Objective::MaximizeSharpe => metrics.sharpe_ratio,
            Objective::MinimizeDrawdown => metrics.max_drawdown.abs(),
            Objective::MaximizeWinRate => metrics.win_rate,
            Objective::MaximizeProfitFactor => metrics.profit_factor,
        }
    }

    /// Direction-normalized score: larger is always better.
    ///
    /// This is the only place direction is applied. Ranking downstream simply
    /// takes the maximum score.
    pub fn score(&self, metrics: &MetricsRecord) -> f64 {
        let raw = self.raw_metric(metrics);
        match self.direction() {
            ObjectiveDirection::Maximize => raw,
            ObjectiveDirection::Minimize => -raw,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::MaximizeReturn => "maximize_return",
            Objective::MaximizeSharpe => "maximize_sharpe",
            Objective::MinimizeDrawdown => "minimize_drawdown",
            Objective::MaximizeWinRate => "maximize_win_rate",
            Objective::MaximizeProfitFactor => "maximize_profit_factor",
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Objective {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Objective::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| SweepError::Config(format!("unknown objective: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> MetricsRecord {
        MetricsRecord {
            return_pct: 20.0,
            sharpe_ratio: 1.5,
            max_drawdown: 12.0,
            win_rate: 60.0,
            profit_factor: 2.0,
            trade_count: 10,
        }
    }

    #[test]
    fn maximize_objectives_keep_raw_value() {
        let m = metrics();
        assert_eq!(Objective::MaximizeReturn.score(&m), 20.0);
        assert_eq!(Objective::MaximizeSharpe.score(&m), 1.5);
        assert_eq!(Objective::MaximizeWinRate.score(&m), 60.0);
        assert_eq!(Objective::MaximizeProfitFactor.score(&m), 2.0);
    }

    #[test]
    fn minimize_drawdown_negates_magnitude() {
        let mut shallow = metrics();
        shallow.max_drawdown = 5.0;
        let mut deep = metrics();
        deep.max_drawdown = -25.0; // sign convention should not matter

        let obj = Objective::MinimizeDrawdown;
        assert_eq!(obj.direction(), ObjectiveDirection::Minimize);
        assert_eq!(obj.score(&shallow), -5.0);
        assert_eq!(obj.score(&deep), -25.0);
        assert!(obj.score(&shallow) > obj.score(&deep));
    }

    #[test]
    fn objective_names_round_trip() {
        for objective in Objective::ALL {
            assert_eq!(objective.as_str().parse::<Objective>().unwrap(), objective);
            let json = serde_json::to_string(&objective).unwrap();
            assert_eq!(json, format!("\"{}\"", objective.as_str()));
        }
        assert!("maximize_luck".parse::<Objective>().is_err());
    }
}
