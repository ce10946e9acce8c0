//! Command-line sweep runner.
//!
//! Runs a moving-average crossover sweep over a synthetic random-walk price
//! series and prints the run summary as JSON.
//!
//! Usage: `sweep-runner [config.json] [results.csv]`
//! (or `SWEEP_CONFIG` / `SWEEP_CSV`). Log level follows `RUST_LOG`.

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sweep_engine::sweep_types::{MetricsRecord, Objective, ParameterCombination, ParameterSpace, RunConfig};
use sweep_engine::{ObjectiveFunction, ParallelOptimizer, ProgressCallback};

const PRICE_BARS: usize = 2_000;
const PRICE_SEED: u64 = 42;
const BARS_PER_YEAR: f64 = 252.0;

fn synthetic_prices(bars: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = 100.0;
    (0..bars)
        .map(|_| {
            price *= 1.0 + rng.random_range(-0.02..0.02) + 0.0002;
            price
        })
        .collect()
}

fn default_config() -> RunConfig {
    RunConfig::new(
        "ma_crossover",
        vec![
            ParameterSpace::new("fast_period", 5.0, 50.0, 5.0),
            ParameterSpace::new("slow_period", 20.0, 200.0, 10.0),
        ],
    )
    .with_objective(Objective::MaximizeSharpe)
}

/// Long when the fast average is above the slow one, flat otherwise.
struct MovingAverageCrossover;

impl ObjectiveFunction<Vec<f64>> for MovingAverageCrossover {
    fn evaluate(&self, prices: &Vec<f64>, combination: &ParameterCombination) -> anyhow::Result<MetricsRecord> {
        let fast = combination.get("fast_period").context("missing fast_period")? as usize;
        let slow = combination.get("slow_period").context("missing slow_period")? as usize;
        anyhow::ensure!(fast > 0 && fast < slow, "fast period {fast} must be below slow period {slow}");
        anyhow::ensure!(prices.len() > slow + 1, "{} bars is not enough for slow period {slow}", prices.len());

        let fast_ma = rolling_mean(prices, fast);
        let slow_ma = rolling_mean(prices, slow);

        let mut returns = Vec::with_capacity(prices.len() - slow);
        let mut trade_returns = Vec::new();
        let mut position = false;
        let mut entry = 0.0;
        let mut equity = 1.0f64;
        let mut peak = 1.0f64;
        let mut max_drawdown = 0.0f64;

        for i in slow..prices.len() {
            let bar_return = if position { prices[i] / prices[i - 1] - 1.0 } else { 0.0 };
            returns.push(bar_return);
            equity *= 1.0 + bar_return;
            peak = peak.max(equity);
            max_drawdown = max_drawdown.max((peak - equity) / peak * 100.0);

            let long = fast_ma[i] > slow_ma[i];
            if long && !position {
                position = true;
                entry = prices[i];
            } else if !long && position {
                position = false;
                trade_returns.push(prices[i] / entry - 1.0);
            }
        }
        if position {
            if let Some(last) = prices.last() {
                trade_returns.push(last / entry - 1.0);
            }
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let std = (returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
        let sharpe_ratio = if std > 0.0 { mean / std * BARS_PER_YEAR.sqrt() } else { 0.0 };

        let wins: Vec<f64> = trade_returns.iter().copied().filter(|r| *r > 0.0).collect();
        let losses: f64 = trade_returns.iter().filter(|r| **r < 0.0).map(|r| -r).sum();
        let win_rate = if trade_returns.is_empty() {
            0.0
        } else {
            wins.len() as f64 / trade_returns.len() as f64 * 100.0
        };
        let gains: f64 = wins.iter().sum();
        let profit_factor = if losses > 0.0 { gains / losses } else { gains };

        Ok(MetricsRecord {
            return_pct: (equity - 1.0) * 100.0,
            sharpe_ratio,
            max_drawdown,
            win_rate,
            profit_factor,
            trade_count: trade_returns.len() as u64,
        })
    }
}

/// Trailing mean; entries before the first full window are NaN.
fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        if i + 1 >= window {
            out[i] = sum / window as f64;
        }
    }
    out
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().or_else(|| std::env::var("SWEEP_CONFIG").ok());
    let csv_path = args.next().or_else(|| std::env::var("SWEEP_CSV").ok());

    let config = match &config_path {
        Some(path) => RunConfig::from_json_file(path).with_context(|| format!("loading config from {path}"))?,
        None => default_config(),
    };

    let prices = Arc::new(synthetic_prices(PRICE_BARS, PRICE_SEED));
    info!(bars = prices.len(), "Generated synthetic price series");

    let progress: ProgressCallback = Arc::new(|completed, total, _latest| {
        if completed % 50 == 0 || completed == total {
            info!(completed, total, "Sweep progress");
        }
    });
    let optimizer = ParallelOptimizer::new(config, Arc::new(MovingAverageCrossover), prices).with_progress(progress);
    let report = optimizer.run()?;

    println!("{}", serde_json::to_string_pretty(&report.summary())?);

    if let Some(path) = csv_path {
        let file = std::fs::File::create(&path).with_context(|| format!("creating {path}"))?;
        report.write_csv(file)?;
        info!(path = %path, rows = report.results.len(), "Wrote results CSV");
    }

    Ok(())
}
