//! Adapter around the caller-supplied objective function.
//!
//! Consults the result cache, calls the objective at most once per unique
//! combination, applies the run's optimization direction, and reports each
//! outcome as a tagged `Result` instead of swallowing failures.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use sweep_types::{EvalError, EvaluationResult, MetricsRecord, Objective, ParameterCombination};

use crate::cache::{CacheLookup, ResultCache};

/// Objective function contract: maps a dataset and a combination to metrics.
///
/// Called concurrently from several worker threads with distinct
/// combinations.
pub trait ObjectiveFunction<D>: Send + Sync {
    fn evaluate(&self, data: &D, combination: &ParameterCombination) -> anyhow::Result<MetricsRecord>;
}

impl<D, F> ObjectiveFunction<D> for F
where
    F: Fn(&D, &ParameterCombination) -> anyhow::Result<MetricsRecord> + Send + Sync,
{
    fn evaluate(&self, data: &D, combination: &ParameterCombination) -> anyhow::Result<MetricsRecord> {
        self(data, combination)
    }
}

/// One combination's evaluation, successful or not.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub combination: ParameterCombination,
    pub outcome: Result<EvaluationResult, EvalError>,
    /// `None` when caching is disabled.
    pub lookup: Option<CacheLookup>,
    /// Seconds spent in this call, including any wait on the cache slot.
    pub elapsed_secs: f64,
}

impl Evaluation {
    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn is_cache_hit(&self) -> bool {
        self.lookup == Some(CacheLookup::Hit)
    }
}

pub struct Evaluator<D> {
    objective_fn: Arc<dyn ObjectiveFunction<D>>,
    data: Arc<D>,
    objective: Objective,
    timeout: Duration,
    cache: Option<Arc<ResultCache>>,
}

impl<D> Evaluator<D> {
    pub fn new(
        objective_fn: Arc<dyn ObjectiveFunction<D>>,
        data: Arc<D>,
        objective: Objective,
        timeout: Duration,
    ) -> Self {
        Self {
            objective_fn,
            data,
            objective,
            timeout,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn evaluate(&self, combination: &ParameterCombination) -> Evaluation {
        let started = Instant::now();
        let (outcome, lookup) = match &self.cache {
            Some(cache) => {
                let (outcome, lookup) =
                    cache.get_or_evaluate(&combination.cache_key(), || self.invoke(combination));
                (outcome, Some(lookup))
            }
            None => (self.invoke(combination), None),
        };

        if let Err(error) = &outcome {
            warn!(%combination, %error, "Evaluation failed; recording sentinel result");
        }

        Evaluation {
            combination: combination.clone(),
            outcome,
            lookup,
            elapsed_secs: started.elapsed().as_secs_f64(),
        }
    }

    fn invoke(&self, combination: &ParameterCombination) -> Result<EvaluationResult, EvalError> {
        let started = Instant::now();
        let called = catch_unwind(AssertUnwindSafe(|| {
            self.objective_fn.evaluate(&self.data, combination)
        }));
        let elapsed = started.elapsed();

        let metrics = match called {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(e)) => {
                return Err(EvalError::Failed {
                    message: format!("{e:#}"),
                })
            }
            Err(payload) => return Err(EvalError::from_panic(payload)),
        };

        // The call is never interrupted; overrunning the budget only marks
        // the result as failed once it returns.
        if elapsed > self.timeout {
            return Err(EvalError::Timeout {
                budget_ms: self.timeout.as_millis() as u64,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        let score = self.objective.score(&metrics);
        if !score.is_finite() {
            return Err(EvalError::InvalidMetrics {
                message: format!("{} score is {score}", self.objective),
            });
        }

        debug!(%combination, score, secs = elapsed.as_secs_f64(), "Evaluated combination");
        Ok(EvaluationResult::from_metrics(
            combination.clone(),
            &metrics,
            score,
            elapsed.as_secs_f64(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn metrics(return_pct: f64, drawdown: f64) -> MetricsRecord {
        MetricsRecord {
            return_pct,
            sharpe_ratio: return_pct / 10.0,
            max_drawdown: drawdown,
            win_rate: 50.0,
            profit_factor: 1.2,
            trade_count: 12,
        }
    }

    fn evaluator_with<F>(objective: Objective, f: F) -> Evaluator<()>
    where
        F: Fn(&(), &ParameterCombination) -> anyhow::Result<MetricsRecord> + Send + Sync + 'static,
    {
        Evaluator::new(Arc::new(f), Arc::new(()), objective, Duration::from_secs(5))
    }

    #[test]
    fn maximize_stores_raw_score() {
        let evaluator = evaluator_with(Objective::MaximizeReturn, |_, c| {
            Ok(metrics(c.get("x").unwrap_or(0.0), 3.0))
        });
        let eval = evaluator.evaluate(&ParameterCombination::new().with("x", 7.0));
        let result = eval.outcome.unwrap();
        assert_eq!(result.score, 7.0);
        assert_eq!(result.return_pct, 7.0);
        assert_eq!(result.trade_count, 12);
        assert!(eval.lookup.is_none());
    }

    #[test]
    fn minimize_stores_negated_score() {
        let evaluator = evaluator_with(Objective::MinimizeDrawdown, |_, _| Ok(metrics(5.0, 9.0)));
        let result = evaluator
            .evaluate(&ParameterCombination::new())
            .outcome
            .unwrap();
        assert_eq!(result.score, -9.0);
        assert_eq!(result.max_drawdown, 9.0);
    }

    #[test]
    fn objective_error_becomes_failed() {
        let evaluator = evaluator_with(Objective::MaximizeSharpe, |_, _| {
            Err(anyhow::anyhow!("not enough bars"))
        });
        let eval = evaluator.evaluate(&ParameterCombination::new().with("x", 1.0));
        assert!(eval.is_failure());
        match eval.outcome {
            Err(EvalError::Failed { message }) => assert!(message.contains("not enough bars")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn objective_panic_becomes_panicked() {
        let evaluator = evaluator_with(Objective::MaximizeSharpe, |_, _| panic!("index out of range"));
        let eval = evaluator.evaluate(&ParameterCombination::new());
        assert!(matches!(eval.outcome, Err(EvalError::Panicked { .. })));
    }

    #[test]
    fn slow_objective_times_out() {
        let evaluator = Evaluator::new(
            Arc::new(|_: &(), _: &ParameterCombination| -> anyhow::Result<MetricsRecord> {
                std::thread::sleep(Duration::from_millis(30));
                Ok(MetricsRecord::default())
            }),
            Arc::new(()),
            Objective::MaximizeReturn,
            Duration::from_millis(5),
        );
        let eval = evaluator.evaluate(&ParameterCombination::new());
        assert!(matches!(eval.outcome, Err(EvalError::Timeout { budget_ms: 5, .. })));
    }

    #[test]
    fn non_finite_score_is_invalid() {
        let evaluator = evaluator_with(Objective::MaximizeSharpe, |_, _| {
            let mut m = metrics(1.0, 1.0);
            m.sharpe_ratio = f64::NAN;
            Ok(m)
        });
        let eval = evaluator.evaluate(&ParameterCombination::new());
        assert!(matches!(eval.outcome, Err(EvalError::InvalidMetrics { .. })));
    }

    #[test]
    fn cache_prevents_repeat_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = Arc::new(ResultCache::new());
        let evaluator = evaluator_with(Objective::MaximizeReturn, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(metrics(2.0, 1.0))
        })
        .with_cache(Arc::clone(&cache));

        let first = evaluator.evaluate(&ParameterCombination::new().with("a", 1.0).with("b", 2.0));
        let second = evaluator.evaluate(&ParameterCombination::new().with("b", 2.0).with("a", 1.0));

        assert_eq!(first.lookup, Some(CacheLookup::Miss));
        assert!(second.is_cache_hit());
        assert_eq!(first.outcome.unwrap(), second.outcome.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn data_is_passed_through() {
        let evaluator = Evaluator::new(
            Arc::new(|prices: &Vec<f64>, _: &ParameterCombination| -> anyhow::Result<MetricsRecord> {
                Ok(MetricsRecord {
                    return_pct: prices.iter().sum(),
                    ..MetricsRecord::default()
                })
            }),
            Arc::new(vec![1.0, 2.0, 3.0]),
            Objective::MaximizeReturn,
            Duration::from_secs(1),
        );
        let result = evaluator.evaluate(&ParameterCombination::new()).outcome.unwrap();
        assert_eq!(result.return_pct, 6.0);
    }
}
