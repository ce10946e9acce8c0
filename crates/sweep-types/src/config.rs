//! Run configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{SweepError, SweepResult};
use crate::objective::Objective;
use crate::parameters::ParameterSpace;

/// Top-level configuration for one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Free-form label of the strategy being tuned (e.g. "ma_crossover").
    pub strategy_type: String,

    /// Grid dimensions, in enumeration order (first = outermost loop).
    pub parameter_spaces: Vec<ParameterSpace>,

    pub objective: Objective,

    /// Upper bound on concurrently running workers. `None` uses the CPU
    /// profiler's recommendation.
    pub max_workers: Option<usize>,

    /// Combinations per worker batch. `None` splits each round evenly.
    pub batch_size: Option<usize>,

    /// Per-call time budget for the objective function, in seconds.
    pub timeout_seconds: f64,

    /// Soft resident-memory ceiling. Crossing it logs a warning only.
    pub memory_limit_mb: f64,

    /// Re-derive the batch size each round from measured evaluation times.
    pub adaptive_chunking: bool,

    /// Longest-job-first bin packing instead of contiguous slices.
    pub load_balance: bool,

    pub cache_enabled: bool,

    /// Keep cached results across `run()` calls on the same optimizer.
    pub persist_cache: bool,

    /// Run-level deadline in seconds. In-flight batches stop after their
    /// current combination once it passes.
    pub deadline_seconds: Option<f64>,

    /// Period of the CPU scaling tick, in milliseconds.
    pub control_interval_ms: u64,

    /// Per-evaluation time used as the sequential baseline for the speedup
    /// figure. `None` uses the measured mean.
    pub baseline_eval_seconds: Option<f64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategy_type: "unnamed".to_string(),
            parameter_spaces: Vec::new(),
            objective: Objective::MaximizeSharpe,
            max_workers: None,
            batch_size: None,
            timeout_seconds: 300.0,
            memory_limit_mb: 4096.0,
            adaptive_chunking: true,
            load_balance: true,
            cache_enabled: true,
            persist_cache: true,
            deadline_seconds: None,
            control_interval_ms: 250,
            baseline_eval_seconds: None,
        }
    }
}

impl RunConfig {
    pub fn new(strategy_type: impl Into<String>, parameter_spaces: Vec<ParameterSpace>) -> Self {
        Self {
            strategy_type: strategy_type.into(),
            parameter_spaces,
            ..Self::default()
        }
    }

    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = Some(n);
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_memory_limit_mb(mut self, mb: f64) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    pub fn with_adaptive_chunking(mut self, enabled: bool) -> Self {
        self.adaptive_chunking = enabled;
        self
    }

    pub fn with_load_balance(mut self, enabled: bool) -> Self {
        self.load_balance = enabled;
        self
    }

    pub fn with_cache(mut self, enabled: bool, persist: bool) -> Self {
        self.cache_enabled = enabled;
        self.persist_cache = persist;
        self
    }

    pub fn with_deadline_seconds(mut self, seconds: f64) -> Self {
        self.deadline_seconds = Some(seconds);
        self
    }

    pub fn with_control_interval_ms(mut self, ms: u64) -> Self {
        self.control_interval_ms = ms;
        self
    }

    pub fn with_baseline_eval_seconds(mut self, seconds: f64) -> Self {
        self.baseline_eval_seconds = Some(seconds);
        self
    }

    /// Check every field. Space errors surface as [`SweepError::InvalidSpace`].
    pub fn validate(&self) -> SweepResult<()> {
        for space in &self.parameter_spaces {
            space.validate()?;
        }
        for (i, space) in self.parameter_spaces.iter().enumerate() {
            if self.parameter_spaces[..i].iter().any(|s| s.name == space.name) {
                return Err(SweepError::InvalidSpace {
                    name: space.name.clone(),
                    message: "parameter declared more than once".to_string(),
                });
            }
        }
        if self.max_workers == Some(0) {
            return Err(crate::config_error!("max_workers must be at least 1"));
        }
        if self.batch_size == Some(0) {
            return Err(crate::config_error!("batch_size must be at least 1"));
        }
        if !(self.timeout_seconds > 0.0) || Duration::try_from_secs_f64(self.timeout_seconds).is_err() {
            return Err(SweepError::Config(format!(
                "timeout_seconds must be a positive, finite duration, got {}",
                self.timeout_seconds
            )));
        }
        if !(self.memory_limit_mb > 0.0) {
            return Err(SweepError::Config(format!(
                "memory_limit_mb must be positive, got {}",
                self.memory_limit_mb
            )));
        }
        if let Some(deadline) = self.deadline_seconds {
            if !(deadline > 0.0) || Duration::try_from_secs_f64(deadline).is_err() {
                return Err(SweepError::Config(format!(
                    "deadline_seconds must be a positive, finite duration, got {deadline}"
                )));
            }
        }
        if self.control_interval_ms == 0 {
            return Err(crate::config_error!("control_interval_ms must be at least 1"));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> SweepResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> SweepResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}
