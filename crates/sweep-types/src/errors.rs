use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for a parameter sweep run
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Invalid parameter space '{name}': {message}")]
    InvalidSpace { name: String, message: String },

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    #[error("Memory ceiling exceeded: using {used_mb:.1} MB, limit {limit_mb:.1} MB")]
    CapacityExceeded { used_mb: f64, limit_mb: f64 },

    #[error("Run deadline of {deadline_seconds}s reached after {completed}/{total} combinations")]
    RunTimeout {
        deadline_seconds: f64,
        completed: usize,
        total: usize,
    },

    #[error("Worker pool initialization failed: {message}")]
    PoolInit { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single combination's evaluation.
///
/// These never abort a run. They are recorded against the combination and
/// turned into sentinel results when the report is built.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvalError {
    #[error("Objective function failed: {message}")]
    Failed { message: String },

    #[error("Objective function panicked: {message}")]
    Panicked { message: String },

    #[error("Objective function exceeded its {budget_ms} ms budget (took {elapsed_ms} ms)")]
    Timeout { budget_ms: u64, elapsed_ms: u64 },

    #[error("Objective function returned unusable metrics: {message}")]
    InvalidMetrics { message: String },
}

impl EvalError {
    /// Build a [`EvalError::Panicked`] from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        EvalError::Panicked { message }
    }
}

/// Result type alias for sweep operations
pub type SweepResult<T> = Result<T, SweepError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::SweepError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SweepError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SweepError::InvalidSpace {
            name: "fast".to_string(),
            message: "step must be positive".to_string(),
        };

        assert!(error.to_string().contains("fast"));
        assert!(error.to_string().contains("step must be positive"));
    }

    #[test]
    fn test_error_conversion() {
        let eval_error = EvalError::Timeout {
            budget_ms: 100,
            elapsed_ms: 250,
        };
        let sweep_error: SweepError = eval_error.into();

        match sweep_error {
            SweepError::Evaluation(EvalError::Timeout { elapsed_ms, .. }) => {
                assert_eq!(elapsed_ms, 250)
            }
            _ => panic!("Expected Evaluation error"),
        }
    }

    #[test]
    fn test_panic_payload_extraction() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(
            EvalError::from_panic(payload),
            EvalError::Panicked {
                message: "boom 7".to_string()
            }
        );

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert!(matches!(EvalError::from_panic(payload), EvalError::Panicked { .. }));
    }

    #[test]
    fn test_macros() {
        let err = config_error!("Missing field: {}", "objective");
        assert!(matches!(err, SweepError::Config(ref m) if m == "Missing field: objective"));
        let err = internal_error!("worker {} vanished", 3);
        assert!(err.to_string().contains("worker 3 vanished"));
    }
}
