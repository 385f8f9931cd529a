pub mod compiled;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod process;
pub mod python;
pub mod script;
pub mod strategy;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::ExecutorError;
pub use pipeline::Pipeline;
pub use strategy::{LanguageStrategy, Prepared, RunOutcome, Runnable};

pub const NO_OUTPUT_MESSAGE: &str = "Code executed successfully with no output";

pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub code: String,
    pub input: String,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            input: input.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Outbound message; `error` serializes as `null` when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::failure_with_output(String::new(), error)
    }

    pub fn failure_with_output(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    pub fn executor_error(fault: impl std::fmt::Display) -> Self {
        Self::failure(format!("Executor error: {fault}"))
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub run_timeout: Duration,
    pub compile_timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            run_timeout: DEFAULT_RUN_TIMEOUT,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Renders a budget the way users see it: `10`, `0.5`.
pub fn format_seconds(budget: Duration) -> String {
    if budget.subsec_nanos() == 0 {
        budget.as_secs().to_string()
    } else {
        budget.as_secs_f64().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_null_error() {
        let value = serde_json::to_value(ExecutionResult::success("X")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"status": "success", "output": "X", "error": null})
        );
    }

    #[test]
    fn failure_has_empty_output() {
        let result = ExecutionResult::failure("boom");
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.output, "");
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn seconds_render_without_trailing_zeroes() {
        assert_eq!(format_seconds(Duration::from_secs(10)), "10");
        assert_eq!(format_seconds(Duration::from_millis(500)), "0.5");
    }
}
