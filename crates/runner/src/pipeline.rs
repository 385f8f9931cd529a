use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Semaphore;

use crate::error::ExecutorError;
use crate::logger::ExecutionLogger;
use crate::strategy::{LanguageStrategy, Prepared, RunOutcome};
use crate::{
    ExecutionLimits, ExecutionRequest, ExecutionResult, NO_OUTPUT_MESSAGE, format_seconds,
};

/// The materialize → compile → run → classify state machine, bound to a
/// single language strategy.
///
/// Executions queue on an admission semaphore so at most `max_concurrent`
/// workspaces and child processes exist at once.
pub struct Pipeline {
    strategy: Arc<dyn LanguageStrategy>,
    limits: ExecutionLimits,
    admission: Arc<Semaphore>,
    executions: AtomicU64,
}

impl Pipeline {
    pub fn new(
        strategy: Arc<dyn LanguageStrategy>,
        limits: ExecutionLimits,
        max_concurrent: usize,
    ) -> Self {
        Self {
            strategy,
            limits,
            admission: Arc::new(Semaphore::new(max_concurrent.max(1))),
            executions: AtomicU64::new(0),
        }
    }

    pub fn strategy(&self) -> &dyn LanguageStrategy {
        self.strategy.as_ref()
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Runs one request to completion. Every outcome, host faults included,
    /// becomes a result.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let _permit = match Arc::clone(&self.admission).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return ExecutionResult::executor_error(ExecutorError::AdmissionClosed),
        };
        let execution_number = self.executions.fetch_add(1, Ordering::Relaxed) + 1;
        let logger = ExecutionLogger::start(self.strategy.name(), execution_number, &request);
        let result = self.drive(request, &logger).await;
        logger.log_result(&result);
        result
    }

    async fn drive(&self, request: ExecutionRequest, logger: &ExecutionLogger) -> ExecutionResult {
        let ExecutionRequest { code, input } = request;

        let prepared = match self.strategy.prepare(code, &self.limits).await {
            Ok(prepared) => prepared,
            Err(err) => {
                logger.log_fault("prepare", &err);
                return ExecutionResult::executor_error(err);
            }
        };
        logger.log_prepared(&prepared);

        let runnable = match prepared {
            Prepared::Ready(runnable) => runnable,
            Prepared::CompileFailed { diagnostics } => {
                return ExecutionResult::failure(format!("Compilation error:\n{diagnostics}"));
            }
            Prepared::CompileTimedOut => {
                return ExecutionResult::failure(format!(
                    "Compilation timeout ({} seconds).",
                    format_seconds(self.limits.compile_timeout)
                ));
            }
        };

        let outcome = self.strategy.run(&runnable, &input, &self.limits).await;
        // Teardown: the workspace goes away before the result is reported.
        drop(runnable);

        match outcome {
            Ok(outcome) => {
                logger.log_run(&outcome);
                classify(outcome, &self.limits)
            }
            Err(err) => {
                logger.log_fault("run", &err);
                match err {
                    ExecutorError::Interpreter(_) => ExecutionResult::executor_error(err),
                    err => ExecutionResult::failure(format!("Runtime error: {err}")),
                }
            }
        }
    }
}

/// Folds a finished run into the outbound result.
///
/// On success stderr is surfaced through `output` when stdout is empty, and
/// `error` stays absent.
pub fn classify(outcome: RunOutcome, limits: &ExecutionLimits) -> ExecutionResult {
    match outcome {
        RunOutcome::TimedOut => ExecutionResult::failure(timeout_message(limits)),
        RunOutcome::Raised { fault } => ExecutionResult::failure(fault),
        RunOutcome::Exited {
            success,
            stdout,
            stderr,
        } => {
            let output = if !stdout.is_empty() {
                stdout
            } else if !stderr.is_empty() {
                stderr.clone()
            } else {
                NO_OUTPUT_MESSAGE.to_owned()
            };
            if success {
                ExecutionResult::success(output)
            } else {
                ExecutionResult::failure_with_output(output, stderr)
            }
        }
    }
}

pub fn timeout_message(limits: &ExecutionLimits) -> String {
    format!(
        "Execution timeout ({} seconds). Your code may have an infinite loop.",
        format_seconds(limits.run_timeout)
    )
}
