use std::time::Instant;

use crate::strategy::{Prepared, RunOutcome};
use crate::{ExecutionRequest, ExecutionResult};

const MAX_PREVIEW_LENGTH: usize = 200;

/// Traces one request through the pipeline stages.
#[derive(Debug)]
pub struct ExecutionLogger {
    language: String,
    execution_number: u64,
    started: Instant,
    max_preview_length: usize,
}

impl ExecutionLogger {
    pub fn start(language: &str, execution_number: u64, request: &ExecutionRequest) -> Self {
        let logger = Self {
            language: language.to_owned(),
            execution_number,
            started: Instant::now(),
            max_preview_length: MAX_PREVIEW_LENGTH,
        };
        log::info!(
            "{} execution [{}] started: code_bytes={} input_bytes={}",
            logger.language,
            logger.execution_number,
            request.code.len(),
            request.input.len()
        );
        log::debug!(
            "{} execution [{}] code: {}",
            logger.language,
            logger.execution_number,
            logger.preview(&request.code)
        );
        logger
    }

    pub fn log_prepared(&self, prepared: &Prepared) {
        match prepared {
            Prepared::Ready(_) => log::debug!(
                "{} execution [{}] ready to run after {:.4}s",
                self.language,
                self.execution_number,
                self.elapsed_secs()
            ),
            Prepared::CompileFailed { diagnostics } => log::info!(
                "{} execution [{}] compile failed: {}",
                self.language,
                self.execution_number,
                self.preview(diagnostics)
            ),
            Prepared::CompileTimedOut => log::warn!(
                "{} execution [{}] compile timed out",
                self.language,
                self.execution_number
            ),
        }
    }

    pub fn log_run(&self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Exited {
                success,
                stdout,
                stderr,
            } => log::debug!(
                "{} execution [{}] exited success={} stdout_bytes={} stderr_bytes={}",
                self.language,
                self.execution_number,
                success,
                stdout.len(),
                stderr.len()
            ),
            RunOutcome::Raised { fault } => log::debug!(
                "{} execution [{}] raised: {}",
                self.language,
                self.execution_number,
                self.preview(fault)
            ),
            RunOutcome::TimedOut => log::warn!(
                "{} execution [{}] timed out",
                self.language,
                self.execution_number
            ),
        }
    }

    pub fn log_fault(&self, stage: &str, fault: &dyn std::fmt::Display) {
        log::error!(
            "{} execution [{}] {stage} fault: {fault}",
            self.language,
            self.execution_number
        );
    }

    pub fn log_result(&self, result: &ExecutionResult) {
        log::info!(
            "{} execution [{}] finished: status={:?} output_bytes={} time={:.4}s",
            self.language,
            self.execution_number,
            result.status,
            result.output.len(),
            self.elapsed_secs()
        );
    }

    fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn preview(&self, text: &str) -> String {
        if text.len() <= self.max_preview_length {
            return text.to_owned();
        }
        let half_len = self.max_preview_length / 2;
        let first_part = slice_to_boundary(text, half_len);
        let mut last_start = text.len().saturating_sub(half_len);
        while !text.is_char_boundary(last_start) {
            last_start = last_start.saturating_sub(1);
        }
        let last_part = &text[last_start..];
        let truncated_chars = text.len() - self.max_preview_length;
        format!("{first_part} ... [TRUNCATED {truncated_chars} characters] ... {last_part}")
    }
}

fn slice_to_boundary(text: &str, max_len: usize) -> &str {
    let mut end = max_len.min(text.len());
    while !text.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    &text[..end]
}
