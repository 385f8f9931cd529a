use async_trait::async_trait;

use crate::error::ExecutorError;
use crate::process::{CommandTemplate, run_captured};
use crate::strategy::{LanguageStrategy, Prepared, RunOutcome, Runnable};
use crate::ExecutionLimits;

/// Hands the source text to an interpreter subprocess, e.g. `node -e <code>`.
#[derive(Debug, Clone)]
pub struct ScriptStrategy {
    name: String,
    display_name: String,
    interpreter: CommandTemplate,
}

impl ScriptStrategy {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        interpreter: CommandTemplate,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            interpreter,
        }
    }

    pub fn javascript() -> Self {
        Self::new(
            "javascript",
            "JavaScript",
            CommandTemplate::new("node", &["-e", "{code}"]),
        )
    }
}

#[async_trait]
impl LanguageStrategy for ScriptStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn prepare(
        &self,
        code: String,
        _limits: &ExecutionLimits,
    ) -> Result<Prepared, ExecutorError> {
        Ok(Prepared::Ready(Runnable::Source(code)))
    }

    async fn run(
        &self,
        runnable: &Runnable,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<RunOutcome, ExecutorError> {
        let Runnable::Source(code) = runnable else {
            return Err(ExecutorError::Task(format!(
                "{} strategy cannot run a compiled binary",
                self.name
            )));
        };
        let command = self.interpreter.render(&[("code", code.as_str())]);
        let outcome =
            run_captured(&command, input, limits.run_timeout, limits.max_output_bytes).await?;
        Ok(outcome.into())
    }
}
