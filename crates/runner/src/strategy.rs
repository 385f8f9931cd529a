use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::compiled::Workspace;
use crate::error::ExecutorError;
use crate::process::CommandLine;
use crate::ExecutionLimits;

/// Something the run step can execute. Dropping it tears down any
/// workspace it owns.
#[derive(Debug)]
pub enum Runnable {
    Binary {
        workspace: Workspace,
        command: CommandLine,
    },
    Source(String),
}

#[derive(Debug)]
pub enum Prepared {
    Ready(Runnable),
    CompileFailed { diagnostics: String },
    CompileTimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Exited {
        success: bool,
        stdout: String,
        stderr: String,
    },
    /// An interpreted evaluation raised; `fault` is `"<Kind>: <message>\n<trace>"`.
    Raised { fault: String },
    TimedOut,
}

#[async_trait]
pub trait LanguageStrategy: Send + Sync {
    /// Short identifier used in logs, e.g. `cpp`.
    fn name(&self) -> &str;

    /// Human-facing language name, e.g. `C++`.
    fn display_name(&self) -> &str;

    async fn prepare(
        &self,
        code: String,
        limits: &ExecutionLimits,
    ) -> Result<Prepared, ExecutorError>;

    async fn run(
        &self,
        runnable: &Runnable,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<RunOutcome, ExecutorError>;
}
