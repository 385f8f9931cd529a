use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::ExecutorError;
use crate::process::{CommandTemplate, ProcessOutcome, run_captured};
use crate::strategy::{LanguageStrategy, Prepared, RunOutcome, Runnable};
use crate::ExecutionLimits;

const SOURCE_STEM: &str = "main";
const BINARY_NAME: &str = "main";

/// Per-request temporary directory holding the source artifact and, once
/// compiled, the binary. Removed recursively on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    source: PathBuf,
    binary: PathBuf,
}

impl Workspace {
    pub fn create(root: Option<&Path>, extension: &str) -> Result<Self, ExecutorError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("exec-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(ExecutorError::Workspace)?;
        let source = dir.path().join(format!("{SOURCE_STEM}.{extension}"));
        let binary = dir.path().join(BINARY_NAME);
        Ok(Self {
            dir,
            source,
            binary,
        })
    }

    pub async fn write_source(&self, code: &str) -> Result<(), ExecutorError> {
        tokio::fs::write(&self.source, code)
            .await
            .map_err(|source| ExecutorError::WriteSource {
                path: self.source.clone(),
                source,
            })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

/// Writes the code to a workspace, invokes a compiler, then runs the result.
#[derive(Debug, Clone)]
pub struct CompiledStrategy {
    name: String,
    display_name: String,
    extension: String,
    compiler: CommandTemplate,
    executable: CommandTemplate,
    work_root: Option<PathBuf>,
}

impl CompiledStrategy {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        extension: impl Into<String>,
        compiler: CommandTemplate,
        executable: CommandTemplate,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            extension: extension.into(),
            compiler,
            executable,
            work_root: None,
        }
    }

    pub fn cpp() -> Self {
        Self::new(
            "cpp",
            "C++",
            "cpp",
            CommandTemplate::new("g++", &["-o", "{binary}", "{source}"]),
            CommandTemplate::new("{binary}", &[]),
        )
    }

    pub fn c() -> Self {
        Self::new(
            "c",
            "C",
            "c",
            CommandTemplate::new("gcc", &["-o", "{binary}", "{source}"]),
            CommandTemplate::new("{binary}", &[]),
        )
    }

    /// Creates workspaces under `root` instead of the system temp dir.
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    pub fn compiler(&self) -> &CommandTemplate {
        &self.compiler
    }
}

fn workspace_vars(workspace: &Workspace) -> [(&'static str, String); 2] {
    [
        ("source", workspace.source().to_string_lossy().into_owned()),
        ("binary", workspace.binary().to_string_lossy().into_owned()),
    ]
}

#[async_trait]
impl LanguageStrategy for CompiledStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn prepare(
        &self,
        code: String,
        limits: &ExecutionLimits,
    ) -> Result<Prepared, ExecutorError> {
        let workspace = Workspace::create(self.work_root.as_deref(), &self.extension)?;
        workspace.write_source(&code).await?;

        let vars = workspace_vars(&workspace);
        let vars: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let compile = self.compiler.render(&vars).in_dir(workspace.path());
        let outcome = run_captured(
            &compile,
            "",
            limits.compile_timeout,
            limits.max_output_bytes,
        )
        .await?;
        match outcome {
            ProcessOutcome::TimedOut => Ok(Prepared::CompileTimedOut),
            ProcessOutcome::Completed(output) if !output.success => Ok(Prepared::CompileFailed {
                diagnostics: output.stderr,
            }),
            ProcessOutcome::Completed(_) => {
                let command = self.executable.render(&vars).in_dir(workspace.path());
                Ok(Prepared::Ready(Runnable::Binary { workspace, command }))
            }
        }
    }

    async fn run(
        &self,
        runnable: &Runnable,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<RunOutcome, ExecutorError> {
        let Runnable::Binary { command, .. } = runnable else {
            return Err(ExecutorError::Task(format!(
                "{} strategy cannot run interpreted source",
                self.name
            )));
        };
        let outcome =
            run_captured(command, input, limits.run_timeout, limits.max_output_bytes).await?;
        Ok(outcome.into())
    }
}

impl From<ProcessOutcome> for RunOutcome {
    fn from(outcome: ProcessOutcome) -> Self {
        match outcome {
            ProcessOutcome::TimedOut => RunOutcome::TimedOut,
            ProcessOutcome::Completed(output) => RunOutcome::Exited {
                success: output.success,
                stdout: output.stdout,
                stderr: output.stderr,
            },
        }
    }
}
