use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Host-side faults. Program failures (non-zero exit, exceptions, timeouts)
/// are outcomes, not errors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to create execution workspace: {0}")]
    Workspace(#[source] io::Error),
    #[error("failed to write {}: {source}", path.display())]
    WriteSource { path: PathBuf, source: io::Error },
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),
    #[error("failed to wait for child process: {0}")]
    Wait(#[source] io::Error),
    #[error("failed to capture {stream}: {source}")]
    Capture {
        stream: &'static str,
        source: io::Error,
    },
    #[error("python interpreter error: {0}")]
    Interpreter(String),
    #[error("execution task failed: {0}")]
    Task(String),
    #[error("admission queue closed")]
    AdmissionClosed,
}
