use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::ValueEnum;
use runner::LanguageStrategy;
use runner::compiled::CompiledStrategy;
use runner::python::{PythonStrategy, WORKER_BINARY};
use runner::script::ScriptStrategy;

/// The language this process serves. One language per running executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Language {
    Python,
    Cpp,
    C,
    Javascript,
}

/// The Python worker binary is looked up next to the running executable
/// unless a path is given.
pub fn build_strategy(
    language: Language,
    python_worker: Option<&Path>,
) -> anyhow::Result<Arc<dyn LanguageStrategy>> {
    Ok(match language {
        Language::Python => {
            let worker = match python_worker {
                Some(path) => path.to_path_buf(),
                None => resolve_python_worker()?,
            };
            if !worker.is_file() {
                bail!(
                    "python worker binary not found at {}. Build it with `cargo build -p app --bin {WORKER_BINARY}`",
                    worker.display()
                );
            }
            Arc::new(PythonStrategy::new(worker))
        }
        Language::Cpp => Arc::new(CompiledStrategy::cpp()),
        Language::C => Arc::new(CompiledStrategy::c()),
        Language::Javascript => Arc::new(ScriptStrategy::javascript()),
    })
}

fn resolve_python_worker() -> anyhow::Result<PathBuf> {
    let current = env::current_exe().context("failed to resolve current executable")?;
    let mut worker = current
        .parent()
        .context("failed to resolve executable directory")?
        .to_path_buf();
    worker.push(WORKER_BINARY);
    if let Some(ext) = current.extension() {
        worker.set_extension(ext);
    }
    Ok(worker)
}
