use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Args, Parser};
use log::LevelFilter;
use runner::{DEFAULT_MAX_OUTPUT_BYTES, ExecutionLimits, Pipeline};

use crate::launcher::{Language, build_strategy};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8765;

/// Settings shared by every transport.
#[derive(Debug, Clone, Args)]
pub struct ExecutorArgs {
    #[arg(long, env = "EXECUTOR_LANGUAGE", value_enum, default_value_t = Language::Python)]
    pub language: Language,

    #[arg(long, env = "EXECUTOR_RUN_TIMEOUT_SECS", default_value_t = 10)]
    pub run_timeout_secs: u64,

    #[arg(long, env = "EXECUTOR_COMPILE_TIMEOUT_SECS", default_value_t = 10)]
    pub compile_timeout_secs: u64,

    /// Executions allowed at once; defaults to the host's available parallelism.
    #[arg(long, env = "EXECUTOR_MAX_CONCURRENT")]
    pub max_concurrent: Option<usize>,

    #[arg(long, env = "EXECUTOR_MAX_OUTPUT_BYTES", default_value_t = DEFAULT_MAX_OUTPUT_BYTES)]
    pub max_output_bytes: usize,

    /// Path to the `python_worker` binary; defaults to the executable's directory.
    #[arg(long, env = "EXECUTOR_PYTHON_WORKER")]
    pub python_worker: Option<PathBuf>,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl ExecutorArgs {
    pub fn limits(&self) -> anyhow::Result<ExecutionLimits> {
        if self.run_timeout_secs == 0 {
            bail!("run timeout must be at least one second");
        }
        if self.compile_timeout_secs == 0 {
            bail!("compile timeout must be at least one second");
        }
        if self.max_output_bytes == 0 {
            bail!("max output bytes must be non-zero");
        }
        Ok(ExecutionLimits {
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            compile_timeout: Duration::from_secs(self.compile_timeout_secs),
            max_output_bytes: self.max_output_bytes,
        })
    }

    pub fn max_concurrent(&self) -> anyhow::Result<usize> {
        match self.max_concurrent {
            Some(0) => bail!("max concurrent executions must be non-zero"),
            Some(limit) => Ok(limit),
            None => Ok(std::thread::available_parallelism().map_or(4, |count| count.get())),
        }
    }

    pub fn build_pipeline(&self) -> anyhow::Result<Pipeline> {
        Ok(Pipeline::new(
            build_strategy(self.language, self.python_worker.as_deref())?,
            self.limits()?,
            self.max_concurrent()?,
        ))
    }

    pub fn shared_pipeline(&self) -> anyhow::Result<Arc<Pipeline>> {
        self.build_pipeline().map(Arc::new)
    }
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "WebSocket code execution service")]
pub struct ServeArgs {
    #[arg(long, env = "EXECUTOR_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, env = "EXECUTOR_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[command(flatten)]
    pub executor: ExecutorArgs,
}

impl ServeArgs {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logs go to stderr so the stdio transport keeps stdout for results.
pub fn init_logging(level: &str) {
    let level_filter = level.parse().unwrap_or(LevelFilter::Info);
    let _ = env_logger::Builder::new()
        .filter_level(level_filter)
        .target(env_logger::Target::Stderr)
        .try_init();
}
