use std::io::{self, BufRead, Write};

use app::config::{ExecutorArgs, init_logging};
use app::connection::ConnectionHandler;
use app::protocol;
use clap::Parser;
use runner::ExecutionResult;

/// Serves the execution protocol over stdin/stdout, one JSON document per line.
#[derive(Debug, Parser)]
#[command(author, version, about = "Line-delimited JSON code execution worker")]
struct WorkerArgs {
    #[command(flatten)]
    executor: ExecutorArgs,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = WorkerArgs::parse();
    init_logging(&args.executor.log_level);

    let handler = ConnectionHandler::new(args.executor.shared_pipeline()?);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    log::info!("stdio worker {} ready", handler.id());

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::warn!("stdin read failed: {err}");
                emit(&mut stdout, &protocol::invalid_json_result())?;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if let Some(result) = runtime.block_on(handler.handle_frame(&line)) {
            emit(&mut stdout, &result)?;
        }
    }
    log::info!("stdin closed, stdio worker exiting");
    Ok(())
}

fn emit(stdout: &mut io::Stdout, result: &ExecutionResult) -> io::Result<()> {
    let payload = protocol::encode_result(result);
    let mut handle = stdout.lock();
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    handle.flush()
}
