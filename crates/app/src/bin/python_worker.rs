use std::io::{self, Read, Write};

use runner::python::{EvaluationJob, EvaluationReport, evaluate_job};

/// Runs a single Python evaluation: one JSON job on stdin, one JSON report
/// line on stdout. Spawned per request so a runaway program can be killed.
fn main() -> anyhow::Result<()> {
    let mut payload = String::new();
    io::stdin().read_to_string(&mut payload)?;
    let report = match serde_json::from_str::<EvaluationJob>(&payload) {
        Ok(job) => evaluate_job(&job),
        Err(err) => EvaluationReport::HarnessFailed {
            message: format!("invalid evaluation job: {err}"),
        },
    };

    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, &report)?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}
