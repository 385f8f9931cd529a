use std::sync::Arc;
use std::time::{Duration, Instant};

use runner::python::PythonStrategy;
use runner::{ExecutionLimits, ExecutionRequest, ExecutionResult, ExecutionStatus, Pipeline};

fn pipeline(run_timeout: Duration) -> Pipeline {
    let strategy = PythonStrategy::new(env!("CARGO_BIN_EXE_python_worker"));
    let limits = ExecutionLimits {
        run_timeout,
        ..ExecutionLimits::default()
    };
    Pipeline::new(Arc::new(strategy), limits, 2)
}

fn assert_timed_out(result: &ExecutionResult) {
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.output, "");
    assert_eq!(
        result.error.as_deref(),
        Some("Execution timeout (1 seconds). Your code may have an infinite loop.")
    );
}

#[cfg(target_os = "linux")]
fn is_running(pid: &str) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .map(|stat| !stat.contains(") Z "))
        .unwrap_or(false)
}

#[tokio::test]
async fn prints_through_the_worker() {
    let result = pipeline(Duration::from_secs(10))
        .execute(ExecutionRequest::new("print(int(input()) + 1)", "41\n"))
        .await;
    assert_eq!(result, ExecutionResult::success("42\n"));
}

#[tokio::test]
async fn bare_loop_is_killed_at_the_deadline() {
    let marker = tempfile::NamedTempFile::new().unwrap();
    let code = format!(
        "import os\nwith open({path:?}, 'w') as f:\n    f.write(str(os.getpid()))\nwhile True:\n    pass\n",
        path = marker.path().display().to_string()
    );
    let started = Instant::now();
    let result = pipeline(Duration::from_secs(1))
        .execute(ExecutionRequest::new(code, ""))
        .await;
    assert_timed_out(&result);
    assert!(started.elapsed() < Duration::from_secs(6));

    #[cfg(target_os = "linux")]
    {
        let pid = std::fs::read_to_string(marker.path()).unwrap();
        assert!(!pid.is_empty());
        assert!(!is_running(pid.trim()), "worker {pid} still running");
    }
}

#[tokio::test]
async fn clearing_the_trace_hook_still_times_out() {
    let code = "import sys\nsys.settrace(None)\ndef spin():\n    pass\nwhile True:\n    spin()\n";
    let result = pipeline(Duration::from_secs(1))
        .execute(ExecutionRequest::new(code, ""))
        .await;
    assert_timed_out(&result);
}

#[tokio::test]
async fn a_killed_run_does_not_hold_its_slot() {
    let pipeline = Arc::new(pipeline(Duration::from_secs(1)));
    for _ in 0..2 {
        let result = pipeline
            .execute(ExecutionRequest::new("while True:\n    pass\n", ""))
            .await;
        assert_timed_out(&result);
    }
    let result = pipeline.execute(ExecutionRequest::new("print('free')", "")).await;
    assert_eq!(result, ExecutionResult::success("free\n"));
}
