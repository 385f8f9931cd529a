use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rustpython_pylib;
use rustpython_stdlib;
use rustpython_vm as vm;
use rustpython_vm::builtins::PyBaseException;
use rustpython_vm::scope::Scope;
use rustpython_vm::{Interpreter, InterpreterBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;
use crate::process::{CommandLine, ProcessOutcome, ProcessOutput, run_captured, truncate_utf8};
use crate::strategy::{LanguageStrategy, Prepared, RunOutcome, Runnable};
use crate::ExecutionLimits;

/// File name of the helper binary that hosts one evaluation per process.
pub const WORKER_BINARY: &str = "python_worker";

/// Time the worker gets past the run budget to start up and report.
const WORKER_GRACE: Duration = Duration::from_secs(1);

/// JSON escaping can grow captured text; leave room for it in the report.
const REPORT_EXPANSION: usize = 6;
const REPORT_OVERHEAD_BYTES: usize = 64 * 1024;

const EXECUTE: &str = r#"sys.settrace(__runner_trace)
try:
    exec(__runner_code, {'__builtins__': __builtins__, '__name__': '__main__'})
except __RunnerTimeout:
    __runner_timed_out = True
except SystemExit as __runner_exit:
    if __runner_exit.code not in (None, 0):
        __runner_fault = 'SystemExit: ' + str(__runner_exit.code) + '\n' + traceback.format_exc()
except BaseException as __runner_exc:
    __runner_fault = type(__runner_exc).__name__ + ': ' + str(__runner_exc) + '\n' + traceback.format_exc()
finally:
    sys.settrace(None)
    sys.stdin, sys.stdout, sys.stderr = __runner_saved_streams
__runner_stdout_value = __runner_stdout.getvalue()
__runner_stderr_value = __runner_stderr.getvalue()
"#;

const CAPTURE_CLASS: &str = r#"class __RunnerCapture:
    encoding = 'utf-8'

    def __init__(self, limit):
        self._limit = limit
        self._size = 0
        self._parts = []

    def write(self, text):
        text = str(text)
        room = self._limit - self._size
        if room > 0:
            kept = text[:room]
            self._parts.append(kept)
            self._size += len(kept)
        return len(text)

    def writelines(self, lines):
        for line in lines:
            self.write(line)

    def flush(self):
        pass

    def isatty(self):
        return False

    def writable(self):
        return True

    def getvalue(self):
        return ''.join(self._parts)
"#;

/// One evaluation, as handed to the worker on stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub code: String,
    pub input: String,
    pub budget_ms: u64,
    pub max_output_bytes: usize,
}

/// The worker's single line of stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum EvaluationReport {
    Finished { outcome: RunOutcome },
    HarnessFailed { message: String },
}

/// Evaluates Python source in an embedded RustPython interpreter.
///
/// Each request runs in a fresh `python_worker` process, so globals and
/// `sys` streams never leak between requests, and a run that ignores its
/// deadline is killed with its process group.
#[derive(Debug, Clone)]
pub struct PythonStrategy {
    worker: PathBuf,
}

impl PythonStrategy {
    pub fn new(worker: impl Into<PathBuf>) -> Self {
        Self {
            worker: worker.into(),
        }
    }

    pub fn worker(&self) -> &Path {
        &self.worker
    }
}

#[async_trait]
impl LanguageStrategy for PythonStrategy {
    fn name(&self) -> &str {
        "python"
    }

    fn display_name(&self) -> &str {
        "Python"
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
            return Err(ExecutorError::Task(
                "python strategy cannot run a compiled binary".to_owned(),
            ));
        };
        let job = EvaluationJob {
            code: code.clone(),
            input: input.to_owned(),
            budget_ms: u64::try_from(limits.run_timeout.as_millis()).unwrap_or(u64::MAX),
            max_output_bytes: limits.max_output_bytes,
        };
        let payload = serde_json::to_string(&job)
            .map_err(|err| ExecutorError::Interpreter(format!("failed to encode job: {err}")))?;
        let line = CommandLine {
            program: self.worker.to_string_lossy().into_owned(),
            args: Vec::new(),
            working_dir: None,
        };
        let report_cap = limits
            .max_output_bytes
            .saturating_mul(REPORT_EXPANSION)
            .saturating_add(REPORT_OVERHEAD_BYTES);

        match run_captured(&line, &payload, limits.run_timeout + WORKER_GRACE, report_cap).await? {
            ProcessOutcome::TimedOut => {
                log::warn!("python worker overran its deadline and was killed");
                Ok(RunOutcome::TimedOut)
            }
            ProcessOutcome::Completed(output) => read_report(output),
        }
    }
}

fn read_report(output: ProcessOutput) -> Result<RunOutcome, ExecutorError> {
    let report = output.stdout.lines().last().unwrap_or_default();
    match serde_json::from_str::<EvaluationReport>(report) {
        Ok(EvaluationReport::Finished { outcome }) => Ok(outcome),
        Ok(EvaluationReport::HarnessFailed { message }) => Err(ExecutorError::Interpreter(message)),
        Err(err) => Err(ExecutorError::Interpreter(format!(
            "python worker exited with {:?} without a readable report ({err}): {}",
            output.code,
            output.stderr.trim()
        ))),
    }
}

/// Runs one job in this process. This is the body of the worker binary.
pub fn evaluate_job(job: &EvaluationJob) -> EvaluationReport {
    let budget = Duration::from_millis(job.budget_ms);
    match evaluate(&job.code, &job.input, budget, job.max_output_bytes) {
        Ok(outcome) => EvaluationReport::Finished { outcome },
        Err(err) => EvaluationReport::HarnessFailed {
            message: err.to_string(),
        },
    }
}

fn evaluate(
    code: &str,
    input: &str,
    budget: Duration,
    max_output_bytes: usize,
) -> Result<RunOutcome, ExecutorError> {
    let interpreter = init_stdlib(InterpreterBuilder::new()).interpreter();
    let evaluation = run_in_interpreter(&interpreter, code, input, budget, max_output_bytes)?;

    if evaluation.timed_out {
        return Ok(RunOutcome::TimedOut);
    }
    if let Some(mut fault) = evaluation.fault {
        truncate_utf8(&mut fault, max_output_bytes);
        return Ok(RunOutcome::Raised { fault });
    }
    let mut stdout = evaluation.stdout;
    let mut stderr = evaluation.stderr;
    truncate_utf8(&mut stdout, max_output_bytes);
    truncate_utf8(&mut stderr, max_output_bytes);
    Ok(RunOutcome::Exited {
        success: true,
        stdout,
        stderr,
    })
}

struct Evaluation {
    stdout: String,
    stderr: String,
    fault: Option<String>,
    timed_out: bool,
}

fn run_in_interpreter(
    interpreter: &Interpreter,
    code: &str,
    input: &str,
    budget: Duration,
    max_output_bytes: usize,
) -> Result<Evaluation, ExecutorError> {
    interpreter
        .enter(|vm: &vm::VirtualMachine| -> vm::PyResult<Evaluation> {
            let scope = vm.new_scope_with_builtins();
            scope
                .globals
                .set_item("__runner_code", vm.ctx.new_str(code).into(), vm)?;
            scope
                .globals
                .set_item("__runner_input", vm.ctx.new_str(input).into(), vm)?;
            vm.run_string(
                scope.clone(),
                &preamble(budget, max_output_bytes),
                "<runner_preamble>".to_owned(),
            )?;
            vm.run_string(scope.clone(), EXECUTE, "<runner_exec>".to_owned())?;

            Ok(Evaluation {
                stdout: get_string_from_scope(vm, &scope, "__runner_stdout_value"),
                stderr: get_string_from_scope(vm, &scope, "__runner_stderr_value"),
                fault: get_optional_string(vm, &scope, "__runner_fault"),
                timed_out: get_bool_from_scope(vm, &scope, "__runner_timed_out"),
            })
        })
        .map_err(|err: vm::PyRef<PyBaseException>| {
            ExecutorError::Interpreter(format!("{err:?}"))
        })
}

fn preamble(budget: Duration, max_output_bytes: usize) -> String {
    let budget_secs = budget.as_secs_f64();
    format!(
        "import io, sys, time, traceback\n\
class __RunnerTimeout(BaseException):\n    pass\n\
{CAPTURE_CLASS}\
__runner_saved_streams = (sys.stdin, sys.stdout, sys.stderr)\n\
__runner_stdout = __RunnerCapture({max_output_bytes})\n\
__runner_stderr = __RunnerCapture({max_output_bytes})\n\
sys.stdin = io.StringIO(__runner_input)\n\
sys.stdout = __runner_stdout\n\
sys.stderr = __runner_stderr\n\
__runner_fault = None\n\
__runner_timed_out = False\n\
__runner_deadline = time.time() + {budget_secs}\n\
def __runner_trace(frame, event, arg):\n    if time.time() > __runner_deadline:\n        raise __RunnerTimeout('Execution time limit exceeded')\n    return __runner_trace\n"
    )
}

fn init_stdlib(builder: InterpreterBuilder) -> InterpreterBuilder {
    let defs = rustpython_stdlib::stdlib_module_defs(&builder.ctx);
    builder
        .add_native_modules(&defs)
        .add_frozen_modules(rustpython_pylib::FROZEN_STDLIB)
        .init_hook(set_frozen_stdlib_dir)
}

fn set_frozen_stdlib_dir(vm: &mut vm::VirtualMachine) {
    use rustpython_vm::common::rc::PyRc;

    if let Some(state) = PyRc::get_mut(&mut vm.state) {
        state.config.paths.stdlib_dir = Some(rustpython_pylib::LIB_PATH.to_owned());
    }
}

fn get_string_from_scope(vm: &vm::VirtualMachine, scope: &Scope, name: &str) -> String {
    get_optional_string(vm, scope, name).unwrap_or_default()
}

fn get_optional_string(vm: &vm::VirtualMachine, scope: &Scope, name: &str) -> Option<String> {
    scope
        .globals
        .get_item(name, vm)
        .ok()
        .and_then(|value| value.try_to_value::<String>(vm).ok())
}

fn get_bool_from_scope(vm: &vm::VirtualMachine, scope: &Scope, name: &str) -> bool {
    scope
        .globals
        .get_item(name, vm)
        .ok()
        .and_then(|value| value.try_to_value::<bool>(vm).ok())
        .unwrap_or(false)
}
