use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::ExecutorError;

const READ_CHUNK_BYTES: usize = 8192;
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Bytes read so far. Shared with the reader task so an aborted read keeps
/// what it already captured.
type Capture = Arc<Mutex<Vec<u8>>>;

/// Argument vector with `{name}` placeholders, e.g. `g++ -o {binary} {source}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn render(&self, vars: &[(&str, &str)]) -> CommandLine {
        CommandLine {
            program: render_arg(&self.program, vars),
            args: self.args.iter().map(|arg| render_arg(arg, vars)).collect(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandLine {
    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed(ProcessOutput),
    TimedOut,
}

/// Spawns `line`, feeds `input` to stdin and captures stdout/stderr into
/// separate buffers of at most `max_output_bytes` each.
///
/// The child leads its own process group. The whole group is killed once
/// `budget` elapses, and again after the child exits so background
/// grandchildren cannot outlive the run.
pub async fn run_captured(
    line: &CommandLine,
    input: &str,
    budget: Duration,
    max_output_bytes: usize,
) -> Result<ProcessOutcome, ExecutorError> {
    let mut command = Command::new(&line.program);
    command
        .args(&line.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    if let Some(dir) = &line.working_dir {
        command.current_dir(dir);
    }
    let mut child = command.spawn().map_err(|source| ExecutorError::Spawn {
        program: line.program.clone(),
        source,
    })?;
    let group = child.id();

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or(ExecutorError::MissingPipe("stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or(ExecutorError::MissingPipe("stderr"))?;

    let payload = input.as_bytes().to_vec();
    let writer = tokio::spawn(async move {
        if let Some(mut stdin) = stdin {
            // The program may exit without reading; a broken pipe is expected then.
            if !payload.is_empty() {
                let _ = stdin.write_all(&payload).await;
            }
            let _ = stdin.shutdown().await;
        }
    });
    let stdout_capture = Capture::default();
    let stderr_capture = Capture::default();
    let stdout_reader = tokio::spawn(read_capped(
        stdout,
        max_output_bytes,
        Arc::clone(&stdout_capture),
    ));
    let stderr_reader = tokio::spawn(read_capped(
        stderr,
        max_output_bytes,
        Arc::clone(&stderr_capture),
    ));

    let status = match timeout(budget, child.wait()).await {
        Ok(status) => {
            kill_group(group);
            status.map_err(ExecutorError::Wait)?
        }
        Err(_) => {
            kill_group(group);
            let _ = child.kill().await;
            writer.abort();
            stdout_reader.abort();
            stderr_reader.abort();
            return Ok(ProcessOutcome::TimedOut);
        }
    };
    writer.abort();

    let stdout = drain(stdout_reader, &stdout_capture, "stdout", max_output_bytes).await?;
    let stderr = drain(stderr_reader, &stderr_capture, "stderr", max_output_bytes).await?;
    Ok(ProcessOutcome::Completed(ProcessOutput {
        success: status.success(),
        code: status.code(),
        stdout,
        stderr,
    }))
}

async fn read_capped<R>(mut reader: R, limit: usize, captured: Capture) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        // Keep draining past the cap so the child never blocks on a full pipe.
        let mut buffer = captured.lock().unwrap_or_else(PoisonError::into_inner);
        let room = limit.saturating_sub(buffer.len());
        buffer.extend_from_slice(&chunk[..read.min(room)]);
    }
}

async fn drain(
    mut reader: JoinHandle<std::io::Result<()>>,
    captured: &Capture,
    stream: &'static str,
    limit: usize,
) -> Result<String, ExecutorError> {
    // A grandchild that left its own group can still hold the pipe open.
    match timeout(PIPE_DRAIN_GRACE, &mut reader).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(source))) => return Err(ExecutorError::Capture { stream, source }),
        Ok(Err(err)) => return Err(ExecutorError::Task(err.to_string())),
        Err(_) => {
            log::debug!("{stream} still open after exit; keeping what was captured");
            reader.abort();
        }
    }
    let bytes = std::mem::take(&mut *captured.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(decode_capped(bytes, limit))
}

/// Decodes captured bytes. A cut at the cap never leaves half a character.
fn decode_capped(mut bytes: Vec<u8>, limit: usize) -> String {
    if bytes.len() >= limit {
        trim_partial_char(&mut bytes);
    }
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    truncate_utf8(&mut text, limit);
    text
}

fn trim_partial_char(bytes: &mut Vec<u8>) {
    let tail = bytes.len().saturating_sub(4);
    let Some(lead) = (tail..bytes.len()).rev().find(|&i| bytes[i] & 0xC0 != 0x80) else {
        return;
    };
    let width = match bytes[lead] {
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        b if b >= 0xC0 => 2,
        _ => 1,
    };
    if bytes.len() - lead < width {
        bytes.truncate(lead);
    }
}

#[cfg(unix)]
fn kill_group(group: Option<u32>) {
    let Some(pgid) = group.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers; a stale group yields ESRCH.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_group: Option<u32>) {}

fn render_arg(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    'scan: while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let candidate = &rest[open + 1..];
        for (name, value) in vars {
            if let Some(after) = candidate.strip_prefix(*name)
                && let Some(tail) = after.strip_prefix('}')
            {
                rendered.push_str(value);
                rest = tail;
                continue 'scan;
            }
        }
        rendered.push('{');
        rest = candidate;
    }
    rendered.push_str(rest);
    rendered
}

/// Cuts `text` to at most `max_bytes` without splitting a character.
pub fn truncate_utf8(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandLine {
        CommandTemplate::new("sh", &["-c", "{script}"]).render(&[("script", script)])
    }

    #[test]
    fn render_substitutes_placeholders_once() {
        let template = CommandTemplate::new("g++", &["-o", "{binary}", "{source}"]);
        let line = template.render(&[
            ("source", "/tmp/x/main.cpp"),
            ("binary", "/tmp/x/main"),
        ]);
        assert_eq!(line.program, "g++");
        assert_eq!(line.args, vec!["-o", "/tmp/x/main", "/tmp/x/main.cpp"]);

        let line = CommandTemplate::new("node", &["-e", "{code}"])
            .render(&[("code", "console.log('{code}')")]);
        assert_eq!(line.args[1], "console.log('{code}')");
    }

    #[test]
    fn render_keeps_unknown_braces() {
        let line = CommandTemplate::new("echo", &["{unknown} {"]).render(&[("code", "x")]);
        assert_eq!(line.args, vec!["{unknown} {"]);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut text = "héllo".to_owned();
        truncate_utf8(&mut text, 2);
        assert_eq!(text, "h");
    }

    #[tokio::test]
    async fn captures_streams_separately() {
        let outcome = run_captured(
            &sh("echo out; echo err >&2"),
            "",
            Duration::from_secs(5),
            1024,
        )
        .await
        .unwrap();
        let ProcessOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert!(output.success);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn feeds_input_to_stdin() {
        let outcome = run_captured(
            &sh("read line; echo \"$line\""),
            "5\n",
            Duration::from_secs(5),
            1024,
        )
        .await
        .unwrap();
        let ProcessOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(output.stdout, "5\n");
    }

    #[tokio::test]
    async fn reports_non_zero_exit() {
        let outcome = run_captured(&sh("exit 3"), "", Duration::from_secs(5), 1024)
            .await
            .unwrap();
        let ProcessOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert!(!output.success);
        assert_eq!(output.code, Some(3));
    }

    #[tokio::test]
    async fn kills_on_timeout() {
        let started = std::time::Instant::now();
        let outcome = run_captured(&sh("sleep 30"), "", Duration::from_millis(200), 1024)
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn caps_captured_output() {
        let outcome = run_captured(
            &sh("i=0; while [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done"),
            "",
            Duration::from_secs(5),
            16,
        )
        .await
        .unwrap();
        let ProcessOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert!(output.success);
        assert_eq!(output.stdout.len(), 16);
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        // Reaped and zombie processes both count as gone.
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| !stat.contains(") Z "))
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    async fn wait_until_gone(pid: &str) -> bool {
        for _ in 0..50 {
            if !is_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn background_child_keeps_output() {
        let started = std::time::Instant::now();
        let outcome = run_captured(
            &sh("sleep 5 & echo $!; echo hi"),
            "",
            Duration::from_secs(5),
            1024,
        )
        .await
        .unwrap();
        let ProcessOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert!(output.success);
        assert!(output.stdout.ends_with("\nhi\n"), "{:?}", output.stdout);
        assert!(started.elapsed() < Duration::from_secs(4));

        #[cfg(target_os = "linux")]
        {
            let pid = output.stdout.lines().next().unwrap();
            assert!(wait_until_gone(pid).await, "background sleep {pid} survived");
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_the_whole_group() {
        let marker = tempfile::NamedTempFile::new().unwrap();
        let script = format!("sleep 30 & echo $! > {}; wait", marker.path().display());
        let outcome = run_captured(&sh(&script), "", Duration::from_millis(300), 1024)
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::TimedOut);
        let pid = std::fs::read_to_string(marker.path()).unwrap();
        assert!(wait_until_gone(pid.trim()).await, "grandchild survived the timeout");
    }

    #[tokio::test]
    async fn cap_never_splits_a_character() {
        // "a" followed by the two bytes of "é"; a 2-byte cap lands inside it.
        let outcome = run_captured(&sh("printf 'a\\303\\251'"), "", Duration::from_secs(5), 2)
            .await
            .unwrap();
        let ProcessOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(output.stdout, "a");
    }

    #[test]
    fn decode_capped_keeps_complete_characters() {
        assert_eq!(decode_capped("héllo".as_bytes().to_vec(), 64), "héllo");
        assert_eq!(decode_capped(vec![b'h', 0xC3], 2), "h");
        assert_eq!(decode_capped(vec![0xE2, 0x82], 2), "");
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let line = CommandTemplate::new("definitely-not-a-real-binary", &[]).render(&[]);
        let err = run_captured(&line, "", Duration::from_secs(1), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }
}
