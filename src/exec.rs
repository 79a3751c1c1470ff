//! Process execution with output capture, timing and timeouts.
//!
//! This is the only place the runner spawns processes. A run never fails
//! as a Rust error: non-zero exits, timeouts and spawn failures all come back
//! as an [`ExecutionResult`] with a return code.

use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Return code recorded when a command exceeds its timeout
pub const TIMEOUT_RC: i32 = 124;

/// Return code recorded when a command could not be started at all
pub const UNRUNNABLE_RC: i32 = 127;

/// How long to keep reading output after the child is gone. Orphaned
/// grandchildren can hold the pipes open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A command as either a ready argument vector or a single line.
///
/// Lines are split with POSIX shell-word rules; no shell is ever involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    Argv(Vec<String>),
    Line(String),
}

impl CommandLine {
    /// Resolve to an argument vector. `None` if the line has unbalanced quoting.
    pub fn to_argv(&self) -> Option<Vec<String>> {
        match self {
            CommandLine::Argv(argv) => Some(argv.clone()),
            CommandLine::Line(line) => shlex::split(line),
        }
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(argv: Vec<String>) -> Self {
        CommandLine::Argv(argv)
    }
}

impl From<&[String]> for CommandLine {
    fn from(argv: &[String]) -> Self {
        CommandLine::Argv(argv.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(argv: [&str; N]) -> Self {
        CommandLine::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&str> for CommandLine {
    fn from(line: &str) -> Self {
        CommandLine::Line(line.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(line: String) -> Self {
        CommandLine::Line(line)
    }
}

/// Options for a single invocation
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Variables layered on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Working directory (inherited when unset)
    pub cwd: Option<PathBuf>,
    /// Wall-clock limit; unlimited when unset
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout_secs(self, secs: u64) -> Self {
        self.with_timeout(Duration::from_secs(secs))
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Outcome of one process invocation
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Resolved argument vector
    pub argv: Vec<String>,
    /// Shell-quoted rendering of `argv`, for logs
    pub display: String,
    /// Exit code; 124 on timeout, 127 if the command never started,
    /// 128+N when killed by signal N
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.rc == 0
    }

    /// stdout and stderr joined by a newline
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Result for a command the caller could not even prepare
    pub fn not_started(argv: Vec<String>, reason: impl Into<String>) -> Self {
        let display = display_command(&argv);
        Self {
            argv,
            display,
            rc: UNRUNNABLE_RC,
            stdout: String::new(),
            stderr: reason.into(),
            elapsed_ms: 0,
            timed_out: false,
        }
    }

    fn unrunnable(argv: Vec<String>, reason: String, start: Instant) -> Self {
        Self {
            elapsed_ms: elapsed_ms(start),
            ..Self::not_started(argv, reason)
        }
    }
}

/// Shell-quote each argument and join them
pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            shlex::try_quote(arg)
                .map(|q| q.into_owned())
                .unwrap_or_else(|_| arg.clone())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a command to completion and capture everything it printed
pub async fn run(command: impl Into<CommandLine>, opts: &ExecOptions) -> ExecutionResult {
    let start = Instant::now();
    let command = command.into();

    let argv = match command.to_argv() {
        Some(argv) if !argv.is_empty() => argv,
        Some(_) => {
            return ExecutionResult::unrunnable(Vec::new(), "empty command".to_string(), start)
        }
        None => {
            let line = match command {
                CommandLine::Line(line) => line,
                CommandLine::Argv(argv) => argv.join(" "),
            };
            return ExecutionResult::unrunnable(
                vec![line.clone()],
                format!("cannot tokenize command line (unbalanced quoting): {}", line),
                start,
            );
        }
    };

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &opts.env {
        cmd.env(key, value);
    }
    // Own process group, so a timeout can take down everything the child spawned
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let reason = format!("failed to spawn '{}': {}", argv[0], e);
            tracing::debug!(command = %display_command(&argv), error = %e, "spawn failed");
            return ExecutionResult::unrunnable(argv, reason, start);
        }
    };

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, stdout_buf.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, stderr_buf.clone())));
    }

    let (rc, timed_out) = match opts.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (exit_code(status), false),
            Err(_) => {
                tracing::warn!(
                    command = %display_command(&argv),
                    timeout_secs = limit.as_secs_f64(),
                    "command timed out; terminating"
                );
                terminate(&mut child).await;
                (TIMEOUT_RC, true)
            }
        },
        None => (exit_code(child.wait().await), false),
    };

    drain(pumps).await;

    let display = display_command(&argv);
    ExecutionResult {
        argv,
        display,
        rc,
        stdout: take_output(&stdout_buf),
        stderr: take_output(&stderr_buf),
        elapsed_ms: elapsed_ms(start),
        timed_out,
    }
}

/// Copy a stream into a shared buffer until EOF, so partial output
/// survives a timeout
async fn pump<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
}

async fn drain(pumps: Vec<JoinHandle<()>>) {
    for handle in pumps {
        let abort = handle.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, handle).await.is_err() {
            abort.abort();
        }
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: the child leads its own process group (process_group(0) above)
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill().await;
}

fn exit_code(status: io::Result<ExitStatus>) -> i32 {
    let status = match status {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(error = %e, "failed to wait for child");
            return -1;
        }
    };

    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

fn take_output(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    let bytes = buf.lock().map(|b| b.clone()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_split_without_a_shell() {
        let line = CommandLine::from("echo 'a b' \"c d\" e;rm");
        assert_eq!(
            line.to_argv().unwrap(),
            vec!["echo", "a b", "c d", "e;rm"]
        );
        assert!(CommandLine::from("echo 'unterminated").to_argv().is_none());
    }

    #[test]
    fn test_display_quotes_arguments() {
        let argv = vec!["echo".to_string(), "a b".to_string(), "plain".to_string()];
        assert_eq!(display_command(&argv), "echo 'a b' plain");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let result = run(["echo", "hello"], &ExecOptions::default()).await;
        assert!(result.success());
        assert_eq!(result.rc, 0);
        assert!(result.stdout.contains("hello"));
        assert_eq!(result.display, "echo hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let result = run("bash -c 'echo oops >&2; exit 3'", &ExecOptions::default()).await;
        assert_eq!(result.rc, 3);
        assert!(result.stderr.contains("oops"));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_shell_metacharacters_are_literal() {
        let result = run("echo $HOME && false", &ExecOptions::default()).await;
        assert_eq!(result.rc, 0);
        assert!(result.stdout.contains("$HOME && false"));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let opts = ExecOptions::default().with_timeout(Duration::from_millis(500));
        let result = run(["bash", "-c", "echo started; sleep 30"], &opts).await;
        assert_eq!(result.rc, TIMEOUT_RC);
        assert!(result.timed_out);
        assert!(result.stdout.contains("started"));
        assert!(result.elapsed_ms < 10_000);
    }

    #[tokio::test]
    async fn test_missing_program_is_unrunnable() {
        let result = run(["definitely-not-a-real-binary-xyz"], &ExecOptions::default()).await;
        assert_eq!(result.rc, UNRUNNABLE_RC);
        assert!(result.stderr.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_empty_command_is_unrunnable() {
        let result = run(Vec::<String>::new(), &ExecOptions::default()).await;
        assert_eq!(result.rc, UNRUNNABLE_RC);
    }

    #[tokio::test]
    async fn test_cwd_and_env_are_applied() {
        let tmp = tempfile::tempdir().unwrap();
        let opts = ExecOptions::default()
            .in_dir(tmp.path())
            .with_env("RUNNER_PROBE", "42");
        let result = run(["bash", "-c", "pwd; echo $RUNNER_PROBE"], &opts).await;
        assert_eq!(result.rc, 0);
        let canonical = tmp.path().canonicalize().unwrap();
        assert!(result.stdout.contains(canonical.to_str().unwrap()));
        assert!(result.stdout.contains("42"));
    }

    #[tokio::test]
    async fn test_signal_maps_to_128_plus() {
        let result = run(["bash", "-c", "kill -TERM $$"], &ExecOptions::default()).await;
        assert_eq!(result.rc, 128 + 15);
    }
}
