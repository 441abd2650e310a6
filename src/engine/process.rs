//! Process runner - availability probes and phase execution
//!
//! Every probe and phase is spawned as the leader of a fresh process group.
//! Timeouts and phase completion signal the whole group, so a compiler's
//! children, an interpreter's subprocesses, or a compiled binary started by a
//! wrapper never outlive the job.
//!
//! The runner does NOT:
//! - Know about languages or workspaces
//! - Decide what an outcome means (see `classifier`)

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use super::isolation::IsolationStrategy;

/// How long in-flight streams are drained after a kill before being dropped
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Command specification for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Working directory
    pub work_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        Self {
            program,
            args: iter.cloned().collect(),
            work_dir: None,
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true).process_group(0);
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Result of a toolchain availability probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Available,
    /// Spawn failure, non-zero exit or timeout, with a description
    Missing(String),
}

impl ProbeOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, ProbeOutcome::Available)
    }
}

/// Execution status (raw, no interpretation)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Last phase run exited normally with given exit code
    Exited(i32),
    /// Last phase run was killed by a signal
    Signaled(i32),
    /// The deadline expired and the running phase's process group was killed
    TimedOut,
    /// A phase could not be started
    SpawnFailed(String),
}

/// Outcome of running a job's phases
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// Stdout of all phases run, in order
    pub stdout: String,
    /// Stderr of all phases run, in order
    pub stderr: String,
    /// Stdout hit the capture cap
    pub stdout_truncated: bool,
    /// Stderr hit the capture cap
    pub stderr_truncated: bool,
    /// Number of phases that were started
    pub phases_run: usize,
    pub elapsed: Duration,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Exited(0))
    }
}

/// Bytes read from one stream of one phase
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Accumulates one stream across phases, up to a fixed cap
#[derive(Debug)]
struct StreamCapture {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl StreamCapture {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.bytes.len())
    }

    fn append(&mut self, captured: Captured) {
        self.bytes.extend_from_slice(&captured.bytes);
        self.truncated |= captured.truncated;
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes and discarding the rest
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> io::Result<Captured> {
    let mut captured = Captured::default();
    let Some(mut reader) = reader else {
        return Ok(captured);
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let take = limit.saturating_sub(captured.bytes.len()).min(n);
        captured.bytes.extend_from_slice(&chunk[..take]);
        if take < n {
            captured.truncated = true;
        }
    }
    Ok(captured)
}

/// A spawned process group; SIGKILLed when dropped
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn of(child: &tokio::process::Child) -> Self {
        // The child is its own group leader, so its pid is the pgid.
        Self {
            pgid: child.id().map(|id| Pid::from_raw(id as i32)),
        }
    }

    fn kill(&self) {
        let Some(pgid) = self.pgid else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn status_of(status: ExitStatus) -> ExecutionStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => ExecutionStatus::Exited(code),
        (None, Some(sig)) => ExecutionStatus::Signaled(sig),
        (None, None) => ExecutionStatus::Exited(-1),
    }
}

/// Wait for a reader task; an error or panic yields an empty capture
async fn join_reader(task: &mut JoinHandle<io::Result<Captured>>) -> Captured {
    match task.await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!("Failed to read process output: {}", e);
            Captured::default()
        }
        Err(e) => {
            warn!("Output reader task failed: {}", e);
            Captured::default()
        }
    }
}

/// Give killed streams a moment to reach EOF, then drop whatever is left
async fn discard_reader(mut task: JoinHandle<io::Result<Captured>>) {
    if timeout(DRAIN_GRACE, &mut task).await.is_err() {
        task.abort();
    }
}

/// Runs probes and execution phases
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    isolation: Arc<dyn IsolationStrategy>,
    max_captured_bytes: usize,
}

impl ProcessRunner {
    pub fn new(isolation: Arc<dyn IsolationStrategy>, max_captured_bytes: usize) -> Self {
        Self {
            isolation,
            max_captured_bytes,
        }
    }

    pub fn isolation(&self) -> &dyn IsolationStrategy {
        self.isolation.as_ref()
    }

    /// Check that a toolchain is installed: the probe must exit zero within `limit`
    pub async fn probe(&self, spec: &CommandSpec, limit: Duration) -> ProbeOutcome {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ProbeOutcome::Missing(format!("{}: {}", spec.program, e)),
        };
        let group = ProcessGroup::of(&child);

        match timeout(limit, child.wait()).await {
            Ok(Ok(status)) if status.success() => ProbeOutcome::Available,
            Ok(Ok(status)) => {
                ProbeOutcome::Missing(format!("{} exited with {}", spec.program, status))
            }
            Ok(Err(e)) => ProbeOutcome::Missing(format!("{}: {}", spec.program, e)),
            Err(_) => {
                group.kill();
                let _ = child.wait().await;
                ProbeOutcome::Missing(format!(
                    "{} did not answer within {}ms",
                    spec.program,
                    limit.as_millis()
                ))
            }
        }
    }

    /// Run `phases` in order under one shared wall-clock `deadline`.
    ///
    /// The pipeline stops at the first phase that does not exit zero. `stdin`
    /// is attached to the last phase only; earlier phases read from null.
    pub async fn execute(
        &self,
        phases: &[CommandSpec],
        stdin: Option<&Path>,
        deadline: Duration,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let deadline_at = started + deadline;
        let mut stdout = StreamCapture::new(self.max_captured_bytes);
        let mut stderr = StreamCapture::new(self.max_captured_bytes);
        let mut status = ExecutionStatus::Exited(0);
        let mut phases_run = 0;

        for (idx, spec) in phases.iter().enumerate() {
            let is_last = idx + 1 == phases.len();
            phases_run += 1;
            status = self
                .run_phase(
                    spec,
                    if is_last { stdin } else { None },
                    deadline_at,
                    &mut stdout,
                    &mut stderr,
                )
                .await;
            if status != ExecutionStatus::Exited(0) {
                break;
            }
        }

        ExecutionOutcome {
            status,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            phases_run,
            elapsed: started.elapsed(),
        }
    }

    async fn run_phase(
        &self,
        spec: &CommandSpec,
        stdin: Option<&Path>,
        deadline_at: Instant,
        stdout: &mut StreamCapture,
        stderr: &mut StreamCapture,
    ) -> ExecutionStatus {
        let mut cmd = spec.to_command();
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        match stdin {
            Some(path) => match std::fs::File::open(path) {
                Ok(file) => {
                    cmd.stdin(Stdio::from(file));
                }
                Err(e) => {
                    return ExecutionStatus::SpawnFailed(format!(
                        "failed to open stdin file: {}",
                        e
                    ))
                }
            },
            None => {
                cmd.stdin(Stdio::null());
            }
        }
        self.isolation.apply(&mut cmd);

        debug!("Running phase {} {:?}", spec.program, spec.args);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionStatus::SpawnFailed(format!(
                    "failed to start {}: {}",
                    spec.program, e
                ))
            }
        };
        let group = ProcessGroup::of(&child);

        let mut out_task = tokio::spawn(read_capped(child.stdout.take(), stdout.remaining()));
        let mut err_task = tokio::spawn(read_capped(child.stderr.take(), stderr.remaining()));

        let status = match timeout_at(deadline_at, child.wait()).await {
            Ok(Ok(status)) => status_of(status),
            Ok(Err(e)) => ExecutionStatus::SpawnFailed(format!(
                "failed to wait for {}: {}",
                spec.program, e
            )),
            Err(_) => ExecutionStatus::TimedOut,
        };

        // Background descendants must not outlive the phase, whatever happened.
        group.kill();

        if status == ExecutionStatus::TimedOut {
            warn!(
                "Deadline expired; killed process group of {} ({:?})",
                spec.program, group.pgid
            );
            let _ = child.wait().await;
            discard_reader(out_task).await;
            discard_reader(err_task).await;
            return status;
        }

        // Streams still open past the deadline belong to processes that escaped
        // the group; treat that as a timeout.
        let joined = timeout_at(deadline_at, async {
            (join_reader(&mut out_task).await, join_reader(&mut err_task).await)
        })
        .await;
        let (out, err) = match joined {
            Ok(pair) => pair,
            Err(_) => {
                out_task.abort();
                err_task.abort();
                return ExecutionStatus::TimedOut;
            }
        };
        stdout.append(out);
        stderr.append(err);

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::isolation::NoIsolation;

    fn runner(cap: usize) -> ProcessRunner {
        ProcessRunner::new(Arc::new(NoIsolation), cap)
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").with_args(["-c", script])
    }

    #[test]
    fn test_from_vec() {
        let spec = CommandSpec::from_vec(&["g++".into(), "a.cpp".into(), "-o".into(), "a".into()]);
        assert_eq!(spec.program, "g++");
        assert_eq!(spec.args, vec!["a.cpp", "-o", "a"]);
        assert_eq!(CommandSpec::from_vec(&[]).program, "");
    }

    #[tokio::test]
    async fn test_probe_outcomes() {
        let runner = runner(1024);
        let limit = Duration::from_secs(5);

        assert!(runner.probe(&sh("exit 0"), limit).await.is_available());
        assert!(!runner.probe(&sh("exit 1"), limit).await.is_available());
        assert!(!runner
            .probe(&CommandSpec::new("no-such-toolchain-for-runner-tests"), limit)
            .await
            .is_available());
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let outcome = runner(1024)
            .probe(&sh("sleep 30"), Duration::from_millis(200))
            .await;
        assert!(matches!(outcome, ProbeOutcome::Missing(msg) if msg.contains("did not answer")));
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let outcome = runner(1024)
            .execute(&[sh("echo out; echo err >&2")], None, Duration::from_secs(5))
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Exited(0));
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert!(!outcome.stdout_truncated);
        assert!(!outcome.stderr_truncated);
    }

    #[tokio::test]
    async fn test_pipeline_stops_at_first_failure() {
        let phases = [sh("echo compiling; exit 3"), sh("echo never")];
        let outcome = runner(1024)
            .execute(&phases, None, Duration::from_secs(5))
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Exited(3));
        assert_eq!(outcome.phases_run, 1);
        assert_eq!(outcome.stdout, "compiling\n");
    }

    #[tokio::test]
    async fn test_output_accumulates_across_phases() {
        let phases = [sh("echo one"), sh("echo two")];
        let outcome = runner(1024)
            .execute(&phases, None, Duration::from_secs(5))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.phases_run, 2);
        assert_eq!(outcome.stdout, "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_signal_is_reported() {
        let outcome = runner(1024)
            .execute(&[sh("kill -9 $$")], None, Duration::from_secs(5))
            .await;
        assert_eq!(outcome.status, ExecutionStatus::Signaled(9));
    }

    #[tokio::test]
    async fn test_truncates_at_cap() {
        let outcome = runner(100)
            .execute(
                &[sh("i=0; while [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done")],
                None,
                Duration::from_secs(5),
            )
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.stdout.len(), 100);
        assert!(outcome.stdout_truncated);
        assert!(!outcome.stderr_truncated);
    }

    #[tokio::test]
    async fn test_truncation_is_tracked_per_stream() {
        let outcome = runner(100)
            .execute(
                &[sh("echo hi; i=0; while [ $i -lt 100 ]; do echo 0123456789 >&2; i=$((i+1)); done")],
                None,
                Duration::from_secs(5),
            )
            .await;

        assert_eq!(outcome.stdout, "hi\n");
        assert!(!outcome.stdout_truncated);
        assert_eq!(outcome.stderr.len(), 100);
        assert!(outcome.stderr_truncated);
    }

    #[tokio::test]
    async fn test_timeout_kills_group() {
        let started = std::time::Instant::now();
        let outcome = runner(1024)
            .execute(
                &[sh("sleep 30 & sleep 30; echo late")],
                None,
                Duration::from_millis(300),
            )
            .await;

        assert_eq!(outcome.status, ExecutionStatus::TimedOut);
        assert!(outcome.stdout.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stdin_goes_to_last_phase() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "hello\n").unwrap();

        let phases = [sh("cat; echo first"), sh("cat")];
        let outcome = runner(1024)
            .execute(&phases, Some(&input), Duration::from_secs(5))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.stdout, "first\nhello\n");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let outcome = runner(1024)
            .execute(
                &[CommandSpec::new("/nonexistent/compiled/binary")],
                None,
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(outcome.status, ExecutionStatus::SpawnFailed(_)));
    }
}
