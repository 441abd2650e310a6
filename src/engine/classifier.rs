//! Maps raw runner outcomes onto [`ExecutionResult`]
//!
//! Decision order:
//! 1. probe failed              -> ToolchainMissing
//! 2. killed by the deadline    -> TimedOut
//! 3. non-zero exit / signal    -> ExecutionError
//! 4. zero exit, stderr present -> ExecutionError (strict policy only)
//! 5. otherwise                 -> Success

use crate::core::{ExecutionResult, StderrPolicy};

use super::process::{ExecutionOutcome, ExecutionStatus};

/// Marker appended to a stream that hit the capture cap
pub const TRUNCATION_MARKER: &str = "\n[output truncated]\n";

/// What the runner reported for one job
#[derive(Debug)]
pub enum RunReport {
    ProbeFailed,
    Executed(ExecutionOutcome),
}

fn mark_truncated(mut text: String, truncated: bool) -> String {
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

pub fn classify(
    language: &str,
    report: RunReport,
    limit_ms: u64,
    policy: StderrPolicy,
) -> ExecutionResult {
    let outcome = match report {
        RunReport::ProbeFailed => {
            return ExecutionResult::ToolchainMissing {
                language: language.to_string(),
            }
        }
        RunReport::Executed(outcome) => outcome,
    };

    let stdout = mark_truncated(outcome.stdout, outcome.stdout_truncated);
    let stderr = mark_truncated(outcome.stderr, outcome.stderr_truncated);

    match outcome.status {
        ExecutionStatus::TimedOut => ExecutionResult::TimedOut { limit_ms },
        ExecutionStatus::SpawnFailed(reason) => ExecutionResult::ExecutionError {
            stdout,
            stderr: if stderr.is_empty() {
                reason
            } else {
                format!("{}{}", stderr, reason)
            },
        },
        ExecutionStatus::Exited(0) => {
            if stderr.is_empty() || policy == StderrPolicy::ExitCodeOnly {
                ExecutionResult::Success { stdout }
            } else {
                ExecutionResult::ExecutionError { stdout, stderr }
            }
        }
        ExecutionStatus::Exited(_) | ExecutionStatus::Signaled(_) => {
            ExecutionResult::ExecutionError { stdout, stderr }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome(status: ExecutionStatus, stdout: &str, stderr: &str) -> RunReport {
        RunReport::Executed(ExecutionOutcome {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            stdout_truncated: false,
            stderr_truncated: false,
            phases_run: 1,
            elapsed: Duration::from_millis(5),
        })
    }

    #[test]
    fn test_probe_failure_wins() {
        let result = classify("cpp", RunReport::ProbeFailed, 10_000, StderrPolicy::Strict);
        assert_eq!(
            result,
            ExecutionResult::ToolchainMissing {
                language: "cpp".into()
            }
        );
    }

    #[test]
    fn test_timeout() {
        let result = classify(
            "cpp",
            outcome(ExecutionStatus::TimedOut, "partial", ""),
            10_000,
            StderrPolicy::Strict,
        );
        assert_eq!(result, ExecutionResult::TimedOut { limit_ms: 10_000 });
    }

    #[test]
    fn test_non_zero_exit_keeps_partial_stdout() {
        let result = classify(
            "python",
            outcome(ExecutionStatus::Exited(1), "before\n", "Traceback\n"),
            10_000,
            StderrPolicy::ExitCodeOnly,
        );
        assert_eq!(
            result,
            ExecutionResult::ExecutionError {
                stdout: "before\n".into(),
                stderr: "Traceback\n".into(),
            }
        );
    }

    #[test]
    fn test_signal_is_an_error() {
        let result = classify(
            "c",
            outcome(ExecutionStatus::Signaled(11), "", ""),
            10_000,
            StderrPolicy::Strict,
        );
        assert!(matches!(result, ExecutionResult::ExecutionError { .. }));
    }

    #[test]
    fn test_stderr_policy() {
        let strict = classify(
            "cpp",
            outcome(ExecutionStatus::Exited(0), "ok\n", "warning: unused\n"),
            10_000,
            StderrPolicy::Strict,
        );
        assert!(matches!(strict, ExecutionResult::ExecutionError { .. }));

        let lenient = classify(
            "cpp",
            outcome(ExecutionStatus::Exited(0), "ok\n", "warning: unused\n"),
            10_000,
            StderrPolicy::ExitCodeOnly,
        );
        assert_eq!(
            lenient,
            ExecutionResult::Success {
                stdout: "ok\n".into()
            }
        );
    }

    #[test]
    fn test_success() {
        let result = classify(
            "python",
            outcome(ExecutionStatus::Exited(0), "hi\n", ""),
            10_000,
            StderrPolicy::Strict,
        );
        assert_eq!(
            result,
            ExecutionResult::Success {
                stdout: "hi\n".into()
            }
        );
    }

    #[test]
    fn test_spawn_failure_reason_lands_in_stderr() {
        let result = classify(
            "c",
            outcome(
                ExecutionStatus::SpawnFailed("failed to start ./solution".into()),
                "",
                "",
            ),
            10_000,
            StderrPolicy::Strict,
        );
        assert_eq!(
            result,
            ExecutionResult::ExecutionError {
                stdout: String::new(),
                stderr: "failed to start ./solution".into(),
            }
        );
    }

    #[test]
    fn test_truncation_marker() {
        let report = RunReport::Executed(ExecutionOutcome {
            status: ExecutionStatus::Exited(0),
            stdout: "aaaa".into(),
            stderr: String::new(),
            stdout_truncated: true,
            stderr_truncated: false,
            phases_run: 1,
            elapsed: Duration::from_millis(1),
        });
        match classify("bash", report, 10_000, StderrPolicy::Strict) {
            ExecutionResult::Success { stdout } => {
                assert!(stdout.starts_with("aaaa"));
                assert!(stdout.ends_with(TRUNCATION_MARKER));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_marker_follows_the_truncated_stream() {
        let report = || {
            RunReport::Executed(ExecutionOutcome {
                status: ExecutionStatus::Exited(0),
                stdout: "hi\n".into(),
                stderr: "warning-line\nwarn".into(),
                stdout_truncated: false,
                stderr_truncated: true,
                phases_run: 1,
                elapsed: Duration::from_millis(1),
            })
        };

        assert_eq!(
            classify("bash", report(), 10_000, StderrPolicy::ExitCodeOnly),
            ExecutionResult::Success {
                stdout: "hi\n".into()
            }
        );
        assert_eq!(
            classify("bash", report(), 10_000, StderrPolicy::Strict),
            ExecutionResult::ExecutionError {
                stdout: "hi\n".into(),
                stderr: format!("warning-line\nwarn{}", TRUNCATION_MARKER),
            }
        );
    }
}
