use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal outcome of one job; exactly one is produced per job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Exited zero (and, under the strict policy, wrote nothing to stderr)
    Success { stdout: String },
    /// Compile or runtime failure
    ExecutionError { stdout: String, stderr: String },
    /// The availability probe failed; no user code was run
    ToolchainMissing { language: String },
    /// Deadline exceeded; the process tree was killed
    TimedOut { limit_ms: u64 },
    /// No registry entry for the requested language
    UnsupportedLanguage { language: String },
    /// Rejected before any resource was touched
    InvalidInput { reason: String },
    /// The workspace could not be created or written
    WorkspaceIoError { reason: String },
}

/// Category tag the API layer maps to a transport status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Success,
    ExecutionError,
    ToolchainMissing,
    TimedOut,
    UnsupportedLanguage,
    InvalidInput,
    WorkspaceIoError,
    InternalError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Success => "success",
            ErrorCategory::ExecutionError => "execution_error",
            ErrorCategory::ToolchainMissing => "toolchain_missing",
            ErrorCategory::TimedOut => "timed_out",
            ErrorCategory::UnsupportedLanguage => "unsupported_language",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::WorkspaceIoError => "workspace_io_error",
            ErrorCategory::InternalError => "internal_error",
        };
        write!(f, "{}", s)
    }
}

impl ExecutionResult {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExecutionResult::Success { .. } => ErrorCategory::Success,
            ExecutionResult::ExecutionError { .. } => ErrorCategory::ExecutionError,
            ExecutionResult::ToolchainMissing { .. } => ErrorCategory::ToolchainMissing,
            ExecutionResult::TimedOut { .. } => ErrorCategory::TimedOut,
            ExecutionResult::UnsupportedLanguage { .. } => ErrorCategory::UnsupportedLanguage,
            ExecutionResult::InvalidInput { .. } => ErrorCategory::InvalidInput,
            ExecutionResult::WorkspaceIoError { .. } => ErrorCategory::WorkspaceIoError,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    /// Text to store as history output: stdout on success, otherwise the error summary
    pub fn summary(&self) -> String {
        match self {
            ExecutionResult::Success { stdout } => stdout.clone(),
            other => match other.to_response() {
                EngineResponse::Output { output } => output,
                EngineResponse::Error { error, .. } => error,
            },
        }
    }

    /// Translate into the engine's external response shape
    pub fn to_response(&self) -> EngineResponse {
        match self {
            ExecutionResult::Success { stdout } => EngineResponse::Output {
                output: stdout.clone(),
            },
            ExecutionResult::ExecutionError { stdout, stderr } => EngineResponse::Error {
                error: "Execution failed".to_string(),
                stderr: Some(stderr.clone()),
                output: (!stdout.is_empty()).then(|| stdout.clone()),
                category: self.category(),
            },
            ExecutionResult::ToolchainMissing { language } => EngineResponse::Error {
                error: format!(
                    "Compiler not found: The '{}' environment is not set up on this server.",
                    language
                ),
                stderr: Some(format!(
                    "The '{}' toolchain is not installed. Please install the necessary tools.",
                    language
                )),
                output: None,
                category: self.category(),
            },
            ExecutionResult::TimedOut { limit_ms } => EngineResponse::Error {
                error: format!("Time limit exceeded ({})", format_limit(*limit_ms)),
                stderr: None,
                output: None,
                category: self.category(),
            },
            ExecutionResult::UnsupportedLanguage { language } => EngineResponse::Error {
                error: "Unsupported Execution".to_string(),
                stderr: Some(format!(
                    "The '{}' runtime is not yet configured for direct execution on this server.",
                    language
                )),
                output: None,
                category: self.category(),
            },
            ExecutionResult::InvalidInput { reason } => EngineResponse::Error {
                error: reason.clone(),
                stderr: None,
                output: None,
                category: self.category(),
            },
            // The reason carries host paths; it stays in the logs.
            ExecutionResult::WorkspaceIoError { .. } => EngineResponse::Error {
                error: "Internal error: could not prepare the execution workspace".to_string(),
                stderr: None,
                output: None,
                category: self.category(),
            },
        }
    }
}

fn format_limit(limit_ms: u64) -> String {
    if limit_ms % 1000 == 0 {
        format!("{}s", limit_ms / 1000)
    } else {
        format!("{}ms", limit_ms)
    }
}

/// External response: `{output}` on success, `{error, stderr?, category}` otherwise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineResponse {
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        /// Stdout produced before the failure
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        category: ErrorCategory,
    },
    Output {
        output: String,
    },
}

impl EngineResponse {
    /// Response for a fault outside the engine's classification (e.g., a crashed task)
    pub fn internal(message: impl Into<String>) -> Self {
        EngineResponse::Error {
            error: message.into(),
            stderr: None,
            output: None,
            category: ErrorCategory::InternalError,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineResponse::Output { .. } => ErrorCategory::Success,
            EngineResponse::Error { category, .. } => *category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_serializes_as_output() {
        let result = ExecutionResult::Success {
            stdout: "hi\n".into(),
        };
        let json = serde_json::to_value(result.to_response()).unwrap();
        assert_eq!(json, serde_json::json!({ "output": "hi\n" }));
    }

    #[test]
    fn test_timeout_message() {
        let result = ExecutionResult::TimedOut { limit_ms: 10_000 };
        let json = serde_json::to_value(result.to_response()).unwrap();
        assert_eq!(json["error"], "Time limit exceeded (10s)");
        assert_eq!(json["category"], "timed_out");
        assert!(json.get("stderr").is_none());

        let result = ExecutionResult::TimedOut { limit_ms: 1500 };
        assert_eq!(result.summary(), "Time limit exceeded (1500ms)");
    }

    #[test]
    fn test_execution_error_carries_streams() {
        let result = ExecutionResult::ExecutionError {
            stdout: "partial".into(),
            stderr: "boom".into(),
        };
        match result.to_response() {
            EngineResponse::Error {
                stderr,
                output,
                category,
                ..
            } => {
                assert_eq!(stderr.as_deref(), Some("boom"));
                assert_eq!(output.as_deref(), Some("partial"));
                assert_eq!(category, ErrorCategory::ExecutionError);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_workspace_error_hides_reason() {
        let result = ExecutionResult::WorkspaceIoError {
            reason: "/srv/secret/path: permission denied".into(),
        };
        let json = serde_json::to_string(&result.to_response()).unwrap();
        assert!(!json.contains("/srv/secret"));
        assert_eq!(result.category().to_string(), "workspace_io_error");
    }

    #[test]
    fn test_response_round_trip_keeps_category() {
        let response = ExecutionResult::UnsupportedLanguage {
            language: "brainfuck".into(),
        }
        .to_response();
        let json = serde_json::to_string(&response).unwrap();
        let parsed: EngineResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.category(), ErrorCategory::UnsupportedLanguage);
    }
}
