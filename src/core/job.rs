use std::fmt;

use serde::{Deserialize, Serialize};

/// Collision-resistant job identifier, safe to use as a directory name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One request to execute a language/source/stdin combination
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub language: String,
    pub source_code: String,
    pub stdin: Option<String>,
}

impl Job {
    pub fn new(language: impl Into<String>, source_code: impl Into<String>) -> Self {
        Self {
            id: JobId::generate(),
            language: language.into(),
            source_code: source_code.into(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}
