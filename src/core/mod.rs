//! Core data model: configuration, jobs, results and the language registry

pub mod config;
pub mod job;
pub mod languages;
pub mod verdict;

pub use config::{EngineConfig, IsolationKind, RlimitSettings, StderrPolicy};
pub use job::{Job, JobId};
pub use languages::{LanguageProfile, LanguageRegistry, UnsupportedLanguage};
pub use verdict::{EngineResponse, ErrorCategory, ExecutionResult};
