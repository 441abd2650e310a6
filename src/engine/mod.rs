//! Execution engine
//!
//! - `workspace`: per-job ephemeral directories
//! - `process`: availability probes and deadline-bounded phase execution
//! - `isolation`: pluggable restrictions applied to execution phases
//! - `classifier`: raw outcome -> `ExecutionResult`
//! - `dispatcher`: the entry point tying the above together

pub mod classifier;
pub mod dispatcher;
pub mod isolation;
pub mod process;
pub mod workspace;

pub use dispatcher::Dispatcher;
pub use isolation::{IsolationStrategy, NoIsolation, ResourceLimits};
pub use process::{CommandSpec, ExecutionOutcome, ExecutionStatus, ProbeOutcome, ProcessRunner};
pub use workspace::{Workspace, WorkspaceError, WorkspaceManager};
