//! Engine entry point: validate, look up, prepare, run, classify, tear down

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::core::languages::TemplateContext;
use crate::core::{
    EngineConfig, ExecutionResult, Job, LanguageProfile, LanguageRegistry, StderrPolicy,
};

use super::classifier::{classify, RunReport};
use super::isolation;
use super::process::{CommandSpec, ProbeOutcome, ProcessRunner};
use super::workspace::{Workspace, WorkspaceError, WorkspaceManager};

/// Drives one job from request to classified result. Safe to share across tasks.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<LanguageRegistry>,
    workspaces: WorkspaceManager,
    runner: ProcessRunner,
    deadline_ms: u64,
    probe_timeout_ms: u64,
    stderr_policy: StderrPolicy,
}

impl Dispatcher {
    pub fn new(registry: Arc<LanguageRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            workspaces: WorkspaceManager::new(&config.output_root),
            runner: ProcessRunner::new(isolation::from_config(config), config.max_captured_bytes),
            deadline_ms: config.deadline_ms,
            probe_timeout_ms: config.probe_timeout_ms,
            stderr_policy: config.stderr_policy,
        }
    }

    /// Name of the isolation strategy wrapping execution phases
    pub fn isolation(&self) -> &'static str {
        self.runner.isolation().name()
    }

    /// Execute a job. Always returns exactly one result; the job's workspace
    /// never outlives this call.
    pub async fn run(&self, job: &Job) -> ExecutionResult {
        if job.source_code.is_empty() {
            return ExecutionResult::InvalidInput {
                reason: "Empty code body".to_string(),
            };
        }
        if job.language.trim().is_empty() {
            return ExecutionResult::InvalidInput {
                reason: "Missing language".to_string(),
            };
        }

        let profile = match self.registry.lookup(&job.language) {
            Ok(profile) => profile,
            Err(e) => {
                debug!("Job {}: {}", job.id, e);
                return ExecutionResult::UnsupportedLanguage {
                    language: job.language.clone(),
                };
            }
        };

        let workspace = match self.prepare(job, &profile).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!("Job {}: {}", job.id, e);
                return ExecutionResult::WorkspaceIoError {
                    reason: e.to_string(),
                };
            }
        };

        let result = self.execute(job, &profile, &workspace).await;
        workspace.destroy().await;

        info!(
            "Job {} finished: language={}, result={}",
            job.id,
            profile.id,
            result.category()
        );
        result
    }

    /// Create the workspace and write the source (and stdin, when accepted)
    async fn prepare(
        &self,
        job: &Job,
        profile: &LanguageProfile,
    ) -> Result<Workspace, WorkspaceError> {
        let mut workspace = self.workspaces.create(&job.id).await?;

        let written = async {
            workspace.write_source(profile, &job.source_code).await?;
            match job.stdin.as_deref() {
                Some(input) if profile.accepts_stdin && !input.is_empty() => {
                    workspace.write_stdin(input).await?;
                }
                _ => {}
            }
            Ok::<_, WorkspaceError>(())
        }
        .await;

        match written {
            Ok(()) => Ok(workspace),
            Err(e) => {
                workspace.destroy().await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job: &Job,
        profile: &LanguageProfile,
        workspace: &Workspace,
    ) -> ExecutionResult {
        let source = workspace.source_path(profile);
        let artifact = workspace.artifact_path(profile);
        let ctx = TemplateContext {
            workspace: workspace.path(),
            source: &source,
            artifact: artifact.as_deref(),
        };
        let to_spec =
            |argv: Vec<String>| CommandSpec::from_vec(&argv).with_work_dir(workspace.path());

        let probe = to_spec(profile.probe.resolve(&ctx));
        let probe_outcome = self
            .runner
            .probe(&probe, Duration::from_millis(self.probe_timeout_ms))
            .await;
        if let ProbeOutcome::Missing(reason) = probe_outcome {
            warn!(
                "Job {}: toolchain for {} unavailable ({}: {})",
                job.id,
                profile.id,
                profile.probe.program(),
                reason
            );
            return classify(
                &profile.id,
                RunReport::ProbeFailed,
                self.deadline_ms,
                self.stderr_policy,
            );
        }

        let phases: Vec<CommandSpec> = profile
            .phases
            .iter()
            .map(|phase| to_spec(phase.command.resolve(&ctx)))
            .collect();

        let outcome = self
            .runner
            .execute(
                &phases,
                workspace.stdin_path(),
                Duration::from_millis(self.deadline_ms),
            )
            .await;
        debug!(
            "Job {}: {:?} after {} phase(s) in {:?}",
            job.id, outcome.status, outcome.phases_run, outcome.elapsed
        );

        classify(
            &profile.id,
            RunReport::Executed(outcome),
            self.deadline_ms,
            self.stderr_policy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(root: &std::path::Path) -> Dispatcher {
        let registry = Arc::new(LanguageRegistry::builtin().unwrap());
        Dispatcher::new(registry, &EngineConfig::default().with_output_root(root))
    }

    #[tokio::test]
    async fn test_empty_code_is_rejected_without_workspace() {
        let root = tempfile::tempdir().unwrap();
        let result = dispatcher(root.path()).run(&Job::new("python", "")).await;

        assert_eq!(
            result,
            ExecutionResult::InvalidInput {
                reason: "Empty code body".into()
            }
        );
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_language_touches_nothing() {
        let root = tempfile::tempdir().unwrap();
        let output_root = root.path().join("jobs");
        let result = dispatcher(&output_root)
            .run(&Job::new("brainfuck", "+[]"))
            .await;

        assert_eq!(
            result,
            ExecutionResult::UnsupportedLanguage {
                language: "brainfuck".into()
            }
        );
        assert!(!output_root.exists());
    }

    #[tokio::test]
    async fn test_unwritable_root_is_a_workspace_error() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        let result = dispatcher(&blocker)
            .run(&Job::new("bash", "echo hi"))
            .await;
        assert!(matches!(result, ExecutionResult::WorkspaceIoError { .. }));
    }
}
