//! Isolation strategies applied to execution phases
//!
//! The process runner hands every execution-phase command to an
//! [`IsolationStrategy`] before spawning it. Stronger strategies (namespaces,
//! containers) plug in here without touching the runner.

use std::sync::Arc;

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use tokio::process::Command;

use crate::core::{EngineConfig, IsolationKind, RlimitSettings};

pub trait IsolationStrategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Adjust the command before it is spawned
    fn apply(&self, cmd: &mut Command);
}

/// Runs programs with the worker's own privileges and limits
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIsolation;

impl IsolationStrategy for NoIsolation {
    fn name(&self) -> &'static str {
        "none"
    }

    fn apply(&self, _cmd: &mut Command) {}
}

/// Caps CPU time, address space, process count and file size with `setrlimit`
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    limits: RlimitSettings,
}

impl ResourceLimits {
    pub fn new(limits: RlimitSettings) -> Self {
        Self { limits }
    }
}

impl IsolationStrategy for ResourceLimits {
    fn name(&self) -> &'static str {
        "rlimits"
    }

    fn apply(&self, cmd: &mut Command) {
        const MB: u64 = 1024 * 1024;
        let cpu = self.limits.cpu_secs;
        let address_space = self.limits.address_space_mb.saturating_mul(MB);
        let processes = self.limits.max_processes;
        let file_size = self.limits.file_size_mb.saturating_mul(MB);

        // SAFETY: the hook only calls getrlimit/setrlimit, which are async-signal-safe and
        // touch no memory shared with the parent.
        unsafe {
            cmd.pre_exec(move || {
                lower_limit(Resource::RLIMIT_CPU, cpu)?;
                lower_limit(Resource::RLIMIT_AS, address_space)?;
                lower_limit(Resource::RLIMIT_NPROC, processes)?;
                lower_limit(Resource::RLIMIT_FSIZE, file_size)?;
                Ok(())
            });
        }
    }
}

/// Set both soft and hard limits to `value`, never above the current hard limit
fn lower_limit(resource: Resource, value: u64) -> nix::Result<()> {
    let (_, hard) = getrlimit(resource)?;
    let value = value.min(hard);
    setrlimit(resource, value, value)
}

/// Build the strategy selected by configuration
pub fn from_config(config: &EngineConfig) -> Arc<dyn IsolationStrategy> {
    match config.isolation {
        IsolationKind::None => Arc::new(NoIsolation),
        IsolationKind::Rlimits => Arc::new(ResourceLimits::new(config.rlimits.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = EngineConfig::default();
        assert_eq!(from_config(&config).name(), "none");

        config.isolation = IsolationKind::Rlimits;
        assert_eq!(from_config(&config).name(), "rlimits");
    }

    #[tokio::test]
    async fn test_rlimits_are_visible_to_the_child() {
        let strategy = ResourceLimits::new(RlimitSettings {
            cpu_secs: 7,
            ..RlimitSettings::default()
        });

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "ulimit -t"]);
        strategy.apply(&mut cmd);

        let output = cmd.output().await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "7");
    }
}
