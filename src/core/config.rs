//! Engine configuration
//!
//! Loaded from environment variables (after `.env` is read by the binary).

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

/// How a zero exit with non-empty stderr is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StderrPolicy {
    /// Any stderr output means failure
    #[default]
    Strict,
    /// Exit code alone decides success
    ExitCodeOnly,
}

impl FromStr for StderrPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(StderrPolicy::Strict),
            "exit_code" | "exit-code" => Ok(StderrPolicy::ExitCodeOnly),
            other => anyhow::bail!("unknown stderr policy: {}", other),
        }
    }
}

/// Which isolation strategy the process runner applies to execution phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationKind {
    #[default]
    None,
    Rlimits,
}

impl FromStr for IsolationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Ok(IsolationKind::None),
            "rlimits" | "rlimit" => Ok(IsolationKind::Rlimits),
            other => anyhow::bail!("unknown isolation strategy: {}", other),
        }
    }
}

/// Per-process resource limits used by the rlimit isolation strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RlimitSettings {
    /// CPU seconds
    pub cpu_secs: u64,
    /// Address space in MB
    pub address_space_mb: u64,
    /// Processes per user
    pub max_processes: u64,
    /// Largest file the program may write, in MB
    pub file_size_mb: u64,
}

impl Default for RlimitSettings {
    fn default() -> Self {
        Self {
            cpu_secs: 15,
            address_space_mb: 2048,
            max_processes: 256,
            file_size_mb: 64,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock limit for all execution phases of a job (default: 10000ms)
    pub deadline_ms: u64,
    /// Limit for the toolchain availability probe (default: 5000ms)
    pub probe_timeout_ms: u64,
    /// Base directory for ephemeral workspaces
    pub output_root: PathBuf,
    /// Cap on captured bytes, per stream (default: 1 MiB)
    pub max_captured_bytes: usize,
    pub stderr_policy: StderrPolicy,
    pub isolation: IsolationKind,
    pub rlimits: RlimitSettings,
    /// Jobs the worker runs at once
    pub max_concurrent_jobs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 10_000,
            probe_timeout_ms: 5_000,
            output_root: std::env::temp_dir().join("runner-workspaces"),
            max_captured_bytes: 1024 * 1024,
            stderr_policy: StderrPolicy::Strict,
            isolation: IsolationKind::None,
            rlimits: RlimitSettings::default(),
            max_concurrent_jobs: 8,
        }
    }
}

impl EngineConfig {
    /// Build configuration from `RUNNER_*` environment variables, falling back to defaults
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let parse = |key: &str| -> anyhow::Result<Option<u64>> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .with_context(|| format!("Invalid value for {}: {}", key, v))
                })
                .transpose()
        };

        let max_captured_bytes = match parse("RUNNER_MAX_CAPTURED_BYTES")? {
            Some(v) => usize::try_from(v).context("RUNNER_MAX_CAPTURED_BYTES out of range")?,
            None => defaults.max_captured_bytes,
        };
        let max_concurrent_jobs = match parse("RUNNER_MAX_CONCURRENT_JOBS")? {
            Some(0) => anyhow::bail!("RUNNER_MAX_CONCURRENT_JOBS must be at least 1"),
            Some(v) => usize::try_from(v).context("RUNNER_MAX_CONCURRENT_JOBS out of range")?,
            None => defaults.max_concurrent_jobs,
        };

        let stderr_policy = match lookup("RUNNER_STDERR_POLICY") {
            Some(v) => v.parse().context("Invalid value for RUNNER_STDERR_POLICY")?,
            None => defaults.stderr_policy,
        };
        let isolation = match lookup("RUNNER_ISOLATION") {
            Some(v) => v.parse().context("Invalid value for RUNNER_ISOLATION")?,
            None => defaults.isolation,
        };

        let rlimit_defaults = RlimitSettings::default();
        let rlimits = RlimitSettings {
            cpu_secs: parse("RUNNER_RLIMIT_CPU_SECS")?.unwrap_or(rlimit_defaults.cpu_secs),
            address_space_mb: parse("RUNNER_RLIMIT_AS_MB")?
                .unwrap_or(rlimit_defaults.address_space_mb),
            max_processes: parse("RUNNER_RLIMIT_NPROC")?.unwrap_or(rlimit_defaults.max_processes),
            file_size_mb: parse("RUNNER_RLIMIT_FSIZE_MB")?
                .unwrap_or(rlimit_defaults.file_size_mb),
        };

        let config = Self {
            deadline_ms: parse("RUNNER_DEADLINE_MS")?.unwrap_or(defaults.deadline_ms),
            probe_timeout_ms: parse("RUNNER_PROBE_TIMEOUT_MS")?
                .unwrap_or(defaults.probe_timeout_ms),
            output_root: lookup("RUNNER_OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_root),
            max_captured_bytes,
            stderr_policy,
            isolation,
            rlimits,
            max_concurrent_jobs,
        };

        if config.deadline_ms == 0 || config.probe_timeout_ms == 0 {
            anyhow::bail!("Deadline and probe timeout must be greater than zero");
        }

        Ok(config)
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    pub fn with_stderr_policy(mut self, policy: StderrPolicy) -> Self {
        self.stderr_policy = policy;
        self
    }
}
