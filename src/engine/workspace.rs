//! Per-job ephemeral workspaces
//!
//! A [`Workspace`] is a guard over `<output_root>/<job_id>`. It is removed exactly
//! once: by [`Workspace::destroy`] on normal paths, or by `Drop` if the owning
//! task unwinds before reaching it.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::core::{JobId, LanguageProfile};

/// Name of the file holding the job's stdin
pub const STDIN_FILE: &str = "input.txt";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Creates workspaces under a shared output root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh directory for `job_id`; an existing directory is an error
    pub async fn create(&self, job_id: &JobId) -> Result<Workspace, WorkspaceError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: self.root.clone(),
                source,
            })?;

        let path = self.root.join(job_id.as_str());
        fs::create_dir(&path)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: path.clone(),
                source,
            })?;

        debug!("Created workspace {:?}", path);

        Ok(Workspace {
            path,
            job_id: job_id.clone(),
            stdin_path: None,
            released: false,
        })
    }
}

/// Exclusively owned job directory
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    job_id: JobId,
    stdin_path: Option<PathBuf>,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Path of the written stdin file, if any
    pub fn stdin_path(&self) -> Option<&Path> {
        self.stdin_path.as_deref()
    }

    pub fn source_path(&self, profile: &LanguageProfile) -> PathBuf {
        self.path.join(&profile.source_file)
    }

    pub fn artifact_path(&self, profile: &LanguageProfile) -> Option<PathBuf> {
        profile.artifact.as_ref().map(|name| self.path.join(name))
    }

    pub async fn write_source(
        &self,
        profile: &LanguageProfile,
        code: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let path = self.source_path(profile);
        write_file(&path, code).await?;
        Ok(path)
    }

    pub async fn write_stdin(&mut self, input: &str) -> Result<PathBuf, WorkspaceError> {
        let path = self.path.join(STDIN_FILE);
        write_file(&path, input).await?;
        self.stdin_path = Some(path.clone());
        Ok(path)
    }

    /// Remove the workspace; failures are logged, never returned
    pub async fn destroy(mut self) {
        self.released = true;
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("Removed workspace of job {}", self.job_id),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove workspace of job {} at {:?}: {}",
                self.job_id, self.path, e
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed workspace {:?} on drop", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {:?} on drop: {}", self.path, e),
        }
    }
}

async fn write_file(path: &Path, content: &str) -> Result<(), WorkspaceError> {
    fs::write(path, content)
        .await
        .map_err(|source| WorkspaceError::Write {
            path: path.to_path_buf(),
            source,
        })
}
