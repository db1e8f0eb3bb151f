//! Host-side folder layout.
//!
//! ```text
//! <work>/storage/[<rootFileShare>/]<job id>/<outputFolder>/   task output, mounted as the working dir
//! <work>/secrets/<name>                                       one file per secret
//! <work>/events_sink/<job id>/[<outputFolder>/]               event files
//! ```

use crate::error::OrchestratorError;
use kestrel_core::config::TaskConfigDocument;
use kestrel_core::constants::paths::TASK_CONFIG_FILE;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const STORAGE: &str = "storage";
const SECRETS: &str = "secrets";
const EVENTS_SINK: &str = "events_sink";

#[derive(Clone, Debug)]
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    /// Creates the folder layout under `root`, keeping anything already there.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self, OrchestratorError> {
        let workspace = Self { root: root.into() };
        for dir in [workspace.storage(), workspace.secrets(), workspace.events_sink()] {
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
                info!(path = %dir.display(), "Created folder");
            }
        }
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage(&self) -> PathBuf {
        self.root.join(STORAGE)
    }

    pub fn secrets(&self) -> PathBuf {
        self.root.join(SECRETS)
    }

    pub fn events_sink(&self) -> PathBuf {
        self.root.join(EVENTS_SINK)
    }

    pub fn secret_path(&self, name: &str) -> PathBuf {
        self.secrets().join(name)
    }

    /// Secret content with surrounding whitespace removed.
    pub fn read_secret(&self, name: &str) -> Result<String, OrchestratorError> {
        let path = self.secret_path(name);
        let secret = fs::read_to_string(&path).map_err(OrchestratorError::workspace(&path))?;
        Ok(secret.trim().to_string())
    }

    /// Event directory of a job. It may not exist yet.
    pub fn job_events(&self, job_id: &str) -> PathBuf {
        self.events_sink().join(job_id)
    }

    /// Creates the output and event directories of a new job.
    pub fn create_job(
        &self,
        job_id: &str,
        root_file_share: Option<&str>,
    ) -> Result<JobDirs, OrchestratorError> {
        let mut output = self.storage();
        if let Some(share) = root_file_share {
            output.push(share);
            fs::create_dir_all(&output).map_err(OrchestratorError::workspace(&output))?;
        }
        output.push(job_id);
        fs::create_dir(&output).map_err(OrchestratorError::workspace(&output))?;

        let events = self.job_events(job_id);
        fs::create_dir_all(&events).map_err(OrchestratorError::workspace(&events))?;

        Ok(JobDirs { output, events })
    }
}

/// The host directories owned by one job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobDirs {
    pub output: PathBuf,
    pub events: PathBuf,
}

impl JobDirs {
    /// Creates `<output>/<folder>`.
    pub fn task_output(&self, folder: &str) -> Result<PathBuf, OrchestratorError> {
        create(self.output.join(folder))
    }

    /// Creates `<events>/<folder>`.
    pub fn task_events(&self, folder: &str) -> Result<PathBuf, OrchestratorError> {
        create(self.events.join(folder))
    }
}

fn create(path: PathBuf) -> Result<PathBuf, OrchestratorError> {
    fs::create_dir(&path).map_err(OrchestratorError::workspace(&path))?;
    Ok(path)
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> Result<(), OrchestratorError> {
    let path = dir.join(name);
    fs::write(&path, body).map_err(OrchestratorError::workspace(&path))
}

pub fn write_task_config(dir: &Path, document: &TaskConfigDocument<'_>) -> Result<(), OrchestratorError> {
    let path = dir.join(TASK_CONFIG_FILE);
    let body = serde_json::to_vec_pretty(document).map_err(kestrel_core::error::ConfigError::from)?;
    fs::write(&path, body).map_err(OrchestratorError::workspace(&path))
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
