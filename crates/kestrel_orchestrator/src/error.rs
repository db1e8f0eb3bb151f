use kestrel_core::error::{ConfigError, RuntimeError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A backend call failed while the job was starting or being monitored.
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Tool '{0}' not found in the tools directory")]
    ToolNotFound(String),

    #[error("Tool '{tool}' cannot be used: {reason}")]
    InvalidTool { tool: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A job directory, script or secret could not be prepared on the host.
    #[error("Cannot prepare '{}': {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A target service or the utility sidecar stopped while tasks were still running.
    #[error("Container '{container}' exited before the end of the job run")]
    DependencyExited { container: String },
}

impl OrchestratorError {
    pub(crate) fn workspace(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| OrchestratorError::Workspace { path, source }
    }
}
