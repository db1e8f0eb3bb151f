use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How a job's containers are networked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Share the host's network stack. Several jobs may run at once, but ports can clash.
    #[default]
    Host,
    /// A bridge network private to the job.
    Bridge,
}

impl std::str::FromStr for NetworkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(NetworkKind::Host),
            "bridge" => Ok(NetworkKind::Bridge),
            other => Err(format!("unknown network driver '{other}'")),
        }
    }
}

/// A network a job's containers are attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkHandle {
    Host,
    Bridge(String),
}

impl NetworkHandle {
    /// The name to pass as a container's network mode.
    pub fn name(&self) -> &str {
        match self {
            NetworkHandle::Host => "host",
            NetworkHandle::Bridge(name) => name,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, NetworkHandle::Host)
    }
}

/// A started container, identified by the unique name it was given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerHandle(pub String);

impl ContainerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host path made visible inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_write(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }
}

/// Everything needed to start one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub mounts: Vec<Mount>,
    /// Published as `port:port/tcp`. Ignored on host networking.
    pub ports: Vec<u16>,
    /// Ordered so that the same job always produces the same container configuration.
    pub env: Vec<(String, String)>,
    pub network: Option<NetworkHandle>,
    /// `Some(vec![])` clears the image's entrypoint.
    pub entrypoint: Option<Vec<String>>,
    /// [`None`] starts the image's default command.
    pub command: Option<Vec<String>>,
}

impl RunSpec {
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// What `inspect` reports about one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub running: bool,
    /// Backend status string, e.g. `running` or `exited`.
    pub status: String,
    pub exit_code: i64,
    pub error_message: String,
}

/// The final state of one task container, returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExitRecord {
    pub name: String,
    pub status: String,
    pub exit_code: i64,
    pub error_message: String,
}

impl From<ContainerInfo> for ExitRecord {
    fn from(info: ContainerInfo) -> Self {
        Self {
            name: info.name,
            status: info.status,
            exit_code: info.exit_code,
            error_message: info.error_message,
        }
    }
}
