use crate::config::ShellCommand;
use crate::constants::paths::{DESCRIPTOR_FILE, TOOLS_MOUNT};
use crate::error::ConfigError;
use crate::normalize::lowercase_keys;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, btree_map};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Static metadata of an installable tool, read from its `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDescriptor {
    pub container: String,

    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default)]
    pub run: Option<ShellCommand>,

    #[serde(default)]
    pub idle: Option<ShellCommand>,

    #[serde(rename = "postrun", default)]
    pub post_run: Option<ShellCommand>,

    #[serde(rename = "environmentvariables", default)]
    pub environment_variables: BTreeMap<String, String>,

    /// Listening port, only meaningful for the utility sidecar.
    #[serde(default)]
    pub port: Option<u16>,

    /// Directory of the descriptor, relative to the registry root.
    #[serde(skip)]
    pub relative_dir: PathBuf,
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

impl ToolDescriptor {
    /// Where the tool's files are visible inside a container, e.g. `/raft-tools/tools/ZAP`.
    pub fn run_directory(&self) -> String {
        let relative: Vec<String> = self
            .relative_dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if relative.is_empty() {
            TOOLS_MOUNT.to_string()
        } else {
            format!("{TOOLS_MOUNT}/{}", relative.join("/"))
        }
    }
}

/// All descriptors found under one directory tree, keyed by the folder holding each `config.json`.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    root: PathBuf,
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    /// Walks `root` and loads every `config.json` it finds.
    ///
    /// When two folders share a name, the one found last wins.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        let mut tools = BTreeMap::new();

        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| ConfigError::Io(e.into()))?;
            if !entry.file_type().is_file() || entry.file_name() != DESCRIPTOR_FILE {
                continue;
            }
            let Some(dir) = entry.path().parent() else {
                continue;
            };
            let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };

            let mut descriptor = Self::read(entry.path())?;
            descriptor.relative_dir = dir.strip_prefix(&root).unwrap_or(dir).to_path_buf();
            debug!(tool = %name, path = %entry.path().display(), "Loaded tool descriptor");
            tools.insert(name, descriptor);
        }

        Ok(Self { root, tools })
    }

    fn read(path: &Path) -> Result<ToolDescriptor, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let raw: Value = serde_json::from_str(&text)?;
        let descriptor = serde_json::from_value(lowercase_keys(raw, &["environmentvariables"]))?;
        Ok(descriptor)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ToolDescriptor> {
        self.tools.iter()
    }
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
