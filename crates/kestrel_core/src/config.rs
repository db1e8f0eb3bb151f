//! The job document: what to start, with which commands, for how long.
//!
//! A job is described by a JSON template. Placeholders are replaced textually *before* parsing
//! (see [`substitute`]), then every key is lowercased once so the typed schema below can match
//! keys regardless of how the author capitalized them.

use crate::error::ConfigError;
use crate::normalize::lowercase_keys;
use crate::timespan;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Placeholder to replacement text, e.g. `{host}` to `localhost`.
pub type Substitutions = BTreeMap<String, String>;

/// Keys whose values are caller data and keep their original capitalization.
const OPAQUE_KEYS: &[&str] = &["environmentvariables", "metadata", "targetconfiguration"];

/// Replaces every occurrence of each key with its value, one key after the other.
///
/// Placeholders without a matching key are left in place.
pub fn substitute(text: &str, substitutions: &Substitutions) -> String {
    substitutions
        .iter()
        .fold(text.to_string(), |acc, (find, replace)| {
            if find.is_empty() {
                acc
            } else {
                acc.replace(find.as_str(), replace)
            }
        })
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Folder under the local storage root that holds this job's output.
    #[serde(rename = "rootfileshare", default)]
    pub root_file_share: Option<String>,

    /// Overall budget of the job. [`None`] runs until every task exits.
    #[serde(default, deserialize_with = "timespan::deserialize_opt")]
    pub duration: Option<Duration>,

    #[serde(rename = "testtargets", default)]
    pub test_targets: TestTargets,

    #[serde(rename = "testtasks", default)]
    pub test_tasks: TestTasks,

    #[serde(rename = "readonlyfilesharemounts", default)]
    pub read_only_file_share_mounts: Vec<FileShareMount>,

    #[serde(rename = "readwritefilesharemounts", default)]
    pub read_write_file_share_mounts: Vec<FileShareMount>,

    #[serde(default)]
    pub webhook: Option<WebhookSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestTargets {
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestTasks {
    #[serde(rename = "targetconfiguration", default)]
    pub target_configuration: Option<Map<String, Value>>,

    /// Default duration for tasks that don't declare their own.
    #[serde(default, deserialize_with = "timespan::deserialize_opt")]
    pub duration: Option<Duration>,

    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

/// A target container: the system under test.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSpec {
    pub container: String,

    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub run: Option<ShellCommand>,

    #[serde(default)]
    pub idle: Option<ShellCommand>,

    #[serde(rename = "postrun", default)]
    pub post_run: Option<PostRunCommand>,

    #[serde(rename = "isidling", default)]
    pub is_idling: bool,

    /// How long the service needs before tasks may start hitting it.
    #[serde(
        rename = "expecteddurationuntilready",
        default,
        deserialize_with = "timespan::deserialize_opt"
    )]
    pub expected_duration_until_ready: Option<Duration>,

    #[serde(rename = "outputfolder")]
    pub output_folder: String,

    #[serde(
        rename = "environmentvariables",
        default,
        deserialize_with = "string_map"
    )]
    pub environment_variables: BTreeMap<String, String>,

    /// Published only when the job runs on a bridge network.
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// A tool task: one testing tool run against the targets.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "toolname")]
    pub tool_name: String,

    #[serde(rename = "outputfolder")]
    pub output_folder: String,

    /// Replaces the job-level target configuration wholesale when present.
    #[serde(rename = "targetconfiguration", default)]
    pub target_configuration: Option<Map<String, Value>>,

    /// Names of files in the local secrets folder.
    #[serde(rename = "keyvaultsecrets", default)]
    pub secrets: Vec<String>,

    #[serde(rename = "isidling", default)]
    pub is_idling: bool,

    #[serde(default, deserialize_with = "timespan::deserialize_opt")]
    pub duration: Option<Duration>,

    /// Tool specific fields, passed through to `task-config.json`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ShellCommand {
    #[serde(rename = "shellarguments", default)]
    pub shell_arguments: Vec<String>,
}

impl ShellCommand {
    /// Renders `shell "arg1" "arg2"`, one line, suitable for a script file.
    pub fn render(&self, shell: &str) -> String {
        let args: Vec<String> = self
            .shell_arguments
            .iter()
            .map(|a| format!("\"{}\"", a.replace('"', "\\\"")))
            .collect();
        if args.is_empty() {
            shell.to_string()
        } else {
            format!("{shell} {}", args.join(" "))
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostRunCommand {
    #[serde(rename = "shellarguments", default)]
    pub shell_arguments: Vec<String>,

    /// Grace period granted to the command before the target is stopped.
    #[serde(
        rename = "expectedrunduration",
        default,
        deserialize_with = "timespan::deserialize_opt"
    )]
    pub expected_run_duration: Option<Duration>,
}

impl PostRunCommand {
    pub fn command(&self) -> ShellCommand {
        ShellCommand {
            shell_arguments: self.shell_arguments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileShareMount {
    #[serde(rename = "filesharename")]
    pub file_share_name: String,

    #[serde(rename = "mountpath")]
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// The document written to a task's working directory before its container starts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfigDocument<'a> {
    pub tool_name: &'a str,
    pub output_folder: &'a str,
    pub is_idling: bool,
    pub key_vault_secrets: &'a [String],
    pub target_configuration: Option<&'a Map<String, Value>>,
    #[serde(serialize_with = "timespan::serialize_opt")]
    pub duration: Option<Duration>,
    #[serde(flatten)]
    pub extra: &'a Map<String, Value>,
}

impl JobConfig {
    /// Substitutes placeholders in `template`, then parses and validates the result.
    pub fn from_template(template: &str, substitutions: &Substitutions) -> Result<Self, ConfigError> {
        Self::parse(&substitute(template, substitutions))
    }

    /// Reads a template from disk, see [`JobConfig::from_template`].
    pub fn load(path: impl AsRef<Path>, substitutions: &Substitutions) -> Result<Self, ConfigError> {
        let template = std::fs::read_to_string(path)?;
        Self::from_template(&template, substitutions)
    }

    /// Parses an already resolved document.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw: Value = serde_json::from_str(text)?;
        let written = written_tasks(&raw);
        let mut config: JobConfig = serde_json::from_value(lowercase_keys(raw, OPAQUE_KEYS))?;
        for (task, fields) in config.test_tasks.tasks.iter_mut().zip(written) {
            task.restore_extra_case(fields);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.test_tasks.tasks.is_empty() {
            return Err(ConfigError::Missing("testTasks.tasks".into()));
        }

        let mut folders = HashSet::new();
        let outputs = self
            .test_targets
            .services
            .iter()
            .map(|s| s.output_folder.as_str())
            .chain(self.test_tasks.tasks.iter().map(|t| t.output_folder.as_str()));
        for folder in outputs {
            if folder.is_empty() || folder == "." || folder == ".." || folder.contains(['/', '\\']) {
                return Err(ConfigError::Invalid(format!(
                    "output folder '{folder}' must be a single path component"
                )));
            }
            if !folders.insert(folder) {
                return Err(ConfigError::Invalid(format!(
                    "output folder '{folder}' is used more than once"
                )));
            }
        }

        for service in &self.test_targets.services {
            let needs_shell =
                service.run.is_some() || service.idle.is_some() || service.post_run.is_some();
            if needs_shell && service.shell.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "service '{}' declares commands but no shell",
                    service.container
                )));
            }
            if service.is_idling && service.idle.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "service '{}' is idling but has no idle command",
                    service.container
                )));
            }
        }

        Ok(())
    }

    /// Overrides the job duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Merges `data` into the webhook metadata, replacing keys that already exist.
    pub fn add_metadata(mut self, data: Map<String, Value>) -> Self {
        let webhook = self.webhook.get_or_insert_with(WebhookSettings::default);
        webhook.metadata.get_or_insert_with(Map::new).extend(data);
        self
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.webhook.as_ref().and_then(|w| w.metadata.as_ref())
    }

    pub fn services(&self) -> &[ServiceSpec] {
        &self.test_targets.services
    }

    pub fn tasks(&self) -> &[TaskSpec] {
        &self.test_tasks.tasks
    }

    /// The longest readiness delay across all services. Every task waits this long.
    pub fn startup_delay(&self) -> Duration {
        self.services()
            .iter()
            .filter_map(|s| s.expected_duration_until_ready)
            .max()
            .unwrap_or_default()
    }

    /// The longest post-run duration across all services.
    pub fn post_run_grace(&self) -> Duration {
        self.services()
            .iter()
            .filter_map(|s| s.post_run.as_ref())
            .filter_map(|p| p.expected_run_duration)
            .max()
            .unwrap_or_default()
    }

    /// Every secret referenced by any task, first occurrence order.
    pub fn secrets(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tasks()
            .iter()
            .flat_map(|t| t.secrets.iter())
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }

    /// Job-level target configuration, with its `localRun` section preferred when present.
    pub fn target_configuration(&self) -> Option<&Map<String, Value>> {
        let config = self.test_tasks.target_configuration.as_ref()?;
        match get_ignore_case(config, "localrun") {
            Some(Value::Object(local)) => Some(local),
            _ => Some(config),
        }
    }
}

impl TaskSpec {
    /// Pass-through fields go to the tool as written, so take them from the document as it was
    /// before key normalization.
    fn restore_extra_case(&mut self, written: Map<String, Value>) {
        self.extra = written
            .into_iter()
            .filter(|(key, _)| self.extra.contains_key(&key.to_lowercase()))
            .collect();
    }

    /// Builds this task's `task-config.json` content against the job it belongs to.
    pub fn config_document<'a>(&'a self, job: &'a JobConfig) -> TaskConfigDocument<'a> {
        TaskConfigDocument {
            tool_name: &self.tool_name,
            output_folder: &self.output_folder,
            is_idling: self.is_idling,
            key_vault_secrets: &self.secrets,
            target_configuration: self
                .target_configuration
                .as_ref()
                .or_else(|| job.target_configuration()),
            duration: self.duration.or(job.test_tasks.duration),
            extra: &self.extra,
        }
    }
}

fn get_ignore_case<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// The task objects of a raw document, keys untouched.
fn written_tasks(raw: &Value) -> Vec<Map<String, Value>> {
    let tasks = raw
        .as_object()
        .and_then(|root| get_ignore_case(root, "testtasks"))
        .and_then(Value::as_object)
        .and_then(|tasks| get_ignore_case(tasks, "tasks"))
        .and_then(Value::as_array);
    tasks
        .into_iter()
        .flatten()
        .map(|task| task.as_object().cloned().unwrap_or_default())
        .collect()
}

fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map: Option<Map<String, Value>> = Option::deserialize(deserializer)?;
    Ok(map
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
