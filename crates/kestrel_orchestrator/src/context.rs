use kestrel_core::error::ConfigError;
use kestrel_core::job::NetworkKind;
use std::path::PathBuf;
use std::time::Duration;

pub const WORK_DIR_VAR: &str = "KESTREL_WORK_DIR";
pub const TOOLS_DIR_VAR: &str = "KESTREL_TOOLS_DIR";
pub const NETWORK_VAR: &str = "KESTREL_NETWORK";
pub const POLL_SECONDS_VAR: &str = "KESTREL_POLL_SECONDS";
pub const JOB_STATUS_WEBHOOK_VAR: &str = "KESTREL_JOB_STATUS_WEBHOOK_URL";
pub const BUG_FOUND_WEBHOOK_VAR: &str = "KESTREL_BUG_FOUND_WEBHOOK_URL";

/// Receivers for job notifications. A missing URL disables that kind of notification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WebhookTargets {
    pub job_status: Option<String>,
    pub bug_found: Option<String>,
}

/// Everything the orchestrator needs from its surroundings, resolved once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Holds `storage/`, `secrets/` and `events_sink/`.
    pub work_directory: PathBuf,
    /// Descriptor tree, mounted read-only into every container.
    pub tools_directory: PathBuf,
    pub network: NetworkKind,
    pub poll_interval: Duration,
    /// Descriptor name of the utility sidecar.
    pub utility_tool: String,
    /// Value of `RAFT_LOCAL` passed to containers.
    pub local_label: String,
    pub webhooks: WebhookTargets,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            work_directory: PathBuf::from("./local"),
            tools_directory: PathBuf::from("./tools"),
            network: NetworkKind::Host,
            poll_interval: Duration::from_secs(5),
            utility_tool: "agent-utilities".to_string(),
            local_label: "Developer".to_string(),
            webhooks: WebhookTargets::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Reads overrides from the process environment. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`OrchestratorConfig::from_env`], with variables resolved through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = lookup(WORK_DIR_VAR) {
            config.work_directory = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(TOOLS_DIR_VAR) {
            config.tools_directory = PathBuf::from(dir);
        }
        if let Some(network) = lookup(NETWORK_VAR) {
            config.network = network.parse().map_err(ConfigError::Invalid)?;
        }
        if let Some(seconds) = lookup(POLL_SECONDS_VAR) {
            let seconds: u64 = seconds.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{POLL_SECONDS_VAR} must be a number, got '{seconds}'"))
            })?;
            if seconds == 0 {
                return Err(ConfigError::Invalid(format!("{POLL_SECONDS_VAR} must be positive")));
            }
            config.poll_interval = Duration::from_secs(seconds);
        }
        if let Some(label) = lookup(kestrel_core::constants::env::LOCAL) {
            config.local_label = label;
        }
        config.webhooks.job_status = lookup(JOB_STATUS_WEBHOOK_VAR);
        config.webhooks.bug_found = lookup(BUG_FOUND_WEBHOOK_VAR);

        Ok(config)
    }

    pub fn with_work_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_directory = dir.into();
        self
    }

    pub fn with_tools_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tools_directory = dir.into();
        self
    }

    pub fn with_network(mut self, network: NetworkKind) -> Self {
        self.network = network;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_webhooks(mut self, webhooks: WebhookTargets) -> Self {
        self.webhooks = webhooks;
        self
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
