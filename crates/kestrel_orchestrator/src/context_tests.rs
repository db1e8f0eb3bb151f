use super::*;
use std::collections::HashMap;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults() {
    let config = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config, OrchestratorConfig::default());
    assert_eq!(config.network, NetworkKind::Host);
    assert_eq!(config.poll_interval, Duration::from_secs(5));
    assert_eq!(config.utility_tool, "agent-utilities");
    assert_eq!(config.local_label, "Developer");
}

#[test]
fn overrides_from_variables() {
    let config = OrchestratorConfig::from_lookup(lookup(&[
        ("KESTREL_WORK_DIR", "/srv/kestrel"),
        ("KESTREL_TOOLS_DIR", "/opt/tools"),
        ("KESTREL_NETWORK", "Bridge"),
        ("KESTREL_POLL_SECONDS", "2"),
        ("RAFT_LOCAL", "github-action"),
        ("KESTREL_BUG_FOUND_WEBHOOK_URL", "http://localhost:7071/bugs"),
    ]))
    .unwrap();

    assert_eq!(config.work_directory, PathBuf::from("/srv/kestrel"));
    assert_eq!(config.tools_directory, PathBuf::from("/opt/tools"));
    assert_eq!(config.network, NetworkKind::Bridge);
    assert_eq!(config.poll_interval, Duration::from_secs(2));
    assert_eq!(config.local_label, "github-action");
    assert_eq!(config.webhooks.bug_found.as_deref(), Some("http://localhost:7071/bugs"));
    assert!(config.webhooks.job_status.is_none());
}

#[test]
fn blank_values_are_ignored() {
    let config = OrchestratorConfig::from_lookup(lookup(&[("KESTREL_NETWORK", "  ")])).unwrap();
    assert_eq!(config.network, NetworkKind::Host);
}

#[yare::parameterized(
    unknown_network = { "KESTREL_NETWORK", "overlay" },
    word_interval   = { "KESTREL_POLL_SECONDS", "soon" },
    zero_interval   = { "KESTREL_POLL_SECONDS", "0" },
)]
fn rejects(key: &str, value: &str) {
    let err = OrchestratorConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
