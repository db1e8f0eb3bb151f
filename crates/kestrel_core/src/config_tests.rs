use super::*;
use proptest::prelude::*;

const PETSTORE: &str = r#"{
    "rootFileShare": "{share}",
    "duration": "00:10:00",
    "testTargets": {
        "services": [
            {
                "Container": "swaggerapi/petstore3:unstable",
                "Shell": "/bin/sh",
                "ExpectedDurationUntilReady": "00:00:30",
                "OutputFolder": "petstore3",
                "EnvironmentVariables": { "SWAGGER_HOST": "http://localhost:{port}", "Retries": 3 },
                "PostRun": {
                    "ShellArguments": ["-c", "cp /var/log/app.log $RAFT_WORK_DIRECTORY"],
                    "ExpectedRunDuration": "00:00:15"
                }
            },
            {
                "container": "redis:7",
                "expectedDurationUntilReady": "00:00:05",
                "outputFolder": "redis"
            }
        ]
    },
    "testTasks": {
        "duration": "00:05:00",
        "targetConfiguration": {
            "apiSpecifications": ["http://localhost:{port}/api/v3/openapi.json"],
            "localRun": { "endpoint": "http://localhost:{port}" }
        },
        "tasks": [
            {
                "toolName": "RESTler",
                "outputFolder": "restler-fuzz",
                "keyVaultSecrets": ["PetstoreToken"],
                "toolConfiguration": { "task": "Fuzz", "runConfiguration": { "Duration": "00:02:00" } }
            },
            {
                "toolName": "ZAP",
                "outputFolder": "zap",
                "duration": "00:01:00",
                "keyVaultSecrets": ["PetstoreToken", "ZapKey"],
                "targetConfiguration": { "endpoint": "http://petstore:{port}" }
            }
        ]
    },
    "readOnlyFileShareMounts": [ { "FileShareName": "replay", "MountPath": "/replay" } ],
    "webhook": { "metadata": { "Branch": "main" } }
}"#;

fn subs(pairs: &[(&str, &str)]) -> Substitutions {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn petstore() -> JobConfig {
    JobConfig::from_template(PETSTORE, &subs(&[("{port}", "8080"), ("{share}", "petstore")]))
        .unwrap()
}

#[yare::parameterized(
    single       = { "a {x} b",          &[("{x}", "1")],                 "a 1 b" },
    repeated     = { "{x}{x}",           &[("{x}", "ab")],                "abab" },
    several      = { "{a}-{b}",          &[("{a}", "1"), ("{b}", "2")],   "1-2" },
    unresolved   = { "{missing} stays",  &[("{x}", "1")],                 "{missing} stays" },
    empty_key    = { "unchanged",        &[("", "boom")],                 "unchanged" },
    numeric_slot = { r#"{"n": {n}}"#,    &[("{n}", "42")],                r#"{"n": 42}"# },
)]
fn substitute_cases(text: &str, pairs: &[(&str, &str)], expected: &str) {
    assert_eq!(substitute(text, &subs(pairs)), expected);
}

proptest! {
    #[test]
    fn substitute_is_idempotent_for_complete_mappings(
        keys in proptest::collection::btree_set("[a-z]{1,6}", 0..5),
        values in proptest::collection::vec("[a-zA-Z0-9 ._-]{0,10}", 5),
        filler in proptest::collection::vec("[a-z ]{0,8}", 6),
    ) {
        let mapping: Substitutions = keys
            .iter()
            .zip(values.iter())
            .map(|(k, v)| (format!("{{{k}}}"), v.clone()))
            .collect();
        let mut template = String::new();
        for (i, piece) in filler.iter().enumerate() {
            template.push_str(piece);
            if let Some(key) = mapping.keys().nth(i % mapping.len().max(1)) {
                template.push_str(key);
            }
        }

        let once = substitute(&template, &mapping);
        prop_assert_eq!(substitute(&once, &mapping), once);
    }
}

#[test]
fn parses_services_with_any_key_case() {
    let config = petstore();
    let services = config.services();
    assert_eq!(services.len(), 2);

    let petstore = &services[0];
    assert_eq!(petstore.container, "swaggerapi/petstore3:unstable");
    assert_eq!(petstore.shell.as_deref(), Some("/bin/sh"));
    assert_eq!(petstore.output_folder, "petstore3");
    assert_eq!(
        petstore.expected_duration_until_ready,
        Some(Duration::from_secs(30))
    );
    let post_run = petstore.post_run.as_ref().unwrap();
    assert_eq!(post_run.expected_run_duration, Some(Duration::from_secs(15)));
    assert_eq!(post_run.shell_arguments[0], "-c");

    assert_eq!(services[1].container, "redis:7");
    assert!(services[1].run.is_none());
}

#[test]
fn environment_variable_names_keep_their_case() {
    let config = petstore();
    let env = &config.services()[0].environment_variables;
    assert_eq!(env.get("SWAGGER_HOST").map(String::as_str), Some("http://localhost:8080"));
    assert_eq!(env.get("Retries").map(String::as_str), Some("3"));
}

#[test]
fn metadata_keeps_its_case() {
    let config = petstore();
    let metadata = config.metadata().unwrap();
    assert_eq!(metadata.get("Branch"), Some(&Value::from("main")));
}

#[test]
fn durations_and_file_shares() {
    let config = petstore();
    assert_eq!(config.duration, Some(Duration::from_secs(600)));
    assert_eq!(config.root_file_share.as_deref(), Some("petstore"));
    assert_eq!(
        config.read_only_file_share_mounts,
        vec![FileShareMount {
            file_share_name: "replay".into(),
            mount_path: "/replay".into()
        }]
    );
    assert!(config.read_write_file_share_mounts.is_empty());
}

#[test]
fn startup_delay_is_the_longest_readiness() {
    assert_eq!(petstore().startup_delay(), Duration::from_secs(30));
}

#[test]
fn post_run_grace_is_the_longest_post_run() {
    assert_eq!(petstore().post_run_grace(), Duration::from_secs(15));
}

#[test]
fn secrets_are_deduplicated_in_order() {
    assert_eq!(petstore().secrets(), vec!["PetstoreToken", "ZapKey"]);
}

#[test]
fn job_target_configuration_prefers_local_run() {
    let config = petstore();
    let target = config.target_configuration().unwrap();
    assert_eq!(target.get("endpoint"), Some(&Value::from("http://localhost:8080")));
    assert!(target.get("apispecifications").is_none());
}

#[test]
fn task_config_document_merges_job_defaults() {
    let config = petstore();
    let restler = &config.tasks()[0];
    let doc = serde_json::to_value(restler.config_document(&config)).unwrap();

    assert_eq!(doc["toolName"], "RESTler");
    assert_eq!(doc["outputFolder"], "restler-fuzz");
    assert_eq!(doc["isIdling"], false);
    assert_eq!(doc["duration"], "00:05:00");
    assert_eq!(doc["keyVaultSecrets"], serde_json::json!(["PetstoreToken"]));
    assert_eq!(doc["targetConfiguration"]["endpoint"], "http://localhost:8080");
    assert_eq!(doc["toolConfiguration"]["task"], "Fuzz");
    assert_eq!(doc["toolConfiguration"]["runConfiguration"]["Duration"], "00:02:00");
    assert!(doc.get("toolconfiguration").is_none());
}

#[test]
fn task_level_target_configuration_wins() {
    let config = petstore();
    let zap = &config.tasks()[1];
    let doc = serde_json::to_value(zap.config_document(&config)).unwrap();

    assert_eq!(doc["targetConfiguration"]["endpoint"], "http://petstore:8080");
    assert_eq!(doc["duration"], "00:01:00");
}

#[test]
fn with_duration_overrides() {
    let config = petstore().with_duration(Duration::from_secs(5));
    assert_eq!(config.duration, Some(Duration::from_secs(5)));
}

#[test]
fn add_metadata_merges() {
    let mut extra = Map::new();
    extra.insert("Run".into(), Value::from(7));
    extra.insert("Branch".into(), Value::from("dev"));

    let config = petstore().add_metadata(extra);
    let metadata = config.metadata().unwrap();
    assert_eq!(metadata.get("Run"), Some(&Value::from(7)));
    assert_eq!(metadata.get("Branch"), Some(&Value::from("dev")));
}

#[test]
fn add_metadata_creates_webhook_section() {
    let config = JobConfig::parse(r#"{"testTasks": {"tasks": [{"toolName": "ZAP", "outputFolder": "zap"}]}}"#)
        .unwrap();
    assert!(config.metadata().is_none());

    let mut extra = Map::new();
    extra.insert("k".into(), Value::from("v"));
    let config = config.add_metadata(extra);
    assert_eq!(config.metadata().unwrap().len(), 1);
}

#[yare::parameterized(
    no_tasks_section = { r#"{"testTargets": {"services": []}}"# },
    empty_tasks      = { r#"{"testTasks": {"tasks": []}}"# },
)]
fn missing_tasks_is_an_error(text: &str) {
    assert!(matches!(JobConfig::parse(text), Err(ConfigError::Missing(_))));
}

#[yare::parameterized(
    not_json          = { "{ this is not json" },
    bad_duration      = { r#"{"duration": "ten", "testTasks": {"tasks": [{"toolName": "ZAP", "outputFolder": "zap"}]}}"# },
    task_without_tool = { r#"{"testTasks": {"tasks": [{"outputFolder": "zap"}]}}"# },
)]
fn malformed_documents(text: &str) {
    assert!(matches!(JobConfig::parse(text), Err(ConfigError::Malformed(_))));
}

#[yare::parameterized(
    traversal      = { "../escape" },
    nested         = { "a/b" },
    duplicate      = { "zap" },
    empty          = { "" },
)]
fn invalid_output_folders(folder: &str) {
    let text = format!(
        r#"{{"testTasks": {{"tasks": [
            {{"toolName": "ZAP", "outputFolder": "zap"}},
            {{"toolName": "RESTler", "outputFolder": "{folder}"}}
        ]}}}}"#
    );
    assert!(matches!(JobConfig::parse(&text), Err(ConfigError::Invalid(_))));
}

#[test]
fn service_commands_require_a_shell() {
    let text = r#"{
        "testTargets": {"services": [{"container": "x", "outputFolder": "x", "run": {"shellArguments": ["-c", "true"]}}]},
        "testTasks": {"tasks": [{"toolName": "ZAP", "outputFolder": "zap"}]}
    }"#;
    assert!(matches!(JobConfig::parse(text), Err(ConfigError::Invalid(_))));
}

#[test]
fn unresolved_numeric_placeholder_fails_to_parse() {
    let text = r#"{"duration": {seconds}, "testTasks": {"tasks": [{"toolName": "ZAP", "outputFolder": "zap"}]}}"#;
    assert!(matches!(
        JobConfig::from_template(text, &Substitutions::new()),
        Err(ConfigError::Malformed(_))
    ));
}

#[test]
fn load_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.json");
    std::fs::write(&path, PETSTORE).unwrap();

    let config = JobConfig::load(&path, &subs(&[("{port}", "9000"), ("{share}", "s")])).unwrap();
    assert_eq!(config.tasks().len(), 2);
    assert!(matches!(
        JobConfig::load(dir.path().join("absent.json"), &Substitutions::new()),
        Err(ConfigError::Io(_))
    ));
}

#[yare::parameterized(
    plain   = { &["-c", "python3 run.py"], r#"/bin/sh "-c" "python3 run.py""# },
    quoted  = { &["-c", r#"echo "hi""#],     r#"/bin/sh "-c" "echo \"hi\"""# },
    no_args = { &[],                          "/bin/sh" },
)]
fn shell_command_render(args: &[&str], expected: &str) {
    let command = ShellCommand {
        shell_arguments: args.iter().map(|a| a.to_string()).collect(),
    };
    assert_eq!(command.render("/bin/sh"), expected);
}

#[test]
fn target_configuration_keeps_its_keys_as_written() {
    let config = JobConfig::parse(
        r#"{"testTasks": {
            "targetConfiguration": {"apiSpecifications": ["http://localhost/openapi.json"], "Endpoint": "http://localhost"},
            "tasks": [{"toolName": "RESTler", "outputFolder": "r"}]
        }}"#,
    )
    .unwrap();
    let target = config.target_configuration().unwrap();
    assert!(target.contains_key("apiSpecifications"));
    assert!(target.contains_key("Endpoint"));
}
