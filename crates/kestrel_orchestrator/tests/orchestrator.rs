use kestrel_core::config::JobConfig;
use kestrel_core::error::PublishError;
use kestrel_core::events::JobEvent;
use kestrel_core::fake::{FakeRuntime, RuntimeCall};
use kestrel_core::job::{Mount, NetworkHandle, NetworkKind, RunSpec};
use kestrel_core::traits::EventPublisher;
use kestrel_orchestrator::prelude::*;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const UTILITY_IMAGE: &str = "utilities:latest";
const ZAP_IMAGE: &str = "zap:latest";
const TARGET_IMAGE: &str = "petstore:latest";

struct Fixture {
    dir: TempDir,
    runtime: FakeRuntime,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let tools = dir.path().join("tools");

        let utility = tools.join("agent-utilities");
        fs::create_dir_all(&utility).unwrap();
        fs::write(
            utility.join("config.json"),
            format!(r#"{{"Container": "{UTILITY_IMAGE}", "Port": 8085}}"#),
        )
        .unwrap();

        let zap = tools.join("tools").join("ZAP");
        fs::create_dir_all(&zap).unwrap();
        fs::write(
            zap.join("config.json"),
            format!(
                r#"{{
                    "Container": "{ZAP_IMAGE}",
                    "Shell": "/bin/bash",
                    "Run": {{ "ShellArguments": ["-c", "python3 run.py"] }},
                    "Idle": {{ "ShellArguments": ["-c", "sleep infinity"] }},
                    "EnvironmentVariables": {{ "ZAP_MODE": "scan" }}
                }}"#
            ),
        )
        .unwrap();

        Self {
            dir,
            runtime: FakeRuntime::new(),
        }
    }

    fn work(&self) -> std::path::PathBuf {
        self.dir.path().join("local")
    }

    fn config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_work_directory(self.work())
            .with_tools_directory(self.dir.path().join("tools"))
    }

    fn orchestrator(&self) -> Orchestrator<FakeRuntime> {
        Orchestrator::new(self.config(), self.runtime.clone()).unwrap()
    }

    fn spec_named(&self, prefix: &str) -> RunSpec {
        self.runtime
            .runs()
            .into_iter()
            .find(|spec| spec.name.starts_with(prefix))
            .unwrap_or_else(|| panic!("no container named {prefix}*"))
    }
}

fn job(text: &str) -> JobConfig {
    JobConfig::parse(text).unwrap()
}

fn zap_only() -> JobConfig {
    job(r#"{ "testTasks": { "tasks": [ { "toolName": "ZAP", "outputFolder": "zap" } ] } }"#)
}

fn with_target() -> JobConfig {
    job(&format!(
        r#"{{
            "testTargets": {{
                "services": [
                    {{
                        "Container": "{TARGET_IMAGE}",
                        "Shell": "/bin/sh",
                        "Run": {{ "ShellArguments": ["-c", "./serve"] }},
                        "ExpectedDurationUntilReady": "00:00:05",
                        "OutputFolder": "petstore",
                        "Ports": [8080],
                        "EnvironmentVariables": {{ "LOG_LEVEL": "debug" }}
                    }}
                ]
            }},
            "testTasks": {{ "tasks": [ {{ "toolName": "ZAP", "outputFolder": "zap" }} ] }}
        }}"#
    ))
}

fn has_mount(spec: &RunSpec, source: &Path, target: &str, read_only: bool) -> bool {
    spec.mounts.contains(&Mount {
        source: source.to_path_buf(),
        target: target.to_string(),
        read_only,
    })
}

#[tokio::test(start_paused = true)]
async fn task_exit_completes_the_job() {
    let fixture = Fixture::new();
    fixture.runtime.exits_after(ZAP_IMAGE, 1, 0);
    let mut orchestrator = fixture.orchestrator();

    let report = orchestrator.new_job(with_target()).await.unwrap();

    let records = report.exit_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].exit_code, 0);
    assert_eq!(records[0].status, "exited");
    assert!(records[0].name.starts_with("kestrel-ZAP-"));
    assert!(fixture.runtime.leftovers().is_empty());

    let work_dir = format!("/work_dir_{}", report.job_id);
    let task = fixture.spec_named("kestrel-ZAP-");
    assert_eq!(task.name, format!("kestrel-ZAP-{}-1", report.job_id));
    assert_eq!(task.env_value("RAFT_STARTUP_DELAY"), Some("5"));
    assert_eq!(task.env_value("RAFT_TASK_INDEX"), Some("1"));
    assert_eq!(task.env_value("RAFT_AGENT_UTILITIES_URL"), Some("http://localhost:8085"));
    assert_eq!(task.env_value("RAFT_TOOL_RUN_DIRECTORY"), Some("/raft-tools/tools/ZAP"));
    assert_eq!(task.env_value("RAFT_POST_RUN_COMMAND"), Some(""));
    assert_eq!(task.env_value("ZAP_MODE"), Some("scan"));
    assert_eq!(task.env_value("RAFT_JOB_ID"), Some(report.job_id.as_str()));
    assert_eq!(
        task.command,
        Some(vec!["/bin/bash".to_string(), format!("{work_dir}/task-run.sh")])
    );

    let output = fixture.work().join("storage").join(&report.job_id).join("zap");
    assert_eq!(
        fs::read_to_string(output.join("task-run.sh")).unwrap(),
        r#"/bin/bash "-c" "python3 run.py""#
    );
    assert!(output.join("task-config.json").is_file());
    assert!(has_mount(&task, &output, &work_dir, false));

    let target = fixture.spec_named("kestrel-service-");
    assert_eq!(target.env_value("RAFT_TASK_INDEX"), Some("0"));
    assert_eq!(target.env_value("RAFT_STARTUP_DELAY"), Some("5"));
    assert_eq!(target.env_value("LOG_LEVEL"), Some("debug"));
    assert_eq!(
        target.env_value("RAFT_RUN_CMD"),
        Some(format!("/bin/sh {work_dir}/task-run.sh").as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn idling_task_gets_the_idle_command_without_delay() {
    let fixture = Fixture::new();
    fixture.runtime.exits_after(ZAP_IMAGE, 0, 0);
    let mut orchestrator = fixture.orchestrator();

    let config = job(r#"{
        "testTargets": { "services": [ { "Container": "petstore:latest", "ExpectedDurationUntilReady": "00:01:00", "OutputFolder": "petstore" } ] },
        "testTasks": { "tasks": [ { "toolName": "ZAP", "outputFolder": "zap", "isIdling": true } ] }
    }"#);
    let report = orchestrator.new_job(config).await.unwrap();

    let task = fixture.spec_named("kestrel-ZAP-");
    assert_eq!(task.env_value("RAFT_STARTUP_DELAY"), Some("0"));
    let output = fixture.work().join("storage").join(&report.job_id).join("zap");
    assert_eq!(
        fs::read_to_string(output.join("task-run.sh")).unwrap(),
        r#"/bin/bash "-c" "sleep infinity""#
    );

    let target = fixture.spec_named("kestrel-service-");
    assert_eq!(target.command, None);
    assert_eq!(target.env_value("RAFT_RUN_CMD"), Some(""));
}

#[tokio::test(start_paused = true)]
async fn duration_budget_times_out_and_cleans_up() {
    let fixture = Fixture::new();
    let mut orchestrator = fixture.orchestrator();
    let started = tokio::time::Instant::now();

    let report = orchestrator
        .new_job(zap_only().with_duration(Duration::from_secs(10)))
        .await
        .unwrap();

    assert_eq!(report.outcome, JobOutcome::TimedOut);
    assert!(report.exit_records().is_none());
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(fixture.runtime.leftovers().is_empty());
    assert!(fixture.runtime.is_stopped(&fixture.spec_named("kestrel-ZAP-").name));
}

#[tokio::test(start_paused = true)]
async fn crashed_target_aborts_the_job() {
    let fixture = Fixture::new();
    fixture
        .runtime
        .exits_after(TARGET_IMAGE, 1, 1)
        .log_lines(TARGET_IMAGE, ["listening on 8080", "panic: out of memory"]);
    let mut orchestrator = fixture.orchestrator();

    let err = orchestrator.new_job(with_target()).await.unwrap_err();

    let target = fixture.spec_named("kestrel-service-");
    match err {
        OrchestratorError::DependencyExited { container } => assert_eq!(container, target.name),
        other => panic!("unexpected error: {other}"),
    }
    let task = fixture.spec_named("kestrel-ZAP-");
    assert!(fixture.runtime.is_stopped(&task.name));
    assert!(fixture.runtime.leftovers().is_empty());

    let calls = fixture.runtime.calls();
    let logs = calls
        .iter()
        .position(|call| *call == RuntimeCall::Logs(target.name.clone(), CRASH_LOG_LINES))
        .expect("crash log tail was read");
    let removed = calls
        .iter()
        .position(|call| matches!(call, RuntimeCall::Remove(names) if names.contains(&target.name)))
        .unwrap();
    assert!(logs < removed);
}

#[tokio::test(start_paused = true)]
async fn crashed_sidecar_aborts_the_job() {
    let fixture = Fixture::new();
    fixture
        .runtime
        .exits_after(UTILITY_IMAGE, 1, 1)
        .log_lines(UTILITY_IMAGE, ["bind: address already in use"]);
    let mut orchestrator = fixture.orchestrator();

    let err = orchestrator.new_job(zap_only()).await.unwrap_err();

    let utility = fixture.spec_named("kestrel-agent-utilities-");
    match err {
        OrchestratorError::DependencyExited { container } => assert_eq!(container, utility.name),
        other => panic!("unexpected error: {other}"),
    }
    let task = fixture.spec_named("kestrel-ZAP-");
    assert!(fixture.runtime.is_stopped(&task.name));
    assert!(fixture.runtime.leftovers().is_empty());
    assert!(
        fixture
            .runtime
            .calls()
            .contains(&RuntimeCall::Logs(utility.name, CRASH_LOG_LINES))
    );
}

#[tokio::test(start_paused = true)]
async fn stop_failures_do_not_block_removal() {
    let fixture = Fixture::new();
    fixture.runtime.exits_after(ZAP_IMAGE, 0, 3).fail_stop();
    let config = fixture.config().with_network(NetworkKind::Bridge);
    let mut orchestrator = Orchestrator::new(config, fixture.runtime.clone()).unwrap();

    let report = orchestrator.new_job(with_target()).await.unwrap();

    assert_eq!(report.exit_records().unwrap()[0].exit_code, 3);
    assert!(fixture.runtime.leftovers().is_empty());
    assert!(fixture.runtime.networks().is_empty());

    let bridge = format!("kestrel-{}", report.job_id.replace('-', ""));
    let calls = fixture.runtime.calls();
    assert!(calls.contains(&RuntimeCall::CreateNetwork(NetworkKind::Bridge, bridge.clone())));
    assert_eq!(
        calls.last(),
        Some(&RuntimeCall::RemoveNetwork(NetworkHandle::Bridge(bridge.clone())))
    );

    let utility = fixture.spec_named("kestrel-agent-utilities-");
    let task = fixture.spec_named("kestrel-ZAP-");
    assert_eq!(
        task.env_value("RAFT_AGENT_UTILITIES_URL"),
        Some(format!("http://{}:8085", utility.name).as_str())
    );
    assert_eq!(task.network, Some(NetworkHandle::Bridge(bridge)));
    assert_eq!(fixture.spec_named("kestrel-service-").ports, vec![8080]);
}

#[tokio::test(start_paused = true)]
async fn utility_pull_failure_skips_startup() {
    let fixture = Fixture::new();
    fixture.runtime.fail_pull(UTILITY_IMAGE);
    let config = fixture.config().with_network(NetworkKind::Bridge);
    let mut orchestrator = Orchestrator::new(config, fixture.runtime.clone()).unwrap();

    let err = orchestrator.new_job(zap_only()).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Runtime(_)), "{err}");
    assert!(fixture.runtime.runs().is_empty());
    assert!(fixture.runtime.networks().is_empty());
    assert!(matches!(
        fixture.runtime.calls().as_slice(),
        [
            RuntimeCall::CreateNetwork(..),
            RuntimeCall::Pull(_),
            RuntimeCall::RemoveNetwork(_)
        ]
    ));
}

#[tokio::test(start_paused = true)]
async fn unknown_tool_fails_before_anything_starts() {
    let fixture = Fixture::new();
    let mut orchestrator = fixture.orchestrator();

    let config = job(r#"{ "testTasks": { "tasks": [ { "toolName": "Nope", "outputFolder": "x" } ] } }"#);
    let err = orchestrator.new_job(config).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::ToolNotFound(ref tool) if tool == "Nope"));
    assert!(fixture.runtime.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn secrets_reach_the_sidecar_and_the_task() {
    let fixture = Fixture::new();
    fixture.runtime.exits_after(ZAP_IMAGE, 0, 0);
    let mut orchestrator = fixture.orchestrator();
    let secret = orchestrator.workspace().secret_path("Token");
    fs::write(&secret, "s3cret\n").unwrap();

    let config = job(r#"{ "testTasks": { "tasks": [ { "toolName": "ZAP", "outputFolder": "zap", "keyVaultSecrets": ["Token"] } ] } }"#);
    orchestrator.new_job(config).await.unwrap();

    let utility = fixture.spec_named("kestrel-agent-utilities-");
    assert_eq!(utility.env_value("RAFT_Token"), Some("s3cret"));
    assert_eq!(utility.env_value("ASPNETCORE_URLS"), Some("http://*:8085"));

    let task = fixture.spec_named("kestrel-ZAP-");
    assert_eq!(task.env_value("RAFT_Token"), Some("s3cret"));
    assert!(has_mount(&task, &secret, "/raft-secrets/Token", true));
}

#[tokio::test(start_paused = true)]
async fn post_run_hooks_run_between_task_and_target_stop() {
    let fixture = Fixture::new();
    fixture.runtime.exits_after(ZAP_IMAGE, 0, 0);
    let mut orchestrator = fixture.orchestrator();
    let started = tokio::time::Instant::now();

    let config = job(&format!(
        r#"{{
            "testTargets": {{ "services": [ {{
                "Container": "{TARGET_IMAGE}",
                "Shell": "/bin/sh",
                "OutputFolder": "petstore",
                "PostRun": {{ "ShellArguments": ["-c", "cp app.log ."], "ExpectedRunDuration": "00:00:30" }}
            }} ] }},
            "testTasks": {{ "tasks": [ {{ "toolName": "ZAP", "outputFolder": "zap" }} ] }}
        }}"#
    ));
    let report = orchestrator.new_job(config).await.unwrap();

    let work_dir = format!("/work_dir_{}", report.job_id);
    let target = fixture.spec_named("kestrel-service-").name;
    let task = fixture.spec_named("kestrel-ZAP-").name;
    let hook = vec!["/bin/sh".to_string(), format!("{work_dir}/task-post-run.sh")];

    let calls = fixture.runtime.calls();
    let position = |wanted: &RuntimeCall| calls.iter().position(|c| c == wanted).unwrap();
    let stop_tasks = position(&RuntimeCall::Stop(vec![task]));
    let exec = position(&RuntimeCall::Exec(target.clone(), hook));
    let stop_target = position(&RuntimeCall::Stop(vec![target]));
    assert!(stop_tasks < exec && exec < stop_target);
    assert!(started.elapsed() >= Duration::from_secs(30));

    let output = fixture.work().join("storage").join(&report.job_id).join("petstore");
    assert_eq!(
        fs::read_to_string(output.join("task-post-run.sh")).unwrap(),
        r#"/bin/sh "-c" "cp app.log .""#
    );
    assert_eq!(
        fixture.spec_named("kestrel-service-").env_value("RAFT_POST_RUN_COMMAND"),
        Some(format!("/bin/sh {work_dir}/task-post-run.sh").as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_job() {
    let fixture = Fixture::new();
    let mut orchestrator = fixture.orchestrator();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });

    let report = orchestrator
        .new_job_with_cancel(zap_only(), cancel)
        .await
        .unwrap();

    assert_eq!(report.outcome, JobOutcome::Stopped);
    assert!(fixture.runtime.leftovers().is_empty());
}

#[derive(Clone, Default)]
struct Recorder {
    sent: Arc<Mutex<Vec<(String, &'static str)>>>,
}

impl EventPublisher for Recorder {
    async fn publish(
        &self,
        url: &str,
        event: &JobEvent,
        _metadata: Option<&Map<String, Value>>,
    ) -> Result<(), PublishError> {
        self.sent
            .lock()
            .unwrap()
            .push((url.to_string(), event.event_type()));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn events_are_aggregated_and_forwarded() {
    let fixture = Fixture::new();
    fixture
        .runtime
        .exits_after(ZAP_IMAGE, 1, 0)
        .emit(
            ZAP_IMAGE,
            r#"{"EventType": "JobStatus", "Message": {"Tool": "ZAP", "JobId": "j", "AgentName": "j_0", "State": "Running", "UtcEventTime": "2026-03-01T10:00:00Z"}}"#,
        )
        .emit(
            ZAP_IMAGE,
            r#"{"EventType": "BugFound", "Message": {"Tool": "ZAP", "JobId": "j", "AgentName": "j_0", "BugDetails": {"Severity": "High"}}}"#,
        );
    let recorder = Recorder::default();
    let config = fixture.config().with_webhooks(WebhookTargets {
        job_status: Some("http://hooks/status".into()),
        bug_found: Some("http://hooks/bugs".into()),
    });
    let mut orchestrator = Orchestrator::new(config, fixture.runtime.clone())
        .unwrap()
        .with_publisher(recorder.clone());

    let report = orchestrator.new_job(zap_only()).await.unwrap();

    assert_eq!(report.statuses.len(), 1);
    assert_eq!(report.statuses[0].state, "Running");
    assert_eq!(report.bugs.len(), 1);
    assert_eq!(orchestrator.aggregator().bug_counts().get("ZAP"), Some(&1));
    assert_eq!(orchestrator.job_status(&report.job_id), report.statuses);

    let sent = recorder.sent.lock().unwrap().clone();
    assert_eq!(
        sent,
        vec![
            ("http://hooks/status".to_string(), "JobStatus"),
            ("http://hooks/bugs".to_string(), "BugFound"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn status_of_another_job_is_read_separately() {
    let fixture = Fixture::new();
    fixture.runtime.exits_after(ZAP_IMAGE, 1, 0).emit(
        ZAP_IMAGE,
        r#"{"EventType": "JobStatus", "Message": {"Tool": "ZAP", "JobId": "j", "AgentName": "j_0", "State": "Running", "UtcEventTime": "2026-03-01T10:00:00Z"}}"#,
    );
    let mut orchestrator = fixture.orchestrator();
    let report = orchestrator.new_job(zap_only()).await.unwrap();

    let other = orchestrator.workspace().job_events("other");
    fs::create_dir_all(&other).unwrap();
    fs::write(
        other.join("status.json"),
        r#"{"EventType": "JobStatus", "Message": {"Tool": "ZAP", "JobId": "other", "AgentName": "other_0", "State": "Completed", "UtcEventTime": "2026-03-01T10:00:00Z"}}"#,
    )
    .unwrap();

    let statuses = orchestrator.job_status("other");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].agent_name, "other_0");
    assert_eq!(statuses[0].state, "Completed");

    assert_eq!(orchestrator.aggregator().statuses().count(), 1);
    assert_eq!(orchestrator.job_status(&report.job_id), report.statuses);
}

#[tokio::test(start_paused = true)]
async fn root_file_share_nests_the_output() {
    let fixture = Fixture::new();
    fixture.runtime.exits_after(ZAP_IMAGE, 0, 0);
    let mut orchestrator = fixture.orchestrator();

    let config = job(r#"{
        "rootFileShare": "nightly",
        "readWriteFileShareMounts": [ { "FileShareName": "replay", "MountPath": "/replay" } ],
        "testTasks": { "tasks": [ { "toolName": "ZAP", "outputFolder": "zap" } ] }
    }"#);
    let report = orchestrator.new_job(config).await.unwrap();

    let storage = fixture.work().join("storage");
    assert!(storage.join("nightly").join(&report.job_id).join("zap").is_dir());
    let task = fixture.spec_named("kestrel-ZAP-");
    assert!(has_mount(&task, &storage.join("replay"), "/replay", false));
}

#[yare::parameterized(
    host   = { NetworkKind::Host,   "host" },
    bridge = { NetworkKind::Bridge, "kestrel-" },
)]
#[test_macro(tokio::test(start_paused = true))]
async fn containers_join_the_job_network(kind: NetworkKind, prefix: &str) {
    let fixture = Fixture::new();
    fixture.runtime.exits_after(ZAP_IMAGE, 0, 0);
    let config = fixture.config().with_network(kind);
    let mut orchestrator = Orchestrator::new(config, fixture.runtime.clone()).unwrap();

    orchestrator.new_job(with_target()).await.unwrap();

    for spec in fixture.runtime.runs() {
        let network = spec.network.unwrap();
        assert!(network.name().starts_with(prefix), "{}", spec.name);
    }
}
