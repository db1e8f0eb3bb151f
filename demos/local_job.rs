//! # Local Job Example
//!
//! Runs one job document against the local Docker daemon and prints the exit records.
//!
//! ## Requirements
//!
//! - A running Docker daemon.
//! - A tools directory holding an `agent-utilities` descriptor and one descriptor per tool the job uses.
//!
//! Optional environment variables:
//! - `KESTREL_WORK_DIR`, `KESTREL_TOOLS_DIR`: defaults are `./local` and `./tools`.
//! - `KESTREL_NETWORK`: `host` (default) or `bridge`.
//! - `KESTREL_JOB_STATUS_WEBHOOK_URL`, `KESTREL_BUG_FOUND_WEBHOOK_URL`: notification receivers.
//!
//! ## Usage
//!
//! ```sh
//! cargo run --example local_job --features "docker webhook" -- job.json port=8080
//! ```
//!
//! Every `key=value` argument after the job file replaces `{key}` in the document.

use anyhow::Context;
use kestrel::prelude::*;
use std::env;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Args
    let mut args = env::args().skip(1);
    let path = args.next().context("usage: local_job <job.json> [key=value ...]")?;
    let substitutions: Substitutions = args
        .filter_map(|arg| {
            arg.split_once('=')
                .map(|(key, value)| (format!("{{{key}}}"), value.to_string()))
        })
        .collect();
    let job = JobConfig::load(&path, &substitutions)
        .with_context(|| format!("cannot load job '{path}'"))?;

    // Providers
    let runtime = DockerRuntime::connect_local().await?;
    runtime.init().await?;
    let publisher = WebhookClient::new();

    // Build
    let config = OrchestratorConfig::from_env()?;
    let mut orchestrator = Orchestrator::new(config, runtime)?.with_publisher(publisher);

    // Ctrl-C stops the job and still tears it down
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    // Run
    let report = orchestrator.new_job_with_cancel(job, cancel).await?;
    tracing::info!(job_id = %report.job_id, outcome = ?report.outcome, bugs = report.bugs.len(), "Job done");
    if let Some(records) = report.exit_records() {
        println!("{}", serde_json::to_string_pretty(records)?);
    }
    Ok(())
}
