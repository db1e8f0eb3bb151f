use crate::context::OrchestratorConfig;
use crate::dispatch::WebhookDispatcher;
use crate::error::OrchestratorError;
use crate::sink::{EventAggregator, FileEventSink};
use crate::state::{Job, JobState, PostRunHook};
use crate::workspace::{self, LocalWorkspace};
use kestrel_core::config::{JobConfig, ServiceSpec, TaskSpec};
use kestrel_core::constants::{env, paths};
use kestrel_core::events::{BugFound, JobStatus};
use kestrel_core::job::*;
use kestrel_core::tools::{ToolDescriptor, ToolRegistry};
use kestrel_core::traits::{ContainerRuntime, EventPublisher, NoPublisher};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Log lines shown for a target or sidecar that exited early.
pub const CRASH_LOG_LINES: usize = 64;

/// How a job ended, when it ended without an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every task exited. One record per task, in start order.
    Completed(Vec<ExitRecord>),
    /// The duration budget ran out first.
    TimedOut,
    /// The caller cancelled the job.
    Stopped,
}

#[derive(Clone, Debug)]
pub struct JobReport {
    pub job_id: String,
    pub outcome: JobOutcome,
    /// Latest status of every agent.
    pub statuses: Vec<JobStatus>,
    pub bugs: Vec<BugFound>,
}

impl JobReport {
    pub fn exit_records(&self) -> Option<&[ExitRecord]> {
        match &self.outcome {
            JobOutcome::Completed(records) => Some(records),
            _ => None,
        }
    }
}

/// Runs jobs against a container backend, one at a time.
///
/// ```no_run
/// use kestrel_core::config::JobConfig;
/// use kestrel_core::fake::FakeRuntime;
/// use kestrel_orchestrator::prelude::*;
///
/// # async fn run(job: JobConfig) -> Result<(), OrchestratorError> {
/// let mut orchestrator = Orchestrator::new(OrchestratorConfig::default(), FakeRuntime::new())?;
/// let report = orchestrator.new_job(job).await?;
/// println!("{:?}", report.exit_records());
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator<R, P = NoPublisher> {
    config: OrchestratorConfig,
    runtime: R,
    publisher: P,
    tools: ToolRegistry,
    workspace: LocalWorkspace,
    aggregator: EventAggregator,
    /// Id of the job `aggregator` belongs to.
    last_job: Option<String>,
}

impl<R: ContainerRuntime> Orchestrator<R, NoPublisher> {
    /// Prepares the local workspace and loads every tool descriptor.
    ///
    /// Both directories are made absolute first, since they are bind-mounted into containers.
    pub fn new(mut config: OrchestratorConfig, runtime: R) -> Result<Self, OrchestratorError> {
        config.work_directory = std::path::absolute(&config.work_directory)?;
        config.tools_directory = std::path::absolute(&config.tools_directory)?;
        let workspace = LocalWorkspace::init(&config.work_directory)?;
        let tools = ToolRegistry::load(&config.tools_directory)?;
        info!(tools = tools.len(), root = %tools.root().display(), "Loaded tool descriptors");

        Ok(Self {
            config,
            runtime,
            publisher: NoPublisher,
            tools,
            workspace,
            aggregator: EventAggregator::default(),
            last_job: None,
        })
    }
}

impl<R: ContainerRuntime, P: EventPublisher> Orchestrator<R, P> {
    pub fn with_publisher<Q: EventPublisher>(self, publisher: Q) -> Orchestrator<R, Q> {
        Orchestrator {
            config: self.config,
            runtime: self.runtime,
            publisher,
            tools: self.tools,
            workspace: self.workspace,
            aggregator: self.aggregator,
            last_job: self.last_job,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn workspace(&self) -> &LocalWorkspace {
        &self.workspace
    }

    /// Events collected by the most recent job, kept after it ends, including when it failed.
    pub fn aggregator(&self) -> &EventAggregator {
        &self.aggregator
    }

    /// Drains a job's pending events and returns the latest status of each agent.
    ///
    /// Events of the most recent job are added to [`Orchestrator::aggregator`]. Any other job is
    /// read into a fresh aggregator, so the statuses of two jobs never mix.
    pub fn job_status(&mut self, job_id: &str) -> Vec<JobStatus> {
        let mut sink = FileEventSink::new(self.workspace.job_events(job_id));
        if self.last_job.as_deref() == Some(job_id) {
            self.aggregator.drain(&mut sink);
            return self.aggregator.statuses().cloned().collect();
        }
        let mut aggregator = EventAggregator::new();
        aggregator.drain(&mut sink);
        aggregator.statuses().cloned().collect()
    }

    /// Runs a job to its end. See [`Orchestrator::new_job_with_cancel`].
    pub async fn new_job(&mut self, config: JobConfig) -> Result<JobReport, OrchestratorError> {
        self.new_job_with_cancel(config, CancellationToken::new()).await
    }

    /// Starts every container of the job, waits for the tasks and always tears down.
    ///
    /// Resolves once the job reaches a terminal state. Firing `cancel` stops the job at the next
    /// poll.
    pub async fn new_job_with_cancel(
        &mut self,
        config: JobConfig,
        cancel: CancellationToken,
    ) -> Result<JobReport, OrchestratorError> {
        self.aggregator = EventAggregator::default();
        self.resolve_tools(&config)?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let dirs = self
            .workspace
            .create_job(&job_id, config.root_file_share.as_deref())?;
        self.last_job = Some(job_id.clone());
        let tasks = self.resolve_tools(&config)?;
        let mut job = Job::new(job_id, dirs, config.duration);
        info!(job_id = %job.id, results = %job.output_dir().display(), "Creating job");

        let result = match self.start(&mut job, &config, &tasks).await {
            Ok(()) => self.monitor(&mut job, &config, &cancel).await,
            Err(e) => Err(e),
        };

        let terminal = match &result {
            Ok(JobOutcome::Completed(_)) => JobState::Completed,
            Ok(JobOutcome::TimedOut) => JobState::TimedOut,
            Ok(JobOutcome::Stopped) => JobState::ManuallyStopped,
            Err(e) => {
                error!(job_id = %job.id, "Job failed: {}", e);
                JobState::Error
            }
        };
        job.transition(terminal);

        self.drain(&mut job);
        WebhookDispatcher::new(&self.publisher, &self.config.webhooks, config.metadata())
            .bugs(&self.aggregator)
            .await;

        self.teardown(&mut job).await;
        job.transition(JobState::Done);

        let outcome = result?;
        Ok(JobReport {
            job_id: job.id,
            outcome,
            statuses: self.aggregator.statuses().cloned().collect(),
            bugs: self.aggregator.bugs().to_vec(),
        })
    }

    /// Looks up every descriptor a job needs before anything is started.
    fn resolve_tools<'a>(
        &'a self,
        config: &'a JobConfig,
    ) -> Result<Vec<(&'a TaskSpec, &'a ToolDescriptor)>, OrchestratorError> {
        self.utility()?;
        config
            .tasks()
            .iter()
            .map(|task| {
                let descriptor = self
                    .tools
                    .get(&task.tool_name)
                    .ok_or_else(|| OrchestratorError::ToolNotFound(task.tool_name.clone()))?;
                let command = if task.is_idling {
                    &descriptor.idle
                } else {
                    &descriptor.run
                };
                if command.is_none() {
                    return Err(OrchestratorError::InvalidTool {
                        tool: task.tool_name.clone(),
                        reason: format!(
                            "no {} command",
                            if task.is_idling { "idle" } else { "run" }
                        ),
                    });
                }
                Ok((task, descriptor))
            })
            .collect()
    }

    fn utility(&self) -> Result<(&ToolDescriptor, u16), OrchestratorError> {
        let name = &self.config.utility_tool;
        let descriptor = self
            .tools
            .get(name)
            .ok_or_else(|| OrchestratorError::ToolNotFound(name.clone()))?;
        let port = descriptor.port.ok_or_else(|| OrchestratorError::InvalidTool {
            tool: name.clone(),
            reason: "no port".into(),
        })?;
        Ok((descriptor, port))
    }

    async fn start(
        &self,
        job: &mut Job,
        config: &JobConfig,
        tasks: &[(&TaskSpec, &ToolDescriptor)],
    ) -> Result<(), OrchestratorError> {
        let bridge = format!("kestrel-{}", job.id.replace('-', ""));
        job.network = Some(self.runtime.create_network(self.config.network, &bridge).await?);
        job.transition(JobState::NetworkReady);

        self.start_utility(job, config).await?;
        job.transition(JobState::UtilityRunning);

        job.transition(JobState::TargetsStarting);
        let next_index = self.start_targets(job, config).await?;
        job.transition(JobState::TargetsReady);

        self.start_tasks(job, config, tasks, next_index).await?;
        job.transition(JobState::TasksRunning);
        Ok(())
    }

    fn network(job: &Job) -> NetworkHandle {
        job.network.clone().unwrap_or(NetworkHandle::Host)
    }

    fn common_env(&self, job: &Job) -> Vec<(String, String)> {
        vec![
            (env::JOB_ID.into(), job.id.clone()),
            (env::CONTAINER_GROUP_NAME.into(), job.id.clone()),
            (env::WORK_DIRECTORY.into(), job.work_dir.clone()),
            (env::SITE_HASH.into(), "0".into()),
            (env::LOCAL.into(), self.config.local_label.clone()),
        ]
    }

    fn secret_env(&self, secrets: &[String]) -> Result<Vec<(String, String)>, OrchestratorError> {
        secrets
            .iter()
            .map(|name| Ok((env::secret(name), self.workspace.read_secret(name)?)))
            .collect()
    }

    async fn start_utility(&self, job: &mut Job, config: &JobConfig) -> Result<(), OrchestratorError> {
        let (descriptor, port) = self.utility()?;
        self.runtime.pull(&descriptor.container).await?;

        let mut vars = vec![(env::UTILITY_URLS.to_string(), format!("http://*:{port}"))];
        vars.extend(self.secret_env(&config.secrets())?);

        let name = format!("kestrel-{}-{}", self.config.utility_tool, job.id);
        let network = Self::network(job);
        job.utility_url = if network.is_host() {
            format!("http://localhost:{port}")
        } else {
            format!("http://{name}:{port}")
        };

        let spec = RunSpec {
            image: descriptor.container.clone(),
            name,
            mounts: vec![
                Mount::read_write(&job.dirs.events, paths::EVENTS_SINK_MOUNT),
                Mount::read_only(self.tools.root(), paths::TOOLS_MOUNT),
            ],
            ports: Vec::new(),
            env: vars,
            network: Some(network),
            entrypoint: None,
            command: None,
        };
        job.utility = Some(self.runtime.run(spec).await?);
        info!(job_id = %job.id, url = %job.utility_url, "Utility sidecar started");
        Ok(())
    }

    /// Starts every target service. Returns the task index following the last service.
    async fn start_targets(&self, job: &mut Job, config: &JobConfig) -> Result<usize, OrchestratorError> {
        for service in config.services() {
            self.runtime.pull(&service.container).await?;
        }

        let startup_delay = config.startup_delay();
        job.post_run_grace = config.post_run_grace();

        for (index, service) in config.services().iter().enumerate() {
            let handle = self.start_target(job, service, index, startup_delay).await?;
            job.targets.push(handle);
        }
        Ok(config.services().len())
    }

    async fn start_target(
        &self,
        job: &mut Job,
        service: &ServiceSpec,
        index: usize,
        startup_delay: Duration,
    ) -> Result<ContainerHandle, OrchestratorError> {
        let output = job.dirs.task_output(&service.output_folder)?;
        let shell = service.shell.clone().unwrap_or_default();

        let (run, delay) = if service.is_idling {
            (service.idle.as_ref(), Duration::ZERO)
        } else {
            (service.run.as_ref(), startup_delay)
        };

        let mut command = None;
        let mut run_cmd = String::new();
        if let Some(run) = run {
            workspace::write_script(&output, paths::RUN_SCRIPT, &run.render(&shell))?;
            let script = format!("{}/{}", job.work_dir, paths::RUN_SCRIPT);
            run_cmd = format!("{shell} {script}");
            command = Some(vec![shell.clone(), script]);
        }

        let mut post_run_cmd = String::new();
        let mut hook = None;
        if let Some(post_run) = &service.post_run {
            workspace::write_script(&output, paths::POST_RUN_SCRIPT, &post_run.command().render(&shell))?;
            let script = format!("{}/{}", job.work_dir, paths::POST_RUN_SCRIPT);
            post_run_cmd = format!("{shell} {script}");
            hook = Some(vec![shell.clone(), script]);
        }

        let mut vars = self.common_env(job);
        vars.extend([
            (env::TASK_INDEX.to_string(), index.to_string()),
            (env::CONTAINER_NAME.to_string(), format!("{}_{index}", job.id)),
            (env::RUN_CMD.to_string(), run_cmd),
            (env::POST_RUN_COMMAND.to_string(), post_run_cmd),
            (env::CONTAINER_SHELL.to_string(), shell),
            (env::STARTUP_DELAY.to_string(), delay.as_secs().to_string()),
        ]);
        vars.extend(service.environment_variables.clone());

        let spec = RunSpec {
            image: service.container.clone(),
            name: format!("kestrel-service-{}-{index}", job.id),
            mounts: vec![Mount::read_write(&output, &job.work_dir)],
            ports: service.ports.clone(),
            env: vars,
            network: Some(Self::network(job)),
            entrypoint: None,
            command,
        };
        let handle = self.runtime.run(spec).await?;
        if let Some(command) = hook {
            job.post_run.push(PostRunHook {
                container: handle.clone(),
                command,
            });
        }
        debug!(job_id = %job.id, container = %handle, "Target service started");
        Ok(handle)
    }

    async fn start_tasks(
        &self,
        job: &mut Job,
        config: &JobConfig,
        tasks: &[(&TaskSpec, &ToolDescriptor)],
        first_index: usize,
    ) -> Result<(), OrchestratorError> {
        for (_, descriptor) in tasks {
            self.runtime.pull(&descriptor.container).await?;
        }

        let startup_delay = config.startup_delay();
        for (offset, (task, descriptor)) in tasks.iter().enumerate() {
            let index = first_index + offset;
            let spec = self.task_spec(job, config, task, descriptor, index, startup_delay)?;
            let handle = self.runtime.run(spec).await?;
            debug!(job_id = %job.id, container = %handle, tool = %task.tool_name, "Task started");
            job.tasks.push(handle);
        }
        Ok(())
    }

    fn task_spec(
        &self,
        job: &Job,
        config: &JobConfig,
        task: &TaskSpec,
        descriptor: &ToolDescriptor,
        index: usize,
        startup_delay: Duration,
    ) -> Result<RunSpec, OrchestratorError> {
        let output = job.dirs.task_output(&task.output_folder)?;
        let events = job.dirs.task_events(&task.output_folder)?;
        let shell = &descriptor.shell;

        let (run, delay) = if task.is_idling {
            (descriptor.idle.as_ref(), Duration::ZERO)
        } else {
            (descriptor.run.as_ref(), startup_delay)
        };
        let body = run.map(|c| c.render(shell)).unwrap_or_default();
        workspace::write_script(&output, paths::RUN_SCRIPT, &body)?;
        workspace::write_task_config(&output, &task.config_document(config))?;

        let script = format!("{}/{}", job.work_dir, paths::RUN_SCRIPT);

        let mut mounts = vec![
            Mount::read_write(&output, &job.work_dir),
            Mount::read_write(&events, paths::EVENTS_SINK_MOUNT),
            Mount::read_only(self.tools.root(), paths::TOOLS_MOUNT),
        ];
        mounts.extend(task.secrets.iter().map(|name| {
            Mount::read_only(
                self.workspace.secret_path(name),
                format!("{}/{name}", paths::SECRETS_MOUNT),
            )
        }));
        let storage = self.workspace.storage();
        mounts.extend(config.read_only_file_share_mounts.iter().map(|share| {
            Mount::read_only(storage.join(&share.file_share_name), &share.mount_path)
        }));
        mounts.extend(config.read_write_file_share_mounts.iter().map(|share| {
            Mount::read_write(storage.join(&share.file_share_name), &share.mount_path)
        }));

        let mut vars = self.common_env(job);
        vars.extend(descriptor.environment_variables.clone());
        vars.extend([
            (env::AGENT_UTILITIES_URL.to_string(), job.utility_url.clone()),
            (env::TASK_INDEX.to_string(), index.to_string()),
            (env::CONTAINER_NAME.to_string(), format!("{}_{index}", job.id)),
            (env::STARTUP_DELAY.to_string(), delay.as_secs().to_string()),
            (env::RUN_CMD.to_string(), format!("{shell} {script}")),
            (env::TOOL_RUN_DIRECTORY.to_string(), descriptor.run_directory()),
            (env::POST_RUN_COMMAND.to_string(), String::new()),
            (env::CONTAINER_SHELL.to_string(), shell.clone()),
        ]);
        vars.extend(self.secret_env(&task.secrets)?);

        Ok(RunSpec {
            image: descriptor.container.clone(),
            name: format!("kestrel-{}-{}-{index}", task.tool_name, job.id),
            mounts,
            ports: Vec::new(),
            env: vars,
            network: Some(Self::network(job)),
            entrypoint: None,
            command: Some(vec![shell.clone(), script]),
        })
    }

    fn drain(&mut self, job: &mut Job) -> usize {
        self.aggregator.drain(&mut job.sink)
    }

    async fn monitor(
        &mut self,
        job: &mut Job,
        config: &JobConfig,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, OrchestratorError> {
        job.transition(JobState::Monitoring);
        let poll = self.config.poll_interval;
        let mut budget = job.budget;
        let dependencies = job.dependencies();

        let mut cycle = 0u64;
        loop {
            cycle += 1;
            if cancel.is_cancelled() {
                info!(job_id = %job.id, "Job cancelled");
                return Ok(JobOutcome::Stopped);
            }

            if !dependencies.is_empty() {
                let infos = self.runtime.inspect(&dependencies).await?;
                let exited: Vec<ContainerInfo> =
                    infos.into_iter().filter(|info| !info.running).collect();
                if let Some(first) = exited.first() {
                    for info in &exited {
                        self.log_tail(job, &ContainerHandle::new(&info.name)).await;
                    }
                    return Err(OrchestratorError::DependencyExited {
                        container: first.name.clone(),
                    });
                }
            }

            let infos = self.runtime.inspect(&job.tasks).await?;
            if infos.iter().all(|info| !info.running) {
                self.drain(job);
                self.aggregator.log_statuses();
                let records: Vec<ExitRecord> = infos.into_iter().map(ExitRecord::from).collect();
                for record in &records {
                    info!(job_id = %job.id, container = %record.name, status = %record.status, exit_code = record.exit_code, "Task exited");
                }
                return Ok(JobOutcome::Completed(records));
            }

            self.drain(job);
            self.aggregator.log_statuses();
            WebhookDispatcher::new(&self.publisher, &self.config.webhooks, config.metadata())
                .statuses(&self.aggregator)
                .await;

            debug!(job_id = %job.id, cycle, "Waiting for tasks");
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = cancel.cancelled() => {
                    info!(job_id = %job.id, "Job cancelled");
                    return Ok(JobOutcome::Stopped);
                }
            }

            if let Some(remaining) = budget.as_mut() {
                *remaining = remaining.saturating_sub(poll);
                if remaining.is_zero() {
                    warn!(job_id = %job.id, duration = ?job.budget, "Job run exceeded its duration");
                    return Ok(JobOutcome::TimedOut);
                }
            }
        }
    }

    async fn log_tail(&self, job: &Job, container: &ContainerHandle) {
        match self.runtime.logs(container, CRASH_LOG_LINES).await {
            Ok(lines) => {
                error!(job_id = %job.id, container = %container, lines = lines.len(), "Logs of exited container follow");
                for line in lines {
                    error!(container = %container, "{}", line);
                }
            }
            Err(e) => warn!(job_id = %job.id, container = %container, "Cannot read logs: {}", e),
        }
    }

    /// Releases everything the job started. Every step runs even when an earlier one failed.
    async fn teardown(&self, job: &mut Job) {
        job.transition(JobState::TearingDown);

        if !job.tasks.is_empty()
            && let Err(e) = self.runtime.stop(&job.tasks).await
        {
            error!(job_id = %job.id, "Failed to stop task containers: {}", e);
        }

        if !job.post_run.is_empty() {
            self.run_post_run_hooks(job).await;
            if !job.post_run_grace.is_zero() {
                info!(job_id = %job.id, wait = ?job.post_run_grace, "Waiting for post-run commands to finish");
                tokio::time::sleep(job.post_run_grace).await;
            }
        }

        if !job.targets.is_empty()
            && let Err(e) = self.runtime.stop(&job.targets).await
        {
            error!(job_id = %job.id, "Failed to stop target containers: {}", e);
        }

        if let Some(utility) = &job.utility
            && let Err(e) = self.runtime.stop(std::slice::from_ref(utility)).await
        {
            error!(job_id = %job.id, "Failed to stop utility sidecar: {}", e);
        }

        let containers = job.containers();
        if !containers.is_empty()
            && let Err(e) = self.runtime.remove(&containers).await
        {
            error!(job_id = %job.id, "Failed to remove containers: {}", e);
        }

        if let Some(network) = &job.network
            && let Err(e) = self.runtime.remove_network(network).await
        {
            error!(job_id = %job.id, network = network.name(), "Failed to remove network: {}", e);
        }

        for (tool, count) in self.aggregator.bug_counts() {
            info!(job_id = %job.id, tool, bugs = count, "Bugs found");
        }
        info!(job_id = %job.id, results = %job.output_dir().display(), "Job finished");
    }

    async fn run_post_run_hooks(&self, job: &Job) {
        let containers: Vec<ContainerHandle> =
            job.post_run.iter().map(|hook| hook.container.clone()).collect();
        let infos = match self.runtime.inspect(&containers).await {
            Ok(infos) => infos,
            Err(e) => {
                warn!(job_id = %job.id, "Cannot inspect targets for post-run commands: {}", e);
                return;
            }
        };

        for (hook, info) in job.post_run.iter().zip(infos) {
            if !info.running {
                debug!(job_id = %job.id, container = %hook.container, "Skipping post-run command, target is not running");
                continue;
            }
            if let Err(e) = self.runtime.exec_in_running(&hook.container, &hook.command).await {
                error!(job_id = %job.id, container = %hook.container, "Post-run command failed: {}", e);
            }
        }
    }
}
