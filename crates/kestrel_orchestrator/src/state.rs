use crate::sink::FileEventSink;
use crate::workspace::JobDirs;
use kestrel_core::job::{ContainerHandle, NetworkHandle};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Where a job is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Initializing,
    NetworkReady,
    UtilityRunning,
    TargetsStarting,
    TargetsReady,
    TasksRunning,
    Monitoring,
    Completed,
    TimedOut,
    ManuallyStopped,
    Error,
    TearingDown,
    Done,
}

impl JobState {
    /// Whether the job has stopped making progress and only cleanup remains.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed
                | JobState::TimedOut
                | JobState::ManuallyStopped
                | JobState::Error
                | JobState::TearingDown
                | JobState::Done
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A post-run hook of one target service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostRunHook {
    pub container: ContainerHandle,
    pub command: Vec<String>,
}

/// One run of a job: its directories, the resources it owns and its current state.
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub dirs: JobDirs,
    /// Container-side working directory, `/work_dir_<id>`.
    pub work_dir: String,
    pub network: Option<NetworkHandle>,
    pub utility: Option<ContainerHandle>,
    pub utility_url: String,
    pub targets: Vec<ContainerHandle>,
    pub tasks: Vec<ContainerHandle>,
    pub post_run: Vec<PostRunHook>,
    pub post_run_grace: Duration,
    /// [`None`] runs until every task exits.
    pub budget: Option<Duration>,
    /// Reader of `dirs.events`. Kept for the whole run so that retries of unparsed files are counted.
    pub(crate) sink: FileEventSink,
    state: JobState,
    history: Vec<JobState>,
}

impl Job {
    pub(crate) fn new(id: String, dirs: JobDirs, budget: Option<Duration>) -> Self {
        Self {
            work_dir: kestrel_core::constants::paths::work_dir(&id),
            sink: FileEventSink::new(&dirs.events),
            id,
            dirs,
            network: None,
            utility: None,
            utility_url: String::new(),
            targets: Vec::new(),
            tasks: Vec::new(),
            post_run: Vec::new(),
            post_run_grace: Duration::ZERO,
            budget,
            state: JobState::Initializing,
            history: vec![JobState::Initializing],
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Every state the job has been in, oldest first.
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    pub fn output_dir(&self) -> &Path {
        &self.dirs.output
    }

    pub(crate) fn transition(&mut self, next: JobState) {
        info!(job_id = %self.id, from = %self.state, to = %next, "Job state changed");
        self.state = next;
        self.history.push(next);
    }

    /// The containers the tasks depend on: every target, then the utility.
    pub(crate) fn dependencies(&self) -> Vec<ContainerHandle> {
        self.targets.iter().chain(self.utility.iter()).cloned().collect()
    }

    /// Every container the job started, tasks first.
    pub(crate) fn containers(&self) -> Vec<ContainerHandle> {
        self.tasks
            .iter()
            .chain(self.targets.iter())
            .chain(self.utility.iter())
            .cloned()
            .collect()
    }
}
