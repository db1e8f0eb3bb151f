//! The file-based event bus.
//!
//! Containers drop one JSON file per event into their mounted sink folder. The orchestrator is
//! the only reader: each file is deleted once it has been parsed.

use kestrel_core::events::{BugFound, JobEvent, JobStatus};
use kestrel_core::traits::EventSource;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Parse attempts after which an unreadable event file is set aside with a `.bad` extension.
pub const MAX_PARSE_ATTEMPTS: u32 = 3;

const SET_ASIDE_EXTENSION: &str = "bad";

/// Reads event files from a job's sink directory, including per-task subdirectories.
///
/// A file is deleted only once it parses. A file that does not parse may still be being written,
/// so it stays for the next drain, and is renamed after [`MAX_PARSE_ATTEMPTS`] failures.
#[derive(Clone, Debug)]
pub struct FileEventSink {
    root: PathBuf,
    failures: HashMap<PathBuf, u32>,
}

impl FileEventSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            failures: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn consume(&mut self, path: &Path) -> Option<JobEvent> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), "Failed to read event file, leaving it for the next drain: {}", e);
                return None;
            }
        };

        match JobEvent::parse(&text) {
            Ok(event) => {
                self.failures.remove(path);
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = %path.display(), "Failed to delete event file: {}", e);
                }
                Some(event)
            }
            Err(e) => {
                let attempts = self.failures.entry(path.to_path_buf()).or_default();
                *attempts += 1;
                if *attempts < MAX_PARSE_ATTEMPTS {
                    debug!(path = %path.display(), attempts = *attempts, "Event file not parsed yet: {}", e);
                    return None;
                }

                self.failures.remove(path);
                let aside = path.with_extension(SET_ASIDE_EXTENSION);
                match fs::rename(path, &aside) {
                    Ok(()) => warn!(path = %aside.display(), "Setting aside event file: {}", e),
                    Err(rename) => warn!(path = %path.display(), "Skipping event file: {} (cannot set it aside: {})", e, rename),
                }
                None
            }
        }
    }
}

fn is_set_aside(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == SET_ASIDE_EXTENSION)
}

impl EventSource for FileEventSink {
    fn drain(&mut self) -> Vec<JobEvent> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() && !is_set_aside(entry.path()) => {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => debug!(root = %self.root.display(), "Cannot walk event sink: {}", e),
            }
        }
        files.iter().filter_map(|path| self.consume(path)).collect()
    }
}

/// The latest status of every agent, and every bug reported so far.
#[derive(Clone, Debug, Default)]
pub struct EventAggregator {
    statuses: BTreeMap<String, JobStatus>,
    bugs: Vec<BugFound>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bugs are appended. A status replaces its agent's entry only when strictly newer.
    pub fn apply(&mut self, event: JobEvent) {
        match event {
            JobEvent::BugFound(bug) => self.bugs.push(bug),
            JobEvent::JobStatus(status) => match self.statuses.get(&status.agent_name) {
                Some(current) if current.utc_event_time >= status.utc_event_time => {}
                _ => {
                    self.statuses.insert(status.agent_name.clone(), status);
                }
            },
        }
    }

    /// Applies everything `source` has pending. Returns the number of events applied.
    pub fn drain(&mut self, source: &mut impl EventSource) -> usize {
        let events = source.drain();
        let count = events.len();
        for event in events {
            self.apply(event);
        }
        count
    }

    pub fn statuses(&self) -> impl Iterator<Item = &JobStatus> {
        self.statuses.values()
    }

    pub fn status(&self, agent_name: &str) -> Option<&JobStatus> {
        self.statuses.get(agent_name)
    }

    pub fn bugs(&self) -> &[BugFound] {
        &self.bugs
    }

    /// Number of bugs reported by each tool.
    pub fn bug_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for bug in &self.bugs {
            *counts.entry(bug.tool.as_str()).or_default() += 1;
        }
        counts
    }

    /// Logs the job-level status first, then one line per agent.
    pub fn log_statuses(&self) {
        for status in self.statuses().filter(|s| s.is_job_level()) {
            info!(job_id = %status.job_id, state = %status.state, "Job status");
            for (key, value) in status.details.iter().flatten() {
                info!(job_id = %status.job_id, "{}: {}", key, value);
            }
        }
        for status in self.statuses().filter(|s| !s.is_job_level()) {
            match status.metrics.as_ref().filter(|m| m.total_request_count > 0) {
                Some(metrics) => info!(
                    agent = %status.agent_name,
                    tool = %status.tool,
                    state = %status.state,
                    total_requests = metrics.total_request_count,
                    response_codes = ?metrics.response_code_counts,
                    "Agent status"
                ),
                None => info!(
                    agent = %status.agent_name,
                    tool = %status.tool,
                    state = %status.state,
                    "Agent status"
                ),
            }
            for (key, value) in status.details.iter().flatten() {
                info!(agent = %status.agent_name, "{}: {}", key, value);
            }
        }
    }
}

#[cfg(test)]
#[path = "sink_tests.rs"]
mod tests;
