//! An in-memory [`ContainerRuntime`] for tests.
//!
//! Container lifetimes are scripted per image and counted in `inspect` calls, so a test driving
//! the orchestrator with paused time decides exactly which poll cycle a container exits on.

use crate::constants::paths::EVENTS_SINK_MOUNT;
use crate::error::RuntimeError;
use crate::job::*;
use crate::traits::ContainerRuntime;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Pull(String),
    CreateNetwork(NetworkKind, String),
    RemoveNetwork(NetworkHandle),
    Run(RunSpec),
    Inspect(Vec<String>),
    Stop(Vec<String>),
    Remove(Vec<String>),
    Exec(String, Vec<String>),
    Logs(String, usize),
}

/// How long a container started from an image stays up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    #[default]
    RunsForever,
    /// Reports running for the first `inspections` inspects, then exited with `exit_code`.
    ExitsAfter { inspections: u32, exit_code: i64 },
}

#[derive(Debug)]
struct FakeContainer {
    spec: RunSpec,
    lifetime: Lifetime,
    inspections: u32,
    stopped: bool,
    removed: bool,
}

impl FakeContainer {
    fn exit_code(&self) -> Option<i64> {
        match self.lifetime {
            Lifetime::ExitsAfter {
                inspections,
                exit_code,
            } if self.inspections > inspections => Some(exit_code),
            _ if self.stopped => Some(137),
            _ => None,
        }
    }

    fn info(&self) -> ContainerInfo {
        match self.exit_code() {
            Some(code) => ContainerInfo {
                name: self.spec.name.clone(),
                running: false,
                status: "exited".into(),
                exit_code: code,
                error_message: String::new(),
            },
            None => ContainerInfo {
                name: self.spec.name.clone(),
                running: true,
                status: "running".into(),
                exit_code: 0,
                error_message: String::new(),
            },
        }
    }
}

#[derive(Default)]
struct FakeState {
    calls: Vec<RuntimeCall>,
    lifetimes: HashMap<String, Lifetime>,
    events: HashMap<String, Vec<String>>,
    logs: HashMap<String, Vec<String>>,
    containers: BTreeMap<String, FakeContainer>,
    networks: HashSet<String>,
    failing_pulls: HashSet<String>,
    failing_runs: HashSet<String>,
    failing_stops: bool,
    failing_execs: bool,
}

/// Fake container runtime for testing
#[derive(Clone, Default)]
pub struct FakeRuntime {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Scripts the lifetime of every container later started from `image`.
    pub fn set_lifetime(&self, image: &str, lifetime: Lifetime) -> &Self {
        self.state().lifetimes.insert(image.to_string(), lifetime);
        self
    }

    pub fn exits_after(&self, image: &str, inspections: u32, exit_code: i64) -> &Self {
        self.set_lifetime(
            image,
            Lifetime::ExitsAfter {
                inspections,
                exit_code,
            },
        )
    }

    /// Queues an event file body. It is written into the sink of the first running container of
    /// `image` on its next inspect.
    pub fn emit(&self, image: &str, event_json: impl Into<String>) -> &Self {
        self.state()
            .events
            .entry(image.to_string())
            .or_default()
            .push(event_json.into());
        self
    }

    /// Sets the output of every container later started from `image`.
    pub fn log_lines<I, S>(&self, image: &str, lines: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines.into_iter().map(Into::into).collect();
        self.state().logs.insert(image.to_string(), lines);
        self
    }

    pub fn fail_pull(&self, image: &str) -> &Self {
        self.state().failing_pulls.insert(image.to_string());
        self
    }

    pub fn fail_run(&self, image: &str) -> &Self {
        self.state().failing_runs.insert(image.to_string());
        self
    }

    pub fn fail_stop(&self) -> &Self {
        self.state().failing_stops = true;
        self
    }

    pub fn fail_exec(&self) -> &Self {
        self.state().failing_execs = true;
        self
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    /// Every container spec passed to `run`, in start order.
    pub fn runs(&self) -> Vec<RunSpec> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                RuntimeCall::Run(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn run_spec(&self, name: &str) -> Option<RunSpec> {
        self.state().containers.get(name).map(|c| c.spec.clone())
    }

    pub fn is_stopped(&self, name: &str) -> bool {
        self.state().containers.get(name).is_some_and(|c| c.stopped)
    }

    pub fn is_removed(&self, name: &str) -> bool {
        self.state().containers.get(name).is_some_and(|c| c.removed)
    }

    /// Names of containers that were started and not removed.
    pub fn leftovers(&self) -> Vec<String> {
        self.state()
            .containers
            .iter()
            .filter(|(_, c)| !c.removed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Bridge networks created and not removed.
    pub fn networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().networks.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn inspect_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Inspect(_)))
            .count()
    }
}

fn deliver(container: &FakeContainer, events: Vec<String>) -> Result<(), RuntimeError> {
    let Some(sink) = container
        .spec
        .mounts
        .iter()
        .find(|m| m.target == EVENTS_SINK_MOUNT)
    else {
        return Ok(());
    };
    for body in events {
        let path = sink.source.join(format!("{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, body).map_err(|e| RuntimeError::new("fake emit", e))?;
    }
    Ok(())
}

impl ContainerRuntime for FakeRuntime {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Pull(image.to_string()));
        if state.failing_pulls.contains(image) {
            return Err(RuntimeError::new(
                format!("docker pull {image}"),
                "manifest unknown",
            ));
        }
        Ok(())
    }

    async fn create_network(
        &self,
        kind: NetworkKind,
        name: &str,
    ) -> Result<NetworkHandle, RuntimeError> {
        let mut state = self.state();
        state
            .calls
            .push(RuntimeCall::CreateNetwork(kind, name.to_string()));
        match kind {
            NetworkKind::Host => Ok(NetworkHandle::Host),
            NetworkKind::Bridge => {
                state.networks.insert(name.to_string());
                Ok(NetworkHandle::Bridge(name.to_string()))
            }
        }
    }

    async fn remove_network(&self, network: &NetworkHandle) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::RemoveNetwork(network.clone()));
        if let NetworkHandle::Bridge(name) = network {
            state.networks.remove(name);
        }
        Ok(())
    }

    async fn run(&self, spec: RunSpec) -> Result<ContainerHandle, RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Run(spec.clone()));
        if state.failing_runs.contains(&spec.image) {
            return Err(RuntimeError::new(
                format!("docker run {}", spec.image),
                "container failed to start",
            ));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::new(
                format!("docker run --name {}", spec.name),
                "name already in use",
            ));
        }

        let lifetime = state.lifetimes.get(&spec.image).copied().unwrap_or_default();
        let handle = ContainerHandle::new(&spec.name);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec,
                lifetime,
                inspections: 0,
                stopped: false,
                removed: false,
            },
        );
        Ok(handle)
    }

    async fn inspect(
        &self,
        containers: &[ContainerHandle],
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut state = self.state();
        let names: Vec<String> = containers.iter().map(|c| c.0.clone()).collect();
        state.calls.push(RuntimeCall::Inspect(names.clone()));

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            let Some(container) = state.containers.get_mut(&name).filter(|c| !c.removed) else {
                return Err(RuntimeError::new(
                    format!("docker inspect {name}"),
                    "No such container",
                ));
            };
            container.inspections += 1;
            let info = container.info();
            let image = container.spec.image.clone();

            if info.running
                && let Some(events) = state.events.remove(&image)
                && let Some(container) = state.containers.get(&name)
            {
                deliver(container, events)?;
            }
            infos.push(info);
        }
        Ok(infos)
    }

    async fn stop(&self, containers: &[ContainerHandle]) -> Result<(), RuntimeError> {
        let mut state = self.state();
        let names: Vec<String> = containers.iter().map(|c| c.0.clone()).collect();
        state.calls.push(RuntimeCall::Stop(names.clone()));
        if state.failing_stops {
            return Err(RuntimeError::new(
                format!("docker stop {}", names.join(" ")),
                "daemon not responding",
            ));
        }
        for name in names {
            if let Some(container) = state.containers.get_mut(&name) {
                container.stopped = true;
            }
        }
        Ok(())
    }

    async fn remove(&self, containers: &[ContainerHandle]) -> Result<(), RuntimeError> {
        let mut state = self.state();
        let names: Vec<String> = containers.iter().map(|c| c.0.clone()).collect();
        state.calls.push(RuntimeCall::Remove(names.clone()));
        for name in names {
            if let Some(container) = state.containers.get_mut(&name) {
                container.stopped = true;
                container.removed = true;
            }
        }
        Ok(())
    }

    async fn logs(&self, container: &ContainerHandle, tail: usize) -> Result<Vec<String>, RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Logs(container.0.clone(), tail));
        let Some(image) = state
            .containers
            .get(container.name())
            .filter(|c| !c.removed)
            .map(|c| c.spec.image.clone())
        else {
            return Err(RuntimeError::new(
                format!("docker logs {container}"),
                "No such container",
            ));
        };
        let lines = state.logs.get(&image).map(Vec::as_slice).unwrap_or_default();
        Ok(lines[lines.len().saturating_sub(tail)..].to_vec())
    }

    async fn exec_in_running(
        &self,
        container: &ContainerHandle,
        command: &[String],
    ) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state
            .calls
            .push(RuntimeCall::Exec(container.0.clone(), command.to_vec()));
        if state.failing_execs {
            return Err(RuntimeError::new(
                format!("docker exec {container} {}", command.join(" ")),
                "exit code 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
