use crate::error::*;
use crate::events::JobEvent;
use crate::job::*;

use serde_json::{Map, Value};

/// A trait for injecting the container execution backend into the orchestrator.
///
/// Implementations are the only place that talks to a container runtime.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Makes `image` available locally.
    fn pull(&self, image: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Creates the network for a job. [`NetworkKind::Host`] must not call the backend.
    fn create_network(
        &self,
        kind: NetworkKind,
        name: &str,
    ) -> impl Future<Output = Result<NetworkHandle, RuntimeError>> + Send;

    /// Removes a network created by [`ContainerRuntime::create_network`]. A no-op for host networking.
    fn remove_network(
        &self,
        network: &NetworkHandle,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Creates and starts a detached container.
    fn run(&self, spec: RunSpec) -> impl Future<Output = Result<ContainerHandle, RuntimeError>> + Send;

    /// Reports the state of each container, in the order given.
    fn inspect(
        &self,
        containers: &[ContainerHandle],
    ) -> impl Future<Output = Result<Vec<ContainerInfo>, RuntimeError>> + Send;

    /// Stops containers without a grace period.
    fn stop(
        &self,
        containers: &[ContainerHandle],
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Removes stopped containers.
    fn remove(
        &self,
        containers: &[ContainerHandle],
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// The last `tail` lines a container wrote to stdout and stderr, oldest first.
    fn logs(
        &self,
        container: &ContainerHandle,
        tail: usize,
    ) -> impl Future<Output = Result<Vec<String>, RuntimeError>> + Send;

    /// Runs `command` inside a running container and waits for it.
    fn exec_in_running(
        &self,
        container: &ContainerHandle,
        command: &[String],
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;
}

/// Where running containers' events come from.
///
/// Draining consumes: an event is returned exactly once.
pub trait EventSource {
    fn drain(&mut self) -> Vec<JobEvent>;
}

/// A trait for delivering events to an outside receiver, e.g. a webhook.
pub trait EventPublisher: Send + Sync + 'static {
    fn publish(
        &self,
        url: &str,
        event: &JobEvent,
        metadata: Option<&Map<String, Value>>,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// A publisher for jobs without webhooks.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPublisher;

impl EventPublisher for NoPublisher {
    async fn publish(
        &self,
        _url: &str,
        _event: &JobEvent,
        _metadata: Option<&Map<String, Value>>,
    ) -> Result<(), PublishError> {
        Ok(())
    }
}
