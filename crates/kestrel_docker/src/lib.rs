//! # Kestrel Docker
//!
//! [`ContainerRuntime`] backed by the local Docker daemon.

mod body;

use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::NetworkCreateRequest;
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use futures::{StreamExt, TryStreamExt};
use kestrel_core::prelude::*;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker socket (defaults to /var/run/docker.sock on Linux)
    pub async fn connect_local() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::new("docker connect", e))?;
        Ok(Self { client })
    }

    /// Fails unless the daemon answers.
    pub async fn init(&self) -> Result<(), RuntimeError> {
        let version = self
            .client
            .version()
            .await
            .map_err(|e| RuntimeError::new("docker version", format!("Docker unavailable: {e}")))?;
        debug!(version = ?version.version, "Connected to Docker");
        Ok(())
    }
}

fn log_line(output: LogOutput) -> String {
    let bytes = match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => message,
    };
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}

impl ContainerRuntime for DockerRuntime {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image, "Pulling image");
        let options = Some(CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        });

        let mut pull_stream = self.client.create_image(options, None, None);
        while let Some(progress) = pull_stream
            .try_next()
            .await
            .map_err(|e| RuntimeError::new(format!("docker pull {image}"), e))?
        {
            if let Some(status) = progress.status {
                debug!(image, "Pull progress: {}", status);
            }
        }
        Ok(())
    }

    async fn create_network(
        &self,
        kind: NetworkKind,
        name: &str,
    ) -> Result<NetworkHandle, RuntimeError> {
        match kind {
            NetworkKind::Host => Ok(NetworkHandle::Host),
            NetworkKind::Bridge => {
                let request = NetworkCreateRequest {
                    name: name.to_string(),
                    driver: Some("bridge".to_string()),
                    ..Default::default()
                };
                self.client.create_network(request).await.map_err(|e| {
                    RuntimeError::new(format!("docker network create --driver bridge {name}"), e)
                })?;
                info!(network = name, "Created bridge network");
                Ok(NetworkHandle::Bridge(name.to_string()))
            }
        }
    }

    async fn remove_network(&self, network: &NetworkHandle) -> Result<(), RuntimeError> {
        let NetworkHandle::Bridge(name) = network else {
            return Ok(());
        };
        self.client
            .remove_network(name)
            .await
            .map_err(|e| RuntimeError::new(format!("docker network rm {name}"), e))
    }

    async fn run(&self, spec: RunSpec) -> Result<ContainerHandle, RuntimeError> {
        let invocation = format!("docker run --name {} {}", spec.name, spec.image);
        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        self.client
            .create_container(Some(options), body::container_body(&spec))
            .await
            .map_err(|e| RuntimeError::new(&invocation, e))?;

        self.client
            .start_container(&spec.name, None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::new(&invocation, format!("Failed to start: {e}")))?;

        info!(container = %spec.name, image = %spec.image, "Started container");
        Ok(ContainerHandle::new(spec.name))
    }

    async fn inspect(
        &self,
        containers: &[ContainerHandle],
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut infos = Vec::with_capacity(containers.len());
        for container in containers {
            let details = self
                .client
                .inspect_container(container.name(), None::<InspectContainerOptions>)
                .await
                .map_err(|e| RuntimeError::new(format!("docker inspect {container}"), e))?;

            let state = details.state.unwrap_or_default();
            infos.push(ContainerInfo {
                name: container.name().to_string(),
                running: state.running.unwrap_or(false),
                status: state.status.map(|s| s.to_string()).unwrap_or_default(),
                exit_code: state.exit_code.unwrap_or(0),
                error_message: state.error.unwrap_or_default(),
            });
        }
        Ok(infos)
    }

    async fn stop(&self, containers: &[ContainerHandle]) -> Result<(), RuntimeError> {
        let mut failed = Vec::new();
        for container in containers {
            let options = Some(StopContainerOptions {
                t: Some(0),
                ..Default::default()
            });
            if let Err(e) = self.client.stop_container(container.name(), options).await {
                warn!(container = %container, "Failed to stop container: {}", e);
                failed.push(container.name());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::new(
                format!("docker stop -t 0 {}", failed.join(" ")),
                "one or more containers did not stop",
            ))
        }
    }

    async fn remove(&self, containers: &[ContainerHandle]) -> Result<(), RuntimeError> {
        let mut failed = Vec::new();
        for container in containers {
            let options = Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            });
            if let Err(e) = self.client.remove_container(container.name(), options).await {
                warn!(container = %container, "Failed to remove container: {}", e);
                failed.push(container.name());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::new(
                format!("docker rm --force {}", failed.join(" ")),
                "one or more containers were not removed",
            ))
        }
    }

    async fn logs(&self, container: &ContainerHandle, tail: usize) -> Result<Vec<String>, RuntimeError> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let chunks: Vec<String> = self
            .client
            .logs(container.name(), Some(options))
            .map_ok(log_line)
            .try_collect()
            .await
            .map_err(|e| RuntimeError::new(format!("docker logs {container} --tail {tail}"), e))?;
        Ok(chunks
            .iter()
            .flat_map(|chunk| chunk.lines())
            .map(str::to_string)
            .collect())
    }

    async fn exec_in_running(
        &self,
        container: &ContainerHandle,
        command: &[String],
    ) -> Result<(), RuntimeError> {
        let invocation = format!("docker exec {container} {}", command.join(" "));
        let options = CreateExecOptions {
            cmd: Some(command.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            privileged: Some(true),
            user: Some("root".to_string()),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container.name(), options)
            .await
            .map_err(|e| RuntimeError::new(&invocation, e))?;

        if let StartExecResults::Attached { mut output, .. } = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| RuntimeError::new(&invocation, e))?
        {
            while let Some(line) = output.next().await {
                match line {
                    Ok(line) => info!(container = %container, "{}", log_line(line)),
                    Err(e) => return Err(RuntimeError::new(&invocation, e)),
                }
            }
        }

        let inspected = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| RuntimeError::new(&invocation, e))?;
        match inspected.exit_code {
            Some(0) | None => Ok(()),
            Some(code) => Err(RuntimeError::new(invocation, format!("exit code {code}"))),
        }
    }
}
