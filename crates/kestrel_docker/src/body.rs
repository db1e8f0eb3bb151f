use kestrel_core::job::RunSpec;
use bollard::config::ContainerCreateBody;
use bollard::models::{HealthConfig, HostConfig, Mount, MountTypeEnum, PortBinding};
use std::collections::HashMap;

/// Translates a [`RunSpec`] into the body of a Docker create-container request.
///
/// Every container runs privileged as `root` with a TTY and health checks disabled. Ports are
/// only published on bridge networks, since host networking exposes them anyway.
pub(crate) fn container_body(spec: &RunSpec) -> ContainerCreateBody {
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let mounts: Vec<Mount> = spec
        .mounts
        .iter()
        .map(|m| Mount {
            target: Some(m.target.clone()),
            source: Some(m.source.to_string_lossy().into_owned()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    let on_bridge = spec.network.as_ref().is_some_and(|n| !n.is_host());
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = if on_bridge {
        spec.ports
            .iter()
            .map(|port| {
                (
                    format!("{port}/tcp"),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(port.to_string()),
                    }]),
                )
            })
            .collect()
    } else {
        HashMap::new()
    };

    let host_config = HostConfig {
        mounts: (!mounts.is_empty()).then_some(mounts),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        network_mode: spec.network.as_ref().map(|n| n.name().to_string()),
        privileged: Some(true),
        ..Default::default()
    };

    // A command replaces the image's entrypoint outright.
    let (entrypoint, working_dir) = match (&spec.command, &spec.entrypoint) {
        (Some(_), None) => (Some(vec![String::new()]), Some("/".to_string())),
        (Some(_), Some(entrypoint)) => (Some(entrypoint.clone()), Some("/".to_string())),
        (None, entrypoint) => (entrypoint.clone(), None),
    };

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        cmd: spec.command.clone(),
        entrypoint,
        working_dir,
        env: Some(env),
        user: Some("root".to_string()),
        tty: Some(true),
        healthcheck: Some(HealthConfig {
            test: Some(vec!["NONE".to_string()]),
            ..Default::default()
        }),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[cfg(test)]
#[path = "body_tests.rs"]
mod tests;
