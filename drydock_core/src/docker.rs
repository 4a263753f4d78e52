use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use error_stack::Report;
use futures_util::TryStreamExt;
use tracing::info;

use crate::backend::{ContainerBackend, ContainerHandle, NetworkNode, RunSpec};
use crate::error::{DrydockError, Result};

/// Production backend speaking to the local Docker daemon over its default
/// socket.
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_socket_defaults().map_err(|e| {
            Report::new(DrydockError::warn(format!(
                "Docker binary or daemon socket was not found: {e}"
            )))
        })?;

        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| {
            Report::new(DrydockError::warn(format!(
                "Docker is installed but is not running or the current user \
                 is lacking permissions: {e}"
            )))
        })?;

        Ok(())
    }

    async fn list_running(&self, name_prefix: &str) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name_prefix.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| {
                Report::new(DrydockError::warn(format!(
                    "Docker is installed but listing containers failed: {e}"
                )))
            })?;

        Ok(containers
            .into_iter()
            .flat_map(|c| c.names.unwrap_or_default())
            .map(|name| name.trim_start_matches('/').to_string())
            .collect())
    }

    async fn setup_image(&self, image: &str, tag: &str) -> Result<()> {
        info!("Pulling image {image}:{tag}");

        let options = CreateImageOptions {
            from_image: image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| {
                Report::new(DrydockError::fatal(format!(
                    "Error pulling image {image}:{tag}: {e}"
                )))
            })?;

        Ok(())
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<ContainerHandle> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        let config = Config {
            image: Some(format!("{}:{}", spec.image, spec.tag)),
            env: Some(env),
            cmd: spec.cmd.clone(),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                publish_all_ports: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.container_name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| {
                Report::new(DrydockError::fatal(format!(
                    "Error creating container {}: {e}",
                    spec.container_name
                )))
            })?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Don't leak a created-but-never-started container.
            let _ = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;

            return Err(Report::new(DrydockError::fatal(format!(
                "Error starting container {}: {e}",
                spec.container_name
            ))));
        }

        info!("Started container {} ({})", spec.container_name, created.id);

        Ok(ContainerHandle {
            id: created.id,
            name: spec.container_name.clone(),
            ports: spec.ports.clone(),
        })
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| {
                Report::new(DrydockError::fatal(format!(
                    "Error killing container {id}: {e}"
                )))
            })?;

        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| {
                Report::new(DrydockError::fatal(format!(
                    "Error removing container {id}: {e}"
                )))
            })?;

        Ok(())
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        let inspect = self.docker.inspect_container(id, None).await.map_err(|e| {
            Report::new(DrydockError::fatal(format!(
                "Error inspecting container {id}: {e}"
            )))
        })?;

        Ok(inspect
            .state
            .and_then(|state| state.running)
            .unwrap_or(false))
    }

    async fn network_nodes(&self, handle: &ContainerHandle) -> Result<Vec<NetworkNode>> {
        let inspect = self
            .docker
            .inspect_container(&handle.id, None)
            .await
            .map_err(|e| {
                Report::new(DrydockError::fatal(format!(
                    "Error inspecting container {}: {e}",
                    handle.name
                )))
            })?;

        let port_map = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();

        let mut nodes = Vec::new();
        for port in &handle.ports {
            let Some(Some(bindings)) = port_map.get(&format!("{port}/tcp")) else {
                continue;
            };

            // One node per container port; the first binding is enough.
            for binding in bindings {
                let Some(host_port) = binding
                    .host_port
                    .as_deref()
                    .and_then(|p| p.parse::<u16>().ok())
                else {
                    continue;
                };

                let host = match binding.host_ip.as_deref() {
                    None | Some("") | Some("0.0.0.0") | Some("::") => "127.0.0.1",
                    Some(ip) => ip,
                };

                nodes.push(NetworkNode::new(host, host_port));
                break;
            }
        }

        Ok(nodes)
    }
}
