use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Declarative description of a container to start: always detached, with
/// every exposed port published to an ephemeral host port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub image: String,
    pub tag: String,
    pub container_name: String,
    pub ports: Vec<u16>,
    pub env: HashMap<String, String>,
    pub cmd: Option<Vec<String>>,
}

/// Reference to a running container, handed out by a successful start and
/// consumed by kill/remove on teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub ports: Vec<u16>,
}

/// A host-reachable address/port pair for a running container. Snapshots are
/// fetched on demand and never cached across calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub host: String,
    pub port: u16,
}

impl NetworkNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for NetworkNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The seam between the lifecycle controller and the container runtime.
///
/// The production implementation talks to the Docker Engine API; tests
/// substitute fakes to exercise the lifecycle without a daemon.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Cheap daemon liveness probe.
    async fn ping(&self) -> Result<()>;

    /// List the names of running containers whose name starts with the
    /// given prefix (the `docker ps` equivalent).
    async fn list_running(&self, name_prefix: &str) -> Result<Vec<String>>;

    /// Make the image available locally. Idempotent; pulls when missing.
    async fn setup_image(&self, image: &str, tag: &str) -> Result<()>;

    /// Create and start a detached container from the spec.
    async fn run_detached(&self, spec: &RunSpec) -> Result<ContainerHandle>;

    async fn kill(&self, id: &str) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Whether container inspection reports the container as running.
    async fn is_running(&self, id: &str) -> Result<bool>;

    /// Current host-reachable address/port pairs for the container's
    /// published ports.
    async fn network_nodes(&self, handle: &ContainerHandle) -> Result<Vec<NetworkNode>>;
}

// Backends are often shared between an environment and verification code;
// delegating through `Arc` keeps that ergonomic.
#[async_trait]
impl<B: ContainerBackend + ?Sized> ContainerBackend for std::sync::Arc<B> {
    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    async fn list_running(&self, name_prefix: &str) -> Result<Vec<String>> {
        (**self).list_running(name_prefix).await
    }

    async fn setup_image(&self, image: &str, tag: &str) -> Result<()> {
        (**self).setup_image(image, tag).await
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<ContainerHandle> {
        (**self).run_detached(spec).await
    }

    async fn kill(&self, id: &str) -> Result<()> {
        (**self).kill(id).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        (**self).remove(id).await
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        (**self).is_running(id).await
    }

    async fn network_nodes(&self, handle: &ContainerHandle) -> Result<Vec<NetworkNode>> {
        (**self).network_nodes(handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_node_displays_as_host_port() {
        let node = NetworkNode::new("127.0.0.1", 27017);
        assert_eq!(node.to_string(), "127.0.0.1:27017");
    }
}
