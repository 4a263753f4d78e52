//! In-memory container backend for exercising the lifecycle without a
//! Docker daemon.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use error_stack::Report;

use crate::backend::{ContainerBackend, ContainerHandle, NetworkNode, RunSpec};
use crate::error::{DrydockError, Result};

#[derive(Default)]
pub(crate) struct FakeBackend {
    /// Make `ping` fail as if the daemon were absent.
    pub daemon_down: bool,
    /// Make `setup_image` fail as if the pull broke.
    pub fail_setup: bool,
    /// Started containers report no exposed ports.
    pub no_ports: bool,
    /// `is_running` reports true from the Nth call on; `None` means never.
    pub running_after: Option<u32>,
    pub inspect_calls: AtomicU32,
    pub kills: AtomicU32,
    pub removes: AtomicU32,
    pub nodes: Mutex<Vec<NetworkNode>>,
    pub pulled: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn set_nodes(&self, nodes: Vec<NetworkNode>) {
        *self.nodes.lock().expect("nodes lock") = nodes;
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.pulled.lock().expect("pulled lock").clone()
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    async fn ping(&self) -> Result<()> {
        if self.daemon_down {
            return Err(Report::new(DrydockError::warn(
                "Docker binary was not found",
            )));
        }
        Ok(())
    }

    async fn list_running(&self, _name_prefix: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn setup_image(&self, image: &str, tag: &str) -> Result<()> {
        if self.fail_setup {
            return Err(Report::new(DrydockError::fatal(format!(
                "Error pulling image {image}:{tag}: fake pull failure"
            ))));
        }
        self.pulled
            .lock()
            .expect("pulled lock")
            .push(format!("{image}:{tag}"));
        Ok(())
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<ContainerHandle> {
        let ports = if self.no_ports {
            Vec::new()
        } else {
            spec.ports.clone()
        };

        Ok(ContainerHandle {
            id: format!("fake-{}", spec.container_name),
            name: spec.container_name.clone(),
            ports,
        })
    }

    async fn kill(&self, _id: &str) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, _id: &str) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_running(&self, _id: &str) -> Result<bool> {
        let calls = self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.running_after.is_some_and(|n| calls >= n))
    }

    async fn network_nodes(&self, _handle: &ContainerHandle) -> Result<Vec<NetworkNode>> {
        Ok(self.nodes.lock().expect("nodes lock").clone())
    }
}
