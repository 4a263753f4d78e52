use std::time::Duration;

use error_stack::Report;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

use crate::backend::{ContainerBackend, ContainerHandle, NetworkNode};
use crate::docker::DockerBackend;
use crate::error::{DrydockError, Result};
use crate::image::{FixtureImage, CONTAINER_NAME_PREFIX, POLL_INTERVAL, STARTUP_TIMEOUT};

/// Per-probe TCP connect budget; well under the poll interval cadence.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Lifecycle of an environment. `run` moves `Idle → Starting → Running`;
/// a failed run lands in `Stopped` via the internal teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopped,
}

/// Lifecycle controller for one disposable container fixture.
///
/// An environment is owned exclusively by a single test: it is not meant to
/// be shared, pooled, or reused across runs. `stop` is idempotent and
/// best-effort so teardown can never fail the test that used the fixture.
pub struct Environment<B: ContainerBackend> {
    backend: B,
    image: FixtureImage,
    container_name: String,
    startup_timeout: Duration,
    poll_interval: Duration,
    state: LifecycleState,
    container: Option<ContainerHandle>,
}

impl Environment<DockerBackend> {
    /// An environment that runs MongoDB under the local Docker daemon.
    pub fn mongodb() -> Result<Self> {
        Ok(Self::with_backend(DockerBackend::new()?, FixtureImage::MongoDb))
    }

    /// An environment that runs Redis under the local Docker daemon.
    pub fn redis() -> Result<Self> {
        Ok(Self::with_backend(DockerBackend::new()?, FixtureImage::Redis))
    }
}

impl<B: ContainerBackend> Environment<B> {
    pub fn with_backend(backend: B, image: FixtureImage) -> Self {
        let container_name = image.unique_container_name();

        Self {
            backend,
            image,
            container_name,
            startup_timeout: STARTUP_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            state: LifecycleState::Idle,
            container: None,
        }
    }

    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn image(&self) -> FixtureImage {
        self.image
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The unique name the container runs under, usable with the backend's
    /// list call to verify teardown.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Tests whether this environment can run on the current host.
    ///
    /// Only meaningful before `run`. Failures carry `Severity::Warn` so the
    /// consuming test can skip instead of failing: either the daemon socket
    /// is absent or the daemon is present but not operable.
    pub async fn applicability(&self) -> Result<()> {
        if self.state != LifecycleState::Idle {
            return Err(Report::new(DrydockError::warn(format!(
                "applicability of '{}' can only be checked before the environment is started",
                self.image.name()
            ))));
        }

        self.backend.ping().await?;

        // The `docker ps` equivalent: proves the daemon actually answers
        // requests for this user, not just that the socket accepts.
        self.backend.list_running(CONTAINER_NAME_PREFIX).await?;

        Ok(())
    }

    /// Starts the container and blocks until it is ready or the startup
    /// timeout elapses. On any failure the partially started container is
    /// torn down before the fatal error is returned.
    pub async fn run(&mut self) -> Result<()> {
        if self.state != LifecycleState::Idle {
            return Err(Report::new(DrydockError::fatal(format!(
                "the environment '{}' was already started",
                self.image.name()
            ))));
        }
        self.state = LifecycleState::Starting;

        if let Err(err) = self
            .backend
            .setup_image(self.image.name(), self.image.tag())
            .await
        {
            self.stop().await;
            return Err(err.change_context(DrydockError::fatal(format!(
                "Error setting up the {} image",
                self.image
            ))));
        }

        let spec = self.image.run_spec(&self.container_name);
        match self.backend.run_detached(&spec).await {
            Ok(handle) => self.container = Some(handle),
            Err(err) => {
                self.stop().await;
                return Err(err.change_context(DrydockError::fatal(format!(
                    "Error running a new {} container",
                    self.image
                ))));
            }
        }

        if let Err(err) = self.wait_ready().await {
            self.stop().await;
            return Err(err);
        }

        self.state = LifecycleState::Running;
        info!(
            "Environment '{}' is running as {}",
            self.image, self.container_name
        );

        Ok(())
    }

    /// Returns the running container's address/port nodes, fetched fresh
    /// from the backend on every call.
    pub async fn network(&self) -> Result<Vec<NetworkNode>> {
        let handle = self.container.as_ref().ok_or_else(|| {
            Report::new(DrydockError::NotRunning(self.image.name().to_string()))
        })?;

        self.backend.network_nodes(handle).await
    }

    /// Tears the container down, unconditionally and best-effort. Safe to
    /// call at any point and any number of times; kill/remove errors are
    /// logged and discarded so teardown never masks a test's own failure.
    pub async fn stop(&mut self) {
        if self.state == LifecycleState::Idle {
            return;
        }

        if let Some(container) = self.container.take() {
            info!("Stopping container {}", container.name);
            if let Err(err) = self.backend.kill(&container.id).await {
                warn!("Failed to kill container {}: {err:?}", container.name);
            }
            if let Err(err) = self.backend.remove(&container.id).await {
                warn!("Failed to remove container {}: {err:?}", container.name);
            }
        }

        self.state = LifecycleState::Stopped;
    }

    async fn wait_ready(&self) -> Result<()> {
        let handle = self.container.as_ref().ok_or_else(|| {
            Report::new(DrydockError::NotRunning(self.image.name().to_string()))
        })?;

        if handle.ports.is_empty() {
            self.wait_until_running(handle).await
        } else {
            self.wait_until_reachable(handle).await
        }
    }

    /// Readiness for port-exposing containers: every published node must
    /// accept a TCP connection before the deadline.
    async fn wait_until_reachable(&self, handle: &ContainerHandle) -> Result<()> {
        let deadline = Instant::now() + self.startup_timeout;

        loop {
            let nodes = self.backend.network_nodes(handle).await?;
            if !nodes.is_empty() && all_reachable(&nodes).await {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(Report::new(DrydockError::fatal(format!(
                    "Timeout waiting for {} to accept connections",
                    self.image
                ))));
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Readiness for containers without exposed ports: inspection must
    /// report the container running before the deadline.
    async fn wait_until_running(&self, handle: &ContainerHandle) -> Result<()> {
        let deadline = Instant::now() + self.startup_timeout;

        loop {
            if self.backend.is_running(&handle.id).await? {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(Report::new(DrydockError::fatal(format!(
                    "Timeout waiting for the {} container to start",
                    self.image
                ))));
            }
            sleep(self.poll_interval).await;
        }
    }
}

async fn all_reachable(nodes: &[NetworkNode]) -> bool {
    for node in nodes {
        let attempt = timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((node.host.as_str(), node.port)),
        )
        .await;

        if !matches!(attempt, Ok(Ok(_))) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::time::Instant;

    use super::*;
    use crate::error::Severity;
    use crate::testutil::FakeBackend;

    fn fake_env(backend: Arc<FakeBackend>, image: FixtureImage) -> Environment<Arc<FakeBackend>> {
        Environment::with_backend(backend, image)
            .with_startup_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn applicability_warns_when_daemon_is_unreachable() {
        let backend = Arc::new(FakeBackend {
            daemon_down: true,
            ..Default::default()
        });
        let env = fake_env(backend, FixtureImage::MongoDb);

        let err = env.applicability().await.expect_err("should not be applicable");
        assert_eq!(err.current_context().severity(), Severity::Warn);
    }

    #[tokio::test]
    async fn applicability_passes_with_reachable_daemon() {
        let backend = Arc::new(FakeBackend::default());
        let env = fake_env(backend, FixtureImage::Redis);

        env.applicability().await.expect("should be applicable");
    }

    #[tokio::test]
    async fn network_before_run_fails_with_not_running() {
        let backend = Arc::new(FakeBackend::default());
        let env = fake_env(backend, FixtureImage::MongoDb);

        let err = env.network().await.expect_err("should not be running");
        match err.current_context() {
            DrydockError::NotRunning(name) => assert_eq!(name, "mongo"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_best_effort() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let backend = Arc::new(FakeBackend::default());
        backend.set_nodes(vec![NetworkNode::new("127.0.0.1", port)]);
        let mut env = fake_env(backend.clone(), FixtureImage::Redis);

        // Stop before run is a pure no-op.
        env.stop().await;
        assert_eq!(env.state(), LifecycleState::Idle);
        assert_eq!(backend.kills.load(Ordering::SeqCst), 0);

        env.run().await.expect("run should succeed");
        assert_eq!(env.state(), LifecycleState::Running);

        env.stop().await;
        env.stop().await;
        assert_eq!(env.state(), LifecycleState::Stopped);
        assert_eq!(backend.kills.load(Ordering::SeqCst), 1);
        assert_eq!(backend.removes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_succeeds_once_the_port_becomes_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        // The node shows up only after a delay, as with a slow-starting
        // container; the waiter has to keep polling until then.
        let backend = Arc::new(FakeBackend::default());
        let delayed = backend.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            delayed.set_nodes(vec![NetworkNode::new("127.0.0.1", port)]);
        });

        let mut env = fake_env(backend.clone(), FixtureImage::Redis);
        let started = Instant::now();
        env.run().await.expect("run should succeed");
        assert_eq!(backend.pulled_images(), vec!["redis:7".to_string()]);

        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_secs(5));

        let nodes = env.network().await.expect("nodes");
        assert_eq!(nodes, vec![NetworkNode::new("127.0.0.1", port)]);

        env.stop().await;
    }

    #[tokio::test]
    async fn run_times_out_when_the_port_never_accepts() {
        // Reserve a port and drop the listener so connects get refused.
        let probe = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = probe.local_addr().expect("addr").port();
        drop(probe);

        let backend = Arc::new(FakeBackend::default());
        backend.set_nodes(vec![NetworkNode::new("127.0.0.1", port)]);
        let mut env = Environment::with_backend(backend.clone(), FixtureImage::MongoDb)
            .with_startup_timeout(Duration::from_millis(300))
            .with_poll_interval(Duration::from_millis(50));

        let started = Instant::now();
        let err = env.run().await.expect_err("run should time out");

        assert!(err.current_context().is_fatal());
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(env.state(), LifecycleState::Stopped);
        assert_eq!(backend.removes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_without_exposed_ports_waits_for_the_running_state() {
        let backend = Arc::new(FakeBackend {
            no_ports: true,
            running_after: Some(3),
            ..Default::default()
        });
        let mut env = fake_env(backend.clone(), FixtureImage::Redis);

        env.run().await.expect("run should succeed");
        assert_eq!(env.state(), LifecycleState::Running);
        assert!(backend.inspect_calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn run_without_exposed_ports_times_out_when_never_running() {
        let backend = Arc::new(FakeBackend {
            no_ports: true,
            running_after: None,
            ..Default::default()
        });
        let mut env = Environment::with_backend(backend, FixtureImage::Redis)
            .with_startup_timeout(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(20));

        let started = Instant::now();
        let err = env.run().await.expect_err("run should time out");

        assert!(err.current_context().is_fatal());
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(env.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn run_fails_fatally_when_image_setup_fails() {
        let backend = Arc::new(FakeBackend {
            fail_setup: true,
            ..Default::default()
        });
        let mut env = fake_env(backend.clone(), FixtureImage::MongoDb);

        let err = env.run().await.expect_err("setup should fail");
        assert!(err.current_context().is_fatal());
        assert_eq!(env.state(), LifecycleState::Stopped);
        // Nothing was started, so nothing gets killed.
        assert_eq!(backend.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_is_rejected_after_the_first_start() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let backend = Arc::new(FakeBackend::default());
        backend.set_nodes(vec![NetworkNode::new("127.0.0.1", port)]);
        let mut env = fake_env(backend, FixtureImage::Redis);

        env.run().await.expect("first run should succeed");
        let err = env.run().await.expect_err("second run should fail");
        assert!(err.current_context().is_fatal());

        let err = env
            .applicability()
            .await
            .expect_err("applicability is only valid before run");
        assert_eq!(err.current_context().severity(), Severity::Warn);

        env.stop().await;
    }
}
