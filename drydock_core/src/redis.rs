//! Redis service adapter: structurally the MongoDB adapter without a
//! retained session. Readiness is verified with a PING round-trip and the
//! connection is dropped; consumers dial the URL themselves.

use error_stack::Report;
use tracing::info;

use crate::backend::{ContainerBackend, NetworkNode};
use crate::docker::DockerBackend;
use crate::environment::Environment;
use crate::error::{DrydockError, Result};

/// A disposable Redis instance and the URL it answers on.
pub struct RedisFixture<B: ContainerBackend = DockerBackend> {
    env: Option<Environment<B>>,
    url: Option<String>,
}

impl RedisFixture<DockerBackend> {
    /// Creates a new Redis container under the local Docker daemon and
    /// starts it.
    pub async fn prepare() -> Result<Self> {
        Self::prepare_with(Environment::redis()?).await
    }
}

impl<B: ContainerBackend> RedisFixture<B> {
    /// All-or-nothing preparation, mirroring the MongoDB adapter:
    /// applicability check, container run, network lookup, PING probe.
    pub async fn prepare_with(mut env: Environment<B>) -> Result<Self> {
        env.applicability().await?;

        env.run().await?;

        let node = match first_node(&env).await {
            Ok(node) => node,
            Err(err) => {
                env.stop().await;
                return Err(err);
            }
        };

        let url = redis_url(&node);
        if let Err(err) = verify_connection(&url).await {
            env.stop().await;
            return Err(err.change_context(DrydockError::fatal(format!(
                "Error reaching the Redis server at {url}"
            ))));
        }

        info!("Redis fixture ready at {url}");

        Ok(Self {
            env: Some(env),
            url: Some(url),
        })
    }

    /// The connection URL, until `dispose` clears it.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn container_name(&self) -> Option<&str> {
        self.env.as_ref().map(Environment::container_name)
    }

    /// Stops the environment and clears the URL. Idempotent.
    pub async fn dispose(&mut self) {
        if let Some(mut env) = self.env.take() {
            env.stop().await;
        }
        self.url = None;
    }
}

fn redis_url(node: &NetworkNode) -> String {
    format!("redis://{}:{}", node.host, node.port)
}

async fn first_node<B: ContainerBackend>(env: &Environment<B>) -> Result<NetworkNode> {
    let nodes = env.network().await.map_err(|err| {
        err.change_context(DrydockError::fatal("Error getting the Redis address"))
    })?;

    nodes.into_iter().next().ok_or_else(|| {
        Report::new(DrydockError::fatal(
            "The Redis container reported no network nodes",
        ))
    })
}

async fn verify_connection(url: &str) -> Result<()> {
    let client = ::redis::Client::open(url).map_err(|e| {
        Report::new(DrydockError::fatal(format!(
            "Invalid Redis connection URL {url}: {e}"
        )))
    })?;

    let mut conn = client.get_multiplexed_async_connection().await.map_err(|e| {
        Report::new(DrydockError::fatal(format!(
            "Error connecting to Redis: {e}"
        )))
    })?;

    let pong: String = ::redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| Report::new(DrydockError::fatal(format!("Redis PING failed: {e}"))))?;

    if pong != "PONG" {
        return Err(Report::new(DrydockError::fatal(format!(
            "Unexpected PING reply from Redis: {pong}"
        ))));
    }

    Ok(())
}
