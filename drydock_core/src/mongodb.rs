//! MongoDB service adapter: wraps the generic environment, opens a driver
//! session against the running container, and verifies it with a trivial
//! metadata query so silently broken connections surface during prepare.

use std::time::Duration;

use ::mongodb::options::ClientOptions;
use ::mongodb::Client;
use error_stack::Report;
use tracing::info;

use crate::backend::{ContainerBackend, NetworkNode};
use crate::docker::DockerBackend;
use crate::environment::Environment;
use crate::error::{DrydockError, Result};

/// Fixed database name baked into the connection URL.
const MONGODB_DATABASE: &str = "auth";

/// How long the driver may search for the server before giving up; the
/// container is already confirmed reachable, so this only guards regressions.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// A disposable MongoDB instance plus an open, verified driver session.
pub struct MongoFixture<B: ContainerBackend = DockerBackend> {
    env: Option<Environment<B>>,
    session: Option<Client>,
}

impl MongoFixture<DockerBackend> {
    /// Creates a new MongoDB container under the local Docker daemon,
    /// starts it, and opens a session to the database.
    pub async fn prepare() -> Result<Self> {
        Self::prepare_with(Environment::mongodb()?).await
    }
}

impl<B: ContainerBackend> MongoFixture<B> {
    /// All-or-nothing preparation: applicability check, container run,
    /// network lookup, session open, session verification. Any failure
    /// stops the environment and nothing partially initialized is handed
    /// back. Applicability failures keep their `Warn` severity so callers
    /// can skip.
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

        let url = mongodb_url(&node);
        let session = match open_session(&url).await {
            Ok(session) => session,
            Err(err) => {
                env.stop().await;
                return Err(err.change_context(DrydockError::fatal(format!(
                    "Error opening a MongoDB session at {url}"
                ))));
            }
        };

        info!("MongoDB fixture ready at {url}");

        Ok(Self {
            env: Some(env),
            session: Some(session),
        })
    }

    /// The open database session, until `dispose` clears it.
    pub fn session(&self) -> Option<&Client> {
        self.session.as_ref()
    }

    pub fn container_name(&self) -> Option<&str> {
        self.env.as_ref().map(Environment::container_name)
    }

    /// Closes the session first, then stops the environment, then clears
    /// both references. Idempotent.
    pub async fn dispose(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }
        if let Some(mut env) = self.env.take() {
            env.stop().await;
        }
    }
}

fn mongodb_url(node: &NetworkNode) -> String {
    format!("mongodb://{}:{}/{}", node.host, node.port, MONGODB_DATABASE)
}

async fn first_node<B: ContainerBackend>(env: &Environment<B>) -> Result<NetworkNode> {
    let nodes = env.network().await.map_err(|err| {
        err.change_context(DrydockError::fatal("Error getting the MongoDB address"))
    })?;

    nodes.into_iter().next().ok_or_else(|| {
        Report::new(DrydockError::fatal(
            "The MongoDB container reported no network nodes",
        ))
    })
}

async fn open_session(url: &str) -> Result<Client> {
    let mut options = ClientOptions::parse(url).await.map_err(|e| {
        Report::new(DrydockError::fatal(format!(
            "Invalid MongoDB connection URL {url}: {e}"
        )))
    })?;
    options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
    options.direct_connection = Some(true);

    let session = Client::with_options(options).map_err(|e| {
        Report::new(DrydockError::fatal(format!(
            "Error building the MongoDB client: {e}"
        )))
    })?;

    // Trivial metadata round-trip; catches sessions that dial but cannot
    // actually talk to the server.
    session
        .database(MONGODB_DATABASE)
        .list_collection_names()
        .await
        .map_err(|e| {
            Report::new(DrydockError::fatal(format!(
                "MongoDB session verification failed: {e}"
            )))
        })?;

    Ok(session)
}
