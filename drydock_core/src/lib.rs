//! Disposable container fixtures for integration tests.
//!
//! drydock starts a containerized service (MongoDB or Redis) for the
//! duration of one test, waits until it is reachable, hands out connection
//! details, and tears everything down on dispose. The container runtime is
//! reached through the [`ContainerBackend`] seam; the shipped
//! [`DockerBackend`] talks to the local Docker daemon.
//!
//! ```no_run
//! # async fn demo() -> drydock_core::Result<()> {
//! use drydock_core::MongoFixture;
//!
//! let mut fixture = MongoFixture::prepare().await?;
//! let session = fixture.session().expect("session is open after prepare");
//! // ... run assertions against the database ...
//! fixture.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod docker;
pub mod environment;
pub mod error;
pub mod image;
pub mod logging;
pub mod mongodb;
pub mod redis;

#[cfg(test)]
pub(crate) mod testutil;

pub use backend::{ContainerBackend, ContainerHandle, NetworkNode, RunSpec};
pub use docker::DockerBackend;
pub use environment::{Environment, LifecycleState};
pub use error::{DrydockError, Result, Severity};
pub use image::{FixtureImage, POLL_INTERVAL, STARTUP_TIMEOUT};
pub use self::mongodb::MongoFixture;
pub use self::redis::RedisFixture;
