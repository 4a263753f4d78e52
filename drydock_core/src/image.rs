use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::backend::RunSpec;

/// Maximum time to wait for a started container to become reachable.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Sleep between readiness probes. Sub-second so startup latency stays low,
/// non-zero so the wait never degenerates into a busy loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

const MONGODB_IMAGE: &str = "mongo";
const MONGODB_TAG: &str = "7";
const MONGODB_PORT: u16 = 27017;

const REDIS_IMAGE: &str = "redis";
const REDIS_TAG: &str = "7";
const REDIS_PORT: u16 = 6379;

/// Prefix shared by every container this library starts.
pub(crate) const CONTAINER_NAME_PREFIX: &str = "drydock";

static NAME_COUNTER: AtomicU32 = AtomicU32::new(0);

/// The set of service images a fixture can run. Each variant knows its own
/// image coordinates and start behavior, replacing per-image start closures
/// with data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureImage {
    MongoDb,
    Redis,
}

impl FixtureImage {
    pub fn name(&self) -> &'static str {
        match self {
            FixtureImage::MongoDb => MONGODB_IMAGE,
            FixtureImage::Redis => REDIS_IMAGE,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FixtureImage::MongoDb => MONGODB_TAG,
            FixtureImage::Redis => REDIS_TAG,
        }
    }

    pub fn exposed_ports(&self) -> &'static [u16] {
        match self {
            FixtureImage::MongoDb => &[MONGODB_PORT],
            FixtureImage::Redis => &[REDIS_PORT],
        }
    }

    /// Build the run request for this image under the given container name.
    pub fn run_spec(&self, container_name: &str) -> RunSpec {
        RunSpec {
            image: self.name().to_string(),
            tag: self.tag().to_string(),
            container_name: container_name.to_string(),
            ports: self.exposed_ports().to_vec(),
            env: HashMap::new(),
            cmd: None,
        }
    }

    /// A container name unique within this process, so parallel tests never
    /// collide and teardown can be verified by name.
    pub fn unique_container_name(&self) -> String {
        let id = NAME_COUNTER.fetch_add(1, Ordering::SeqCst);
        format!(
            "{}-{}-{}-{}",
            CONTAINER_NAME_PREFIX,
            self.name(),
            std::process::id(),
            id
        )
    }
}

impl std::fmt::Display for FixtureImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name(), self.tag())
    }
}
