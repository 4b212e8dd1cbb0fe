use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::types::{ContainerDetails, PlatformEvent};

pub mod docker;
#[cfg(test)]
pub mod fake;

pub use docker::DockerPlatform;

pub type EventStream = BoxStream<'static, Result<PlatformEvent>>;

/// Queries the container platform needs to answer.
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    /// Inspects a single container by id or name.
    async fn inspect(&self, container_id: &str) -> Result<ContainerDetails>;

    /// Ids of the running containers attached to `network`.
    async fn list_network_containers(&self, network: &str) -> Result<Vec<String>>;

    /// Subscribes to network connect/disconnect and container start
    /// events, starting from now.
    async fn events(&self) -> Result<EventStream>;
}
