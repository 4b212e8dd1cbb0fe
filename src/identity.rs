//! Works out which network this proxy routes for.
//!
//! Inside a container the hostname file holds the container id, so the
//! proxy can inspect itself.  The first attached network that is not one
//! of Docker's built-ins decides which containers are routable.

use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::runtime::ContainerPlatform;

const BUILTIN_NETWORKS: [&str; 3] = ["bridge", "host", "none"];
const DEFAULT_PORT: &str = "80";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub container_id: String,
    /// The network whose containers are routed.
    pub network: String,
    /// Host port this container is published on.
    pub port: String,
}

pub async fn resolve<P>(platform: &P, identity_file: &Path) -> Result<Identity>
where
    P: ContainerPlatform + ?Sized,
{
    let container_id = tokio::fs::read_to_string(identity_file)
        .await
        .map_err(|source| Error::ReadIdentity {
            path: identity_file.to_path_buf(),
            source,
        })?
        .trim()
        .to_string();
    debug!("Resolving identity of container {}", container_id);

    let details = platform
        .inspect(&container_id)
        .await
        .map_err(|e| Error::InspectSelf(Box::new(e)))?;

    let network = details
        .networks
        .keys()
        .find(|name| !BUILTIN_NETWORKS.contains(&name.as_str()))
        .cloned()
        .ok_or_else(|| Error::NoCustomNetwork(container_id.clone()))?;

    let port = details
        .published_ports
        .first()
        .cloned()
        .unwrap_or_else(|| DEFAULT_PORT.to_string());

    Ok(Identity {
        container_id,
        network,
        port,
    })
}
