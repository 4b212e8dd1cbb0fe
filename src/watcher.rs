//! Keeps the routing table in step with the containers on the routed
//! network.
//!
//! The watcher seeds the table from a listing of the network, then
//! follows the platform event feed:
//!
//! * **network connect** for our network: the container becomes tracked
//!   and its routes are registered.
//! * **network disconnect** for our network: its routes are removed and
//!   it is no longer tracked.
//! * **container start** for a tracked container: its metadata is
//!   fetched again and its routes re-registered.
//!
//! When the feed fails or ends, the watcher waits and subscribes again.
//! Events that happened in between are not replayed, and the table
//! keeps serving the routes it had.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::metadata;
use crate::routes::RoutingTable;
use crate::runtime::ContainerPlatform;
use crate::types::{EventAction, EventKind, PlatformEvent};

pub struct Watcher<P: ?Sized> {
    platform: Arc<P>,
    table: Arc<RoutingTable>,
    network: String,
    route_variable: String,
    reconnect_delay: Duration,
    tracked: HashSet<String>,
}

impl<P> Watcher<P>
where
    P: ContainerPlatform + ?Sized,
{
    pub fn new(
        platform: Arc<P>,
        table: Arc<RoutingTable>,
        network: String,
        route_variable: String,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            platform,
            table,
            network,
            route_variable,
            reconnect_delay,
            tracked: HashSet::new(),
        }
    }

    /// Runs for the lifetime of the process.
    pub async fn run(mut self) {
        self.seed().await;
        loop {
            if let Err(e) = self.consume().await {
                warn!("events: {}", e);
            }
            sleep(self.reconnect_delay).await;
        }
    }

    /// Tracks and routes every container already on the network.
    pub async fn seed(&mut self) {
        let containers = match self
            .platform
            .list_network_containers(&self.network)
            .await
        {
            Ok(containers) => containers,
            Err(e) => {
                warn!("containers: {}", e);
                return;
            }
        };
        info!("Initial scan found {} containers", containers.len());
        for container_id in containers {
            self.tracked.insert(container_id.clone());
            self.refresh(&container_id).await;
        }
        debug!("{} hostnames routed after initial scan", self.table.len().await);
    }

    /// Handles events until the feed fails or ends.
    async fn consume(&mut self) -> Result<()> {
        let mut stream = self.platform.events().await?;
        info!("Listening for Docker events...");
        while let Some(event) = stream.next().await {
            self.handle(event?).await;
        }
        Err(Error::StreamClosed)
    }

    pub async fn handle(&mut self, event: PlatformEvent) {
        match event.kind {
            EventKind::Network if event.attribute("name") == Some(self.network.as_str()) => {
                let Some(container_id) = event.attribute("container") else {
                    debug!("Network event without container: {:?}", event);
                    return;
                };
                match event.action {
                    EventAction::Connect => {
                        if self.tracked.insert(container_id.to_string()) {
                            debug!("Tracking {}", short_id(container_id));
                            self.refresh(container_id).await;
                        }
                    }
                    EventAction::Disconnect => {
                        self.tracked.remove(container_id);
                        self.table.remove(container_id).await;
                        debug!("Untracked {}", short_id(container_id));
                    }
                    ref other => debug!("Ignoring network {} event", other.as_str()),
                }
            }
            EventKind::Container if event.action == EventAction::Start => {
                match event.actor_id.as_deref() {
                    Some(container_id) if self.tracked.contains(container_id) => {
                        self.refresh(container_id).await;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Fetches the container's metadata and registers its routes.  On
    /// failure the container keeps whatever routes it already had.
    async fn refresh(&self, container_id: &str) {
        match metadata::fetch(
            self.platform.as_ref(),
            container_id,
            &self.network,
            &self.route_variable,
        )
        .await
        {
            Ok(meta) => {
                let routes = meta.routes();
                if routes.is_empty() {
                    debug!("{} has no routes", meta.name);
                }
                self.table.register(container_id, routes).await;
            }
            Err(e) => warn!("inspect {}: {}", short_id(container_id), e),
        }
    }

    #[cfg(test)]
    pub fn is_tracked(&self, container_id: &str) -> bool {
        self.tracked.contains(container_id)
    }
}

fn short_id(container_id: &str) -> &str {
    container_id.get(..12).unwrap_or(container_id)
}
