//! In-memory platform used by the tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use super::{ContainerPlatform, EventStream};
use crate::error::{Error, Result};
use crate::types::{ContainerDetails, EventAction, EventKind, PlatformEvent};

#[derive(Default)]
pub struct FakePlatform {
    containers: Mutex<HashMap<String, ContainerDetails>>,
    streams: Mutex<VecDeque<Vec<Result<PlatformEvent>>>>,
    subscriptions: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, container_id: &str, details: ContainerDetails) {
        self.containers
            .lock()
            .unwrap()
            .insert(container_id.to_string(), details);
    }

    pub fn delete(&self, container_id: &str) {
        self.containers.lock().unwrap().remove(container_id);
    }

    /// Queues the events returned by the next `events` call.  Once every
    /// queued stream is used up, `events` returns a stream that never
    /// yields.
    pub fn push_stream(&self, events: Vec<Result<PlatformEvent>>) {
        self.streams.lock().unwrap().push_back(events);
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerPlatform for FakePlatform {
    async fn inspect(&self, container_id: &str) -> Result<ContainerDetails> {
        self.containers
            .lock()
            .unwrap()
            .get(container_id)
            .cloned()
            .ok_or_else(|| Error::ContainerNotFound(container_id.to_string()))
    }

    async fn list_network_containers(&self, network: &str) -> Result<Vec<String>> {
        let containers = self.containers.lock().unwrap();
        let mut ids: Vec<String> = containers
            .iter()
            .filter(|(_, d)| d.networks.contains_key(network))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn events(&self) -> Result<EventStream> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        match self.streams.lock().unwrap().pop_front() {
            Some(events) => Ok(stream::iter(events).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Details of a running container attached to `network`.
pub fn container(
    name: &str,
    network: &str,
    ip: &str,
    env: &[&str],
    exposed: &[&str],
) -> ContainerDetails {
    ContainerDetails {
        name: format!("/{}", name),
        env: env.iter().map(|e| e.to_string()).collect(),
        exposed_ports: exposed.iter().map(|p| p.to_string()).collect(),
        networks: [(network.to_string(), ip.to_string())].into_iter().collect(),
        published_ports: Vec::new(),
    }
}

pub fn network_event(action: EventAction, network: &str, container_id: &str) -> PlatformEvent {
    PlatformEvent {
        kind: EventKind::Network,
        action,
        actor_id: Some("network-id".to_string()),
        attributes: HashMap::from([
            ("name".to_string(), network.to_string()),
            ("container".to_string(), container_id.to_string()),
        ]),
    }
}

pub fn container_event(action: EventAction, container_id: &str) -> PlatformEvent {
    PlatformEvent {
        kind: EventKind::Container,
        action,
        actor_id: Some(container_id.to_string()),
        attributes: HashMap::new(),
    }
}
