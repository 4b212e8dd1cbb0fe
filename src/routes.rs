//! Hostname routing table.
//!
//! Two indexes live behind one lock: `hosts` maps a hostname to the
//! backends serving it, and `containers` records which hostnames each
//! container contributed so its backends can be removed exactly.  Every
//! binding in `containers` matches exactly one backend in `hosts`, and a
//! hostname with no backends is never kept around.
//!
//! Selection advances a round-robin cursor, so it takes the write lock
//! just like registration and removal do.  Callers never hold the lock
//! across network I/O.

use std::collections::HashMap;

use log::info;
use tokio::sync::RwLock;

use crate::types::{Backend, ContainerBinding};

#[derive(Debug, Default)]
struct HostEntry {
    backends: Vec<Backend>,
    cursor: usize,
}

impl HostEntry {
    fn next(&mut self) -> Option<Backend> {
        if self.backends.is_empty() {
            return None;
        }
        let index = self.cursor % self.backends.len();
        self.cursor = (index + 1) % self.backends.len();
        Some(self.backends[index].clone())
    }
}

#[derive(Debug, Default)]
struct Tables {
    hosts: HashMap<String, HostEntry>,
    containers: HashMap<String, Vec<ContainerBinding>>,
}

impl Tables {
    fn insert(&mut self, container_id: &str, hostname: String, backend: Backend) {
        let binding = ContainerBinding {
            hostname: hostname.clone(),
            identity: backend.container_name.clone(),
        };
        let entry = self.hosts.entry(hostname.clone()).or_default();
        entry.backends.push(backend.clone());
        info!("+ {} ({}) -> {}", hostname, entry.backends.len(), backend);
        self.containers
            .entry(container_id.to_string())
            .or_default()
            .push(binding);
    }

    fn remove(&mut self, container_id: &str) -> usize {
        let Some(bindings) = self.containers.remove(container_id) else {
            return 0;
        };
        let removed = bindings.len();
        for binding in bindings {
            let Some(entry) = self.hosts.get_mut(&binding.hostname) else {
                continue;
            };
            let Some(position) = entry
                .backends
                .iter()
                .position(|b| b.container_name == binding.identity)
            else {
                continue;
            };
            let backend = entry.backends.remove(position);
            if position < entry.cursor {
                entry.cursor -= 1;
            }
            let remaining = entry.backends.len();
            info!("- {} ({}) -> {}", binding.hostname, remaining, backend);
            if remaining == 0 {
                self.hosts.remove(&binding.hostname);
            }
        }
        removed
    }

    /// Routes currently registered by `container_id`, in registration
    /// order.
    fn routes_of(&self, container_id: &str) -> Vec<(String, Backend)> {
        let Some(bindings) = self.containers.get(container_id) else {
            return Vec::new();
        };
        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut routes = Vec::with_capacity(bindings.len());
        for binding in bindings {
            // A container may list the same hostname twice; the n-th
            // binding corresponds to its n-th backend under that name.
            let nth = seen.entry(binding.hostname.as_str()).or_insert(0);
            if let Some(backend) = self.hosts.get(&binding.hostname).and_then(|entry| {
                entry
                    .backends
                    .iter()
                    .filter(|b| b.container_name == binding.identity)
                    .nth(*nth)
            }) {
                routes.push((binding.hostname.clone(), backend.clone()));
            }
            *nth += 1;
        }
        routes
    }
}

/// The hostname to backends mapping shared by the event watcher and the
/// request dispatcher.
#[derive(Debug, Default)]
pub struct RoutingTable {
    inner: RwLock<Tables>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every route registered by `container_id` with `routes`.
    ///
    /// Registering the same routes again is a no-op, so a container that
    /// restarts with an unchanged configuration keeps its backends (and
    /// its position in the rotation).  Passing an empty list removes the
    /// container's routes.
    pub async fn register(&self, container_id: &str, routes: Vec<(String, Backend)>) {
        let mut tables = self.inner.write().await;
        if tables.routes_of(container_id) == routes {
            return;
        }
        tables.remove(container_id);
        for (hostname, backend) in routes {
            tables.insert(container_id, hostname, backend);
        }
    }

    /// Removes every route registered by `container_id`.  Returns the
    /// number of backends removed; unknown containers remove nothing.
    pub async fn remove(&self, container_id: &str) -> usize {
        self.inner.write().await.remove(container_id)
    }

    /// Picks the next backend for `hostname` in round-robin order.
    pub async fn select(&self, hostname: &str) -> Option<Backend> {
        self.inner.write().await.hosts.get_mut(hostname)?.next()
    }

    /// Number of backends currently serving `hostname`.
    #[cfg(test)]
    pub async fn backend_count(&self, hostname: &str) -> usize {
        self.inner
            .read()
            .await
            .hosts
            .get(hostname)
            .map_or(0, |entry| entry.backends.len())
    }

    /// Number of routed hostnames.
    pub async fn len(&self) -> usize {
        self.inner.read().await.hosts.len()
    }

    #[cfg(test)]
    pub(crate) async fn assert_consistent(&self) {
        let tables = self.inner.read().await;
        let mut expected: HashMap<(&str, &str), usize> = HashMap::new();
        for bindings in tables.containers.values() {
            for binding in bindings {
                *expected
                    .entry((binding.hostname.as_str(), binding.identity.as_str()))
                    .or_insert(0) += 1;
            }
        }
        let mut actual: HashMap<(&str, &str), usize> = HashMap::new();
        for (hostname, entry) in &tables.hosts {
            assert!(!entry.backends.is_empty(), "empty entry for {}", hostname);
            for backend in &entry.backends {
                *actual
                    .entry((hostname.as_str(), backend.container_name.as_str()))
                    .or_insert(0) += 1;
            }
        }
        assert_eq!(expected, actual);
    }
}
