//! Data structures shared between the platform client, the event
//! watcher and the routing table.
//!
//! Platform responses are decoded into these plain structures as soon
//! as they leave the Docker client, so the rest of the daemon never
//! touches the `bollard` models directly.  Fields the platform may omit
//! are `Option`s or empty collections; a missing field is never treated
//! as a decode failure.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// One concrete endpoint a hostname can be routed to.
///
/// Backends are never edited in place.  When a container's
/// configuration changes, all of its backends are replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Container name with the leading `/` stripped.  Doubles as the
    /// identity used to find the backend again on removal.
    pub container_name: String,
    /// IP address of the container on the routed network.
    pub address: String,
    pub port: String,
}

impl Backend {
    pub fn new(
        container_name: impl Into<String>,
        address: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            container_name: container_name.into(),
            address: address.into(),
            port: port.into(),
        }
    }

    /// `address:port`, with IPv6 addresses bracketed.
    pub fn authority(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container_name, self.port)
    }
}

/// Reverse-index record: a hostname a container registered, and the
/// identity of the backend it added under that hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBinding {
    pub hostname: String,
    pub identity: String,
}

/// What the platform reports about one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    /// Name as reported by the platform, usually with a leading `/`.
    pub name: String,
    /// `KEY=value` strings from the container configuration.
    pub env: Vec<String>,
    /// Exposed ports in `port/proto` form, e.g. `8080/tcp`.
    pub exposed_ports: Vec<String>,
    /// Attached networks and the container's IP address on each.  The
    /// address is empty when the platform has not assigned one yet.
    pub networks: BTreeMap<String, String>,
    /// Host ports the container's ports are published on.
    pub published_ports: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Network,
    Container,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Connect,
    Disconnect,
    Start,
    Other(String),
}

impl EventAction {
    pub fn as_str(&self) -> &str {
        match self {
            EventAction::Connect => "connect",
            EventAction::Disconnect => "disconnect",
            EventAction::Start => "start",
            EventAction::Other(action) => action,
        }
    }
}

impl From<&str> for EventAction {
    fn from(action: &str) -> Self {
        match action {
            "connect" => EventAction::Connect,
            "disconnect" => EventAction::Disconnect,
            "start" => EventAction::Start,
            other => EventAction::Other(other.to_string()),
        }
    }
}

/// A single message from the platform's event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEvent {
    pub kind: EventKind,
    pub action: EventAction,
    /// Id of the object the event is about: the network for network
    /// events, the container for container events.
    pub actor_id: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl PlatformEvent {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
