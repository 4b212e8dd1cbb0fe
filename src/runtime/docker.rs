use super::{ContainerPlatform, EventStream};
use crate::error::{Error, Result};
use crate::types::{ContainerDetails, EventKind, PlatformEvent};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::{
    ContainerInspectResponse, EndpointSettings, EventMessage, EventMessageTypeEnum,
};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::debug;
use std::collections::HashMap;

pub struct DockerPlatform {
    docker: Docker,
}

impl DockerPlatform {
    /// Connects to the local Docker daemon (the unix socket on Linux).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

fn filters(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect()
}

fn not_found(container_id: &str, err: bollard::errors::Error) -> Error {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => Error::ContainerNotFound(container_id.to_string()),
        err => err.into(),
    }
}

#[async_trait]
impl ContainerPlatform for DockerPlatform {
    async fn inspect(&self, container_id: &str) -> Result<ContainerDetails> {
        let detail = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| not_found(container_id, e))?;
        Ok(details_from_inspect(detail))
    }

    async fn list_network_containers(&self, network: &str) -> Result<Vec<String>> {
        let opts = ListContainersOptions::<String> {
            all: false,
            filters: filters(&[("network", [network].as_slice())]),
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn events(&self) -> Result<EventStream> {
        let opts = EventsOptions::<String> {
            filters: filters(&[
                ("type", ["network", "container"].as_slice()),
                ("event", ["connect", "disconnect", "start"].as_slice()),
            ]),
            ..Default::default()
        };
        let stream = self
            .docker
            .events(Some(opts))
            .map(|msg| msg.map(event_from_message).map_err(Error::from));
        debug!("Subscribed to Docker events");
        Ok(stream.boxed())
    }
}

fn details_from_inspect(detail: ContainerInspectResponse) -> ContainerDetails {
    let mut details = ContainerDetails {
        name: detail.name.unwrap_or_default(),
        ..Default::default()
    };

    if let Some(config) = detail.config {
        details.env = config.env.unwrap_or_default();
        if let Some(exposed) = config.exposed_ports {
            details.exposed_ports = exposed.into_keys().collect();
            details.exposed_ports.sort();
        }
    }

    if let Some(settings) = detail.network_settings {
        if let Some(networks) = settings.networks {
            details.networks = networks
                .into_iter()
                .map(|(name, endpoint)| (name, endpoint_address(endpoint)))
                .collect();
        }
        if let Some(ports) = settings.ports {
            let mut published: Vec<(String, String)> = ports
                .into_iter()
                .flat_map(|(port, bindings)| {
                    bindings
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|b| b.host_port)
                        .filter(|p| !p.is_empty())
                        .map(move |host_port| (port.clone(), host_port))
                })
                .collect();
            // Order by container port so the choice is stable.
            published.sort();
            details.published_ports = published.into_iter().map(|(_, p)| p).collect();
        }
    }

    details
}

/// IPv4 address on the network, or the global IPv6 address on
/// IPv6-only networks.
fn endpoint_address(endpoint: EndpointSettings) -> String {
    endpoint
        .ip_address
        .filter(|ip| !ip.is_empty())
        .or(endpoint.global_ipv6_address)
        .unwrap_or_default()
}

fn event_from_message(event: EventMessage) -> PlatformEvent {
    let kind = match event.typ {
        Some(EventMessageTypeEnum::NETWORK) => EventKind::Network,
        Some(EventMessageTypeEnum::CONTAINER) => EventKind::Container,
        _ => EventKind::Other,
    };
    let (actor_id, attributes) = match event.actor {
        Some(actor) => (
            actor.id.filter(|id| !id.is_empty()),
            actor.attributes.unwrap_or_default(),
        ),
        None => (None, HashMap::new()),
    };
    PlatformEvent {
        kind,
        action: event.action.as_deref().unwrap_or_default().into(),
        actor_id,
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Backend, EventAction};
    use bollard::models::{ContainerConfig, EventActor, NetworkSettings, PortBinding};

    #[test]
    fn inspect_response_is_flattened() {
        let detail = ContainerInspectResponse {
            name: Some("/web".to_string()),
            config: Some(ContainerConfig {
                env: Some(vec!["SUB2PORT=app.test".to_string()]),
                exposed_ports: Some(HashMap::from([
                    ("9000/tcp".to_string(), HashMap::new()),
                    ("8080/tcp".to_string(), HashMap::new()),
                ])),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                networks: Some(HashMap::from([(
                    "apps".to_string(),
                    EndpointSettings {
                        ip_address: Some("172.20.0.5".to_string()),
                        ..Default::default()
                    },
                )])),
                ports: Some(HashMap::from([
                    (
                        "80/tcp".to_string(),
                        Some(vec![PortBinding {
                            host_ip: Some("0.0.0.0".to_string()),
                            host_port: Some("18081".to_string()),
                            ..Default::default()
                        }]),
                    ),
                    ("443/tcp".to_string(), None),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let details = details_from_inspect(detail);
        assert_eq!(details.name, "/web");
        assert_eq!(details.env, vec!["SUB2PORT=app.test".to_string()]);
        assert_eq!(details.exposed_ports, vec!["8080/tcp", "9000/tcp"]);
        assert_eq!(details.networks.get("apps").map(String::as_str), Some("172.20.0.5"));
        assert_eq!(details.published_ports, vec!["18081"]);
    }

    #[test]
    fn ipv6_only_network_uses_global_address() {
        let detail = ContainerInspectResponse {
            network_settings: Some(NetworkSettings {
                networks: Some(HashMap::from([
                    (
                        "v6".to_string(),
                        EndpointSettings {
                            ip_address: Some(String::new()),
                            global_ipv6_address: Some("fd00::5".to_string()),
                            ..Default::default()
                        },
                    ),
                    (
                        "dual".to_string(),
                        EndpointSettings {
                            ip_address: Some("172.20.0.5".to_string()),
                            global_ipv6_address: Some("fd00::6".to_string()),
                            ..Default::default()
                        },
                    ),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let details = details_from_inspect(detail);
        assert_eq!(details.networks["v6"], "fd00::5");
        assert_eq!(details.networks["dual"], "172.20.0.5");
        let backend = Backend::new("web", details.networks["v6"].as_str(), "8080");
        assert_eq!(backend.authority(), "[fd00::5]:8080");
    }

    #[test]
    fn empty_inspect_response_decodes() {
        let details = details_from_inspect(ContainerInspectResponse::default());
        assert_eq!(details, ContainerDetails::default());
    }

    #[test]
    fn network_event_is_decoded() {
        let event = EventMessage {
            typ: Some(EventMessageTypeEnum::NETWORK),
            action: Some("disconnect".to_string()),
            actor: Some(EventActor {
                id: Some("net1".to_string()),
                attributes: Some(HashMap::from([
                    ("name".to_string(), "apps".to_string()),
                    ("container".to_string(), "abc".to_string()),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let event = event_from_message(event);
        assert_eq!(event.kind, EventKind::Network);
        assert_eq!(event.action, EventAction::Disconnect);
        assert_eq!(event.attribute("name"), Some("apps"));
        assert_eq!(event.attribute("container"), Some("abc"));
    }

    #[test]
    fn event_without_actor_has_no_fields() {
        let event = event_from_message(EventMessage {
            typ: Some(EventMessageTypeEnum::CONTAINER),
            ..Default::default()
        });
        assert_eq!(event.kind, EventKind::Container);
        assert_eq!(event.action, EventAction::Other(String::new()));
        assert_eq!(event.actor_id, None);
        assert!(event.attributes.is_empty());
    }
}
