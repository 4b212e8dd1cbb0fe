//! Container metadata lookups.

use crate::error::Result;
use crate::route_config::{self, RouteEntry};
use crate::runtime::ContainerPlatform;
use crate::types::Backend;

/// What the router needs to know about one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub name: String,
    /// Address on the routed network, if the container is attached.
    pub address: Option<String>,
    pub exposed_ports: Vec<String>,
    /// Raw value of the routing variable, if set.
    pub route_config: Option<String>,
}

impl ContainerMetadata {
    /// Backends this container contributes, keyed by hostname.  Empty
    /// when the container has no routing variable or no address.
    pub fn routes(&self) -> Vec<(String, Backend)> {
        let (Some(config), Some(address)) = (&self.route_config, &self.address) else {
            return Vec::new();
        };
        let default_port = route_config::default_port(&self.exposed_ports);
        route_config::parse(config, &default_port)
            .into_iter()
            .map(|RouteEntry { hostname, port }| {
                (hostname, Backend::new(self.name.clone(), address.clone(), port))
            })
            .collect()
    }
}

/// Inspects `container_id` and extracts the parts relevant to routing on
/// `network`.
pub async fn fetch<P>(
    platform: &P,
    container_id: &str,
    network: &str,
    route_variable: &str,
) -> Result<ContainerMetadata>
where
    P: ContainerPlatform + ?Sized,
{
    let details = platform.inspect(container_id).await?;
    let route_config = route_config::lookup_env(&details.env, route_variable)
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string);
    let address = details
        .networks
        .get(network)
        .filter(|ip| !ip.is_empty())
        .cloned();
    Ok(ContainerMetadata {
        name: details.name.trim_start_matches('/').to_string(),
        address,
        exposed_ports: details.exposed_ports,
        route_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::runtime::fake::{container, FakePlatform};

    #[tokio::test]
    async fn fetch_extracts_routing_fields() {
        let platform = FakePlatform::new();
        platform.put(
            "c1",
            container("web", "apps", "172.20.0.5", &["A=1", "SUB2PORT=app.test"], &["8080/tcp"]),
        );

        let meta = fetch(&platform, "c1", "apps", "SUB2PORT").await.unwrap();
        assert_eq!(meta.name, "web");
        assert_eq!(meta.address.as_deref(), Some("172.20.0.5"));
        assert_eq!(meta.route_config.as_deref(), Some("app.test"));
        assert_eq!(
            meta.routes(),
            vec![("app.test".to_string(), Backend::new("web", "172.20.0.5", "8080"))]
        );
    }

    #[tokio::test]
    async fn other_network_has_no_address() {
        let platform = FakePlatform::new();
        platform.put("c1", container("web", "other", "10.1.0.5", &["SUB2PORT=app.test"], &[]));

        let meta = fetch(&platform, "c1", "apps", "SUB2PORT").await.unwrap();
        assert_eq!(meta.address, None);
        assert!(meta.routes().is_empty());
    }

    #[tokio::test]
    async fn missing_variable_routes_nothing() {
        let platform = FakePlatform::new();
        platform.put("c1", container("db", "apps", "172.20.0.6", &["POSTGRES_DB=x"], &["5432/tcp"]));

        let meta = fetch(&platform, "c1", "apps", "SUB2PORT").await.unwrap();
        assert_eq!(meta.route_config, None);
        assert!(meta.routes().is_empty());
    }

    #[tokio::test]
    async fn vanished_container_is_an_error() {
        let platform = FakePlatform::new();
        let err = fetch(&platform, "gone", "apps", "SUB2PORT").await.unwrap_err();
        assert!(matches!(err, Error::ContainerNotFound(_)));
    }

    #[test]
    fn explicit_ports_and_default_port() {
        let meta = ContainerMetadata {
            name: "multi".to_string(),
            address: Some("172.20.0.7".to_string()),
            exposed_ports: Vec::new(),
            route_config: Some("a.test,b.test:9001".to_string()),
        };
        assert_eq!(
            meta.routes(),
            vec![
                ("a.test".to_string(), Backend::new("multi", "172.20.0.7", "80")),
                ("b.test".to_string(), Backend::new("multi", "172.20.0.7", "9001")),
            ]
        );
    }
}
