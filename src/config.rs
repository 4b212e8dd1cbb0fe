use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Address the HTTP proxy listens on.
    pub listen: SocketAddr,
    /// Environment variable containers declare their routes in.
    pub route_variable: String,
    /// File holding this container's own id.
    pub identity_file: PathBuf,
    pub reconnect_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 80)),
            route_variable: "SUB2PORT".into(),
            identity_file: PathBuf::from("/etc/hostname"),
            reconnect_delay_secs: 1,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("sub2port.toml"))
                .merge(Json::file("sub2port.json"))
                .merge(Env::prefixed("SUB2PORT_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        if config.route_variable.is_empty() || config.route_variable.contains('=') {
            anyhow::bail!("Invalid route_variable: {:?}", config.route_variable);
        }

        Ok(config)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}
