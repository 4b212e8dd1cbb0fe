//! Parsing of the per-container routing variable.
//!
//! The value is a comma-separated list of `hostname` or
//! `hostname:port` entries, e.g. `SUB2PORT=app.test,api.test:9000`.

/// A hostname a container wants routed, and the container port to send
/// it to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub hostname: String,
    pub port: String,
}

/// Parses a routing value.  Entries without a port use `default_port`.
/// Blank entries are skipped.
pub fn parse(value: &str, default_port: &str) -> Vec<RouteEntry> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (hostname, port) = match entry.split_once(':') {
                Some((hostname, port)) if !hostname.is_empty() && !port.contains(':') => {
                    let port = if port.is_empty() { default_port } else { port };
                    (hostname, port)
                }
                _ => (entry, default_port),
            };
            RouteEntry {
                hostname: hostname.to_string(),
                port: port.to_string(),
            }
        })
        .collect()
}

/// Looks up `key` in a list of `KEY=value` environment strings.
pub fn lookup_env<'a>(env: &'a [String], key: &str) -> Option<&'a str> {
    env.iter().find_map(|entry| {
        entry
            .split_once('=')
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v)
    })
}

/// The port a bare hostname routes to: the lowest exposed port, or 80.
pub fn default_port(exposed_ports: &[String]) -> String {
    exposed_ports
        .iter()
        .map(|p| p.split('/').next().unwrap_or(p.as_str()))
        .filter(|p| !p.is_empty())
        .min_by_key(|p| (p.parse::<u16>().unwrap_or(u16::MAX), p.to_string()))
        .unwrap_or("80")
        .to_string()
}
