//! sub2port: routes HTTP requests to containers by hostname.

use std::future::Future;
use std::io;
use std::sync::Arc;

use anyhow::anyhow;
use log::{error, info};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;

mod config;
mod error;
mod identity;
mod metadata;
mod proxy;
mod route_config;
mod routes;
mod runtime;
mod types;
mod watcher;

use config::Config;
use proxy::Proxy;
use routes::RoutingTable;
use runtime::DockerPlatform;
use watcher::Watcher;

/// Logger that prints `info` and above unless `filter_var` says otherwise.
fn logger(filter_var: &str) -> env_logger::Builder {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or(filter_var, "info"))
}

/// Waits for Ctrl+C.  The proxy never returns on its own, so if it does
/// the process fails.
async fn wait_for_shutdown<F>(signal: F, proxy: &mut JoinHandle<()>) -> anyhow::Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::select! {
        res = signal => {
            match res {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
            Ok(())
        }
        res = proxy => match res {
            Ok(()) => Err(anyhow!("HTTP proxy stopped")),
            Err(e) => Err(anyhow!("HTTP proxy failed: {}", e)),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    logger(env_logger::DEFAULT_FILTER_ENV).init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting sub2port with config: {:?}", cfg);

    // Container platform
    let platform = Arc::new(DockerPlatform::connect()?);

    // Find the network we route for
    let identity = identity::resolve(platform.as_ref(), &cfg.identity_file).await?;
    info!("Running as container {}", identity.container_id);
    info!("# using network {:?}", identity.network);

    // Shared state
    let table = Arc::new(RoutingTable::new());

    // HTTP proxy
    let listener = TcpListener::bind(cfg.listen).await?;
    info!("# listening on :{}", identity.port);
    let proxy = Arc::new(Proxy::new(Arc::clone(&table)));
    let mut proxy_handle = tokio::spawn(proxy.serve(listener));

    // Event watcher
    let watcher = Watcher::new(
        Arc::clone(&platform),
        Arc::clone(&table),
        identity.network.clone(),
        cfg.route_variable.clone(),
        cfg.reconnect_delay(),
    );
    let watcher_handle = tokio::spawn(watcher.run());

    let result = wait_for_shutdown(signal::ctrl_c(), &mut proxy_handle).await;

    // Abort tasks
    watcher_handle.abort();
    proxy_handle.abort();

    info!("Shutdown complete.");
    result
}
