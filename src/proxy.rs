//! HTTP front end.
//!
//! Every request is routed by its `Host` header: the port suffix is
//! stripped, the routing table picks the next backend, and the request
//! is forwarded to it unchanged apart from the usual proxy headers.
//! Unknown hosts and unreachable backends both answer `502 Bad Gateway`.
//!
//! Requests asking for a protocol switch (`Connection: upgrade`, e.g.
//! WebSockets) keep their `Upgrade` header.  If the backend answers
//! `101 Switching Protocols`, both connections are joined and bytes are
//! copied in each direction until either side closes.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response, StatusCode, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::{debug, error, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

use crate::routes::RoutingTable;
use crate::types::Backend;

type ProxyBody = BoxBody<Bytes, hyper::Error>;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Headers that only apply to a single connection and are never
/// forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Source of inbound connections.
#[async_trait]
pub trait Accept: Send + Sync + 'static {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Accept for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

pub struct Proxy {
    table: Arc<RoutingTable>,
    client: Client<HttpConnector, Incoming>,
}

impl Proxy {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { table, client }
    }

    /// Accepts connections for the lifetime of the process.  A failed
    /// accept (e.g. out of file descriptors) is retried after a delay
    /// that doubles up to one second.
    pub async fn serve<L: Accept>(self: Arc<Self>, listener: L) {
        let mut backoff = ACCEPT_BACKOFF_MIN;
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(conn) => {
                    backoff = ACCEPT_BACKOFF_MIN;
                    conn
                }
                Err(e) => {
                    warn!("accept: {}; retrying in {:?}", e, backoff);
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let proxy = Arc::clone(&self);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let proxy = Arc::clone(&proxy);
                    async move { Ok::<_, Infallible>(proxy.dispatch(req, remote).await) }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    debug!("Error serving connection from {}: {}", remote, err);
                }
            });
        }
    }

    async fn dispatch(&self, mut req: Request<Incoming>, remote: SocketAddr) -> Response<ProxyBody> {
        let host = request_host(&req).map(strip_port).unwrap_or_default().to_string();

        let Some(backend) = self.table.select(&host).await else {
            return text_response(StatusCode::BAD_GATEWAY, format!("no backend for {}\n", host));
        };
        debug!("{} {} -> {}", host, req.uri(), backend);

        let client_upgrade = upgrade_protocol(req.headers())
            .is_some()
            .then(|| hyper::upgrade::on(&mut req));

        let req = match outbound_request(req, &backend, remote) {
            Ok(req) => req,
            Err(e) => {
                error!("proxy {}: invalid upstream uri: {}", host, e);
                return empty_response(StatusCode::BAD_GATEWAY);
            }
        };

        match self.client.request(req).await {
            Ok(mut resp) => {
                let switched = resp.status() == StatusCode::SWITCHING_PROTOCOLS;
                let protocol = if switched {
                    resp.headers().get(header::UPGRADE).cloned()
                } else {
                    None
                };
                if let (true, Some(client_upgrade)) = (switched, client_upgrade) {
                    let backend_upgrade = hyper::upgrade::on(&mut resp);
                    tokio::spawn(tunnel(client_upgrade, backend_upgrade, host));
                }

                let (mut parts, body) = resp.into_parts();
                remove_hop_by_hop(&mut parts.headers);
                if let Some(protocol) = protocol {
                    restore_upgrade(&mut parts.headers, protocol);
                }
                Response::from_parts(parts, body.boxed())
            }
            Err(e) => {
                warn!("proxy {} -> {}: {}", host, backend.authority(), e);
                empty_response(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

/// Copies bytes between the upgraded client and backend connections.
async fn tunnel(client: OnUpgrade, backend: OnUpgrade, host: String) {
    let (client, backend) = match tokio::try_join!(client, backend) {
        Ok(pair) => pair,
        Err(e) => {
            warn!("upgrade {}: {}", host, e);
            return;
        }
    };
    let mut client = TokioIo::new(client);
    let mut backend = TokioIo::new(backend);
    match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
        Ok((up, down)) => debug!("upgrade {} closed ({} bytes up, {} down)", host, up, down),
        Err(e) => debug!("upgrade {}: {}", host, e),
    }
}

fn request_host(req: &Request<Incoming>) -> Option<&str> {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())
}

/// `app.test:8080` -> `app.test`, `[::1]:80` -> `[::1]`.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}

/// The requested protocol when `Connection` lists `upgrade`.
fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let requested = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if requested {
        headers.get(header::UPGRADE).cloned()
    } else {
        None
    }
}

fn restore_upgrade(headers: &mut HeaderMap, protocol: HeaderValue) {
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, protocol);
}

/// Points `req` at `backend`, keeping the path, query and `Host` header.
fn outbound_request<B>(
    req: Request<B>,
    backend: &Backend,
    remote: SocketAddr,
) -> std::result::Result<Request<B>, hyper::http::Error> {
    let (mut parts, body) = req.into_parts();

    let path = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();
    let authority = backend.authority();
    parts.uri = Uri::builder()
        .scheme("http")
        .authority(authority.as_str())
        .path_and_query(path.as_str())
        .build()?;
    parts.version = Version::HTTP_11;

    let protocol = upgrade_protocol(&parts.headers);
    remove_hop_by_hop(&mut parts.headers);
    if let Some(protocol) = protocol {
        restore_upgrade(&mut parts.headers, protocol);
    }
    append_forwarded_for(&mut parts.headers, remote);

    Ok(Request::from_parts(parts, body))
}

fn remove_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop too.
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in named.iter().map(String::as_str).chain(HOP_BY_HOP) {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, remote: SocketAddr) {
    let client = remote.ip().to_string();
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client),
        None => client,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

fn full(body: impl Into<Bytes>) -> ProxyBody {
    Full::new(body.into()).map_err(|never| match never {}).boxed()
}

fn text_response(status: StatusCode, body: String) -> Response<ProxyBody> {
    let mut resp = Response::new(full(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    resp
}

fn empty_response(status: StatusCode) -> Response<ProxyBody> {
    let mut resp = Response::new(full(Bytes::new()));
    *resp.status_mut() = status;
    resp
}
