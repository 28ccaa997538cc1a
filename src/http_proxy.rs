//! HTTP forward proxy engine.
//!
//! Every request is classified once as either a CONNECT tunnel or a plain
//! forward request:
//! - CONNECT: dial the target, answer `200`, then take over the client
//!   connection through hyper's upgrade mechanism and splice bytes.
//! - Anything else: rewrite the request with `X-Forwarded-*` headers, send it
//!   to the target over a fresh HTTP/1.1 connection and return the response
//!   with permissive CORS headers added.

use crate::config::{ListenerEndpoint, Protocol, Timeouts};
use crate::console::Console;
use crate::dialer::Dialer;
use crate::error::{ProxyError, Result};
use crate::relay::relay;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::request::Parts;
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Body type returned to clients.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Body written by the error handler on upstream failure.
pub const PROXY_ERROR_BODY: &str = "Proxy Error";

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Headers that describe a single hop and are never forwarded.
const HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    PROXY_CONNECTION,
    KEEP_ALIVE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// What to do with a request, decided once at the entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// CONNECT to `host:port`; `None` when the request carried no authority.
    Tunnel(Option<String>),
    /// Rewrite and forward to the origin.
    Forward,
}

impl Dispatch {
    pub fn classify<B>(req: &Request<B>) -> Self {
        if req.method() == Method::CONNECT {
            Dispatch::Tunnel(req.uri().authority().map(|a| a.to_string()))
        } else {
            Dispatch::Forward
        }
    }
}

/// Where a forward request goes and which headers it gains on the way.
#[derive(Debug, Clone)]
pub struct ForwardTarget {
    /// Resolved scheme, `http` when the request URL has none.
    pub scheme: String,
    /// `host[:port]` as requested, without userinfo; becomes the outbound Host header.
    pub authority: String,
    /// `host:port` to dial.
    pub dial_addr: String,
    /// Origin-form request target.
    pub path_and_query: String,
    original_host: HeaderValue,
    remote_addr: SocketAddr,
}

impl ForwardTarget {
    /// Resolves the target from the request URL, falling back to the Host header.
    pub fn resolve(uri: &Uri, headers: &HeaderMap, remote_addr: SocketAddr) -> Result<Self> {
        let scheme = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();

        let host_header = headers.get(header::HOST).cloned();
        let authority = match uri.authority() {
            Some(authority) => authority.clone(),
            None => host_header
                .as_ref()
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<http::uri::Authority>().ok())
                .ok_or_else(|| ProxyError::InvalidRequest("request has no target host".into()))?,
        };

        let host = authority.host();
        if host.is_empty() {
            return Err(ProxyError::InvalidRequest("request has empty host".into()));
        }

        // Userinfo never leaves the proxy.
        let host_port = match authority.port_u16() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let port = authority
            .port_u16()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });
        let original_host = match host_header {
            Some(value) if !value.is_empty() => value,
            _ => HeaderValue::from_str(&host_port)
                .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?,
        };

        Ok(Self {
            dial_addr: format!("{}:{}", host, port),
            authority: host_port,
            path_and_query: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            scheme,
            original_host,
            remote_addr,
        })
    }

    /// Absolute URL of the target, for logging.
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority, self.path_and_query)
    }

    /// Sets the forwarding headers and the outbound Host. Applying it twice
    /// yields the same headers.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        let invalid =
            |e: http::header::InvalidHeaderValue| ProxyError::InvalidRequest(e.to_string());

        headers.insert(X_FORWARDED_HOST, self.original_host.clone());
        headers.insert(
            X_FORWARDED_PROTO,
            HeaderValue::from_str(&self.scheme).map_err(invalid)?,
        );
        headers.insert(
            X_REAL_IP,
            HeaderValue::from_str(&self.remote_addr.to_string()).map_err(invalid)?,
        );
        headers.insert(
            header::HOST,
            HeaderValue::from_str(&self.authority).map_err(invalid)?,
        );
        Ok(())
    }

    /// Builds the outbound request: re-applies the header rewrite, strips
    /// hop-by-hop headers, records the client in `X-Forwarded-For` and
    /// switches the URI to origin-form.
    pub fn direct<B>(&self, mut parts: Parts, body: B) -> Result<Request<B>> {
        remove_hop_headers(&mut parts.headers);
        self.apply(&mut parts.headers)?;

        let client_ip = self.remote_addr.ip().to_string();
        let prior = parts
            .headers
            .get(&X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok());
        let forwarded_for = match prior {
            Some(prior) if !prior.is_empty() => format!("{}, {}", prior, client_ip),
            _ => client_ip,
        };
        parts.headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_str(&forwarded_for)
                .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?,
        );

        parts.uri = self
            .path_and_query
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::InvalidRequest(e.to_string()))?;
        parts.version = http::Version::HTTP_11;

        Ok(Request::from_parts(parts, body))
    }
}

/// Removes hop-by-hop headers, including any named by `Connection`.
pub fn remove_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_HEADERS.iter()) {
        headers.remove(name);
    }
}

/// Adds permissive CORS headers, replacing whatever the upstream sent.
pub fn modify_response<B>(resp: &mut Response<B>) {
    let headers = resp.headers_mut();
    remove_hop_headers(headers);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
}

fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Plain-text error response.
pub fn text_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut resp = Response::new(full(format!("{}\n", message)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

/// Text of a dial failure as reported to a CONNECT client.
fn dial_error_text(err: &ProxyError) -> String {
    match err {
        ProxyError::Io(e) => e.to_string(),
        other => other.to_string(),
    }
}

/// Response used for every upstream transport failure.
pub fn proxy_error_response() -> Response<ProxyBody> {
    let mut resp = Response::new(full(PROXY_ERROR_BODY));
    *resp.status_mut() = StatusCode::BAD_GATEWAY;
    resp
}

/// Exponential backoff for transient accept failures.
struct AcceptBackoff {
    delay: Option<Duration>,
}

impl AcceptBackoff {
    const MIN: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(1);

    fn new() -> Self {
        Self { delay: None }
    }

    fn next(&mut self) -> Duration {
        let delay = match self.delay {
            None => Self::MIN,
            Some(d) => (d * 2).min(Self::MAX),
        };
        self.delay = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.delay = None;
    }
}

struct Inner {
    endpoint: ListenerEndpoint,
    timeouts: Timeouts,
    dialer: Arc<dyn Dialer>,
    console: Arc<Console>,
}

/// The HTTP forward proxy engine.
#[derive(Clone)]
pub struct HttpProxy {
    inner: Arc<Inner>,
}

impl HttpProxy {
    pub fn new(
        endpoint: ListenerEndpoint,
        timeouts: Timeouts,
        dialer: Arc<dyn Dialer>,
        console: Arc<Console>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint,
                timeouts,
                dialer,
                console,
            }),
        }
    }

    /// Binds the configured endpoint and serves forever.
    pub async fn run(self) -> Result<()> {
        self.inner.console.init();

        let addr = self.inner.endpoint.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind {
                protocol: Protocol::Http,
                addr,
                source,
            })?;

        self.serve(listener).await
    }

    /// Serves HTTP proxy requests on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let port = listener.local_addr()?.port();
        self.inner.console.announce(Protocol::Http, port);
        info!(port = port, "starting proxy server");

        let mut backoff = AcceptBackoff::new();
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => {
                    backoff.reset();
                    accepted
                }
                Err(e) => {
                    let delay = backoff.next();
                    warn!(error = %e, retry_in = ?delay, "accept error");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let proxy = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| proxy.clone().handle(req, remote_addr));

                if let Err(err) = http1::Builder::new()
                    .preserve_header_case(true)
                    .title_case_headers(true)
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await
                {
                    debug!(remote_addr = %remote_addr, error = %err, "connection ended");
                }
            });
        }
    }

    /// Entry point for every request.
    pub async fn handle(
        self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> std::result::Result<Response<ProxyBody>, Infallible> {
        self.inner.console.activity();

        debug!(
            remote_addr = %remote_addr,
            method = %req.method(),
            url = %req.uri(),
            "client connected"
        );

        let resp = match Dispatch::classify(&req) {
            Dispatch::Tunnel(Some(target)) => self.tunnel(req, target).await,
            Dispatch::Tunnel(None) => {
                warn!(url = %req.uri(), "CONNECT without target");
                text_response(StatusCode::BAD_REQUEST, "CONNECT requires host:port")
            }
            Dispatch::Forward => self.forward(req, remote_addr).await,
        };

        Ok(resp)
    }

    /// Dials `target` and hands the client connection to the relay.
    async fn tunnel(&self, mut req: Request<Incoming>, target: String) -> Response<ProxyBody> {
        let dest = match self.dial(&target).await {
            Ok(dest) => dest,
            Err(e) => {
                error!(target = %target, error = %e, "tunnel connection failed");
                return text_response(StatusCode::SERVICE_UNAVAILABLE, &dial_error_text(&e));
            }
        };

        let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
            error!(target = %target, "connection cannot be taken over");
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Hijacking not supported");
        };

        let idle_timeout = self.inner.timeouts.idle;
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let stats = relay(TokioIo::new(upgraded), dest, idle_timeout).await;
                    debug!(
                        target = %target,
                        sent = stats.client_to_dest,
                        received = stats.dest_to_client,
                        "tunnel closed"
                    );
                }
                Err(e) => warn!(target = %target, error = %e, "upgrade error"),
            }
        });

        Response::new(empty())
    }

    /// Rewrites and forwards a non-CONNECT request.
    async fn forward(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Response<ProxyBody> {
        let (mut parts, body) = req.into_parts();

        let target = match ForwardTarget::resolve(&parts.uri, &parts.headers, remote_addr) {
            Ok(target) => target,
            Err(e) => {
                warn!(url = %parts.uri, error = %e, "failed to parse URL");
                return text_response(StatusCode::BAD_REQUEST, &e.to_string());
            }
        };

        if let Err(e) = target.apply(&mut parts.headers) {
            warn!(url = %parts.uri, error = %e, "failed to rewrite request");
            return text_response(StatusCode::BAD_REQUEST, &e.to_string());
        }

        if parts.headers.contains_key(header::AUTHORIZATION) {
            info!(host = %target.authority, "forwarding authenticated request");
        }

        debug!(
            method = %parts.method,
            url = %target.url(),
            remote_ip = %remote_addr,
            headers = ?parts.headers,
            "proxying request"
        );

        let upstream_req = match target.direct(parts, body) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to build upstream request");
                return text_response(StatusCode::BAD_REQUEST, &e.to_string());
            }
        };

        match self.round_trip(&target, upstream_req).await {
            Ok(mut resp) => {
                modify_response(&mut resp);
                resp.map(|body| body.boxed())
            }
            Err(e) => {
                error!(url = %target.url(), error = %e, "proxy error");
                proxy_error_response()
            }
        }
    }

    /// Sends `req` to the target over a new connection.
    async fn round_trip(
        &self,
        target: &ForwardTarget,
        req: Request<Incoming>,
    ) -> Result<Response<Incoming>> {
        if target.scheme != "http" {
            return Err(ProxyError::UnsupportedScheme(target.scheme.clone()));
        }

        let stream = self.dial(&target.dial_addr).await?;
        let (mut sender, conn) = hyper::client::conn::http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .handshake(TokioIo::new(stream))
            .await?;

        let dial_addr = target.dial_addr.clone();
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!(upstream = %dial_addr, error = %err, "upstream connection ended");
            }
        });

        Ok(sender.send_request(req).await?)
    }

    /// Dials with the configured connect timeout.
    async fn dial(&self, addr: &str) -> Result<TcpStream> {
        let dial = self.inner.dialer.dial(addr);
        match tokio::time::timeout(self.inner.timeouts.connect, dial).await {
            Ok(stream) => Ok(stream?),
            Err(_) => Err(ProxyError::DialTimeout {
                addr: addr.to_string(),
            }),
        }
    }
}
