//! Hyper-based network sender
//!
//! Delivers a single request either directly or through a forwarding HTTP
//! proxy. Plain HTTP targets are sent to the proxy in absolute form; HTTPS
//! targets go through a `CONNECT` tunnel with TLS on top.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use http::header::{HOST, PROXY_AUTHORIZATION};
use http::{Method, Request, Response, Uri, Version};
use http_body_util::{BodyExt, Empty, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{Result, TransportError};
use crate::proxy::send::{HttpSend, SendOptions};

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Byte stream a request can be written to
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Where a request is headed
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    scheme: String,
    host: String,
    port: u16,
}

impl Target {
    fn from_uri(uri: &Uri) -> Result<Self> {
        let scheme = match uri.scheme_str() {
            Some(s @ ("http" | "https")) => s.to_string(),
            Some(other) => {
                return Err(TransportError::InvalidRequest(format!(
                    "Unsupported URL scheme: {}",
                    other
                )))
            }
            None => {
                return Err(TransportError::InvalidRequest(format!(
                    "URL must be absolute: {}",
                    uri
                )))
            }
        };

        let host = uri
            .host()
            .ok_or_else(|| TransportError::InvalidRequest("Missing host in URI".to_string()))?
            .to_string();

        let port = uri.port_u16().unwrap_or_else(|| match scheme.as_str() {
            "https" => 443,
            _ => 80,
        });

        Ok(Self { scheme, host, port })
    }

    fn is_tls(&self) -> bool {
        self.scheme == "https"
    }

    fn authority(&self) -> String {
        format_tcp_addr(&self.host, self.port)
    }

    fn host_header(&self) -> String {
        let default_port = if self.is_tls() { 443 } else { 80 };
        if self.port == default_port {
            bracket_ipv6(&self.host)
        } else {
            self.authority()
        }
    }
}

/// Result of asking the proxy for a tunnel
enum Tunnel {
    Open(Box<dyn Connection>),
    /// The proxy answered the CONNECT with something other than 2xx
    Rejected(Response<Bytes>),
}

/// Network sender backed by hyper's HTTP/1.1 client connection
#[derive(Clone)]
pub struct HyperSender {
    connect_timeout: Duration,
    read_timeout: Duration,
    tls: TlsConnector,
}

impl HyperSender {
    pub fn new() -> Result<Self> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        Ok(Self {
            connect_timeout,
            read_timeout,
            tls: tls_connector()?,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Open a stream to the target, through the proxy when one is given
    async fn connect(&self, target: &Target, proxy: Option<&Url>) -> Result<Tunnel> {
        let Some(proxy) = proxy else {
            let stream = tcp_connect(&target.authority()).await?;
            return if target.is_tls() {
                Ok(Tunnel::Open(self.tls_handshake(stream, &target.host).await?))
            } else {
                Ok(Tunnel::Open(Box::new(stream)))
            };
        };

        let proxy_addr = proxy_addr(proxy)?;
        debug!("Connecting to proxy at {}", proxy_addr);
        let stream = tcp_connect(&proxy_addr).await?;

        if !target.is_tls() {
            return Ok(Tunnel::Open(Box::new(stream)));
        }

        match open_tunnel(stream, proxy, target).await? {
            Tunnel::Open(tunnel) => {
                debug!("HTTP CONNECT tunnel established to {}", target.authority());
                Ok(Tunnel::Open(self.tls_handshake(tunnel, &target.host).await?))
            }
            rejected => Ok(rejected),
        }
    }

    async fn tls_handshake<S>(&self, stream: S, host: &str) -> Result<Box<dyn Connection>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::Tls(format!("Invalid server name '{}': {}", host, e)))?;

        let stream = self
            .tls
            .connect(server_name, stream)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        Ok(Box::new(stream))
    }
}

#[async_trait]
impl HttpSend for HyperSender {
    #[instrument(skip(self, request, options), fields(method = %request.method(), uri = %request.uri()))]
    async fn send(
        &self,
        request: &Request<Bytes>,
        options: &SendOptions,
    ) -> Result<Response<Bytes>> {
        let target = Target::from_uri(request.uri())?;
        let proxy = options.proxies.for_scheme(&target.scheme);
        let connect_timeout = options.connect_timeout.unwrap_or(self.connect_timeout);
        let read_timeout = options.read_timeout.unwrap_or(self.read_timeout);

        let tunnel = timeout(connect_timeout, self.connect(&target, proxy))
            .await
            .map_err(|_| TransportError::ConnectTimeout)??;

        let stream = match tunnel {
            Tunnel::Open(stream) => stream,
            Tunnel::Rejected(response) => {
                debug!(status = %response.status(), "Proxy rejected CONNECT");
                return Ok(response);
            }
        };

        // Plain HTTP through a proxy is the only case that needs absolute form
        let via_proxy = proxy.filter(|_| !target.is_tls());
        let outgoing = build_request(request, &target, via_proxy)?;

        timeout(read_timeout, exchange(stream, outgoing))
            .await
            .map_err(|_| TransportError::ReadTimeout)?
    }
}

/// Send a request over an established stream and buffer the response
async fn exchange(stream: Box<dyn Connection>, request: Request<Full<Bytes>>) -> Result<Response<Bytes>> {
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| TransportError::Connect(format!("Handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Connection ended: {}", e);
        }
    });

    let response = sender.send_request(request).await?;

    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();

    Ok(Response::from_parts(parts, body))
}

/// Ask the proxy for a `CONNECT` tunnel to the target
async fn open_tunnel(stream: TcpStream, proxy: &Url, target: &Target) -> Result<Tunnel> {
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| TransportError::Connect(format!("Proxy handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            debug!("Proxy connection ended: {}", e);
        }
    });

    let authority = target.authority();
    let mut builder = Request::builder()
        .method(Method::CONNECT)
        .uri(authority.as_str())
        .header(HOST, authority.as_str());
    if let Some(credentials) = proxy_authorization(proxy) {
        builder = builder.header(PROXY_AUTHORIZATION, credentials);
    }
    let connect = builder.body(Empty::<Bytes>::new())?;

    let response = sender
        .send_request(connect)
        .await
        .map_err(|e| TransportError::Connect(format!("CONNECT failed: {}", e)))?;

    if !response.status().is_success() {
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_default();
        return Ok(Tunnel::Rejected(Response::from_parts(parts, body)));
    }

    let upgraded = hyper::upgrade::on(response)
        .await
        .map_err(|e| TransportError::Connect(format!("CONNECT upgrade failed: {}", e)))?;

    Ok(Tunnel::Open(Box::new(TokioIo::new(upgraded))))
}

/// Build the outgoing hyper request from the caller's request
fn build_request(
    request: &Request<Bytes>,
    target: &Target,
    proxy: Option<&Url>,
) -> Result<Request<Full<Bytes>>> {
    let uri = match proxy {
        Some(_) => request.uri().to_string(),
        None => request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
    };

    let mut builder = Request::builder()
        .method(request.method().clone())
        .uri(uri)
        .version(Version::HTTP_11);

    // Copy headers, except hop-by-hop headers
    for (name, value) in request.headers() {
        if !is_hop_by_hop_header(name.as_str()) {
            builder = builder.header(name, value);
        }
    }

    if !request.headers().contains_key(HOST) {
        builder = builder.header(HOST, target.host_header());
    }

    if let Some(credentials) = proxy.and_then(proxy_authorization) {
        builder = builder.header(PROXY_AUTHORIZATION, credentials);
    }

    Ok(builder.body(Full::new(request.body().clone()))?)
}

fn tls_connector() -> Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TransportError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn tcp_connect(addr: &str) -> Result<TcpStream> {
    TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::Connect(format!("TCP connect to {} failed: {}", addr, e)))
}

/// `host:port` of a proxy URL
pub(crate) fn proxy_addr(proxy: &Url) -> Result<String> {
    let host = proxy
        .host_str()
        .ok_or_else(|| TransportError::InvalidProxyUrl(format!("{}: missing host", proxy)))?;
    let port = proxy
        .port_or_known_default()
        .ok_or_else(|| TransportError::InvalidProxyUrl(format!("{}: missing port", proxy)))?;
    Ok(format_tcp_addr(host, port))
}

/// `Basic` credentials from the proxy URL's userinfo, if any
fn proxy_authorization(proxy: &Url) -> Option<String> {
    if proxy.username().is_empty() {
        return None;
    }
    let credentials = format!("{}:{}", proxy.username(), proxy.password().unwrap_or(""));
    Some(format!("Basic {}", BASE64.encode(credentials.as_bytes())))
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

fn format_tcp_addr(host: &str, port: u16) -> String {
    format!("{}:{}", bracket_ipv6(host), port)
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
