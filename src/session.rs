//! Client session that dispatches requests to mounted transports
//!
//! Transports are mounted on URL prefixes; each request goes to the transport
//! with the longest matching prefix.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, Response};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::proxy::connector::HyperSender;
use crate::proxy::send::{HttpSend, ProxyMap, SendOptions};

/// Holds mounted transports and request defaults
pub struct Session {
    mounts: RwLock<Vec<(String, Arc<dyn HttpSend>)>>,
    /// Session-level proxy routing, honored only by transports that do not force their own
    pub proxies: ProxyMap,
    pub timeout: Option<Duration>,
}

impl Session {
    /// Session with direct hyper transports mounted for `http://` and `https://`
    pub fn new() -> Result<Self> {
        let session = Self::empty();
        let direct: Arc<dyn HttpSend> = Arc::new(HyperSender::new()?);
        session.mount("http://", direct.clone());
        session.mount("https://", direct);
        Ok(session)
    }

    /// Session with nothing mounted
    pub fn empty() -> Self {
        Self {
            mounts: RwLock::new(Vec::new()),
            proxies: ProxyMap::default(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mount a transport on a URL prefix, replacing any previous one there
    pub fn mount(&self, prefix: &str, transport: Arc<dyn HttpSend>) {
        let prefix = prefix.to_lowercase();
        let mut mounts = self.mounts.write();
        mounts.retain(|(existing, _)| *existing != prefix);
        mounts.push((prefix, transport));
        // Longest prefix first
        mounts.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Transport that would handle `url`
    pub fn transport_for(&self, url: &str) -> Result<Arc<dyn HttpSend>> {
        let lowered = url.to_lowercase();
        self.mounts
            .read()
            .iter()
            .find(|(prefix, _)| lowered.starts_with(prefix.as_str()))
            .map(|(_, transport)| transport.clone())
            .ok_or_else(|| TransportError::NoTransport(url.to_string()))
    }

    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            proxies: self.proxies.clone(),
            connect_timeout: self.timeout,
            read_timeout: self.timeout,
        }
    }

    pub async fn send(&self, request: &Request<Bytes>) -> Result<Response<Bytes>> {
        let url = request.uri().to_string();
        let transport = self.transport_for(&url)?;
        debug!("{} {}", request.method(), url);
        transport.send(request, &self.send_options()).await
    }

    pub async fn request(&self, method: Method, url: &str, body: Bytes) -> Result<Response<Bytes>> {
        let request = Request::builder().method(method).uri(url).body(body)?;
        self.send(&request).await
    }

    pub async fn get(&self, url: &str) -> Result<Response<Bytes>> {
        self.request(Method::GET, url, Bytes::new()).await
    }
}
