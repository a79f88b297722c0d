//! Proxy transport with an additional connection-level retry policy
//!
//! Composes a [`ProxyTransport`] over a [`RetryingSender`]: connection errors,
//! read timeouts and forced statuses are retried beneath the Privoxy fault
//! classification, which only sees the final outcome.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

use crate::config::{ProxyConfig, RetryConfig};
use crate::error::Result;
use crate::proxy::connector::HyperSender;
use crate::proxy::retry::{RetryPolicy, RetryingSender};
use crate::proxy::send::{HttpSend, SendOptions};
use crate::proxy::transport::ProxyTransport;

/// Default connection-level retry budget
pub const DEFAULT_RETRIES: u32 = 3;
/// Default backoff factor in seconds
pub const DEFAULT_BACKOFF_FACTOR: f64 = 0.3;
/// Statuses forced into a retry by default
pub const DEFAULT_STATUS_FORCELIST: [u16; 3] = [500, 502, 504];

/// Privoxy transport that also retries failures reaching the proxy or target
pub struct RetryingProxyTransport<S = HyperSender> {
    transport: ProxyTransport<RetryingSender<S>>,
}

impl RetryingProxyTransport<HyperSender> {
    /// Transport with default settings for both retry layers
    pub fn new(proxy_url: &str) -> Result<Self> {
        Self::with_sender(proxy_url, HyperSender::new()?)
    }

    pub fn from_config(proxy: &ProxyConfig, retry: &RetryConfig) -> Result<Self> {
        let sender = HyperSender::with_timeouts(proxy.connect_timeout, proxy.read_timeout)?;
        Ok(Self::with_sender(&proxy.url, sender)?
            .with_retry_wait(proxy.retry_wait)
            .with_max_retries(proxy.max_retries)
            .with_retries(retry.retries)
            .with_backoff_factor(retry.backoff_factor)
            .with_status_forcelist(retry.status_forcelist.iter().copied()))
    }
}

impl<S> RetryingProxyTransport<S> {
    /// Layer both retry policies over a custom round-trip primitive
    pub fn with_sender(proxy_url: &str, inner: S) -> Result<Self> {
        let policy = RetryPolicy::new(
            DEFAULT_RETRIES,
            DEFAULT_BACKOFF_FACTOR,
            DEFAULT_STATUS_FORCELIST,
        );
        let transport = ProxyTransport::with_sender(proxy_url, RetryingSender::new(inner, policy))?;
        Ok(Self { transport })
    }

    /// Budget for total, connect and read retries alike
    pub fn with_retries(mut self, retries: u32) -> Self {
        let policy = self.policy_mut();
        policy.total = retries;
        policy.connect = retries;
        policy.read = retries;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.policy_mut().backoff_factor = backoff_factor;
        self
    }

    pub fn with_status_forcelist(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.policy_mut().status_forcelist = statuses.into_iter().collect();
        self
    }

    pub fn with_retry_wait(mut self, retry_wait: Duration) -> Self {
        self.transport = self.transport.with_retry_wait(retry_wait);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.transport = self.transport.with_max_retries(max_retries);
        self
    }

    pub fn retries(&self) -> u32 {
        self.policy().total
    }

    pub fn backoff_factor(&self) -> f64 {
        self.policy().backoff_factor
    }

    pub fn status_forcelist(&self) -> &BTreeSet<u16> {
        &self.policy().status_forcelist
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.transport.inner().policy()
    }

    /// The Privoxy-aware layer
    pub fn transport(&self) -> &ProxyTransport<RetryingSender<S>> {
        &self.transport
    }

    fn policy_mut(&mut self) -> &mut RetryPolicy {
        self.transport.inner_mut().policy_mut()
    }
}

#[async_trait]
impl<S: HttpSend> HttpSend for RetryingProxyTransport<S> {
    async fn send(
        &self,
        request: &Request<Bytes>,
        options: &SendOptions,
    ) -> Result<Response<Bytes>> {
        self.transport.send(request, options).await
    }
}

impl<S> fmt::Display for RetryingProxyTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy = self.policy();
        write!(
            f,
            "<RetryingProxyTransport url:{} retries:{} backoff factor:{} retry wait:{} s status_forcelist:{:?}>",
            self.transport.display_url(),
            policy.total,
            policy.backoff_factor,
            self.transport.retry_wait().as_secs_f64(),
            policy.status_forcelist
        )
    }
}

impl<S> fmt::Debug for RetryingProxyTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingProxyTransport")
            .field("transport", &self.transport)
            .field("policy", self.policy())
            .finish()
    }
}
