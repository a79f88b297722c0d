//! Connection-level retry policy
//!
//! Retries connect failures, read failures and responses whose status is on
//! a force list, with exponential backoff. Runs beneath the proxy fault
//! classification, so it never sees `ProxyFault`s.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::RETRY_AFTER;
use http::{Method, Request, Response, StatusCode};
use tracing::{debug, error, instrument, warn};

use crate::error::{Result, RetryCause, TransportError};
use crate::proxy::send::{HttpSend, SendOptions};

/// Upper bound on a computed backoff
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(120);

/// Statuses whose `Retry-After` header is honored
const RETRY_AFTER_STATUSES: [StatusCode; 3] = [
    StatusCode::PAYLOAD_TOO_LARGE,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::SERVICE_UNAVAILABLE,
];

/// What went wrong on one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    Connect,
    Read,
    Status(StatusCode),
}

/// Decision returned by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up and surface the failure
    NoRetry,
    /// Retry after the given delay
    RetryAfter(Duration),
}

/// Remaining retry budgets, consumed one failure at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub total: u32,
    pub connect: u32,
    pub read: u32,
    /// Failures seen so far on this request
    pub failures: u32,
}

impl RetryBudget {
    /// Spend one retry for `failure`; `false` once any relevant budget is gone
    pub fn consume(&mut self, failure: AttemptFailure) -> bool {
        self.failures += 1;
        if self.total == 0 {
            return false;
        }
        match failure {
            AttemptFailure::Connect if self.connect == 0 => return false,
            AttemptFailure::Read if self.read == 0 => return false,
            AttemptFailure::Connect => self.connect -= 1,
            AttemptFailure::Read => self.read -= 1,
            AttemptFailure::Status(_) => {}
        }
        self.total -= 1;
        true
    }
}

/// Exponential backoff retry policy for connection-level failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed across all failure kinds
    pub total: u32,
    /// Retries allowed for connect failures
    pub connect: u32,
    /// Retries allowed for read failures
    pub read: u32,
    /// Backoff before retry k is `backoff_factor * 2^(k-1)` seconds (none for the first)
    pub backoff_factor: f64,
    pub backoff_max: Duration,
    /// Statuses that force a retry even though a response arrived
    pub status_forcelist: BTreeSet<u16>,
    /// Methods safe to repeat after the request may have reached the server
    pub allowed_methods: Vec<Method>,
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 0.3, [500, 502, 504])
    }
}

impl RetryPolicy {
    /// Same budget for total, connect and read retries
    pub fn new(retries: u32, backoff_factor: f64, status_forcelist: impl IntoIterator<Item = u16>) -> Self {
        Self {
            total: retries,
            connect: retries,
            read: retries,
            backoff_factor,
            backoff_max: DEFAULT_BACKOFF_MAX,
            status_forcelist: status_forcelist.into_iter().collect(),
            allowed_methods: vec![
                Method::HEAD,
                Method::GET,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
                Method::TRACE,
            ],
            respect_retry_after: true,
        }
    }

    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            total: self.total,
            connect: self.connect,
            read: self.read,
            failures: 0,
        }
    }

    pub fn is_method_allowed(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    /// Whether a received response must be retried
    pub fn is_forced_status(&self, method: &Method, status: StatusCode) -> bool {
        self.status_forcelist.contains(&status.as_u16()) && self.is_method_allowed(method)
    }

    /// Map a transport error to a retryable failure kind
    pub fn classify_error(&self, method: &Method, err: &TransportError) -> Option<AttemptFailure> {
        if err.is_connect_error() {
            // The request never left, any method is safe to repeat
            Some(AttemptFailure::Connect)
        } else if err.is_read_error() && self.is_method_allowed(method) {
            Some(AttemptFailure::Read)
        } else {
            None
        }
    }

    /// Backoff before the next retry, given how many failures happened so far
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures <= 1 || self.backoff_factor.is_nan() || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exp = failures.saturating_sub(1).min(30) as i32;
        let secs = self.backoff_factor * 2f64.powi(exp);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// Consume budget for `failure` and decide whether to retry
    pub fn decide(&self, budget: &mut RetryBudget, failure: AttemptFailure) -> RetryDecision {
        if budget.consume(failure) {
            RetryDecision::RetryAfter(self.backoff(budget.failures))
        } else {
            RetryDecision::NoRetry
        }
    }

    /// Server-requested delay for a forced-status response
    pub fn retry_after(&self, response: &Response<Bytes>) -> Option<Duration> {
        if !self.respect_retry_after || !RETRY_AFTER_STATUSES.contains(&response.status()) {
            return None;
        }
        parse_retry_after(response.headers().get(RETRY_AFTER)?.to_str().ok()?)
    }
}

/// Only the delay-seconds form is understood
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Sender that applies a [`RetryPolicy`] around another sender
pub struct RetryingSender<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingSender<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub(crate) fn policy_mut(&mut self) -> &mut RetryPolicy {
        &mut self.policy
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: HttpSend> HttpSend for RetryingSender<S> {
    #[instrument(skip(self, request, options), fields(method = %request.method(), uri = %request.uri()))]
    async fn send(
        &self,
        request: &Request<Bytes>,
        options: &SendOptions,
    ) -> Result<Response<Bytes>> {
        let method = request.method();
        let mut budget = self.policy.budget();

        loop {
            let (failure, cause, server_delay) = match self.inner.send(request, options).await {
                Ok(response) => {
                    let status = response.status();
                    if !self.policy.is_forced_status(method, status) {
                        return Ok(response);
                    }
                    let delay = self.policy.retry_after(&response);
                    (
                        AttemptFailure::Status(status),
                        RetryCause::Status(status),
                        delay,
                    )
                }
                Err(e) => match self.policy.classify_error(method, &e) {
                    Some(AttemptFailure::Connect) => {
                        (AttemptFailure::Connect, RetryCause::Connect(e.to_string()), None)
                    }
                    Some(failure) => (failure, RetryCause::Read(e.to_string()), None),
                    None => return Err(e),
                },
            };

            match self.policy.decide(&mut budget, failure) {
                RetryDecision::NoRetry => {
                    error!(
                        retries = self.policy.total,
                        cause = %cause,
                        "Connection-level retries exhausted"
                    );
                    return Err(TransportError::RetryExhausted {
                        retries: self.policy.total,
                        cause,
                    });
                }
                RetryDecision::RetryAfter(backoff) => {
                    let delay = server_delay.unwrap_or(backoff);
                    warn!(
                        attempt = budget.failures,
                        cause = %cause,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying request"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    } else {
                        debug!("Retrying immediately");
                    }
                }
            }
        }
    }
}
