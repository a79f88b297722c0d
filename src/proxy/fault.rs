//! Privoxy fault taxonomy and response classification
//!
//! Privoxy reports its own failures as `500 Internal Privoxy Error` pages with
//! a `<code>` element naming the failure. Matching is plain substring search
//! against that page, first match wins.

use bytes::Bytes;
use http::{Response, StatusCode};
use thiserror::Error;

/// Text every Privoxy-generated error page contains
pub const ERROR_MARKER: &str = "500 Internal Privoxy Error";

const FORWARDING_FAILED: &str = "<code>forwarding-failed</code>";
const NO_SERVER_DATA: &str = "<code>no-server-data</code>";
const CONNECTION_TIMEOUT: &str = "<code>connection-timeout</code>";
const ERROR_TITLE: &str = "<title>500 Internal Privoxy Error</title>";

/// A failure the proxy reported about itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyFault {
    /// Proxy could not forward the request upstream
    #[error("Privoxy forwarding failed")]
    ForwardingFailed,

    /// Upstream closed without sending any data
    #[error("Privoxy received no data from server")]
    NoServerData,

    /// Proxy timed out connecting upstream
    #[error("Privoxy connection timeout")]
    ConnectionTimeout,

    /// Privoxy error page with an unknown failure code
    #[error("{body}")]
    Privoxy { body: String },

    /// Marked 500 that does not look like a regular Privoxy page
    #[error("{body}")]
    Unrecognized { body: String },

    /// Internal retry ceiling reached
    #[error("Too many retries: {attempts}")]
    TooManyRetries { attempts: u32 },
}

impl ProxyFault {
    /// Whether the proxy transport should re-send the request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProxyFault::ForwardingFailed | ProxyFault::NoServerData | ProxyFault::ConnectionTimeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyFault::ForwardingFailed => "forwarding-failed",
            ProxyFault::NoServerData => "no-server-data",
            ProxyFault::ConnectionTimeout => "connection-timeout",
            ProxyFault::Privoxy { .. } => "privoxy-error",
            ProxyFault::Unrecognized { .. } => "proxy-error",
            ProxyFault::TooManyRetries { .. } => "too-many-retries",
        }
    }
}

/// Classify a raw status/body pair.
///
/// Returns `None` when the response is not a Privoxy self-fault and should
/// reach the caller untouched.
pub fn classify(status: StatusCode, body: &str) -> Option<ProxyFault> {
    if status != StatusCode::INTERNAL_SERVER_ERROR || !body.contains(ERROR_MARKER) {
        return None;
    }

    let fault = if body.contains(FORWARDING_FAILED) {
        ProxyFault::ForwardingFailed
    } else if body.contains(NO_SERVER_DATA) {
        ProxyFault::NoServerData
    } else if body.contains(CONNECTION_TIMEOUT) {
        ProxyFault::ConnectionTimeout
    } else if body.contains(ERROR_TITLE) {
        ProxyFault::Privoxy {
            body: body.to_string(),
        }
    } else {
        ProxyFault::Unrecognized {
            body: body.to_string(),
        }
    };

    Some(fault)
}

/// Pass a response through unless it carries a Privoxy self-fault
pub fn classify_response(response: Response<Bytes>) -> Result<Response<Bytes>, ProxyFault> {
    if response.status() != StatusCode::INTERNAL_SERVER_ERROR {
        return Ok(response);
    }

    let fault = {
        let body = String::from_utf8_lossy(response.body());
        classify(response.status(), &body)
    };
    match fault {
        Some(fault) => Err(fault),
        None => Ok(response),
    }
}
