use http::StatusCode;
use thiserror::Error;

use crate::proxy::fault::ProxyFault;

/// Why the connection-level retry policy gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCause {
    /// Could not reach the proxy (or target) at all
    Connect(String),
    /// Connection was made but reading the response failed or timed out
    Read(String),
    /// Every attempt answered with a status from the force list
    Status(StatusCode),
}

impl std::fmt::Display for RetryCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryCause::Connect(msg) => write!(f, "connect error: {}", msg),
            RetryCause::Read(msg) => write!(f, "read error: {}", msg),
            RetryCause::Status(status) => {
                write!(f, "too many {} error responses", status.as_u16())
            }
        }
    }
}

/// Unified error type for proxy transports
#[derive(Error, Debug)]
pub enum TransportError {
    // Faults reported by the proxy about itself
    #[error(transparent)]
    Proxy(#[from] ProxyFault),

    // Connection-level retry budget exhausted
    #[error("Max retries exceeded ({retries}): {cause}")]
    RetryExhausted { retries: u32, cause: RetryCause },

    // Network errors
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection timed out")]
    ConnectTimeout,

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Read timed out")]
    ReadTimeout,

    #[error("TLS error: {0}")]
    Tls(String),

    // Request/configuration errors
    #[error("Invalid proxy URL: {0}")]
    InvalidProxyUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No transport mounted for {0}")]
    NoTransport(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Whether the error is attributable to the proxy itself
    pub fn is_proxy_fault(&self) -> bool {
        matches!(self, TransportError::Proxy(_))
    }

    /// The proxy fault carried by this error, if any
    pub fn proxy_fault(&self) -> Option<&ProxyFault> {
        match self {
            TransportError::Proxy(fault) => Some(fault),
            _ => None,
        }
    }

    /// Failed before a request could be written
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::ConnectTimeout
        )
    }

    /// Failed after the request was (possibly) delivered
    pub fn is_read_error(&self) -> bool {
        matches!(self, TransportError::Read(_) | TransportError::ReadTimeout)
    }

    /// Connection-level retry budget was used up
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, TransportError::RetryExhausted { .. })
    }
}

// Convert from hyper errors
impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        if err.is_timeout() {
            TransportError::ReadTimeout
        } else {
            TransportError::Read(err.to_string())
        }
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        TransportError::InvalidProxyUrl(err.to_string())
    }
}

impl From<http::Error> for TransportError {
    fn from(err: http::Error) -> Self {
        TransportError::InvalidRequest(err.to_string())
    }
}
