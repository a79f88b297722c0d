//! Privoxy Adapter - proxy transports with layered retries
//!
//! Routes HTTP requests through a forwarding Privoxy instance.
//!
//! ## Features
//!
//! - Forced proxy routing for plaintext and TLS targets
//! - Classification of `500 Internal Privoxy Error` pages into typed faults
//! - Internal retry of transient proxy faults with a per-request ceiling
//! - Connection-level retry of connect/read failures and forced statuses
//!   with exponential backoff
//! - Prefix-mounted session for dispatching requests to transports

pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod session;

pub use config::{Config, LogConfig, ProxyConfig, RetryConfig};
pub use error::{Result, RetryCause, TransportError};
pub use proxy::{
    HttpSend, HyperSender, ProxyFault, ProxyMap, ProxyTransport, RetryPolicy,
    RetryingProxyTransport, SendOptions,
};
pub use session::Session;
