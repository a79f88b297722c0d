//! Proxy transports
//!
//! This module provides the transport stack:
//! - Privoxy fault classification
//! - Proxy-forcing transport with internal retry on proxy faults
//! - Connection-level retry policy with exponential backoff
//! - Hyper-based network sender (direct, absolute-form and CONNECT tunnels)

pub mod connector;
pub mod fault;
pub mod retry;
pub mod retrying;
pub mod send;
pub mod transport;

pub use connector::HyperSender;
pub use fault::{classify, classify_response, ProxyFault};
pub use retry::{RetryPolicy, RetryingSender};
pub use retrying::RetryingProxyTransport;
pub use send::{HttpSend, ProxyMap, SendOptions};
pub use transport::ProxyTransport;
