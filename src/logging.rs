//! Tracing subscriber setup
//!
//! Nothing here runs implicitly: the host application calls [`init`] once at
//! startup. The default filter keeps hyper and rustls quiet unless asked.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;
use crate::error::{Result, TransportError};

/// Filter directives used when `RUST_LOG` is not set
pub fn filter_directives(config: &LogConfig) -> String {
    format!(
        "privoxy_adapter={},hyper=error,hyper_util=error,rustls=error",
        config.level.trim().to_lowercase()
    )
}

/// Install the global subscriber
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(config)))
        .map_err(|e| TransportError::InvalidConfig(format!("LOG_LEVEL: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format.to_lowercase().as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    installed.map_err(|e| TransportError::InvalidConfig(format!("logging: {}", e)))
}
