use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::proxy::transport::parse_proxy_url;

/// Adapter configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Proxy routing and internal retry settings
    pub proxy: ProxyConfig,
    /// Connection-level retry settings
    pub retry: RetryConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Complete URL of the Privoxy instance (default: http://127.0.0.1:8118)
    pub url: String,
    /// Wait between internal retries on proxy faults
    pub retry_wait: Duration,
    /// Maximum attempts per request on proxy faults
    pub max_retries: u32,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Response read timeout
    pub read_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8118".to_string(),
            retry_wait: Duration::from_secs(1),
            max_retries: 3,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total, connect and read retry budget
    pub retries: u32,
    /// Exponential backoff factor in seconds
    pub backoff_factor: f64,
    /// Statuses that force a retry
    pub status_forcelist: BTreeSet<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_factor: 0.3,
            status_forcelist: [500, 502, 504].into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = get_env_or("PROXY_URL", "http://127.0.0.1:8118");
        parse_proxy_url(&url)
            .map_err(|e| TransportError::InvalidConfig(format!("PROXY_URL: {}", e)))?;

        Ok(Config {
            proxy: ProxyConfig {
                url,
                retry_wait: parse_secs("PROXY_RETRY_WAIT", "1")?,
                max_retries: parse_env("PROXY_MAX_RETRIES", "3")?,
                connect_timeout: parse_secs("PROXY_CONNECT_TIMEOUT", "10")?,
                read_timeout: parse_secs("PROXY_READ_TIMEOUT", "30")?,
            },
            retry: RetryConfig {
                retries: parse_env("RETRY_TOTAL", "3")?,
                backoff_factor: parse_backoff_factor("RETRY_BACKOFF_FACTOR", "0.3")?,
                status_forcelist: parse_status_list(&get_env_or(
                    "RETRY_STATUS_FORCELIST",
                    "500,502,504",
                ))?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| TransportError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Non-negative, possibly fractional, number of seconds
fn parse_secs(key: &str, default: &str) -> Result<Duration> {
    let secs: f64 = parse_env(key, default)?;
    Duration::try_from_secs_f64(secs).map_err(|_| {
        TransportError::InvalidConfig(format!("{} must be a non-negative number of seconds", key))
    })
}

fn parse_backoff_factor(key: &str, default: &str) -> Result<f64> {
    let factor: f64 = parse_env(key, default)?;
    if !factor.is_finite() || factor < 0.0 {
        return Err(TransportError::InvalidConfig(format!(
            "{} must be a finite, non-negative number",
            key
        )));
    }
    Ok(factor)
}

fn parse_status_list(raw: &str) -> Result<BTreeSet<u16>> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<u16>() {
            Ok(code) if (100..=599).contains(&code) => Ok(code),
            _ => Err(TransportError::InvalidConfig(format!(
                "RETRY_STATUS_FORCELIST has invalid status code: {}",
                s
            ))),
        })
        .collect()
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
