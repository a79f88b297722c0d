//! The round-trip primitive every transport layer implements

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use url::Url;

use crate::error::Result;

/// Proxy routing per target scheme
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyMap {
    pub http: Option<Url>,
    pub https: Option<Url>,
}

impl ProxyMap {
    /// Route both plaintext and TLS targets through the same proxy
    pub fn uniform(proxy: Url) -> Self {
        Self {
            http: Some(proxy.clone()),
            https: Some(proxy),
        }
    }

    /// Proxy to use for a target with the given scheme
    pub fn for_scheme(&self, scheme: &str) -> Option<&Url> {
        match scheme {
            "http" => self.http.as_ref(),
            "https" => self.https.as_ref(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }
}

/// Per-request options handed down through the transport stack
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub proxies: ProxyMap,
    /// Overrides the sender's connect timeout
    pub connect_timeout: Option<Duration>,
    /// Overrides the sender's read timeout
    pub read_timeout: Option<Duration>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proxies(mut self, proxies: ProxyMap) -> Self {
        self.proxies = proxies;
        self
    }

    /// Same timeout for the connect and read phases
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self.read_timeout = Some(timeout);
        self
    }
}

/// Sends one request and returns the fully buffered response.
///
/// Implementations may retry internally; callers only see the final outcome.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: &Request<Bytes>, options: &SendOptions)
        -> Result<Response<Bytes>>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::collections::VecDeque;

    use http::StatusCode;
    use parking_lot::Mutex;

    use crate::error::TransportError;

    /// Scripted sender that replays canned outcomes and records what it saw
    pub(crate) struct ScriptedSender {
        script: Mutex<VecDeque<Result<Response<Bytes>>>>,
        fallback: Box<dyn Fn() -> Result<Response<Bytes>> + Send + Sync>,
        pub(crate) seen: Mutex<Vec<SendOptions>>,
    }

    impl ScriptedSender {
        pub(crate) fn new(script: Vec<Result<Response<Bytes>>>) -> Self {
            Self::with_fallback(script, || {
                Err(TransportError::Connect("script exhausted".to_string()))
            })
        }

        pub(crate) fn with_fallback<F>(script: Vec<Result<Response<Bytes>>>, fallback: F) -> Self
        where
            F: Fn() -> Result<Response<Bytes>> + Send + Sync + 'static,
        {
            Self {
                script: Mutex::new(script.into()),
                fallback: Box::new(fallback),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl HttpSend for ScriptedSender {
        async fn send(
            &self,
            _request: &Request<Bytes>,
            options: &SendOptions,
        ) -> Result<Response<Bytes>> {
            self.seen.lock().push(options.clone());
            let next = self.script.lock().pop_front();
            match next {
                Some(outcome) => outcome,
                None => (self.fallback)(),
            }
        }
    }

    pub(crate) fn response(status: u16, body: &str) -> Response<Bytes> {
        Response::builder()
            .status(StatusCode::from_u16(status).unwrap())
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    pub(crate) fn get(url: &str) -> Request<Bytes> {
        Request::get(url).body(Bytes::new()).unwrap()
    }

    #[test]
    fn test_proxy_map_for_scheme() {
        let proxy = Url::parse("http://127.0.0.1:8118").unwrap();
        let map = ProxyMap::uniform(proxy.clone());
        assert_eq!(map.for_scheme("http"), Some(&proxy));
        assert_eq!(map.for_scheme("https"), Some(&proxy));
        assert_eq!(map.for_scheme("ftp"), None);
        assert!(!map.is_empty());
        assert!(ProxyMap::default().is_empty());
    }

    #[test]
    fn test_send_options_timeout() {
        let options = SendOptions::new().with_timeout(Duration::from_secs(2));
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.read_timeout, Some(Duration::from_secs(2)));
        assert!(options.proxies.is_empty());
    }
}
