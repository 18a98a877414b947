//! Network seam used by every caching strategy and the action queue.
//!
//! Follows fetch semantics: an HTTP error status is still a response; only
//! a failure to reach the origin at all is an `Err`.

use std::future::Future;
use std::time::Duration;

use reqwest::{header, Client, Url};
use tracing::debug;

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::http::{Method, Request, Response};

pub trait Network: Send + Sync {
    fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Network over HTTP. Clone is cheap - reqwest::Client uses Arc internally
/// for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Option<Url>,
}

impl HttpNetwork {
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        let origin = match config.origin.as_deref() {
            Some(o) => Some(
                Url::parse(o)
                    .map_err(|e| WorkerError::Config(format!("invalid origin {}: {}", o, e)))?,
            ),
            None => None,
        };

        Ok(Self { client, origin })
    }

    fn resolve(&self, url: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute);
        }
        let origin = self.origin.as_ref().ok_or_else(|| {
            WorkerError::Config(format!("relative URL {} needs a configured origin", url))
        })?;
        origin
            .join(url)
            .map_err(|e| WorkerError::Config(format!("cannot resolve {}: {}", url, e)))
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let url = self.resolve(&request.url)?;
        debug!(method = %request.method, url = %url, "Fetching from network");

        let mut headers = header::HeaderMap::new();
        for (name, value) in &request.headers {
            let name = header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| WorkerError::Network(format!("bad header name {}: {}", name, e)))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|e| WorkerError::Network(format!("bad header value: {}", e)))?;
            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(Self::method(request.method), url.clone())
            .headers(headers);
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let mut response = Response::new(status.as_u16(), Vec::new());
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                response.headers.insert(name.as_str().to_string(), v.to_string());
            }
        }
        response.body = resp.bytes().await?.to_vec();

        debug!(url = %url, status = status.as_u16(), bytes = response.body.len(), "Network response");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_against_origin() {
        let config = WorkerConfig {
            origin: Some("https://swaeduae.ae".to_string()),
            ..WorkerConfig::default()
        };
        let net = HttpNetwork::new(&config).unwrap();
        assert_eq!(
            net.resolve("/api/opportunities").unwrap().as_str(),
            "https://swaeduae.ae/api/opportunities"
        );
        assert_eq!(
            net.resolve("https://cdn.example.com/icon.png").unwrap().as_str(),
            "https://cdn.example.com/icon.png"
        );
    }

    #[test]
    fn test_resolve_relative_without_origin_fails() {
        let net = HttpNetwork::new(&WorkerConfig::default()).unwrap();
        assert!(matches!(net.resolve("/"), Err(WorkerError::Config(_))));
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let config = WorkerConfig {
            origin: Some("not a url".to_string()),
            ..WorkerConfig::default()
        };
        assert!(HttpNetwork::new(&config).is_err());
    }
}
