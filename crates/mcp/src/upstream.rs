// HTTP client for the upstream backend functions

use crate::error::decode_body;
use async_trait::async_trait;
use fastnow_core::{HttpMethod, OutboundCall};
use reqwest::{header, Client};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpstreamError {
    /// The backend answered with a non-success status
    #[error("upstream returned HTTP {status}")]
    Status { status: u16, body: Value },

    #[error("upstream call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("upstream unreachable: {0}")]
    Transport(String),
}

/// Raw reply from the backend
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body on 2xx, otherwise a `Status` error carrying it
    pub fn into_result(self) -> Result<Value, UpstreamError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(UpstreamError::Status {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Issues resolved calls to the backend. Implementations must not retry.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn execute(&self, call: &OutboundCall) -> Result<UpstreamResponse, UpstreamError>;
}

/// reqwest-backed upstream client carrying the gateway's native credentials
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(api_key: Option<&str>, timeout: Duration) -> Result<Self, UpstreamError> {
        let mut headers = header::HeaderMap::new();

        if let Some(api_key) = api_key.filter(|key| !key.is_empty()) {
            headers.insert(
                header::HeaderName::from_static("apikey"),
                header::HeaderValue::from_str(api_key)
                    .map_err(|_| UpstreamError::Transport("invalid API key format".to_string()))?,
            );
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .map_err(|_| UpstreamError::Transport("invalid API key format".to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn execute(&self, call: &OutboundCall) -> Result<UpstreamResponse, UpstreamError> {
        debug!(method = %call.method, path = %call.path(), "Upstream request");

        let mut request = match call.method {
            HttpMethod::Get => self.client.get(call.url.clone()),
            HttpMethod::Post => self.client.post(call.url.clone()),
            HttpMethod::Put => self.client.put(call.url.clone()),
            HttpMethod::Delete => self.client.delete(call.url.clone()),
        };

        for (name, value) in &call.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Transport(e.to_string())
            }
        })?;

        debug!(status = status, bytes = text.len(), "Upstream response");

        Ok(UpstreamResponse {
            status,
            body: decode_body(&text),
        })
    }
}
