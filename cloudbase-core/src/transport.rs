//! Runtime transports.
//!
//! A [`Transport`] moves one JSON request to the backend and returns the
//! decoded JSON body. Adapters construct one per initialized SDK handle,
//! bound to the resolved timeout. [`HttpTransport`] is the reqwest-backed
//! transport used by the native adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::{SdkError, SdkResult};

/// Parameters an adapter needs to construct a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub timeout: Duration,
}

/// A single backend request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Sends JSON requests to the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST the request body and return the decoded response body.
    async fn post(&self, request: TransportRequest) -> SdkResult<Value>;
}

/// HTTP transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> SdkResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: TransportRequest) -> SdkResult<Value> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_error(e))?;

        match serde_json::from_str::<Value>(&text) {
            Ok(body) => Ok(body),
            Err(_) if !status.is_success() => Err(SdkError::Network {
                message: format!("backend returned HTTP {}", status),
            }),
            Err(e) => Err(SdkError::Network {
                message: format!("invalid response body: {}", e),
            }),
        }
    }
}

impl HttpTransport {
    fn map_error(&self, e: reqwest::Error) -> SdkError {
        if e.is_timeout() {
            SdkError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            SdkError::from(e)
        }
    }
}
