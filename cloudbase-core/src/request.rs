//! Request channel: named backend actions.
//!
//! The auth core only depends on [`RequestChannel`]. [`CloudbaseRequest`]
//! is the channel provisioned by [`Cloudbase::init`](crate::Cloudbase::init):
//! it frames each action into the backend envelope, enforces the configured
//! timeout and unwraps the response.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppSecret, SdkConfig};
use crate::error::{SdkError, SdkResult};
use crate::platform::Runtime;
use crate::transport::{Transport, TransportRequest};

/// Envelope version expected by the backend.
pub const DATA_VERSION: &str = "2020-01-10";

/// Sends a named backend action with a payload.
///
/// Implementations return the decoded response. A response carrying a
/// backend error `code` is still `Ok`; callers classify it. `Err` means the
/// request never produced a response (transport failure, timeout).
#[async_trait]
pub trait RequestChannel: Send + Sync {
    async fn send(&self, action: &str, payload: Value) -> SdkResult<Value>;
}

/// Settings a [`CloudbaseRequest`] is provisioned with.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub env: String,
    pub timeout: Duration,
    pub endpoint: String,
    pub sdk_version: String,
    pub runtime: Runtime,
    pub app_secret: Option<AppSecret>,
    pub app_sign: Option<String>,
}

impl RequestConfig {
    pub fn from_sdk_config(config: &SdkConfig, runtime: Runtime) -> Self {
        Self {
            env: config.env.clone(),
            timeout: config.timeout(),
            endpoint: config.endpoint.clone(),
            sdk_version: config.sdk_version.clone(),
            runtime,
            app_secret: config.app_secret.clone(),
            app_sign: config.app_sign.clone(),
        }
    }
}

/// Request channel bound to one env.
pub struct CloudbaseRequest {
    config: RequestConfig,
    transport: Arc<dyn Transport>,
}

impl CloudbaseRequest {
    pub fn new(config: RequestConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    fn envelope(&self, action: &str, payload: Value) -> SdkResult<Value> {
        let mut body = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(SdkError::invalid_params(format!(
                    "payload of {action} must be an object, got {other}"
                )));
            }
        };
        body.insert("action".into(), Value::from(action));
        body.insert("env".into(), Value::from(self.config.env.as_str()));
        body.insert("dataVersion".into(), Value::from(DATA_VERSION));
        body.insert("seqId".into(), Value::from(uuid::Uuid::new_v4().to_string()));
        body.insert(
            "sdk_version".into(),
            Value::from(self.config.sdk_version.as_str()),
        );
        Ok(Value::Object(body))
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(
            "X-SDK-Version".to_string(),
            format!("cloudbase-rs/{}", self.config.sdk_version),
        )];
        if self.config.runtime != Runtime::Web {
            if let (Some(secret), Some(sign)) = (&self.config.app_secret, &self.config.app_sign) {
                headers.push((
                    "X-TCB-App-Source".to_string(),
                    format!(
                        "timestamp={};appAccessKeyId={};appSign={}",
                        Utc::now().timestamp_millis(),
                        secret.app_access_key_id,
                        sign
                    ),
                ));
            }
        }
        headers
    }
}

#[async_trait]
impl RequestChannel for CloudbaseRequest {
    async fn send(&self, action: &str, payload: Value) -> SdkResult<Value> {
        let request = TransportRequest {
            url: self.config.endpoint.clone(),
            headers: self.headers(),
            body: self.envelope(action, payload)?,
        };

        tracing::debug!(action, env = %self.config.env, "sending backend action");
        let response = tokio::time::timeout(self.config.timeout, self.transport.post(request))
            .await
            .map_err(|_| SdkError::Timeout {
                timeout_ms: self.config.timeout.as_millis() as u64,
            })??;

        Ok(unwrap_response(response))
    }
}

/// Return the `data` object of a successful envelope, or the body unchanged
/// when it carries an error code or has no `data`.
fn unwrap_response(body: Value) -> Value {
    if response_code(&body).is_some() {
        return body;
    }
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(data @ Value::Object(_)) => data,
            Some(other) => {
                map.insert("data".into(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    }
}

/// The backend error code of a response, if any.
///
/// Any code other than null, `""`, `0` or `false` marks a rejection. Non-string
/// codes are rendered as JSON text.
pub fn response_code(body: &Value) -> Option<String> {
    match body.get("code")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(code) if code.is_empty() => None,
        Value::String(code) => Some(code.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

/// The backend error message of a response, if any.
pub fn response_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}
