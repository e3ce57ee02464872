//! HTTP client used by request steps and load tests
//!
//! A received status code of any value is a normal result. Only failures to
//! get a response at all (DNS, connect, reset, timeout) are errors.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

/// A fully interpolated request
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// JSON body; a string value is sent as a raw text body
    pub body: Option<Value>,
    /// Query parameters
    pub params: BTreeMap<String, String>,
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
}

/// A received response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercased
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, the raw text if it is not JSON, or null if empty
    pub body: Value,
    pub duration_ms: u64,
}

impl HttpResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Shape stored in the variable store and inspected by assertions
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "status": self.status,
            "headers": self.headers,
            "body": self.body,
            "duration_ms": self.duration_ms,
        })
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Sends one request and returns the response
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// reqwest-backed client
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("runwright/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| Error::MalformedStep(format!("invalid HTTP method '{}'", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            Some(Value::String(text)) => builder.body(text.clone()),
            Some(value) => builder.json(value),
            None => builder,
        };
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let started = Instant::now();
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let text = response.text().await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            "{} {} -> {} in {} ms",
            request.method,
            request.url,
            status,
            duration_ms
        );

        Ok(HttpResponse {
            status,
            headers,
            body: parse_body(&text),
            duration_ms,
        })
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"a\":1}"), serde_json::json!({"a": 1}));
        assert_eq!(parse_body("plain"), Value::String("plain".to_string()));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let response = HttpResponse {
            status: 200,
            headers,
            body: Value::Null,
            duration_ms: 4,
        };
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.to_value()["status"], 200);
        assert_eq!(response.to_value()["duration_ms"], 4);
    }
}
