//! reqwest-backed [`HttpClient`] for webhook nodes

use crate::collaborators::{HttpClient, HttpResponse, NetworkError};
use crate::workflow::config::HttpMethod;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn call(
        &self,
        url: &str,
        method: HttpMethod,
        headers: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, NetworkError> {
        tracing::debug!("🌍 HTTP Request: {} {}", method, url);

        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Patch => self.client.patch(url),
            HttpMethod::Delete => self.client.delete(url),
        };

        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }

        if let Some(body) = body {
            if !matches!(method, HttpMethod::Get) {
                request = request.json(body);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkError(format!("HTTP request failed: {e}")))?;

        let status_code = response.status().as_u16();
        tracing::debug!("📡 Response status: {}", status_code);

        let text = response
            .text()
            .await
            .map_err(|e| NetworkError(format!("Failed to read response body: {e}")))?;

        // JSON when possible, raw text otherwise
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(HttpResponse { status_code, body })
    }
}
