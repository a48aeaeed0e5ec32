use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::{retry_async_with_config, RetryConfig, WardenError, WardenResult};

/// Outbound JSON client shared by the HTTP-backed actions.
///
/// 5xx, 429 and transport failures are retried under `retry`; other non-2xx
/// statuses fail immediately.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> WardenResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WardenError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry: RetryConfig::for_external_call(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn post_json(&self, action: &str, url: &str, body: &Value) -> WardenResult<Value> {
        self.send(action, Method::POST, url, None, &HashMap::new(), Some(body))
            .await
    }

    /// Send one request and decode the JSON response (`Null` for empty bodies).
    pub async fn send(
        &self,
        action: &str,
        method: Method,
        url: &str,
        bearer: Option<&str>,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> WardenResult<Value> {
        retry_async_with_config(
            || self.attempt(action, method.clone(), url, bearer, headers, body),
            self.retry.clone(),
        )
        .await?
    }

    /// One request. The outer error is retryable, the inner one is final.
    async fn attempt(
        &self,
        action: &str,
        method: Method,
        url: &str,
        bearer: Option<&str>,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> WardenResult<WardenResult<Value>> {
        let mut request = self.client.request(method, url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WardenError::external(action, format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        debug!(action = %action, status = status.as_u16(), "Integration responded");

        if status.is_success() {
            let value = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            };
            return Ok(Ok(value));
        }

        let err = WardenError::external(action, format!("HTTP {}: {}", status, truncate(&text)));
        if is_retryable(status) {
            Err(err)
        } else {
            Ok(Err(err))
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}

/// Client bound to one configured third-party API.
#[derive(Clone)]
pub struct IntegrationClient {
    http: HttpClient,
    endpoint: EndpointConfig,
    service: &'static str,
}

impl IntegrationClient {
    pub fn new(service: &'static str, endpoint: EndpointConfig) -> WardenResult<Self> {
        Ok(Self {
            http: HttpClient::new(endpoint.timeout())?,
            endpoint,
            service,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.http = self.http.with_retry(retry);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_configured()
    }

    fn url(&self, action: &str, path: &str) -> WardenResult<String> {
        if !self.endpoint.is_configured() {
            return Err(WardenError::external(
                action,
                format!("{} integration is not configured", self.service),
            ));
        }
        Ok(format!(
            "{}/{}",
            self.endpoint.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    pub async fn get(&self, action: &str, path: &str) -> WardenResult<Value> {
        let url = self.url(action, path)?;
        self.http
            .send(
                action,
                Method::GET,
                &url,
                self.endpoint.token.as_deref(),
                &HashMap::new(),
                None,
            )
            .await
    }

    pub async fn post(&self, action: &str, path: &str, body: &Value) -> WardenResult<Value> {
        let url = self.url(action, path)?;
        self.http
            .send(
                action,
                Method::POST,
                &url,
                self.endpoint.token.as_deref(),
                &HashMap::new(),
                Some(body),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_post_sends_bearer_and_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/blocks"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "blk-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = IntegrationClient::new(
            "firewall",
            EndpointConfig::new(format!("{}/api/", server.uri())).with_token("s3cret"),
        )
        .unwrap();

        let value = client.post("block_ip", "/blocks", &json!({"ip": "203.0.113.9"})).await.unwrap();
        assert_eq!(value["id"], "blk-1");
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = IntegrationClient::new("threat_intel", EndpointConfig::new(server.uri()))
            .unwrap()
            .with_retry(fast_retry());

        let err = client.get("lookup_ioc", "indicators/ip/1.2.3.4").await.unwrap_err();
        assert!(matches!(err, WardenError::ExternalCallFailed { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let http = HttpClient::new(Duration::from_secs(5)).unwrap().with_retry(fast_retry());
        let err = http
            .post_json("send_webhook", &server.uri(), &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad request"));
    }

    #[tokio::test]
    async fn test_unconfigured_endpoint_fails_without_request() {
        let client = IntegrationClient::new("edr", EndpointConfig::default()).unwrap();
        assert!(!client.is_configured());

        let err = client.post("isolate_host", "hosts/x/isolate", &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("edr integration is not configured"));
    }

    #[test]
    fn test_truncate_long_bodies() {
        let long = "x".repeat(500);
        assert_eq!(truncate(&long).len(), 203);
        assert_eq!(truncate("short"), "short");
    }
}
