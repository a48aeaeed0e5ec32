//! Indicator reputation lookups against the threat-intelligence service.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::LazyLock;

use crate::actions::http::IntegrationClient;
use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::error::WardenResult;

use super::{path_segment, required_str};

// md5, sha1, sha256
static HASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-fA-F0-9]{32}|[a-fA-F0-9]{40}|[a-fA-F0-9]{64})$").expect("valid hash regex")
});

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,63}$")
        .expect("valid domain regex")
});

/// Reject indicators that cannot be of the declared type.
fn check_indicator(kind: &str, value: &str) -> Result<(), String> {
    let ok = match kind {
        "ip" => value.parse::<IpAddr>().is_ok(),
        "hash" => HASH_RE.is_match(value),
        "domain" => DOMAIN_RE.is_match(value),
        "url" => value.starts_with("http://") || value.starts_with("https://"),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("'{}' is not a valid {} indicator", value, kind))
    }
}

pub struct LookupIocAction {
    intel: IntegrationClient,
}

impl LookupIocAction {
    pub fn new(intel: IntegrationClient) -> Self {
        Self { intel }
    }
}

#[async_trait]
impl Action for LookupIocAction {
    fn name(&self) -> &str {
        "lookup_ioc"
    }

    fn description(&self) -> &str {
        "Look up the reputation of an IP, file hash, domain or URL"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Investigation
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["indicator", "type"],
            "properties": {
                "indicator": { "type": "string", "minLength": 1 },
                "type": { "type": "string", "enum": ["ip", "hash", "domain", "url"] }
            }
        })
    }

    fn validate_parameters(&self, params: &Value) -> Result<(), Vec<String>> {
        let kind = params["type"].as_str().unwrap_or_default();
        let value = params["indicator"].as_str().unwrap_or_default().trim();
        check_indicator(kind, value).map_err(|e| vec![e])
    }

    async fn execute(&self, params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
        let kind = required_str(&params, "type")?;
        let indicator = required_str(&params, "indicator")?.trim();

        let path = format!("indicators/{}/{}", kind, path_segment(self.name(), indicator)?);
        let response = self.intel.get(self.name(), &path).await?;

        let verdict = response
            .get("verdict")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let score = response.get("score").cloned().unwrap_or(Value::Null);

        Ok(
            ActionResult::ok(format!("{} {} is {}", kind, indicator, verdict))
                .with_field("indicator", json!(indicator))
                .with_field("type", json!(kind))
                .with_field("verdict", json!(verdict))
                .with_field("malicious", json!(verdict == "malicious"))
                .with_field("score", score),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_indicator_checks() {
        assert!(check_indicator("ip", "8.8.8.8").is_ok());
        assert!(check_indicator("ip", "evil.example").is_err());
        assert!(check_indicator("hash", "d41d8cd98f00b204e9800998ecf8427e").is_ok());
        assert!(check_indicator("hash", "xyz").is_err());
        assert!(check_indicator("domain", "evil.example.com").is_ok());
        assert!(check_indicator("domain", "not a domain").is_err());
        assert!(check_indicator("url", "https://evil.example/payload").is_ok());
    }

    #[tokio::test]
    async fn test_lookup_returns_verdict() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indicators/ip/203.0.113.66"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"verdict": "malicious", "score": 97})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let action = LookupIocAction::new(
            IntegrationClient::new("threat_intel", EndpointConfig::new(server.uri())).unwrap(),
        );
        let result = action
            .execute(
                json!({"indicator": "203.0.113.66", "type": "ip"}),
                &ActionContext::system(Uuid::new_v4()),
            )
            .await
            .unwrap();

        let data = result.data.unwrap();
        assert_eq!(data["verdict"], "malicious");
        assert_eq!(data["malicious"], true);
        assert_eq!(data["score"], 97);
    }
}
