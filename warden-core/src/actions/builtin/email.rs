//! Email notifications over SMTP.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::config::SmtpConfig;
use crate::error::{WardenError, WardenResult};

use super::required_str;

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html: bool,
}

/// Delivery seam so the action can be exercised without an SMTP server.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Deliver the message and return the server's response code.
    async fn deliver(&self, email: &OutgoingEmail) -> WardenResult<String>;
}

pub struct SmtpEmailTransport {
    config: SmtpConfig,
}

impl SmtpEmailTransport {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, email: &OutgoingEmail) -> WardenResult<Message> {
        let from: Mailbox = self.config.from_address.parse().map_err(|e| {
            WardenError::InvalidConfigValue {
                key: "integrations.smtp.from_address".to_string(),
                message: format!("{}", e),
            }
        })?;

        let mut builder = Message::builder().from(from).subject(email.subject.clone());
        for recipient in &email.to {
            let mailbox: Mailbox = recipient.parse().map_err(|e| WardenError::InvalidParameters {
                action: "send_email".to_string(),
                errors: vec![format!("invalid recipient '{}': {}", recipient, e)],
            })?;
            builder = builder.to(mailbox);
        }

        let content_type = if email.html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        builder
            .header(content_type)
            .body(email.body.clone())
            .map_err(|e| WardenError::external("send_email", format!("failed to build email: {}", e)))
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> WardenResult<String> {
        if self.config.host.is_empty() {
            return Err(WardenError::external("send_email", "SMTP host is not configured"));
        }

        let message = self.build_message(email)?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)?
            .port(self.config.port);
        if !self.config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ));
        }

        let response = builder.build().send(message).await?;
        Ok(response.code().to_string())
    }
}

pub struct SendEmailAction {
    transport: Arc<dyn EmailTransport>,
}

impl SendEmailAction {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }

    pub fn smtp(config: SmtpConfig) -> Self {
        Self::new(Arc::new(SmtpEmailTransport::new(config)))
    }

    fn recipients(params: &Value) -> Vec<String> {
        match &params["to"] {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Action for SendEmailAction {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send an email to one or more recipients over SMTP"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Notification
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["to", "subject", "body"],
            "properties": {
                "to": {
                    "oneOf": [
                        { "type": "string", "minLength": 3 },
                        { "type": "array", "items": { "type": "string" }, "minItems": 1 }
                    ]
                },
                "subject": { "type": "string", "minLength": 1 },
                "body": { "type": "string" },
                "html": { "type": "boolean", "default": false }
            }
        })
    }

    fn validate_parameters(&self, params: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = Self::recipients(params)
            .iter()
            .filter(|r| r.parse::<Mailbox>().is_err())
            .map(|r| format!("invalid recipient address '{}'", r))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    async fn execute(&self, params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
        let email = OutgoingEmail {
            to: Self::recipients(&params),
            subject: required_str(&params, "subject")?.to_string(),
            body: required_str(&params, "body")?.to_string(),
            html: params["html"].as_bool().unwrap_or(false),
        };

        let code = self.transport.deliver(&email).await?;

        Ok(
            ActionResult::ok(format!("Email sent to {} recipient(s)", email.to.len()))
                .with_field("recipients", json!(email.to))
                .with_field("smtpCode", json!(code)),
        )
    }
}
