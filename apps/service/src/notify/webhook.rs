//! Webhook delivery with per-webhook failure isolation.
//!
//! One logical notification fans out to every configured webhook; each
//! delivery runs on its own and reports its own outcome, so a dead endpoint
//! never silences its siblings. No retries here: retry policy, if any,
//! belongs to the caller.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::config::{DeliveryFormat, WebhookConfig};

use super::template::{Template, TemplateContext, substitute};

pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one delivery attempt.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeliveryOutcome {
    pub url: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Notifier {
    client: reqwest::Client,
}

impl Notifier {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build()?;
        Ok(Self { client })
    }

    /// Deliver one notification to every webhook, independently.
    pub async fn notify_all(
        &self,
        webhooks: &[WebhookConfig],
        ctx: &TemplateContext,
    ) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(webhooks.len());
        for webhook in webhooks {
            let outcome = self.deliver(webhook, ctx).await;
            if !outcome.success {
                warn!(
                    "Webhook delivery to {} failed: {}",
                    outcome.url,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// One delivery attempt. Never panics or propagates an error.
    pub async fn deliver(&self, webhook: &WebhookConfig, ctx: &TemplateContext) -> DeliveryOutcome {
        let sent = match &webhook.payload {
            Some(payload) => self.send_raw(webhook, payload, ctx).await,
            None => self.send_templated(webhook, ctx).await,
        };

        match sent {
            Ok(status) => DeliveryOutcome {
                url: webhook.url.clone(),
                success: (200..300).contains(&status),
                status_code: Some(status),
                error: if (200..300).contains(&status) {
                    None
                } else {
                    Some(format!("HTTP status {status}"))
                },
            },
            Err(e) => DeliveryOutcome {
                url: webhook.url.clone(),
                success: false,
                status_code: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn send_templated(
        &self,
        webhook: &WebhookConfig,
        ctx: &TemplateContext,
    ) -> anyhow::Result<u16> {
        let template = Template::from_name(webhook.template.as_deref().unwrap_or("text"));
        let mut rendered = template.render(ctx);

        // Caller headers win only where the template left the key unset.
        for (name, value) in &webhook.headers {
            let taken = rendered.headers.keys().any(|k| k.eq_ignore_ascii_case(name));
            if !taken {
                rendered.headers.insert(name.clone(), value.clone());
            }
        }

        let method = reqwest::Method::from_bytes(rendered.method.as_bytes())?;
        let mut request = self.client.request(method, &webhook.url);
        for (name, value) in &rendered.headers {
            request = request.header(name, value);
        }

        Ok(request.body(rendered.body).send().await?.status().as_u16())
    }

    async fn send_raw(
        &self,
        webhook: &WebhookConfig,
        payload: &Value,
        ctx: &TemplateContext,
    ) -> anyhow::Result<u16> {
        let tree = substitute(payload, &ctx.message());

        let mut request = match webhook.delivery {
            DeliveryFormat::Json => self.client.post(&webhook.url).json(&tree),
            DeliveryFormat::Form => self.client.post(&webhook.url).form(&flatten_params(&tree)),
            DeliveryFormat::Param => self.client.get(&webhook.url).query(&flatten_params(&tree)),
        };

        for (name, value) in &webhook.headers {
            request = request.header(name, value);
        }

        Ok(request.send().await?.status().as_u16())
    }
}

/// Turn a payload tree into key/value pairs for form or query delivery.
/// Non-string leaves are serialized as JSON.
fn flatten_params(tree: &Value) -> Vec<(String, String)> {
    match tree {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        other => vec![("payload".to_string(), other.to_string())],
    }
}
