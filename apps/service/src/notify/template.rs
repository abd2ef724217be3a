//! Message templates for webhook delivery.
//!
//! A small fixed set of named renderers turns a [`TemplateContext`] into a
//! ready-to-send request; unknown template names fall back to plain text.
//! Raw payloads instead get the rendered message substituted into every
//! exact `"$MSG"` leaf of their JSON tree.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;

/// Literal replaced inside user-defined payload trees.
pub const PLACEHOLDER: &str = "$MSG";

/// Everything a renderer may want to say about one transition.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub target_name: String,
    pub is_up: bool,
    pub reason: Option<String>,
    pub downtime_minutes: i64,
    pub time_iso: String,
    pub time_local: String,
}

impl TemplateContext {
    /// Derive a context from a transition. `timezone` is an IANA name; an
    /// unknown or missing one falls back to UTC.
    pub fn new(
        target_name: &str,
        is_up: bool,
        incident_start: i64,
        now: i64,
        reason: Option<&str>,
        timezone: Option<&str>,
    ) -> Self {
        let moment = DateTime::<Utc>::from_timestamp(now, 0).unwrap_or_default();
        let tz: Tz = timezone.and_then(|name| name.parse().ok()).unwrap_or(chrono_tz::UTC);

        Self {
            target_name: target_name.to_string(),
            is_up,
            reason: reason.map(str::to_string),
            downtime_minutes: (now - incident_start).max(0) / 60,
            time_iso: moment.to_rfc3339(),
            time_local: moment.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        }
    }

    /// The plain-text message shared by the text template, Telegram and raw
    /// payload substitution.
    pub fn message(&self) -> String {
        if self.is_up {
            format!(
                "✅ {} is up again after {} minutes of downtime ({})",
                self.target_name, self.downtime_minutes, self.time_local
            )
        } else {
            format!(
                "🔴 {} is down: {} (since {})",
                self.target_name,
                self.reason.as_deref().unwrap_or("Unknown error"),
                self.time_local
            )
        }
    }
}

/// A rendered, ready-to-send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Slack,
    Discord,
    Telegram,
    Text,
}

impl Template {
    /// Unknown names resolve to the plain-text fallback.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "slack" => Template::Slack,
            "discord" => Template::Discord,
            "telegram" => Template::Telegram,
            _ => Template::Text,
        }
    }

    pub fn render(&self, ctx: &TemplateContext) -> RenderedMessage {
        let message = ctx.message();
        match self {
            Template::Slack => json_post(serde_json::json!({
                "text": message,
                "blocks": [{
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": message },
                }],
            })),
            Template::Discord => json_post(serde_json::json!({ "content": message })),
            Template::Telegram => json_post(serde_json::json!({
                "text": message,
                "disable_web_page_preview": true,
            })),
            Template::Text => RenderedMessage {
                method: "POST".to_string(),
                headers: HashMap::from([(
                    "content-type".to_string(),
                    "text/plain; charset=utf-8".to_string(),
                )]),
                body: message,
            },
        }
    }
}

fn json_post(body: Value) -> RenderedMessage {
    RenderedMessage {
        method: "POST".to_string(),
        headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
        body: body.to_string(),
    }
}

/// Replace every exact `"$MSG"` string leaf with the rendered message,
/// recursing through arrays and objects. Partial matches are left alone.
pub fn substitute(value: &Value, message: &str) -> Value {
    match value {
        Value::String(s) if s == PLACEHOLDER => Value::String(message.to_string()),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, message)).collect()),
        Value::Object(map) => Value::Object(
            map.iter().map(|(k, v)| (k.clone(), substitute(v, message))).collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down_context() -> TemplateContext {
        TemplateContext::new(
            "Website",
            false,
            1000,
            1000 + 600,
            Some("Connection refused"),
            Some("Europe/Berlin"),
        )
    }

    #[test]
    fn test_context_derivation() {
        let ctx = down_context();
        assert_eq!(ctx.downtime_minutes, 10);
        assert!(ctx.time_iso.starts_with("1970-01-01T"));
        assert!(ctx.time_local.contains("CET") || ctx.time_local.contains("CEST"));
    }

    #[test]
    fn test_context_unknown_timezone_falls_back_to_utc() {
        let ctx = TemplateContext::new("Website", true, 0, 60, None, Some("Mars/Olympus"));
        assert!(ctx.time_local.contains("UTC"));
    }

    #[test]
    fn test_messages() {
        let ctx = down_context();
        assert_eq!(
            ctx.message(),
            format!("🔴 Website is down: Connection refused (since {})", ctx.time_local)
        );

        let up = TemplateContext::new("Website", true, 1000, 1000 + 600, None, None);
        assert!(up.message().contains("up again after 10 minutes"));
    }

    #[test]
    fn test_registry_fallback() {
        assert_eq!(Template::from_name("slack"), Template::Slack);
        assert_eq!(Template::from_name("Discord"), Template::Discord);
        assert_eq!(Template::from_name("telegram"), Template::Telegram);
        assert_eq!(Template::from_name("text"), Template::Text);
        assert_eq!(Template::from_name("pagerduty"), Template::Text);
    }

    #[test]
    fn test_slack_render_shape() {
        let rendered = Template::Slack.render(&down_context());
        assert_eq!(rendered.method, "POST");
        assert_eq!(rendered.headers["content-type"], "application/json");
        let body: Value = serde_json::from_str(&rendered.body).unwrap();
        assert!(body["text"].as_str().unwrap().contains("Website is down"));
        assert_eq!(body["blocks"][0]["type"], "section");
    }

    #[test]
    fn test_text_render_is_plain() {
        let rendered = Template::Text.render(&down_context());
        assert!(rendered.headers["content-type"].starts_with("text/plain"));
        assert!(rendered.body.starts_with("🔴 Website is down"));
    }

    #[test]
    fn test_substitute_exact_match_only() {
        let payload = serde_json::json!({
            "summary": "$MSG",
            "details": { "lines": ["$MSG", "prefix $MSG", 42, true] },
        });
        let result = substitute(&payload, "hello");
        assert_eq!(result["summary"], "hello");
        assert_eq!(result["details"]["lines"][0], "hello");
        assert_eq!(result["details"]["lines"][1], "prefix $MSG");
        assert_eq!(result["details"]["lines"][2], 42);
    }
}
