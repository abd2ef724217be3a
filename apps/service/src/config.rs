//! Static configuration: monitored targets, notification settings, store
//! location. Loaded from a TOML file, with a default written on first run.

use std::collections::HashMap;
use std::{env, fs, path};

use serde::{Deserialize, Serialize};

use crate::validation;

/// Method sentinel selecting the raw TCP checker instead of HTTP.
pub const TCP_METHOD: &str = "TCP_PING";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("no config path available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid target '{id}': {reason}")]
    InvalidTarget { id: String, reason: String },
}

/// One monitored endpoint. Immutable during a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorTarget {
    /// Unique, stable identifier. Keys all persisted per-target state.
    pub id: String,
    pub name: String,
    /// HTTP method, or [`TCP_METHOD`] for a raw port check.
    #[serde(default = "default_method")]
    pub method: String,
    /// URL for HTTP checks, `host:port` for TCP checks.
    pub target: String,
    /// Accepted HTTP status codes. Empty = any 2xx.
    #[serde(default)]
    pub expected_codes: Vec<u16>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Substring that must appear in the response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_keyword: Option<String>,
    /// Substring that must not appear in the response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_forbidden_keyword: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Delegated check: `globalping://<probe-location>`, `worker://<colo>`
    /// (not supported in this deployment) or an `https://` proxy endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_proxy: Option<String>,
    /// Check certificate expiry on delegated HTTPS checks.
    #[serde(default)]
    pub ssl_expiry_check: bool,
    /// Fail the check when the certificate expires within this many days.
    #[serde(default = "default_ssl_threshold_days")]
    pub ssl_expiry_threshold_days: i64,
    /// Do not notify on same-incident error-label changes (up/down
    /// transitions still notify).
    #[serde(default)]
    pub suppress_error_change_notification: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_ssl_threshold_days() -> i64 {
    14
}

/// One or several webhooks; a bare table and a list both deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Webhooks {
    One(WebhookConfig),
    Many(Vec<WebhookConfig>),
}

impl Webhooks {
    pub fn as_slice(&self) -> &[WebhookConfig] {
        match self {
            Webhooks::One(single) => std::slice::from_ref(single),
            Webhooks::Many(list) => list,
        }
    }
}

/// How a raw payload is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryFormat {
    /// JSON request body.
    #[default]
    Json,
    /// `application/x-www-form-urlencoded` body.
    Form,
    /// GET with the payload as query parameters.
    Param,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Named message template: `slack`, `discord`, `telegram` or `text`.
    /// Unknown names fall back to plain text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// User-defined payload tree; `"$MSG"` leaves are replaced with the
    /// rendered message. Takes precedence over `template`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub delivery: DeliveryFormat,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub webhooks: Webhooks,
    /// IANA timezone for the localized timestamp in messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Minimum downtime before a notification is sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_minutes: Option<u32>,
    /// Target ids that never notify.
    #[serde(default)]
    pub skip_notification_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the local libsql database holding the state aggregate.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: "upwatch.db".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub targets: Vec<MonitorTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    /// Minimum minutes between state writes when nothing changed.
    #[serde(default = "default_cooldown_minutes")]
    pub kv_write_cooldown_minutes: u64,
    /// Bearer token sent to external check proxies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_proxy_token: Option<String>,
}

fn default_cooldown_minutes() -> u64 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            notification: None,
            store: StoreConfig::default(),
            kv_write_cooldown_minutes: default_cooldown_minutes(),
            check_proxy_token: None,
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/upwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("upwatch/config.toml"))
}

impl Config {
    /// Load a config from the given path or the default location, writing a
    /// default file if none exists yet.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(raw_string.as_str())?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, config_str)?;
        Ok(())
    }

    /// Reject targets whose locator cannot possibly be checked.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for target in &self.targets {
            validation::validate_target(target).map_err(|e| ConfigError::InvalidTarget {
                id: target.id.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Reloadable configuration holder. A failed reload keeps the last
/// successfully loaded config instead of failing closed.
pub struct ConfigLoader {
    path: Option<path::PathBuf>,
    current: Config,
}

impl ConfigLoader {
    pub fn load(path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let path = path.map(|p| p.as_ref().to_path_buf());
        let current = Config::from_config(path.as_ref())?;
        Ok(Self { path, current })
    }

    pub fn current(&self) -> &Config {
        &self.current
    }

    /// Re-read the config file. On failure the previous config stays active.
    pub fn reload(&mut self) -> &Config {
        match Config::from_config(self.path.as_ref()) {
            Ok(config) => self.current = config,
            Err(e) => {
                tracing::warn!("Config reload failed, keeping previous configuration: {e}");
            }
        }
        &self.current
    }
}

/// Target builder shared by the unit tests of several modules.
#[cfg(test)]
pub mod test_support {
    use super::*;

    pub fn target(id: &str, method: &str, locator: &str) -> MonitorTarget {
        MonitorTarget {
            id: id.to_string(),
            name: id.to_string(),
            method: method.to_string(),
            target: locator.to_string(),
            expected_codes: Vec::new(),
            headers: HashMap::new(),
            body: None,
            response_keyword: None,
            response_forbidden_keyword: None,
            timeout_ms: 10_000,
            check_proxy: None,
            ssl_expiry_check: false,
            ssl_expiry_threshold_days: 14,
            suppress_error_change_notification: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::target;
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let raw = r#"
            [[targets]]
            id = "web"
            name = "Website"
            target = "https://example.com"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].method, "GET");
        assert_eq!(config.targets[0].timeout_ms, 10_000);
        assert_eq!(config.kv_write_cooldown_minutes, 3);
    }

    #[test]
    fn test_webhooks_single_and_list() {
        let single = r#"
            [notification.webhooks]
            url = "https://hooks.example.com/a"
            template = "slack"
        "#;
        let config: Config = toml::from_str(single).unwrap();
        let notification = config.notification.unwrap();
        assert_eq!(notification.webhooks.as_slice().len(), 1);

        let list = r#"
            [[notification.webhooks]]
            url = "https://hooks.example.com/a"

            [[notification.webhooks]]
            url = "https://hooks.example.com/b"
            delivery = "form"
        "#;
        let config: Config = toml::from_str(list).unwrap();
        let notification = config.notification.unwrap();
        let hooks = notification.webhooks.as_slice();
        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks[1].delivery, DeliveryFormat::Form);
    }

    #[test]
    fn test_validate_rejects_broken_targets() {
        let mut config = Config::default();
        config.targets.push(target("tcp", TCP_METHOD, "example.com"));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTarget { .. })));

        let mut config = Config::default();
        config.targets.push(target("web", "GET", "ftp://example.com"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.targets.push(target("ok", "GET", "https://example.com"));
        config.targets.push(target("tcp-ok", TCP_METHOD, "example.com:5432"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.targets.push(target("web", "GET", "https://example.com"));
        config.write_config(&path).unwrap();

        let loaded = Config::from_config(Some(&path)).unwrap();
        assert_eq!(loaded.targets.len(), 1);
        assert_eq!(loaded.targets[0].id, "web");
    }

    #[test]
    fn test_loader_keeps_last_known_good() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.targets.push(target("web", "GET", "https://example.com"));
        config.write_config(&path).unwrap();

        let mut loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.current().targets.len(), 1);

        fs::write(&path, "this is not toml [").unwrap();
        let config = loader.reload();
        assert_eq!(config.targets.len(), 1, "previous config must survive a bad reload");
    }
}
