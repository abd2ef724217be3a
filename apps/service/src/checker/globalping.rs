//! Delegated multi-probe checker.
//!
//! Submits a measurement (ping or http) to the GlobalPing API, polls until
//! the probe finishes or the time budget runs out, and maps the remote
//! probe's verdict through the same validation rules as the local HTTP
//! checker. API failures never escape: they become a failed result tagged
//! with the `"ERROR"` location.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde_json::json;

use crate::config::{MonitorTarget, TCP_METHOD};

use super::http::{timeout_message, validate_keywords, validate_status};
use super::{CheckResult, ERROR_LOCATION, Located, TlsInfo};

const API_BASE: &str = "https://api.globalping.io/v1";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Extra time granted past the target timeout for probe scheduling.
const COMPLETION_MARGIN_MS: u64 = 5_000;

pub struct GlobalpingChecker {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Deserialize)]
struct CreateReply {
    id: String,
}

#[derive(Deserialize)]
struct Measurement {
    status: String,
    #[serde(default)]
    results: Vec<ProbeResult>,
}

#[derive(Deserialize)]
struct ProbeResult {
    #[serde(default)]
    probe: Probe,
    result: ProbeOutcome,
}

#[derive(Deserialize, Default)]
struct Probe {
    #[serde(default)]
    city: String,
    #[serde(default)]
    country: String,
}

#[derive(Deserialize)]
struct ProbeOutcome {
    #[serde(default)]
    status: String,
    #[serde(default, rename = "statusCode")]
    status_code: Option<u16>,
    #[serde(default)]
    timings: Option<Timings>,
    #[serde(default, rename = "rawBody")]
    raw_body: Option<String>,
    #[serde(default, rename = "rawOutput")]
    raw_output: Option<String>,
    #[serde(default)]
    tls: Option<TlsReply>,
    #[serde(default)]
    stats: Option<PingStats>,
}

#[derive(Deserialize)]
struct Timings {
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Deserialize)]
struct PingStats {
    #[serde(default = "full_loss")]
    loss: f64,
    #[serde(default)]
    avg: Option<f64>,
}

fn full_loss() -> f64 {
    100.0
}

#[derive(Deserialize)]
struct TlsReply {
    #[serde(default, rename = "expiresAt")]
    expires_at: Option<String>,
    #[serde(default)]
    issuer: Option<CertName>,
    #[serde(default)]
    subject: Option<CertName>,
}

#[derive(Deserialize)]
struct CertName {
    #[serde(default, rename = "CN")]
    cn: Option<String>,
    #[serde(default, rename = "O")]
    o: Option<String>,
}

impl CertName {
    fn label(&self) -> Option<String> {
        self.cn.clone().or_else(|| self.o.clone())
    }
}

impl GlobalpingChecker {
    pub fn new() -> Result<Self> {
        Self::with_api_base(API_BASE)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, api_base: api_base.into() })
    }

    /// Run one delegated check; the probe supplies its own location.
    pub async fn check(&self, target: &MonitorTarget, magic: &str) -> Located {
        match self.run(target, magic).await {
            Ok(located) => located,
            Err(e) => Located {
                location: ERROR_LOCATION.to_string(),
                result: CheckResult::fail(e.to_string()),
            },
        }
    }

    async fn run(&self, target: &MonitorTarget, magic: &str) -> Result<Located> {
        let request = measurement_request(target, magic)?;

        let response = self
            .client
            .post(format!("{}/measurements", self.api_base))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Measurement submission failed: {}", response.status()));
        }
        let created: CreateReply = response.json().await?;

        let budget_ms = target.timeout_ms + COMPLETION_MARGIN_MS;
        let deadline = Instant::now() + Duration::from_millis(budget_ms);

        let measurement = loop {
            if Instant::now() >= deadline {
                return Err(anyhow!(timeout_message(budget_ms)));
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let measurement: Measurement = self
                .client
                .get(format!("{}/measurements/{}", self.api_base, created.id))
                .send()
                .await?
                .json()
                .await?;
            if measurement.status != "in-progress" {
                break measurement;
            }
        };

        let probe = measurement
            .results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Measurement finished without probe results"))?;

        let location = probe_location(&probe.probe, magic);
        let result = if target.method == TCP_METHOD {
            map_ping_outcome(&probe.result)
        } else {
            map_http_outcome(target, &probe.result)
        };

        Ok(Located { location, result })
    }
}

/// Build the measurement submission body for a target.
fn measurement_request(target: &MonitorTarget, magic: &str) -> Result<serde_json::Value> {
    if target.method == TCP_METHOD {
        let host = target
            .target
            .rsplit_once(':')
            .map(|(host, _)| host)
            .ok_or_else(|| anyhow!("TCP target must be in format host:port"))?;
        return Ok(json!({
            "type": "ping",
            "target": host,
            "locations": [{ "magic": magic, "limit": 1 }],
            "measurementOptions": { "packets": 3 },
        }));
    }

    let url = url::Url::parse(&target.target).map_err(|e| anyhow!("Invalid URL: {e}"))?;
    let host = url.host_str().ok_or_else(|| anyhow!("URL is missing a host"))?;

    Ok(json!({
        "type": "http",
        "target": host,
        "locations": [{ "magic": magic, "limit": 1 }],
        "measurementOptions": {
            "protocol": if url.scheme() == "http" { "HTTP" } else { "HTTPS" },
            "port": url.port(),
            "request": {
                "method": target.method,
                "path": url.path(),
                "query": url.query().unwrap_or(""),
                "headers": target.headers,
            },
        },
    }))
}

fn probe_location(probe: &Probe, magic: &str) -> String {
    match (probe.city.is_empty(), probe.country.is_empty()) {
        (false, false) => format!("{}, {}", probe.city, probe.country),
        (false, true) => probe.city.clone(),
        (true, false) => probe.country.clone(),
        (true, true) => magic.to_string(),
    }
}

fn map_ping_outcome(outcome: &ProbeOutcome) -> CheckResult {
    let stats = match &outcome.stats {
        Some(stats) => stats,
        None => return CheckResult::fail("Ping probe returned no statistics"),
    };

    if outcome.status == "finished" && stats.loss < 100.0 {
        CheckResult::pass(stats.avg.unwrap_or(0.0).round() as u64)
    } else {
        CheckResult::fail(format!("Ping failed ({}% packet loss)", stats.loss))
    }
}

fn map_http_outcome(target: &MonitorTarget, outcome: &ProbeOutcome) -> CheckResult {
    let latency_ms = outcome.timings.as_ref().and_then(|t| t.total);

    if outcome.status != "finished" {
        let detail = outcome.raw_output.clone().unwrap_or_else(|| outcome.status.clone());
        return CheckResult::Fail { error: format!("Probe failed: {detail}"), latency_ms };
    }

    let Some(status_code) = outcome.status_code else {
        return CheckResult::Fail {
            error: "Probe returned no status code".to_string(),
            latency_ms,
        };
    };

    if let Err(reason) = validate_status(target, status_code) {
        return CheckResult::Fail { error: reason, latency_ms };
    }

    if target.response_keyword.is_some() || target.response_forbidden_keyword.is_some() {
        let body = outcome.raw_body.as_deref().or(outcome.raw_output.as_deref()).unwrap_or("");
        if let Err(reason) = validate_keywords(target, body) {
            return CheckResult::Fail { error: reason, latency_ms };
        }
    }

    let tls = outcome.tls.as_ref().and_then(parse_tls);

    if target.ssl_expiry_check
        && let Some(tls) = &tls
    {
        let days_left = (tls.expires_at - chrono::Utc::now().timestamp()) / 86_400;
        if days_left <= target.ssl_expiry_threshold_days {
            return CheckResult::Fail {
                error: format!("SSL certificate expires in {days_left} days"),
                latency_ms,
            };
        }
    }

    CheckResult::Pass { latency_ms: latency_ms.unwrap_or(0), tls }
}

fn parse_tls(reply: &TlsReply) -> Option<TlsInfo> {
    let expires_at =
        chrono::DateTime::parse_from_rfc3339(reply.expires_at.as_deref()?).ok()?.timestamp();
    Some(TlsInfo {
        expires_at,
        issuer: reply.issuer.as_ref().and_then(CertName::label),
        subject: reply.subject.as_ref().and_then(CertName::label),
    })
}
