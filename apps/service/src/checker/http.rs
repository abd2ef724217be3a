//! HTTP checker: configured method/headers/body with a per-target timeout,
//! status validated against an explicit allow-list (default: any 2xx) and
//! an optional body keyword scan.

use std::time::Instant;

use anyhow::{Result, anyhow};

use crate::config::MonitorTarget;

use super::CheckResult;

pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new() -> Result<Self> {
        // Timeouts are per-target, set on each request.
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }

    pub async fn check(&self, target: &MonitorTarget) -> CheckResult {
        let started = Instant::now();

        match self.run(target, &started).await {
            Ok(result) => result,
            Err(e) => CheckResult::Fail {
                error: e.to_string(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
        }
    }

    async fn run(&self, target: &MonitorTarget, started: &Instant) -> Result<CheckResult> {
        let method = reqwest::Method::from_bytes(target.method.as_bytes())
            .map_err(|_| anyhow!("Invalid HTTP method: {}", target.method))?;

        let mut request = self
            .client
            .request(method, &target.target)
            .timeout(std::time::Duration::from_millis(target.timeout_ms));

        for (name, value) in &target.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &target.body {
            request = request.body(body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Ok(CheckResult::fail(timeout_message(target.timeout_ms)));
            }
            Err(e) => return Ok(CheckResult::fail(e.to_string())),
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let status = response.status().as_u16();

        if let Err(reason) = validate_status(target, status) {
            // Dropping the response releases the connection without reading
            // the body.
            return Ok(CheckResult::Fail { error: reason, latency_ms: Some(latency_ms) });
        }

        if target.response_keyword.is_some() || target.response_forbidden_keyword.is_some() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) if e.is_timeout() => {
                    return Ok(CheckResult::fail(timeout_message(target.timeout_ms)));
                }
                Err(e) => return Ok(CheckResult::fail(e.to_string())),
            };
            if let Err(reason) = validate_keywords(target, &body) {
                return Ok(CheckResult::Fail { error: reason, latency_ms: Some(latency_ms) });
            }
        }

        Ok(CheckResult::pass(latency_ms))
    }
}

pub(crate) fn timeout_message(timeout_ms: u64) -> String {
    format!("Timeout after {timeout_ms}ms")
}

/// Status allow-list check shared with the delegated checker.
pub(crate) fn validate_status(target: &MonitorTarget, status: u16) -> Result<(), String> {
    if target.expected_codes.is_empty() {
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(format!("Unexpected status code: {status}"))
        }
    } else if target.expected_codes.contains(&status) {
        Ok(())
    } else {
        Err(format!("Status code {status} not in expected codes {:?}", target.expected_codes))
    }
}

/// Body keyword check shared with the delegated checker.
pub(crate) fn validate_keywords(target: &MonitorTarget, body: &str) -> Result<(), String> {
    if let Some(keyword) = &target.response_keyword
        && !body.contains(keyword.as_str())
    {
        return Err(format!("Keyword '{keyword}' not found in response"));
    }

    if let Some(forbidden) = &target.response_forbidden_keyword
        && body.contains(forbidden.as_str())
    {
        return Err(format!("Forbidden keyword '{forbidden}' found in response"));
    }

    Ok(())
}
