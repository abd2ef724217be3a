//! External check-proxy delegation.
//!
//! The full target descriptor is POSTed to a user-configured endpoint which
//! runs the check from wherever it is deployed and answers with
//! `{location, result}`. Anything malformed becomes a failure tagged with
//! the `"ERROR"` location.

use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::config::MonitorTarget;

use super::{CheckResult, ERROR_LOCATION, Located};

pub struct ProxyClient {
    client: reqwest::Client,
    token: Option<String>,
}

impl ProxyClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, token })
    }

    pub async fn check(&self, target: &MonitorTarget, endpoint: &str) -> Located {
        match self.run(target, endpoint).await {
            Ok(located) => located,
            Err(e) => Located {
                location: ERROR_LOCATION.to_string(),
                result: CheckResult::fail(format!("Check proxy error: {e}")),
            },
        }
    }

    async fn run(&self, target: &MonitorTarget, endpoint: &str) -> Result<Located> {
        let mut request = self
            .client
            .post(endpoint)
            .json(target)
            // The proxy runs the check inside the target timeout; the margin
            // covers its own round trip.
            .timeout(Duration::from_millis(target.timeout_ms + 5_000));

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Proxy replied with status {}", response.status()));
        }

        let located: Located =
            response.json().await.map_err(|e| anyhow!("Malformed proxy reply: {e}"))?;
        Ok(located)
    }
}
