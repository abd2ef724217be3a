//! Probing-location resolution.
//!
//! Local checks are labeled with the identity of the edge this process runs
//! behind. The label is fetched once per process lifetime from a trace
//! endpoint and cached; the lookup sits behind a trait so tests can inject
//! a fixed label instead of poking a hidden global.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::OnceCell;

const TRACE_ENDPOINT: &str = "https://cloudflare.com/cdn-cgi/trace";
const TRACE_TIMEOUT: Duration = Duration::from_secs(5);

/// Label used when the lookup cannot determine a location.
pub const UNKNOWN_LOCATION: &str = "unknown";

#[async_trait]
pub trait LocationLookup: Send + Sync {
    /// Resolve the label attached to locally executed checks.
    async fn lookup(&self) -> Result<String>;
}

/// Trace-endpoint backed lookup with a process-lifetime cache.
///
/// A failed fetch is not cached, so the next cycle retries.
pub struct TraceLocation {
    client: reqwest::Client,
    endpoint: String,
    cached: OnceCell<String>,
}

impl TraceLocation {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(TRACE_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(TRACE_TIMEOUT).build()?;
        Ok(Self { client, endpoint: endpoint.into(), cached: OnceCell::new() })
    }

    async fn fetch(&self) -> Result<String> {
        let body = self.client.get(&self.endpoint).send().await?.text().await?;
        parse_trace(&body).ok_or_else(|| anyhow!("Trace response carries no location field"))
    }
}

#[async_trait]
impl LocationLookup for TraceLocation {
    async fn lookup(&self) -> Result<String> {
        self.cached.get_or_try_init(|| self.fetch()).await.cloned()
    }
}

/// Fixed label, for tests and deployments with a known location.
pub struct StaticLocation(pub String);

#[async_trait]
impl LocationLookup for StaticLocation {
    async fn lookup(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Parse a `key=value` trace body, preferring the edge colo over the
/// country code.
fn parse_trace(body: &str) -> Option<String> {
    let field = |key: &str| {
        body.lines()
            .find_map(|line| line.strip_prefix(key)?.strip_prefix('=').map(str::to_string))
            .filter(|v| !v.is_empty())
    };

    field("colo").or_else(|| field("loc"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace_prefers_colo() {
        let body = "fl=123\nip=203.0.113.9\nloc=DE\ncolo=FRA\ntls=TLSv1.3\n";
        assert_eq!(parse_trace(body), Some("FRA".to_string()));
    }

    #[test]
    fn test_parse_trace_falls_back_to_country() {
        let body = "fl=123\nloc=DE\ntls=TLSv1.3\n";
        assert_eq!(parse_trace(body), Some("DE".to_string()));
    }

    #[test]
    fn test_parse_trace_empty_body() {
        assert_eq!(parse_trace(""), None);
        assert_eq!(parse_trace("colo=\nloc=\n"), None);
    }

    #[tokio::test]
    async fn test_static_location() {
        let lookup = StaticLocation("TEST".to_string());
        assert_eq!(lookup.lookup().await.unwrap(), "TEST");
    }
}
