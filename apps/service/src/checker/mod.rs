//! Protocol checkers and the per-target dispatch.
//!
//! A checker never returns a Rust error: every failure mode (network,
//! timeout, validation) collapses into a failed [`CheckResult`].

pub mod globalping;
pub mod http;
pub mod proxy;
pub mod tcp;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{MonitorTarget, TCP_METHOD};
use crate::location::{LocationLookup, UNKNOWN_LOCATION};

pub use globalping::GlobalpingChecker;
pub use http::HttpChecker;
pub use proxy::ProxyClient;
pub use tcp::TcpChecker;

/// TLS certificate details reported by a delegated probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsInfo {
    /// Certificate expiry as epoch seconds.
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

/// Verdict of a single check. Also the wire shape exchanged with external
/// check proxies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CheckResult {
    Pass {
        latency_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tls: Option<TlsInfo>,
    },
    Fail {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        latency_ms: Option<u64>,
    },
}

impl CheckResult {
    pub fn pass(latency_ms: u64) -> Self {
        CheckResult::Pass { latency_ms, tls: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        CheckResult::Fail { error: error.into(), latency_ms: None }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, CheckResult::Pass { .. })
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match self {
            CheckResult::Pass { latency_ms, .. } => Some(*latency_ms),
            CheckResult::Fail { latency_ms, .. } => *latency_ms,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CheckResult::Pass { .. } => None,
            CheckResult::Fail { error, .. } => Some(error),
        }
    }

    pub fn tls(&self) -> Option<&TlsInfo> {
        match self {
            CheckResult::Pass { tls, .. } => tls.as_ref(),
            CheckResult::Fail { .. } => None,
        }
    }
}

/// A check result together with the location that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Located {
    pub location: String,
    pub result: CheckResult,
}

/// Location label attached to dispatch-level failures (unroutable targets,
/// broken proxy replies).
pub const ERROR_LOCATION: &str = "ERROR";

/// Which check path applies to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind<'a> {
    /// Delegated multi-probe measurement; the probe location magic string.
    Globalping(&'a str),
    /// In-process delegation to another colo; not supported here.
    WorkerProxy(&'a str),
    /// External check proxy endpoint.
    ExternalProxy(&'a str),
    Tcp,
    Http,
}

/// Pure target-shape to check-path resolution, in priority order.
pub fn resolve(target: &MonitorTarget) -> CheckKind<'_> {
    if let Some(proxy) = target.check_proxy.as_deref() {
        if let Some(magic) = proxy.strip_prefix("globalping://") {
            return CheckKind::Globalping(magic);
        }
        if let Some(colo) = proxy.strip_prefix("worker://") {
            return CheckKind::WorkerProxy(colo);
        }
        return CheckKind::ExternalProxy(proxy);
    }

    if target.method == TCP_METHOD { CheckKind::Tcp } else { CheckKind::Http }
}

/// Routes each target to its checker and labels the result with the
/// probing location.
pub struct Dispatcher {
    http: HttpChecker,
    tcp: TcpChecker,
    globalping: GlobalpingChecker,
    proxy: ProxyClient,
    location: Arc<dyn LocationLookup>,
}

impl Dispatcher {
    pub fn new(
        location: Arc<dyn LocationLookup>,
        proxy_token: Option<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpChecker::new()?,
            tcp: TcpChecker::new(),
            globalping: GlobalpingChecker::new()?,
            proxy: ProxyClient::new(proxy_token)?,
            location,
        })
    }

    /// Run one check. Never fails: every error becomes a failed result.
    pub async fn dispatch(&self, target: &MonitorTarget) -> Located {
        match resolve(target) {
            CheckKind::Globalping(magic) => self.globalping.check(target, magic).await,
            CheckKind::WorkerProxy(colo) => Located {
                location: ERROR_LOCATION.to_string(),
                result: CheckResult::fail(format!(
                    "worker://{colo} delegation is not supported by this deployment; use a \
                     globalping:// or https:// check proxy"
                )),
            },
            CheckKind::ExternalProxy(endpoint) => self.proxy.check(target, endpoint).await,
            CheckKind::Tcp => self.located(self.tcp.check(target).await).await,
            CheckKind::Http => self.located(self.http.check(target).await).await,
        }
    }

    async fn located(&self, result: CheckResult) -> Located {
        let location = match self.location.lookup().await {
            Ok(label) => label,
            Err(e) => {
                warn!("Location lookup failed: {e}");
                UNKNOWN_LOCATION.to_string()
            }
        };
        Located { location, result }
    }
}
