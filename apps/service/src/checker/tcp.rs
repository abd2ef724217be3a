//! TCP checker: open a socket, measure time-to-open, close immediately.

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::config::MonitorTarget;

use super::CheckResult;
use super::http::timeout_message;

pub struct TcpChecker;

impl TcpChecker {
    pub fn new() -> Self {
        Self
    }

    pub async fn check(&self, target: &MonitorTarget) -> CheckResult {
        // Shape is validated at config load; guard anyway for targets built
        // programmatically.
        if !target.target.contains(':') {
            return CheckResult::fail("TCP target must be in format host:port");
        }

        let started = Instant::now();
        let connect = tokio::net::TcpStream::connect(&target.target);

        match timeout(Duration::from_millis(target.timeout_ms), connect).await {
            Ok(Ok(stream)) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                drop(stream);
                CheckResult::pass(latency_ms)
            }
            Ok(Err(e)) => CheckResult::Fail {
                error: format!("TCP connection failed: {e}"),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Err(_) => CheckResult::fail(timeout_message(target.timeout_ms)),
        }
    }
}
