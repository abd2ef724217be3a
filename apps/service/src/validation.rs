//! Target-shape validation, run once at configuration load.
//!
//! A target that fails these checks could never produce a meaningful check
//! result, so it is rejected up front instead of failing every cycle.

use anyhow::{Result, anyhow};
use url::Url;

use crate::config::{MonitorTarget, TCP_METHOD};

/// Validates a monitor target based on its check method.
pub fn validate_target(target: &MonitorTarget) -> Result<()> {
    if target.id.is_empty() {
        return Err(anyhow!("Target id must not be empty"));
    }

    if let Some(proxy) = &target.check_proxy {
        validate_check_proxy(proxy)?;
    }

    if target.method == TCP_METHOD {
        validate_tcp_target(&target.target)
    } else {
        validate_http_target(&target.target)
    }
}

fn validate_http_target(target: &str) -> Result<()> {
    let url = Url::parse(target).map_err(|e| anyhow!("Invalid URL: {}", e))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("Invalid scheme for HTTP monitor: {}", other)),
    }

    if let Some(port) = url.port() {
        validate_port(port)?;
    }

    Ok(())
}

fn validate_tcp_target(target: &str) -> Result<()> {
    // Expected format: host:port
    let Some((host, port)) = target.rsplit_once(':') else {
        return Err(anyhow!("TCP target must be in format host:port"));
    };

    if host.is_empty() {
        return Err(anyhow!("TCP target must be in format host:port"));
    }

    let port: u16 = port.parse().map_err(|_| anyhow!("Invalid port number"))?;
    validate_port(port)?;

    Ok(())
}

/// Reject proxy descriptors the dispatcher could not route.
fn validate_check_proxy(proxy: &str) -> Result<()> {
    let Some((scheme, rest)) = proxy.split_once("://") else {
        return Err(anyhow!("Check proxy must carry a scheme: {}", proxy));
    };

    match scheme {
        // worker:// is resolved by the dispatcher into a clear runtime
        // failure, so it passes shape validation.
        "globalping" | "worker" | "http" | "https" => {}
        other => return Err(anyhow!("Unsupported check proxy scheme: {}", other)),
    }

    if rest.is_empty() {
        return Err(anyhow!("Check proxy is missing its address: {}", proxy));
    }

    Ok(())
}

fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(anyhow!("Port 0 is not valid"));
    }
    Ok(())
}
