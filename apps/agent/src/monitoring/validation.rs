//! Monitor configuration validation.
//!
//! Monitors are written by the external configuration API, so the agent
//! re-checks them defensively before probing: a malformed row should be
//! skipped with a warning, not crash the sweep or waste probe slots.

use anyhow::{Result, anyhow};
use url::Url;

use crate::database::models::{Monitor, MonitorSpec};

const MIN_INTERVAL_SECONDS: u64 = 10;
const MAX_INTERVAL_SECONDS: u64 = 86400; // 24 hours
const MAX_TIMEOUT_SECONDS: u64 = 300; // 5 minutes

/// Validate a monitor's probe spec and cadence settings
pub fn validate_monitor(monitor: &Monitor) -> Result<()> {
    validate_spec(&monitor.spec)?;
    validate_check_interval(monitor.interval_seconds)?;
    validate_timeout(monitor.timeout_seconds)?;
    Ok(())
}

fn validate_spec(spec: &MonitorSpec) -> Result<()> {
    match spec {
        MonitorSpec::Http { url } => validate_http_url(url, "HTTP"),
        MonitorSpec::Tcp { host, port } => {
            if host.is_empty() {
                return Err(anyhow!("TCP monitor has an empty host"));
            }
            if *port == 0 {
                return Err(anyhow!("Port 0 is not valid"));
            }
            Ok(())
        }
        MonitorSpec::K8s { api_url, token, .. } => {
            if token.is_empty() {
                return Err(anyhow!("Kubernetes monitor has an empty token"));
            }
            validate_http_url(api_url, "Kubernetes")
        }
    }
}

fn validate_http_url(target: &str, kind: &str) -> Result<()> {
    let url = Url::parse(target).map_err(|e| anyhow!("Invalid URL: {}", e))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("Invalid scheme for {} monitor: {}", kind, other)),
    }

    if url.host_str().is_none() {
        return Err(anyhow!("{} monitor URL has no host", kind));
    }

    if let Some(port) = url.port() {
        if port == 0 {
            return Err(anyhow!("Port 0 is not valid"));
        }
    }

    Ok(())
}

fn validate_check_interval(interval_seconds: u64) -> Result<()> {
    if interval_seconds < MIN_INTERVAL_SECONDS {
        return Err(anyhow!(
            "Check interval too short: {} seconds (minimum: {})",
            interval_seconds,
            MIN_INTERVAL_SECONDS
        ));
    }

    if interval_seconds > MAX_INTERVAL_SECONDS {
        return Err(anyhow!(
            "Check interval too long: {} seconds (maximum: {})",
            interval_seconds,
            MAX_INTERVAL_SECONDS
        ));
    }

    Ok(())
}

fn validate_timeout(timeout_seconds: u64) -> Result<()> {
    if timeout_seconds == 0 {
        return Err(anyhow!("Timeout must be at least 1 second"));
    }

    if timeout_seconds > MAX_TIMEOUT_SECONDS {
        return Err(anyhow!(
            "Timeout too long: {} seconds (maximum: {})",
            timeout_seconds,
            MAX_TIMEOUT_SECONDS
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with_spec(spec: MonitorSpec) -> Monitor {
        Monitor::new(1, "test".to_string(), spec)
    }

    #[test]
    fn test_valid_http_monitor() {
        let monitor =
            monitor_with_spec(MonitorSpec::Http { url: "https://example.com".to_string() });
        assert!(validate_monitor(&monitor).is_ok());

        let with_port =
            monitor_with_spec(MonitorSpec::Http { url: "http://example.com:8080".to_string() });
        assert!(validate_monitor(&with_port).is_ok());
    }

    #[test]
    fn test_http_rejects_bad_urls() {
        for url in ["not a url", "ftp://example.com", "https://"] {
            let monitor = monitor_with_spec(MonitorSpec::Http { url: url.to_string() });
            assert!(validate_monitor(&monitor).is_err(), "should reject {}", url);
        }
    }

    #[test]
    fn test_tcp_rejects_port_zero_and_empty_host() {
        let no_port =
            monitor_with_spec(MonitorSpec::Tcp { host: "db.internal".to_string(), port: 0 });
        assert!(validate_monitor(&no_port).is_err());

        let no_host = monitor_with_spec(MonitorSpec::Tcp { host: String::new(), port: 5432 });
        assert!(validate_monitor(&no_host).is_err());
    }

    #[test]
    fn test_k8s_requires_token_and_https_url() {
        let no_token = monitor_with_spec(MonitorSpec::K8s {
            api_url: "https://kube.internal:6443".to_string(),
            token: String::new(),
            insecure: false,
        });
        assert!(validate_monitor(&no_token).is_err());

        let ok = monitor_with_spec(MonitorSpec::K8s {
            api_url: "https://kube.internal:6443".to_string(),
            token: "token".to_string(),
            insecure: false,
        });
        assert!(validate_monitor(&ok).is_ok());
    }

    #[test]
    fn test_interval_bounds() {
        let mut monitor =
            monitor_with_spec(MonitorSpec::Http { url: "https://example.com".to_string() });

        monitor.interval_seconds = 5;
        assert!(validate_monitor(&monitor).is_err());

        monitor.interval_seconds = 86400;
        assert!(validate_monitor(&monitor).is_ok());

        monitor.interval_seconds = 100000;
        assert!(validate_monitor(&monitor).is_err());
    }

    #[test]
    fn test_timeout_bounds() {
        let mut monitor =
            monitor_with_spec(MonitorSpec::Http { url: "https://example.com".to_string() });

        monitor.timeout_seconds = 0;
        assert!(validate_monitor(&monitor).is_err());

        monitor.timeout_seconds = 301;
        assert!(validate_monitor(&monitor).is_err());
    }
}
