use anyhow::{Result, anyhow};
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::database::models::MonitorSpec;

/// Checker trait for the per-protocol probe implementations.
///
/// Implementations return latency in milliseconds and an optional status
/// code on pass, or an error on fail. Anything beyond that pass/fail
/// contract lives in the state tracker.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, spec: &MonitorSpec) -> Result<(u64, Option<u16>)>;
}

/// HTTP checker - GET the target URL, 2xx/3xx counts as up
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, spec: &MonitorSpec) -> Result<(u64, Option<u16>)> {
        let MonitorSpec::Http { url } = spec else {
            return Err(anyhow!("HTTP checker received non-HTTP spec"));
        };

        let start = Instant::now();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        let latency = start.elapsed().as_millis() as u64;
        let status_code = response.status().as_u16();

        if response.status().is_success() || response.status().is_redirection() {
            Ok((latency, Some(status_code)))
        } else {
            Err(anyhow!("HTTP check failed with status code: {}", status_code))
        }
    }
}

/// TCP port checker - a completed connect counts as up
pub struct TcpChecker {
    timeout_duration: Duration,
}

impl TcpChecker {
    pub fn new(timeout_seconds: u64) -> Self {
        Self { timeout_duration: Duration::from_secs(timeout_seconds) }
    }
}

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(&self, spec: &MonitorSpec) -> Result<(u64, Option<u16>)> {
        let MonitorSpec::Tcp { host, port } = spec else {
            return Err(anyhow!("TCP checker received non-TCP spec"));
        };

        let start = Instant::now();

        let connect = tokio::net::TcpStream::connect((host.as_str(), *port));

        timeout(self.timeout_duration, connect)
            .await
            .map_err(|_| anyhow!("TCP connection timeout"))?
            .map_err(|e| anyhow!("TCP connection failed: {}", e))?;

        let latency = start.elapsed().as_millis() as u64;
        Ok((latency, None))
    }
}

/// Kubernetes API server checker - probes `/readyz` with a bearer token
pub struct K8sChecker {
    client: reqwest::Client,
    insecure_client: reqwest::Client,
}

impl K8sChecker {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        // Clusters with self-signed API server certs opt in per monitor
        let insecure_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self { client, insecure_client })
    }
}

#[async_trait::async_trait]
impl Checker for K8sChecker {
    async fn check(&self, spec: &MonitorSpec) -> Result<(u64, Option<u16>)> {
        let MonitorSpec::K8s { api_url, token, insecure } = spec else {
            return Err(anyhow!("K8s checker received non-K8s spec"));
        };

        let client = if *insecure { &self.insecure_client } else { &self.client };
        let url = format!("{}/readyz", api_url.trim_end_matches('/'));

        let start = Instant::now();

        let response = client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| anyhow!("K8s API request failed: {}", e))?;

        let latency = start.elapsed().as_millis() as u64;
        let status_code = response.status().as_u16();

        if response.status().is_success() {
            Ok((latency, Some(status_code)))
        } else {
            Err(anyhow!("K8s readiness check failed with status code: {}", status_code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_check_open_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let checker = TcpChecker::new(5);
        let spec = MonitorSpec::Tcp { host: "127.0.0.1".to_string(), port };

        let (latency, status_code) = checker.check(&spec).await.unwrap();
        assert!(latency < 5000);
        assert!(status_code.is_none());
    }

    #[tokio::test]
    async fn test_tcp_check_closed_port() {
        // Bind then drop to get a port that refuses connections
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let checker = TcpChecker::new(2);
        let spec = MonitorSpec::Tcp { host: "127.0.0.1".to_string(), port };

        assert!(checker.check(&spec).await.is_err());
    }

    #[tokio::test]
    async fn test_checker_rejects_wrong_spec() {
        let checker = TcpChecker::new(2);
        let spec = MonitorSpec::Http { url: "https://example.com".to_string() };

        assert!(checker.check(&spec).await.is_err());
    }
}
