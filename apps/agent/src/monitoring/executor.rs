use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::checker::{Checker, HttpChecker, K8sChecker, TcpChecker};
use super::types::CheckResult;
use crate::database::models::{Monitor, MonitorSpec};

/// Probe executor - runs individual checks and maps pass/fail into results
pub struct ProbeExecutor {
    http_checker: Arc<HttpChecker>,
    tcp_checker: Arc<TcpChecker>,
    k8s_checker: Arc<K8sChecker>,
}

impl ProbeExecutor {
    /// Create a new probe executor.
    ///
    /// `default_timeout_seconds` backstops the HTTP clients; the effective
    /// timeout for each probe comes from the monitor itself.
    pub fn new(default_timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            http_checker: Arc::new(HttpChecker::new(default_timeout_seconds)?),
            tcp_checker: Arc::new(TcpChecker::new(default_timeout_seconds)),
            k8s_checker: Arc::new(K8sChecker::new(default_timeout_seconds)?),
        })
    }

    /// Execute one check for a monitor, bounded by the monitor's own timeout.
    ///
    /// Never returns an error: probe failures and timeouts become a failed
    /// `CheckResult` and count toward the monitor's retry threshold.
    pub async fn execute_check(&self, monitor: &Monitor) -> CheckResult {
        let result = CheckResult::new(monitor.id);

        let checker: &dyn Checker = match &monitor.spec {
            MonitorSpec::Http { .. } => self.http_checker.as_ref(),
            MonitorSpec::Tcp { .. } => self.tcp_checker.as_ref(),
            MonitorSpec::K8s { .. } => self.k8s_checker.as_ref(),
        };

        let probe_timeout = Duration::from_secs(monitor.timeout_seconds.max(1));

        match timeout(probe_timeout, checker.check(&monitor.spec)).await {
            Ok(Ok((latency_ms, status_code))) => result.success(latency_ms, status_code),
            Ok(Err(e)) => result.failure(e.to_string()),
            Err(_) => result.failure(format!(
                "probe timed out after {}s",
                monitor.timeout_seconds.max(1)
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::MonitorStatus;

    #[tokio::test]
    async fn test_tcp_probe_produces_result() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let executor = ProbeExecutor::new(10).unwrap();
        let monitor = Monitor::new(
            1,
            "local tcp".to_string(),
            MonitorSpec::Tcp { host: "127.0.0.1".to_string(), port },
        );

        let result = executor.execute_check(&monitor).await;
        assert_eq!(result.monitor_id, 1);
        assert_eq!(result.status, MonitorStatus::Up);
        assert!(result.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_failed_probe_is_down_not_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let executor = ProbeExecutor::new(10).unwrap();
        let mut monitor = Monitor::new(
            2,
            "dead tcp".to_string(),
            MonitorSpec::Tcp { host: "127.0.0.1".to_string(), port },
        );
        monitor.timeout_seconds = 2;

        let result = executor.execute_check(&monitor).await;
        assert_eq!(result.status, MonitorStatus::Down);
        assert!(result.error_message.is_some());
    }
}
