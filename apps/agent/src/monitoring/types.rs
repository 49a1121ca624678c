use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a monitored target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Down,
    Unknown,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Up => write!(f, "up"),
            MonitorStatus::Down => write!(f, "down"),
            MonitorStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl MonitorStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "up" => MonitorStatus::Up,
            "down" => MonitorStatus::Down,
            _ => MonitorStatus::Unknown,
        }
    }
}

/// Edge of a monitor status change. Notifications fire on these, never on
/// unchanged ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTransition {
    /// Monitor crossed its retry threshold and is now down
    Failed,
    /// First successful check after a down state
    Recovered,
}

impl std::fmt::Display for StatusTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusTransition::Failed => write!(f, "failed"),
            StatusTransition::Recovered => write!(f, "recovered"),
        }
    }
}

/// Result of a single probe execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// ID of the monitor that was checked
    pub monitor_id: i64,

    /// Timestamp when the check completed
    pub timestamp: DateTime<Utc>,

    /// Outcome of the check (up/down)
    pub status: MonitorStatus,

    /// Response time in milliseconds
    pub latency_ms: Option<u64>,

    /// HTTP status code (if applicable)
    pub status_code: Option<u16>,

    /// Error message (if check failed)
    pub error_message: Option<String>,
}

impl CheckResult {
    /// Create a new check result with unknown status
    pub fn new(monitor_id: i64) -> Self {
        Self {
            monitor_id,
            timestamp: Utc::now(),
            status: MonitorStatus::Unknown,
            latency_ms: None,
            status_code: None,
            error_message: None,
        }
    }

    /// Mark the check as successful with latency
    pub fn success(mut self, latency_ms: u64, status_code: Option<u16>) -> Self {
        self.status = MonitorStatus::Up;
        self.latency_ms = Some(latency_ms);
        self.status_code = status_code;
        self
    }

    /// Mark the check as failed with error
    pub fn failure(mut self, error: String) -> Self {
        self.status = MonitorStatus::Down;
        self.error_message = Some(error);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == MonitorStatus::Up
    }
}
