use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::{MonitorStatus, StatusTransition};

/// Protocol-specific target description, selected by `kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MonitorSpec {
    Http {
        url: String,
    },
    Tcp {
        host: String,
        port: u16,
    },
    K8s {
        /// Kubernetes API server base URL
        api_url: String,
        /// Bearer token for the readiness probe, treated as opaque
        token: String,
        /// Accept self-signed API server certificates
        #[serde(default)]
        insecure: bool,
    },
}

impl MonitorSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorSpec::Http { .. } => "http",
            MonitorSpec::Tcp { .. } => "tcp",
            MonitorSpec::K8s { .. } => "k8s",
        }
    }

    /// Human-readable target, used in logs and alert messages
    pub fn target(&self) -> String {
        match self {
            MonitorSpec::Http { url } => url.clone(),
            MonitorSpec::Tcp { host, port } => format!("{}:{}", host, port),
            MonitorSpec::K8s { api_url, .. } => api_url.clone(),
        }
    }
}

/// Monitor model - a single monitored target and its check policy.
///
/// Immutable during a scheduling cycle; only the configuration API mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub spec: MonitorSpec,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    /// Consecutive failures required before the monitor is declared down
    pub retries: u32,
    pub paused: bool,
    pub region: Option<String>,
    pub group_id: Option<i64>,
}

impl Monitor {
    pub fn new(id: i64, name: String, spec: MonitorSpec) -> Self {
        Self {
            id,
            name,
            spec,
            interval_seconds: 60,
            timeout_seconds: 10,
            retries: 3,
            paused: false,
            region: None,
            group_id: None,
        }
    }
}

/// One running agent process, as seen through the node registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentNode {
    pub node_id: String,
    pub hostname: String,
    pub last_heartbeat: DateTime<Utc>,
    pub region: Option<String>,
}

/// Notification channel implementations the dispatcher can route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Webhook,
    Slack,
    Teams,
    Telegram,
    Push,
}

impl ChannelKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "webhook" => Some(ChannelKind::Webhook),
            "slack" => Some(ChannelKind::Slack),
            "teams" => Some(ChannelKind::Teams),
            "telegram" => Some(ChannelKind::Telegram),
            "push" => Some(ChannelKind::Push),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Webhook => write!(f, "webhook"),
            ChannelKind::Slack => write!(f, "slack"),
            ChannelKind::Teams => write!(f, "teams"),
            ChannelKind::Telegram => write!(f, "telegram"),
            ChannelKind::Push => write!(f, "push"),
        }
    }
}

/// A configured notification destination bound to a monitor or group.
///
/// `destination` is channel-specific and opaque to the scheduler: a webhook
/// URL for webhook/Slack/Teams, a JSON blob for Telegram and push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub id: i64,
    pub channel: ChannelKind,
    pub destination: String,
    pub monitor_id: Option<i64>,
    pub group_id: Option<i64>,
}

/// Last known status of a monitor, persisted so a restart does not fire a
/// spurious transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedStatus {
    pub monitor_id: i64,
    pub last_status: MonitorStatus,
    pub consecutive_failures: u32,
}

/// Alert record persisted when a transition notification is dispatched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub monitor_id: i64,
    pub transition: StatusTransition,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
