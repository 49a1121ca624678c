//! Notification dispatch - fans a status transition out to every channel
//! bound to the monitor.
//!
//! Channels are looked up in a registry keyed by channel kind, so adding a
//! channel means adding a `Notifier` implementation, not editing the
//! dispatcher. A failure in one channel is logged and never blocks the
//! remaining channels; delivery is at-least-once with a bounded in-process
//! retry.

pub mod channels;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::database::models::{ChannelKind, NotificationTarget};
use crate::monitoring::types::StatusTransition;

/// Message delivered for one status transition
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub monitor_id: i64,
    pub monitor_name: String,
    pub target: String,
    pub transition: StatusTransition,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl AlertMessage {
    pub fn new(
        monitor_id: i64,
        monitor_name: String,
        target: String,
        transition: StatusTransition,
        detail: Option<String>,
    ) -> Self {
        let body = match transition {
            StatusTransition::Failed => match detail {
                Some(reason) => format!("{} ({}) is down: {}", monitor_name, target, reason),
                None => format!("{} ({}) is down", monitor_name, target),
            },
            StatusTransition::Recovered => {
                format!("{} ({}) has recovered", monitor_name, target)
            }
        };

        Self {
            monitor_id,
            monitor_name,
            target,
            transition,
            body,
            timestamp: Utc::now(),
        }
    }
}

/// Notifier trait - one implementation per channel type
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, target: &NotificationTarget, message: &AlertMessage) -> Result<()>;
}

/// Notification dispatcher with a registry of channel implementations
pub struct Dispatcher {
    notifiers: HashMap<ChannelKind, Arc<dyn Notifier>>,
    retry_attempts: u32,
    backoff_base: Duration,
}

impl Dispatcher {
    pub fn new(retry_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            notifiers: HashMap::new(),
            retry_attempts: retry_attempts.max(1),
            backoff_base,
        }
    }

    /// Register all built-in reqwest-backed channels
    pub fn with_default_channels(mut self, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        self.register(ChannelKind::Webhook, Arc::new(channels::WebhookNotifier::new(client.clone())));
        self.register(ChannelKind::Slack, Arc::new(channels::SlackNotifier::new(client.clone())));
        self.register(ChannelKind::Teams, Arc::new(channels::TeamsNotifier::new(client.clone())));
        self.register(ChannelKind::Telegram, Arc::new(channels::TelegramNotifier::new(client.clone())));
        self.register(ChannelKind::Push, Arc::new(channels::PushNotifier::new(client)));

        Ok(self)
    }

    pub fn register(&mut self, kind: ChannelKind, notifier: Arc<dyn Notifier>) {
        self.notifiers.insert(kind, notifier);
    }

    /// Fan the message out to every target, isolating per-channel failures.
    ///
    /// Returns the number of successful deliveries; failures are logged and
    /// never propagate to the scheduler.
    pub async fn dispatch(&self, targets: &[NotificationTarget], message: &AlertMessage) -> usize {
        let mut delivered = 0;

        for target in targets {
            let Some(notifier) = self.notifiers.get(&target.channel) else {
                warn!(
                    "No notifier registered for channel {} (target {})",
                    target.channel, target.id
                );
                continue;
            };

            match self.send_with_retry(notifier.as_ref(), target, message).await {
                Ok(()) => {
                    info!(
                        "Delivered {} notification for monitor {} via {}",
                        message.transition, message.monitor_id, target.channel
                    );
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to deliver {} notification for monitor {} via {}: {}",
                        message.transition, message.monitor_id, target.channel, e
                    );
                }
            }
        }

        delivered
    }

    /// Bounded exponential backoff around a single channel send
    async fn send_with_retry(
        &self,
        notifier: &dyn Notifier,
        target: &NotificationTarget,
        message: &AlertMessage,
    ) -> Result<()> {
        let mut last_error = None;

        for attempt in 0..self.retry_attempts {
            match notifier.send(target, message).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt + 1 < self.retry_attempts {
                        let backoff = self.backoff_base * 2u32.pow(attempt);
                        warn!(
                            "Channel {} attempt {}/{} failed, retrying in {:?}: {}",
                            target.channel,
                            attempt + 1,
                            self.retry_attempts,
                            backoff,
                            e
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.expect("at least one attempt was made"))
    }
}
