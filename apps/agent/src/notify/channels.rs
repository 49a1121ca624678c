//! Built-in notification channels, all thin JSON posts over reqwest.
//!
//! Destination formats: webhook/Slack/Teams targets carry a plain URL,
//! Telegram and push carry a small JSON blob (see the structs below).
//! Full message formatting (cards, templates, SMTP) is the notification
//! service's concern, not the agent's.

use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde_json::json;

use super::{AlertMessage, Notifier};
use crate::database::models::NotificationTarget;

fn ensure_delivered(response: reqwest::Response, channel: &str) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(anyhow!("{} endpoint returned status {}", channel, response.status()))
    }
}

/// Generic webhook - posts the full alert as JSON to the destination URL
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, target: &NotificationTarget, message: &AlertMessage) -> Result<()> {
        let payload = json!({
            "monitor_id": message.monitor_id,
            "monitor_name": message.monitor_name,
            "target": message.target,
            "transition": message.transition.to_string(),
            "message": message.body,
            "timestamp": message.timestamp.to_rfc3339(),
        });

        let response = self.client.post(&target.destination).json(&payload).send().await?;
        ensure_delivered(response, "webhook")
    }
}

/// Slack incoming-webhook channel
pub struct SlackNotifier {
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, target: &NotificationTarget, message: &AlertMessage) -> Result<()> {
        let payload = json!({ "text": message.body });

        let response = self.client.post(&target.destination).json(&payload).send().await?;
        ensure_delivered(response, "Slack")
    }
}

/// Microsoft Teams incoming-webhook channel
pub struct TeamsNotifier {
    client: reqwest::Client,
}

impl TeamsNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Notifier for TeamsNotifier {
    async fn send(&self, target: &NotificationTarget, message: &AlertMessage) -> Result<()> {
        let payload = json!({ "text": message.body });

        let response = self.client.post(&target.destination).json(&payload).send().await?;
        ensure_delivered(response, "Teams")
    }
}

/// Telegram destination config, stored opaquely in the target row
#[derive(Debug, Deserialize)]
struct TelegramDestination {
    bot_token: String,
    chat_id: String,
}

/// Telegram bot channel
pub struct TelegramNotifier {
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, target: &NotificationTarget, message: &AlertMessage) -> Result<()> {
        let destination: TelegramDestination = serde_json::from_str(&target.destination)
            .map_err(|e| anyhow!("invalid Telegram destination config: {}", e))?;

        let url = format!("https://api.telegram.org/bot{}/sendMessage", destination.bot_token);
        let payload = json!({
            "chat_id": destination.chat_id,
            "text": message.body,
        });

        let response = self.client.post(&url).json(&payload).send().await?;
        ensure_delivered(response, "Telegram")
    }
}

/// Push destination config (Gotify-compatible server)
#[derive(Debug, Deserialize)]
struct PushDestination {
    server_url: String,
    app_token: String,
}

/// Push channel for Gotify-style servers
pub struct PushNotifier {
    client: reqwest::Client,
}

impl PushNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Notifier for PushNotifier {
    async fn send(&self, target: &NotificationTarget, message: &AlertMessage) -> Result<()> {
        let destination: PushDestination = serde_json::from_str(&target.destination)
            .map_err(|e| anyhow!("invalid push destination config: {}", e))?;

        let url = format!("{}/message", destination.server_url.trim_end_matches('/'));
        let payload = json!({
            "title": format!("Monitor {}", message.transition),
            "message": message.body,
            "priority": 5,
        });

        let response = self
            .client
            .post(&url)
            .query(&[("token", destination.app_token.as_str())])
            .json(&payload)
            .send()
            .await?;
        ensure_delivered(response, "push")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telegram_destination_parses() {
        let raw = r#"{"bot_token": "123:abc", "chat_id": "-100200300"}"#;
        let destination: TelegramDestination = serde_json::from_str(raw).unwrap();
        assert_eq!(destination.bot_token, "123:abc");
        assert_eq!(destination.chat_id, "-100200300");
    }

    #[test]
    fn test_push_destination_rejects_garbage() {
        let parsed: Result<PushDestination, _> = serde_json::from_str("not json");
        assert!(parsed.is_err());
    }
}
