//! Collaborator Seams
//!
//! Traits for the notification gateway (webhook delivery + endpoint
//! provisioning), the leaderboard updater, and the best-effort event sink.
//! The engine never fails a call operation because one of these did.

use crate::events::CallEvent;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Error types for notification delivery
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("endpoint unavailable for channel {0}")]
    EndpointUnavailable(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Payload delivered through a channel-bound webhook.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyPayload {
    pub content: String,
    #[serde(rename = "username", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Suppresses mention pings on relayed user content.
    pub allowed_mentions: AllowedMentions,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<String>,
}

impl NotifyPayload {
    /// System message from the engine itself.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            display_name: None,
            avatar_url: None,
            allowed_mentions: AllowedMentions { parse: vec![] },
        }
    }

    /// Relayed user content, shown under the author's name.
    pub fn relayed(content: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            display_name: Some(display_name.into()),
            avatar_url: None,
            allowed_mentions: AllowedMentions { parse: vec![] },
        }
    }
}

/// Delivers messages to a channel through its webhook, and provisions the
/// webhook in the first place. Provisioning failure (missing permission)
/// short-circuits call initiation.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// The channel's notification endpoint, creating it if needed.
    /// `Ok(None)` means the endpoint cannot be provisioned.
    async fn get_or_create_endpoint(
        &self,
        channel_id: &str,
        guild_id: &str,
    ) -> Result<Option<String>, NotifyError>;

    /// Deliver a payload to an endpoint.
    async fn send(&self, endpoint: &str, payload: NotifyPayload) -> Result<(), NotifyError>;
}

/// Webhook gateway backed by reqwest.
///
/// Endpoint provisioning is registry-based: the bot layer registers the
/// webhook URL it created for each channel, and an unregistered channel
/// resolves to `None` (the missing-permission failure path).
pub struct WebhookGateway {
    client: reqwest::Client,
    endpoints: RwLock<HashMap<String, String>>,
}

impl WebhookGateway {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Register the webhook URL for a channel.
    pub async fn register_endpoint(&self, channel_id: &str, url: &str) {
        let mut endpoints = self.endpoints.write().await;
        endpoints.insert(channel_id.to_string(), url.to_string());
    }
}

impl Default for WebhookGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationGateway for WebhookGateway {
    async fn get_or_create_endpoint(
        &self,
        channel_id: &str,
        _guild_id: &str,
    ) -> Result<Option<String>, NotifyError> {
        let endpoints = self.endpoints.read().await;
        Ok(endpoints.get(channel_id).cloned())
    }

    async fn send(&self, endpoint: &str, payload: NotifyPayload) -> Result<(), NotifyError> {
        let response = self.client.post(endpoint).json(&payload).send().await?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!(
                "webhook returned {}",
                response.status()
            )));
        }

        debug!("Delivered webhook message ({} chars)", payload.content.len());
        Ok(())
    }
}

/// What a leaderboard credit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardKind {
    User,
    Guild,
}

/// Fire-and-forget leaderboard increments.
#[async_trait]
pub trait LeaderboardSink: Send + Sync {
    async fn update_leaderboard(&self, kind: LeaderboardKind, id: &str);
}

/// Best-effort lifecycle event consumer (achievements and friends).
/// Failures are logged and never surfaced to call operations.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn process_event(&self, event: &CallEvent);
}

/// Default sink: log and move on.
pub struct LoggingSink;

#[async_trait]
impl LeaderboardSink for LoggingSink {
    async fn update_leaderboard(&self, kind: LeaderboardKind, id: &str) {
        debug!("Leaderboard update: {:?} {}", kind, id);
    }
}

#[async_trait]
impl EventSink for LoggingSink {
    async fn process_event(&self, event: &CallEvent) {
        debug!("Call event: {:?}", event);
    }
}

/// Deliver best-effort, logging any failure instead of propagating it.
pub async fn notify_best_effort(
    gateway: &dyn NotificationGateway,
    endpoint: &str,
    payload: NotifyPayload,
) {
    if let Err(e) = gateway.send(endpoint, payload).await {
        warn!("Notification delivery failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_endpoint_registry() {
        let gateway = WebhookGateway::new();

        let missing = gateway.get_or_create_endpoint("chan-a", "guild-1").await.unwrap();
        assert!(missing.is_none());

        gateway.register_endpoint("chan-a", "https://hooks.example/a").await;
        let found = gateway.get_or_create_endpoint("chan-a", "guild-1").await.unwrap();
        assert_eq!(found.as_deref(), Some("https://hooks.example/a"));
    }

    #[test]
    fn test_payload_serialization() {
        let payload = NotifyPayload::relayed("hi there", "someone");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["content"], "hi there");
        assert_eq!(json["username"], "someone");
        assert!(json.get("avatar_url").is_none());
        assert_eq!(json["allowed_mentions"]["parse"], serde_json::json!([]));
    }

    #[test]
    fn test_system_payload_has_no_author() {
        let payload = NotifyPayload::system("call ended");
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("username").is_none());
    }
}
