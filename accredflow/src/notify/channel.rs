//! Notification channel seam and tier bindings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::PublishError;
use crate::model::Tier;

/// A message ready to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Subject line.
    pub subject: String,
    /// Human readable body.
    pub message: String,
    /// Structured attributes for subscribers that filter or deduplicate.
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// A publish/subscribe delivery channel.
///
/// Deduplication is the dispatcher's job; a channel publishes whatever it
/// is handed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Publishes one payload to the named channel.
    async fn publish(
        &self,
        channel: &str,
        payload: &NotificationPayload,
    ) -> Result<(), PublishError>;
}

/// Channel names for each tier and for operational alerts.
///
/// Each tier has its own channel so subscribers opt into an urgency level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBindings {
    /// Channel for critical facilities.
    #[serde(default = "default_critical")]
    pub critical: String,
    /// Channel for high facilities.
    #[serde(default = "default_high")]
    pub high: String,
    /// Channel for medium facilities.
    #[serde(default = "default_medium")]
    pub medium: String,
    /// Channel for pipeline success and failure alerts.
    #[serde(default = "default_operational")]
    pub operational: String,
}

fn default_critical() -> String {
    "healthcare-accreditation-critical".to_string()
}

fn default_high() -> String {
    "healthcare-accreditation-high".to_string()
}

fn default_medium() -> String {
    "healthcare-accreditation-medium".to_string()
}

fn default_operational() -> String {
    "healthcare-pipeline-operations".to_string()
}

impl Default for ChannelBindings {
    fn default() -> Self {
        Self {
            critical: default_critical(),
            high: default_high(),
            medium: default_medium(),
            operational: default_operational(),
        }
    }
}

impl ChannelBindings {
    /// Returns the channel bound to `tier`; `Tier::None` has none.
    #[must_use]
    pub fn for_tier(&self, tier: Tier) -> Option<&str> {
        match tier {
            Tier::Critical => Some(self.critical.as_str()),
            Tier::High => Some(self.high.as_str()),
            Tier::Medium => Some(self.medium.as_str()),
            Tier::None => None,
        }
    }

    /// Returns every channel name.
    #[must_use]
    pub fn all(&self) -> [&str; 4] {
        [
            self.critical.as_str(),
            self.high.as_str(),
            self.medium.as_str(),
            self.operational.as_str(),
        ]
    }
}

/// A channel that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotificationChannel;

#[async_trait]
impl NotificationChannel for LoggingNotificationChannel {
    async fn publish(
        &self,
        channel: &str,
        payload: &NotificationPayload,
    ) -> Result<(), PublishError> {
        info!(
            channel = %channel,
            subject = %payload.subject,
            attributes = %payload.attributes,
            "Notification published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_channels_are_distinct() {
        let bindings = ChannelBindings::default();
        let channels: Vec<&str> = Tier::DISPATCHABLE
            .iter()
            .filter_map(|tier| bindings.for_tier(*tier))
            .collect();

        assert_eq!(channels.len(), 3);
        assert_ne!(channels[0], channels[1]);
        assert_ne!(channels[1], channels[2]);
        assert!(!channels.contains(&bindings.operational.as_str()));
        assert!(bindings.for_tier(Tier::None).is_none());
    }

    #[test]
    fn test_bindings_deserialize_with_defaults() {
        let bindings: ChannelBindings =
            serde_json::from_str(r#"{"critical": "ops-critical"}"#).unwrap();
        assert_eq!(bindings.critical, "ops-critical");
        assert_eq!(bindings.high, "healthcare-accreditation-high");
    }

    #[tokio::test]
    async fn test_logging_channel_accepts_everything() {
        let payload = NotificationPayload {
            subject: "s".to_string(),
            message: "m".to_string(),
            attributes: serde_json::json!({}),
        };
        assert!(LoggingNotificationChannel.publish("any", &payload).await.is_ok());
    }
}
