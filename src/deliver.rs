use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::types::Result;

/// Formatted message handed to the destination collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub title: String,
    pub body: Option<String>,
    pub url: String,
    pub source_label: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Health alert for the operator channel.
#[derive(Debug, Clone, Serialize)]
pub struct HealthAlert {
    pub source_name: String,
    pub error: String,
    pub failures: u32,
    pub threshold: u32,
    /// True when the source has been auto-disabled; re-enabling requires
    /// operator action.
    pub disabled: bool,
}

/// Destination collaborator: anything that can carry a message to a
/// channel. A raised error means the item was not delivered and must not
/// be recorded.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn send(&self, channel: &str, message: &OutboundMessage) -> Result<()>;

    /// Whether the destination is connected and ready; the scheduler
    /// waits for this before the first sweep.
    async fn ready(&self) -> bool {
        true
    }

    /// Operator notification about source health.
    async fn alert(&self, owner_id: i64, alert: &HealthAlert) -> Result<()>;
}

/// Console destination for the CLI: messages and alerts go to the log.
pub struct ConsoleDeliverer;

#[async_trait]
impl Deliver for ConsoleDeliverer {
    async fn send(&self, channel: &str, message: &OutboundMessage) -> Result<()> {
        info!(
            "[{}] {} | {} | {}",
            channel,
            message.source_label,
            message.title,
            message.url
        );
        Ok(())
    }

    async fn alert(&self, owner_id: i64, alert: &HealthAlert) -> Result<()> {
        warn!(
            "owner {}: source '{}' failing ({}/{}): {}{}",
            owner_id,
            alert.source_name,
            alert.failures,
            alert.threshold,
            alert.error,
            if alert.disabled { " [auto-disabled]" } else { "" }
        );
        Ok(())
    }
}
