//! In-app (PWA) notification channel
//!
//! Delivery here is a write, not a transmission: the sender records an
//! in-app notification row that the web client's notification panel reads.
//! It succeeds whenever the underlying store accepts the insert.

use crate::channels::{ChannelInfo, ChannelSender, DeliveryOutcome, OutboundMessage};
use crate::error::Result;
use crate::store::QueueStore;
use crate::types::ChannelKind;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct PwaSender {
    enabled: bool,
    store: Arc<dyn QueueStore>,
}

impl PwaSender {
    pub fn new(enabled: bool, store: Arc<dyn QueueStore>) -> Self {
        Self { enabled, store }
    }
}

#[async_trait]
impl ChannelSender for PwaSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Pwa
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryOutcome> {
        if !self.enabled {
            return Ok(DeliveryOutcome::Disabled);
        }

        self.store
            .record_in_app(
                message.school_id,
                message.recipient.id,
                &message.subject,
                &message.body,
            )
            .await?;

        info!(
            recipient = message.recipient.id,
            notification_type = %message.notification_type,
            "In-app notification recorded"
        );
        Ok(DeliveryOutcome::Sent)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.enabled)
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            name: "PWA".to_string(),
            description: "In-app notification records".to_string(),
            enabled: self.enabled,
            rate_limit_per_minute: None,
        }
    }
}
