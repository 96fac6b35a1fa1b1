//! SMS notification channel
//!
//! SMS is permanently disabled at the platform level: no provider contract
//! exists, so the sender always reports `not_provided` and never transmits.
//! The channel stays in the set so queue rows and reports keep a consistent
//! four-channel shape.

use crate::channels::{ChannelInfo, ChannelSender, DeliveryOutcome, OutboundMessage};
use crate::error::Result;
use crate::types::ChannelKind;
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SmsSender;

impl SmsSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryOutcome> {
        debug!(
            recipient = message.recipient.id,
            "SMS channel is permanently disabled, reporting not_provided"
        );
        Ok(DeliveryOutcome::NotProvided)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            name: "SMS".to_string(),
            description: "Permanently disabled, no provider configured".to_string(),
            enabled: false,
            rate_limit_per_minute: None,
        }
    }
}
