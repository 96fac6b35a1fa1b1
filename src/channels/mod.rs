//! Notification channels module
//!
//! This module contains implementations for all notification delivery
//! channels:
//! - Email channel (SMTP)
//! - WhatsApp channel (Business Cloud API + click-to-chat links)
//! - SMS channel (permanently disabled at the platform level)
//! - PWA channel (in-app notification rows)

use crate::config::PlatformConfig;
use crate::error::{NotificationError, Result};
use crate::types::{ChannelKind, NotificationType, Recipient};
use async_trait::async_trait;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

pub mod email;
pub mod pwa;
pub mod sms;
pub mod whatsapp;

pub use email::EmailSender;
pub use pwa::PwaSender;
pub use sms::SmsSender;
pub use whatsapp::WhatsappSender;

/// Result of one channel attempt that did not error at the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The provider accepted the message.
    Sent,
    /// Recipient unaddressable on this channel (missing address, missing
    /// opt-in) or the channel has no credentials configured.
    NotProvided,
    /// The channel is switched off in configuration.
    Disabled,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::NotProvided => "not_provided",
            Self::Disabled => "disabled",
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// One addressed message on its way through a channel sender.
///
/// The subject/body are already rendered; `detail_rows`, `accent_color`, and
/// `whatsapp_link` only matter to the email composer's branded HTML.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub recipient: Recipient,
    pub subject: String,
    pub body: String,
    pub notification_type: NotificationType,
    pub school_id: i64,
    pub subject_entity_id: i64,
    pub detail_rows: Vec<(String, String)>,
    pub accent_color: Option<&'static str>,
    pub whatsapp_link: Option<String>,
}

impl OutboundMessage {
    /// Plain message with no email embellishments.
    pub fn plain(
        recipient: Recipient,
        subject: impl Into<String>,
        body: impl Into<String>,
        notification_type: NotificationType,
        school_id: i64,
        subject_entity_id: i64,
    ) -> Self {
        Self {
            recipient,
            subject: subject.into(),
            body: body.into(),
            notification_type,
            school_id,
            subject_entity_id,
            detail_rows: Vec::new(),
            accent_color: None,
            whatsapp_link: None,
        }
    }
}

/// Information about a notification channel
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub rate_limit_per_minute: Option<u32>,
}

/// Trait that all notification channels must implement
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Which channel this sender serves
    fn kind(&self) -> ChannelKind;

    /// Attempt delivery to the message's recipient.
    ///
    /// Transport failures come back as `Err`; an unaddressable recipient or
    /// an unconfigured/disabled channel is a successful call with a
    /// non-`Sent` outcome.
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryOutcome>;

    /// Check if the channel is healthy and ready to send notifications
    async fn health_check(&self) -> Result<bool>;

    /// Get channel-specific delivery information
    fn info(&self) -> ChannelInfo;
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// The full set of channel senders plus per-channel rate limiting.
///
/// Every delivery in the service funnels through [`ChannelSet::deliver`] so
/// quota enforcement lives in exactly one place.
pub struct ChannelSet {
    email: Arc<EmailSender>,
    sms: Arc<SmsSender>,
    whatsapp: Arc<WhatsappSender>,
    pwa: Arc<PwaSender>,
    rate_limit_enabled: bool,
    limiters: DashMap<ChannelKind, Arc<DirectRateLimiter>>,
    limits: std::collections::HashMap<ChannelKind, u32>,
}

impl ChannelSet {
    pub fn new(
        config: &PlatformConfig,
        email: Arc<EmailSender>,
        sms: Arc<SmsSender>,
        whatsapp: Arc<WhatsappSender>,
        pwa: Arc<PwaSender>,
    ) -> Self {
        let mut limits = std::collections::HashMap::new();
        for channel in ChannelKind::ALL {
            limits.insert(channel, config.channel_rate_limit(channel));
        }

        Self {
            email,
            sms,
            whatsapp,
            pwa,
            rate_limit_enabled: config.rate_limit.enabled,
            limiters: DashMap::new(),
            limits,
        }
    }

    pub fn sender(&self, kind: ChannelKind) -> &dyn ChannelSender {
        match kind {
            ChannelKind::Email => self.email.as_ref(),
            ChannelKind::Sms => self.sms.as_ref(),
            ChannelKind::Whatsapp => self.whatsapp.as_ref(),
            ChannelKind::Pwa => self.pwa.as_ref(),
        }
    }

    pub fn whatsapp(&self) -> &WhatsappSender {
        &self.whatsapp
    }

    /// Deliver through one channel, enforcing its per-minute quota first.
    pub async fn deliver(
        &self,
        kind: ChannelKind,
        message: &OutboundMessage,
    ) -> Result<DeliveryOutcome> {
        if self.rate_limit_enabled {
            let limiter = self.limiter_for(kind);
            if limiter.check().is_err() {
                return Err(NotificationError::rate_limit(format!(
                    "rate limit exceeded for {} channel",
                    kind
                )));
            }
        }

        self.sender(kind).send(message).await
    }

    /// Deliver a fixed WhatsApp template to one recipient, enforcing the
    /// WhatsApp quota. The recipient must have a stored number and an
    /// explicit opt-in, otherwise the attempt reports `not_provided`.
    pub async fn deliver_whatsapp_template(
        &self,
        recipient: &crate::types::Recipient,
        template: whatsapp::WhatsappTemplate,
        data: &serde_json::Value,
        language: crate::types::Language,
    ) -> Result<DeliveryOutcome> {
        if self.rate_limit_enabled {
            let limiter = self.limiter_for(ChannelKind::Whatsapp);
            if limiter.check().is_err() {
                return Err(NotificationError::rate_limit(
                    "rate limit exceeded for whatsapp channel",
                ));
            }
        }

        let phone = match &recipient.phone_e164 {
            Some(phone) if recipient.whatsapp_opt_in => phone.clone(),
            _ => return Ok(DeliveryOutcome::NotProvided),
        };

        self.whatsapp
            .send_template(&phone, template, data, language)
            .await
    }

    pub fn infos(&self) -> Vec<ChannelInfo> {
        ChannelKind::ALL
            .iter()
            .map(|kind| self.sender(*kind).info())
            .collect()
    }

    fn limiter_for(&self, kind: ChannelKind) -> Arc<DirectRateLimiter> {
        if let Some(limiter) = self.limiters.get(&kind) {
            return limiter.clone();
        }

        let per_minute = self.limits.get(&kind).copied().unwrap_or(100).max(1);
        let quota = Quota::per_minute(
            NonZeroU32::new(per_minute).unwrap_or_else(|| NonZeroU32::new(1).unwrap()),
        );
        let limiter = Arc::new(RateLimiter::direct(quota));
        self.limiters.insert(kind, limiter.clone());
        limiter
    }
}

impl std::fmt::Debug for ChannelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSet")
            .field("rate_limit_enabled", &self.rate_limit_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Language;

    fn test_recipient() -> Recipient {
        Recipient {
            id: 7,
            display_name: "Mme Fotso".to_string(),
            email: Some("fotso@example.cm".to_string()),
            phone_e164: Some("+237690112233".to_string()),
            whatsapp_opt_in: true,
            preferred_language: Language::Fr,
        }
    }

    #[test]
    fn test_outcome_strings() {
        assert_eq!(DeliveryOutcome::Sent.as_str(), "sent");
        assert_eq!(DeliveryOutcome::NotProvided.as_str(), "not_provided");
        assert_eq!(DeliveryOutcome::Disabled.as_str(), "disabled");
        assert!(DeliveryOutcome::Sent.is_sent());
        assert!(!DeliveryOutcome::Disabled.is_sent());
    }

    #[test]
    fn test_plain_message_has_no_email_extras() {
        let message = OutboundMessage::plain(
            test_recipient(),
            "Subject",
            "Body",
            NotificationType::Announcement,
            1,
            7,
        );
        assert!(message.detail_rows.is_empty());
        assert!(message.accent_color.is_none());
        assert!(message.whatsapp_link.is_none());
    }
}
