//! WhatsApp notification channel
//!
//! Two delivery modes, matching how the platform uses WhatsApp:
//! - direct sends through the Business Cloud API (`/{phone_number_id}/messages`)
//!   using one of seven fixed template types, each with a required data shape;
//! - click-to-chat `wa.me` link generation for embedding in emails, which
//!   renders the same localized template without sending anything.
//!
//! Missing credentials leave the channel silently unconfigured: sends report
//! `not_provided` rather than erroring.

use crate::channels::{ChannelInfo, ChannelSender, DeliveryOutcome, OutboundMessage};
use crate::config::WhatsappConfig;
use crate::error::{NotificationError, Result};
use crate::types::{ChannelKind, Language};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// The seven fixed template types the Business API integration supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WhatsappTemplate {
    Absence,
    Grade,
    Payment,
    Message,
    Geolocation,
    OnlineClass,
    Timetable,
}

impl WhatsappTemplate {
    pub const ALL: [WhatsappTemplate; 7] = [
        WhatsappTemplate::Absence,
        WhatsappTemplate::Grade,
        WhatsappTemplate::Payment,
        WhatsappTemplate::Message,
        WhatsappTemplate::Geolocation,
        WhatsappTemplate::OnlineClass,
        WhatsappTemplate::Timetable,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Absence => "absence",
            Self::Grade => "grade",
            Self::Payment => "payment",
            Self::Message => "message",
            Self::Geolocation => "geolocation",
            Self::OnlineClass => "online_class",
            Self::Timetable => "timetable",
        }
    }

    /// Data fields this template requires.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Absence => &["student_name", "status_label", "date"],
            Self::Grade => &["student_name", "subject", "grade", "max_grade"],
            Self::Payment => &["student_name", "amount", "method", "receipt_number"],
            Self::Message => &["sender_name", "body"],
            Self::Geolocation => &["student_name", "zone", "alert"],
            Self::OnlineClass => &["student_name", "course", "starts_at", "join_url"],
            Self::Timetable => &["class_name", "change_summary", "effective_date"],
        }
    }

    /// Reject payloads that do not carry this template's data shape.
    pub fn validate(&self, data: &Value) -> Result<()> {
        for field in self.required_fields() {
            let present = data
                .get(field)
                .map(|v| !v.is_null() && v.as_str() != Some(""))
                .unwrap_or(false);
            if !present {
                return Err(NotificationError::validation(
                    *field,
                    format!("required by whatsapp template '{}'", self.name()),
                ));
            }
        }
        Ok(())
    }

    /// Render the localized message body for this template.
    pub fn render(&self, data: &Value, language: Language) -> Result<String> {
        self.validate(data)?;
        let get = |field: &str| -> String {
            match data.get(field) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            }
        };

        let body = match (self, language) {
            (Self::Absence, Language::Fr) => format!(
                "EDUCAFRIC — {} a été marqué(e) {} le {}.",
                get("student_name"),
                get("status_label"),
                get("date")
            ),
            (Self::Absence, Language::En) => format!(
                "EDUCAFRIC — {} was marked {} on {}.",
                get("student_name"),
                get("status_label"),
                get("date")
            ),
            (Self::Grade, Language::Fr) => format!(
                "EDUCAFRIC — Nouvelle note pour {}: {}/{} en {}.",
                get("student_name"),
                get("grade"),
                get("max_grade"),
                get("subject")
            ),
            (Self::Grade, Language::En) => format!(
                "EDUCAFRIC — New grade for {}: {}/{} in {}.",
                get("student_name"),
                get("grade"),
                get("max_grade"),
                get("subject")
            ),
            (Self::Payment, Language::Fr) => format!(
                "EDUCAFRIC — Paiement de {} reçu ({}). Reçu N° {} pour {}.",
                get("amount"),
                get("method"),
                get("receipt_number"),
                get("student_name")
            ),
            (Self::Payment, Language::En) => format!(
                "EDUCAFRIC — Payment of {} received ({}). Receipt No {} for {}.",
                get("amount"),
                get("method"),
                get("receipt_number"),
                get("student_name")
            ),
            (Self::Message, Language::Fr) => {
                format!("EDUCAFRIC — Message de {}: {}", get("sender_name"), get("body"))
            }
            (Self::Message, Language::En) => {
                format!("EDUCAFRIC — Message from {}: {}", get("sender_name"), get("body"))
            }
            (Self::Geolocation, Language::Fr) => format!(
                "EDUCAFRIC — Alerte localisation: {} ({}), zone {}.",
                get("alert"),
                get("student_name"),
                get("zone")
            ),
            (Self::Geolocation, Language::En) => format!(
                "EDUCAFRIC — Location alert: {} ({}), zone {}.",
                get("alert"),
                get("student_name"),
                get("zone")
            ),
            (Self::OnlineClass, Language::Fr) => format!(
                "EDUCAFRIC — Cours en ligne {} pour {} à {}. Lien: {}",
                get("course"),
                get("student_name"),
                get("starts_at"),
                get("join_url")
            ),
            (Self::OnlineClass, Language::En) => format!(
                "EDUCAFRIC — Online class {} for {} at {}. Link: {}",
                get("course"),
                get("student_name"),
                get("starts_at"),
                get("join_url")
            ),
            (Self::Timetable, Language::Fr) => format!(
                "EDUCAFRIC — Emploi du temps modifié pour {} à partir du {}: {}",
                get("class_name"),
                get("effective_date"),
                get("change_summary")
            ),
            (Self::Timetable, Language::En) => format!(
                "EDUCAFRIC — Timetable updated for {} effective {}: {}",
                get("class_name"),
                get("effective_date"),
                get("change_summary")
            ),
        };

        Ok(body)
    }
}

#[derive(Default)]
struct WhatsappCounters {
    sent: AtomicU64,
    failed: AtomicU64,
    links_generated: AtomicU64,
}

/// Counter snapshot surfaced at the stats debug endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WhatsappStats {
    pub sent: u64,
    pub failed: u64,
    pub links_generated: u64,
    pub configured: bool,
}

/// WhatsApp Business Cloud API sender
#[derive(Clone)]
pub struct WhatsappSender {
    config: WhatsappConfig,
    client: reqwest::Client,
    counters: Arc<WhatsappCounters>,
}

impl WhatsappSender {
    pub fn new(config: &WhatsappConfig) -> Result<Self> {
        if config.is_configured() {
            info!("Initializing WhatsApp channel");
        } else {
            warn!("WhatsApp credentials absent, channel will report not_provided");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                NotificationError::config(format!("Failed to build WhatsApp HTTP client: {}", e))
            })?;

        Ok(Self {
            config: config.clone(),
            client,
            counters: Arc::new(WhatsappCounters::default()),
        })
    }

    /// Direct send of a fixed template to one E.164 number.
    pub async fn send_template(
        &self,
        to: &str,
        template: WhatsappTemplate,
        data: &Value,
        language: Language,
    ) -> Result<DeliveryOutcome> {
        if !self.config.enabled {
            return Ok(DeliveryOutcome::Disabled);
        }
        if !self.config.is_configured() {
            return Ok(DeliveryOutcome::NotProvided);
        }

        let body = template.render(data, language)?;
        self.post_text(to, &body).await?;
        Ok(DeliveryOutcome::Sent)
    }

    /// Build a `wa.me` click-to-chat link with a prefilled localized message.
    /// This renders a template but never touches the Business API; it exists
    /// so emails can embed a conversation starter.
    pub fn click_to_chat_link(
        &self,
        phone_e164: &str,
        template: WhatsappTemplate,
        data: &Value,
        language: Language,
    ) -> Result<String> {
        let text = template.render(data, language)?;
        let number = phone_e164.trim_start_matches('+');

        let url = reqwest::Url::parse_with_params(
            &format!("https://wa.me/{}", number),
            &[("text", text.as_str())],
        )
        .map_err(|e| NotificationError::whatsapp(format!("invalid wa.me link: {}", e)))?;

        self.counters.links_generated.fetch_add(1, Ordering::Relaxed);
        Ok(url.to_string())
    }

    pub fn stats(&self) -> WhatsappStats {
        WhatsappStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            links_generated: self.counters.links_generated.load(Ordering::Relaxed),
            configured: self.config.is_configured(),
        }
    }

    async fn post_text(&self, to: &str, body: &str) -> Result<()> {
        let url = format!(
            "{}/{}/messages",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.phone_number_id
        );

        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": body },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                NotificationError::from(e)
            })?;

        if response.status().is_success() {
            self.counters.sent.fetch_add(1, Ordering::Relaxed);
            info!(to = %to, "WhatsApp message accepted");
            Ok(())
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            error!(to = %to, %status, "WhatsApp API rejected message");
            Err(NotificationError::whatsapp(format!(
                "API returned {}: {}",
                status, detail
            )))
        }
    }
}

#[async_trait]
impl ChannelSender for WhatsappSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Whatsapp
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryOutcome> {
        if !self.config.enabled {
            return Ok(DeliveryOutcome::Disabled);
        }
        if !self.config.is_configured() {
            return Ok(DeliveryOutcome::NotProvided);
        }

        let phone = match &message.recipient.phone_e164 {
            Some(phone) if message.recipient.whatsapp_opt_in => phone.clone(),
            _ => return Ok(DeliveryOutcome::NotProvided),
        };

        let body = format!("{}\n{}", message.subject, message.body);
        self.post_text(&phone, &body).await?;
        Ok(DeliveryOutcome::Sent)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.config.is_configured())
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            name: "WhatsApp".to_string(),
            description: "WhatsApp Business Cloud API notifications".to_string(),
            enabled: self.config.is_configured(),
            rate_limit_per_minute: Some(self.config.rate_limit_per_minute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NotificationType, Recipient};
    use serde_json::json;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn configured(api_base_url: String) -> WhatsappConfig {
        WhatsappConfig {
            enabled: true,
            phone_number_id: "123456789".to_string(),
            access_token: "test-token".to_string(),
            api_base_url,
            timeout_seconds: 5,
            rate_limit_per_minute: 60,
        }
    }

    fn unconfigured() -> WhatsappConfig {
        WhatsappConfig {
            enabled: true,
            phone_number_id: String::new(),
            access_token: String::new(),
            api_base_url: "https://graph.facebook.com/v18.0".to_string(),
            timeout_seconds: 5,
            rate_limit_per_minute: 60,
        }
    }

    fn opted_in_recipient() -> Recipient {
        Recipient {
            id: 3,
            display_name: "M. Biya".to_string(),
            email: None,
            phone_e164: Some("+237677998877".to_string()),
            whatsapp_opt_in: true,
            preferred_language: Language::Fr,
        }
    }

    fn absence_data() -> Value {
        json!({
            "student_name": "Amina Njoya",
            "status_label": "absent(e)",
            "date": "12/05/2026",
        })
    }

    #[test]
    fn test_template_validation_rejects_missing_fields() {
        let incomplete = json!({ "student_name": "Amina" });
        assert!(WhatsappTemplate::Absence.validate(&incomplete).is_err());
        assert!(WhatsappTemplate::Absence.validate(&absence_data()).is_ok());
    }

    #[test]
    fn test_every_template_declares_required_fields() {
        for template in WhatsappTemplate::ALL {
            assert!(!template.required_fields().is_empty(), "{:?}", template);
        }
    }

    #[test]
    fn test_template_rendering_is_localized() {
        let fr = WhatsappTemplate::Absence
            .render(&absence_data(), Language::Fr)
            .unwrap();
        let en = WhatsappTemplate::Absence
            .render(&absence_data(), Language::En)
            .unwrap();

        assert!(fr.contains("a été marqué(e)"));
        assert!(en.contains("was marked"));
        assert!(fr.contains("Amina Njoya"));
    }

    #[test]
    fn test_click_to_chat_link_builds_wa_me_url() {
        let sender = WhatsappSender::new(&unconfigured()).unwrap();
        let link = sender
            .click_to_chat_link(
                "+237690112233",
                WhatsappTemplate::Absence,
                &absence_data(),
                Language::Fr,
            )
            .unwrap();

        assert!(link.starts_with("https://wa.me/237690112233?text="));
        assert!(!link.contains('+'));
        assert_eq!(sender.stats().links_generated, 1);
    }

    #[tokio::test]
    async fn test_unconfigured_channel_reports_not_provided() {
        let sender = WhatsappSender::new(&unconfigured()).unwrap();
        let message = OutboundMessage::plain(
            opted_in_recipient(),
            "Subject",
            "Body",
            NotificationType::Absence,
            1,
            3,
        );

        let outcome = sender.send(&message).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::NotProvided);
    }

    #[tokio::test]
    async fn test_missing_opt_in_reports_not_provided() {
        let server = MockServer::start().await;
        let sender = WhatsappSender::new(&configured(server.uri())).unwrap();

        let mut recipient = opted_in_recipient();
        recipient.whatsapp_opt_in = false;
        let message = OutboundMessage::plain(
            recipient,
            "Subject",
            "Body",
            NotificationType::Absence,
            1,
            3,
        );

        let outcome = sender.send(&message).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::NotProvided);
    }

    #[tokio::test]
    async fn test_direct_send_hits_messages_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123456789/messages"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "wamid.test" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WhatsappSender::new(&configured(server.uri())).unwrap();
        let outcome = sender
            .send_template(
                "+237677998877",
                WhatsappTemplate::Absence,
                &absence_data(),
                Language::Fr,
            )
            .await
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Sent);
        assert_eq!(sender.stats().sent, 1);
        assert_eq!(sender.stats().failed, 0);
    }

    #[tokio::test]
    async fn test_api_rejection_surfaces_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123456789/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let sender = WhatsappSender::new(&configured(server.uri())).unwrap();
        let result = sender
            .send_template(
                "+237677998877",
                WhatsappTemplate::Absence,
                &absence_data(),
                Language::Fr,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(sender.stats().failed, 1);
    }
}
