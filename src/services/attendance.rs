//! Attendance notification service
//!
//! Translates an attendance mark into guardian-addressed messages and
//! attempts delivery on all four channels independently: branded email
//! (status-colored detail table, optional WhatsApp click-to-chat button),
//! SMS (permanently disabled), WhatsApp (requires number + opt-in), and the
//! in-app record. A failure against one guardian never aborts delivery to
//! the others.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::channels::whatsapp::WhatsappTemplate;
use crate::channels::{ChannelSet, OutboundMessage};
use crate::dispatcher::EventHandler;
use crate::error::Result;
use crate::metrics::NotificationMetrics;
use crate::services::record_attempt;
use crate::store::RecipientDirectory;
use crate::templates::{
    attendance_status_color, attendance_status_label, format_date, MessageKind, TemplateRegistry,
};
use crate::types::{
    AttendanceEventData, ChannelKind, DispatchReport, Language, NotificationEvent,
    NotificationType,
};

pub struct AttendanceNotificationService {
    directory: Arc<dyn RecipientDirectory>,
    channels: Arc<ChannelSet>,
    templates: Arc<TemplateRegistry>,
    metrics: NotificationMetrics,
}

impl AttendanceNotificationService {
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        channels: Arc<ChannelSet>,
        templates: Arc<TemplateRegistry>,
        metrics: NotificationMetrics,
    ) -> Self {
        Self {
            directory,
            channels,
            templates,
            metrics,
        }
    }

    /// Notify every guardian of the student about an attendance mark.
    pub async fn notify(&self, school_id: i64, data: &AttendanceEventData) -> DispatchReport {
        let recipients = match self.directory.guardians_of(data.student_id).await {
            Ok(recipients) => recipients,
            Err(e) => return DispatchReport::failure(format!("guardian lookup failed: {}", e)),
        };

        if recipients.is_empty() {
            return DispatchReport {
                success: true,
                detail: Some("no guardians on file".to_string()),
                ..Default::default()
            };
        }

        let mut report = DispatchReport::default();

        for recipient in recipients {
            let language = recipient.preferred_language;
            let template_data = self.template_data(data, language);

            let rendered =
                match self
                    .templates
                    .render(MessageKind::Attendance, language, &template_data)
                {
                    Ok(rendered) => rendered,
                    Err(e) => {
                        report.errors.push(format!(
                            "template rendering failed for recipient {}: {}",
                            recipient.id, e
                        ));
                        continue;
                    }
                };

            // Click-to-chat button for the email, only when the guardian is
            // actually reachable over WhatsApp.
            let whatsapp_link = if recipient.whatsapp_addressable() {
                recipient.phone_e164.as_deref().and_then(|phone| {
                    self.channels
                        .whatsapp()
                        .click_to_chat_link(
                            phone,
                            WhatsappTemplate::Absence,
                            &template_data,
                            language,
                        )
                        .ok()
                })
            } else {
                None
            };

            let message = OutboundMessage {
                recipient: recipient.clone(),
                subject: rendered.subject,
                body: rendered.body,
                notification_type: NotificationType::Absence,
                school_id,
                subject_entity_id: data.student_id,
                detail_rows: self.detail_rows(data, language),
                accent_color: Some(attendance_status_color(data.status)),
                whatsapp_link,
            };

            for channel in ChannelKind::ALL {
                let started = Instant::now();
                let outcome = match channel {
                    ChannelKind::Whatsapp => {
                        self.channels
                            .deliver_whatsapp_template(
                                &recipient,
                                WhatsappTemplate::Absence,
                                &template_data,
                                language,
                            )
                            .await
                    }
                    other => self.channels.deliver(other, &message).await,
                };
                record_attempt(&self.metrics, &mut report, channel, outcome, started);
            }
        }

        report.success = report.errors.is_empty() || report.notifications_sent > 0;
        report
    }

    fn template_data(&self, data: &AttendanceEventData, language: Language) -> Value {
        json!({
            "student_name": data.student_name,
            "status_label": attendance_status_label(data.status, language),
            "date": format_date(data.date, language),
            "class_name": data.class_name,
            "notes": data.notes,
            "marked_by": data.marked_by,
        })
    }

    fn detail_rows(&self, data: &AttendanceEventData, language: Language) -> Vec<(String, String)> {
        let (student, status, date, class) = match language {
            Language::Fr => ("Élève", "Statut", "Date", "Classe"),
            Language::En => ("Student", "Status", "Date", "Class"),
        };

        vec![
            (student.to_string(), data.student_name.clone()),
            (
                status.to_string(),
                attendance_status_label(data.status, language).to_string(),
            ),
            (date.to_string(), format_date(data.date, language)),
            (class.to_string(), data.class_name.clone()),
        ]
    }
}

/// Dispatcher adapter for `EventType::Attendance`.
pub struct AttendanceEventHandler {
    service: Arc<AttendanceNotificationService>,
}

impl AttendanceEventHandler {
    pub fn new(service: Arc<AttendanceNotificationService>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl EventHandler for AttendanceEventHandler {
    async fn handle(&self, event: &NotificationEvent) -> Result<DispatchReport> {
        let payload: AttendanceEventData = serde_json::from_value(event.data.clone())?;
        validator::Validate::validate(&payload)?;
        Ok(self.service.notify(event.school_id, &payload).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{EmailSender, PwaSender, SmsSender, WhatsappSender};
    use crate::config::PlatformConfig;
    use crate::store::{MemoryStore, QueueStore};
    use crate::types::{AttendanceStatus, Recipient};
    use chrono::NaiveDate;

    fn test_metrics() -> NotificationMetrics {
        NotificationMetrics::new(&crate::config::MetricsConfig {
            enabled: true,
            endpoint: "/metrics".to_string(),
            namespace: format!("attendance_test_{}", uuid::Uuid::new_v4().simple()),
            histogram_buckets: vec![0.1, 1.0],
        })
        .unwrap()
    }

    /// Channel set with email disabled and WhatsApp unconfigured: only the
    /// in-app channel can actually deliver.
    fn offline_channels(store: Arc<MemoryStore>) -> Arc<ChannelSet> {
        let mut config = PlatformConfig::default();
        config.email.enabled = false;
        config.whatsapp.phone_number_id = String::new();
        config.whatsapp.access_token = String::new();

        build_channels(&config, store)
    }

    fn build_channels(config: &PlatformConfig, store: Arc<MemoryStore>) -> Arc<ChannelSet> {
        let email = Arc::new(EmailSender::new(&config.email, &config.support).unwrap());
        let sms = Arc::new(SmsSender::new());
        let whatsapp = Arc::new(WhatsappSender::new(&config.whatsapp).unwrap());
        let pwa = Arc::new(PwaSender::new(
            config.pwa.enabled,
            store as Arc<dyn QueueStore>,
        ));
        Arc::new(ChannelSet::new(config, email, sms, whatsapp, pwa))
    }

    fn service(
        store: Arc<MemoryStore>,
        channels: Arc<ChannelSet>,
    ) -> AttendanceNotificationService {
        AttendanceNotificationService::new(
            store,
            channels,
            Arc::new(TemplateRegistry::new().unwrap()),
            test_metrics(),
        )
    }

    fn mark(status: AttendanceStatus) -> AttendanceEventData {
        AttendanceEventData {
            student_id: 5,
            student_name: "Amina Njoya".to_string(),
            status,
            date: NaiveDate::from_ymd_opt(2026, 5, 12).unwrap(),
            class_name: "CM2 A".to_string(),
            notes: None,
            marked_by: "M. Kamga".to_string(),
        }
    }

    fn guardian(id: i64, language: Language) -> Recipient {
        Recipient {
            id,
            display_name: format!("Guardian {}", id),
            email: Some(format!("guardian{}@example.cm", id)),
            phone_e164: None,
            whatsapp_opt_in: false,
            preferred_language: language,
        }
    }

    #[tokio::test]
    async fn test_no_guardians_is_a_clean_skip() {
        let store = Arc::new(MemoryStore::new());
        let channels = offline_channels(store.clone());
        let service = service(store, channels);

        let report = service.notify(1, &mark(AttendanceStatus::Absent)).await;
        assert!(report.success);
        assert_eq!(report.notifications_sent, 0);
        assert_eq!(report.detail.as_deref(), Some("no guardians on file"));
    }

    #[tokio::test]
    async fn test_sms_is_never_sent() {
        let store = Arc::new(MemoryStore::new());
        store.add_guardian(5, guardian(1, Language::Fr)).await.unwrap();
        store.add_guardian(5, guardian(2, Language::En)).await.unwrap();

        let channels = offline_channels(store.clone());
        let service = service(store, channels);

        let report = service.notify(1, &mark(AttendanceStatus::Late)).await;

        let sms_entries: Vec<&String> = report
            .channels
            .iter()
            .filter(|c| c.starts_with("sms:"))
            .collect();
        assert_eq!(sms_entries.len(), 2);
        assert!(sms_entries.iter().all(|c| *c == "sms:not_provided"));
    }

    #[tokio::test]
    async fn test_channel_entries_bounded_by_recipients_times_four() {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=3 {
            store.add_guardian(5, guardian(id, Language::Fr)).await.unwrap();
        }

        let channels = offline_channels(store.clone());
        let service = service(store.clone(), channels);

        let report = service.notify(1, &mark(AttendanceStatus::Absent)).await;

        assert_eq!(report.channels.len(), 3 * 4);
        // Only the in-app channel can deliver in this configuration.
        assert_eq!(report.notifications_sent, 3);
        assert_eq!(store.in_app_count().await, 3);
    }

    #[tokio::test]
    async fn test_email_transport_failure_does_not_stop_other_channels() {
        let store = Arc::new(MemoryStore::new());
        store.add_guardian(5, guardian(1, Language::Fr)).await.unwrap();

        // Email enabled but pointing at a closed port: the SMTP connection
        // is refused and the channel fails hard.
        let mut config = PlatformConfig::default();
        config.email.enabled = true;
        config.email.smtp_host = "127.0.0.1".to_string();
        config.email.smtp_port = 9;
        config.email.smtp_use_tls = false;
        config.email.timeout_seconds = 2;
        config.whatsapp.phone_number_id = String::new();
        config.whatsapp.access_token = String::new();

        let channels = build_channels(&config, store.clone());
        let service = service(store.clone(), channels);

        let report = service.notify(1, &mark(AttendanceStatus::Absent)).await;

        assert!(report.channels.contains(&"email:failed".to_string()));
        assert!(!report.errors.is_empty());
        // The in-app delivery still happened, so the fan-out counts as a
        // success overall.
        assert!(report.channels.contains(&"pwa:sent".to_string()));
        assert!(report.success);
        assert_eq!(store.in_app_count().await, 1);
    }

    #[tokio::test]
    async fn test_bodies_are_localized_per_guardian() {
        let store = Arc::new(MemoryStore::new());
        store.add_guardian(5, guardian(1, Language::Fr)).await.unwrap();
        store.add_guardian(5, guardian(2, Language::En)).await.unwrap();

        let channels = offline_channels(store.clone());
        let service = service(store.clone(), channels);

        service.notify(1, &mark(AttendanceStatus::Absent)).await;

        let rows = store.in_app_rows().await;
        assert_eq!(rows.len(), 2);
        let bodies: Vec<&str> = rows.iter().map(|r| r.body.as_str()).collect();
        assert!(bodies.iter().any(|b| b.contains("a été marqué(e) absent(e)")));
        assert!(bodies.iter().any(|b| b.contains("was marked absent")));
    }
}
