//! Domain notification services
//!
//! Per-feature services that translate a domain occurrence into
//! recipient-addressed messages: attendance marks (immediate four-channel
//! fan-out) and fee lifecycle changes (queue rows drained by the scheduler).
//! The remaining event types share a generic guardian-alert path.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::channels::{ChannelSet, DeliveryOutcome, OutboundMessage};
use crate::channels::whatsapp::WhatsappTemplate;
use crate::dispatcher::EventHandler;
use crate::error::{NotificationError, Result};
use crate::metrics::NotificationMetrics;
use crate::store::RecipientDirectory;
use crate::templates::{
    format_amount_cfa, format_date, MessageKind, TemplateRegistry,
};
use crate::types::{
    ChannelKind, DispatchReport, DirectMessageEventData, EventType, GeolocationEventData,
    GradeEventData, Language, NotificationEvent, NotificationType, OnlineClassEventData,
    PaymentEventData, TimetableEventData,
};

pub mod attendance;
pub mod fee;

pub use attendance::AttendanceNotificationService;
pub use fee::FeeNotificationService;

/// Format a grade value without a trailing `.0` for whole numbers.
fn format_grade(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Shared fan-out used by the generic event handlers: resolve guardians,
/// render the localized message, attempt all four channels independently
/// per recipient. Per-recipient failures accumulate without aborting the
/// rest of the fan-out.
pub(crate) async fn notify_guardians(
    directory: &dyn RecipientDirectory,
    channels: &ChannelSet,
    templates: &TemplateRegistry,
    metrics: &NotificationMetrics,
    school_id: i64,
    student_id: i64,
    kind: MessageKind,
    notification_type: NotificationType,
    whatsapp_template: WhatsappTemplate,
    data_for: &(dyn Fn(Language) -> Value + Sync),
) -> DispatchReport {
    let recipients = match directory.guardians_of(student_id).await {
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
        let data = data_for(language);

        let rendered = match templates.render(kind, language, &data) {
            Ok(rendered) => rendered,
            Err(e) => {
                report.errors.push(format!(
                    "template rendering failed for recipient {}: {}",
                    recipient.id, e
                ));
                continue;
            }
        };

        let message = OutboundMessage::plain(
            recipient.clone(),
            rendered.subject,
            rendered.body,
            notification_type,
            school_id,
            student_id,
        );

        for channel in ChannelKind::ALL {
            let started = Instant::now();
            let outcome = match channel {
                ChannelKind::Whatsapp => {
                    channels
                        .deliver_whatsapp_template(&recipient, whatsapp_template, &data, language)
                        .await
                }
                other => channels.deliver(other, &message).await,
            };
            record_attempt(metrics, &mut report, channel, outcome, started);
        }
    }

    report.success = report.errors.is_empty() || report.notifications_sent > 0;
    report
}

/// Fold one channel attempt into the running report and metrics.
pub(crate) fn record_attempt(
    metrics: &NotificationMetrics,
    report: &mut DispatchReport,
    channel: ChannelKind,
    outcome: Result<DeliveryOutcome>,
    started: Instant,
) {
    let elapsed = started.elapsed().as_secs_f64();
    match outcome {
        Ok(outcome) => {
            if outcome.is_sent() {
                report.notifications_sent += 1;
            }
            report.channels.push(format!("{}:{}", channel, outcome.as_str()));
            metrics.record_delivery(channel, outcome.as_str(), elapsed);
        }
        Err(e) => {
            report.channels.push(format!("{}:failed", channel));
            report.errors.push(format!("{}: {}", channel, e));
            metrics.record_delivery(channel, "failed", elapsed);
        }
    }
}

/// Generic guardian-alert handler covering grades, payments, geolocation,
/// online classes, timetable changes, and direct messages. One instance per
/// event type goes into the dispatcher's handler map.
pub struct GuardianAlertHandler {
    directory: Arc<dyn RecipientDirectory>,
    channels: Arc<ChannelSet>,
    templates: Arc<TemplateRegistry>,
    metrics: NotificationMetrics,
    event_type: EventType,
}

impl GuardianAlertHandler {
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        channels: Arc<ChannelSet>,
        templates: Arc<TemplateRegistry>,
        metrics: NotificationMetrics,
        event_type: EventType,
    ) -> Self {
        Self {
            directory,
            channels,
            templates,
            metrics,
            event_type,
        }
    }

    /// Parse the event payload into (student id, message kind, whatsapp
    /// template, per-language data builder).
    #[allow(clippy::type_complexity)]
    fn parse(
        &self,
        data: &Value,
    ) -> Result<(
        i64,
        MessageKind,
        WhatsappTemplate,
        NotificationType,
        Box<dyn Fn(Language) -> Value + Send + Sync>,
    )> {
        match self.event_type {
            EventType::Grades => {
                let payload: GradeEventData = serde_json::from_value(data.clone())?;
                validator::Validate::validate(&payload)?;
                let student_id = payload.student_id;
                Ok((
                    student_id,
                    MessageKind::Grade,
                    WhatsappTemplate::Grade,
                    NotificationType::Grade,
                    Box::new(move |_language| {
                        json!({
                            "student_name": payload.student_name,
                            "subject": payload.subject,
                            "grade": format_grade(payload.grade),
                            "max_grade": format_grade(payload.max_grade),
                            "term": payload.term,
                        })
                    }),
                ))
            }
            EventType::Payments => {
                let payload: PaymentEventData = serde_json::from_value(data.clone())?;
                validator::Validate::validate(&payload)?;
                let student_id = payload.student_id;
                Ok((
                    student_id,
                    MessageKind::Receipt,
                    WhatsappTemplate::Payment,
                    NotificationType::Receipt,
                    Box::new(move |language| {
                        json!({
                            "student_name": payload.student_name,
                            "amount": format_amount_cfa(payload.amount_cfa, language),
                            "method": payload.method.label(language),
                            "receipt_number": payload.receipt_number,
                            "fee_label": payload.fee_label,
                        })
                    }),
                ))
            }
            EventType::Geolocation => {
                let payload: GeolocationEventData = serde_json::from_value(data.clone())?;
                validator::Validate::validate(&payload)?;
                let student_id = payload.student_id;
                Ok((
                    student_id,
                    MessageKind::Geolocation,
                    WhatsappTemplate::Geolocation,
                    NotificationType::Announcement,
                    Box::new(move |_language| {
                        json!({
                            "student_name": payload.student_name,
                            "zone": payload.zone,
                            "alert": payload.alert,
                        })
                    }),
                ))
            }
            EventType::OnlineClasses => {
                let payload: OnlineClassEventData = serde_json::from_value(data.clone())?;
                validator::Validate::validate(&payload)?;
                let student_id = payload.student_id;
                Ok((
                    student_id,
                    MessageKind::OnlineClass,
                    WhatsappTemplate::OnlineClass,
                    NotificationType::Announcement,
                    Box::new(move |language| {
                        let starts_at = match language {
                            Language::Fr => {
                                payload.starts_at.format("%d/%m/%Y %H:%M").to_string()
                            }
                            Language::En => {
                                payload.starts_at.format("%d %B %Y %H:%M").to_string()
                            }
                        };
                        json!({
                            "student_name": payload.student_name,
                            "course": payload.course,
                            "starts_at": starts_at,
                            "join_url": payload.join_url,
                        })
                    }),
                ))
            }
            EventType::Timetable => {
                let payload: TimetableEventData = serde_json::from_value(data.clone())?;
                validator::Validate::validate(&payload)?;
                let student_id = payload.student_id;
                Ok((
                    student_id,
                    MessageKind::Timetable,
                    WhatsappTemplate::Timetable,
                    NotificationType::Announcement,
                    Box::new(move |language| {
                        json!({
                            "class_name": payload.class_name,
                            "change_summary": payload.change_summary,
                            "effective_date": format_date(payload.effective_date, language),
                        })
                    }),
                ))
            }
            EventType::Messages => {
                let payload: DirectMessageEventData = serde_json::from_value(data.clone())?;
                validator::Validate::validate(&payload)?;
                let student_id = payload.student_id;
                Ok((
                    student_id,
                    MessageKind::DirectMessage,
                    WhatsappTemplate::Message,
                    NotificationType::Announcement,
                    Box::new(move |_language| {
                        json!({
                            "sender_name": payload.sender_name,
                            "body": payload.body,
                        })
                    }),
                ))
            }
            EventType::Attendance => Err(NotificationError::internal(
                "attendance events use the dedicated attendance handler",
            )),
        }
    }
}

#[async_trait::async_trait]
impl EventHandler for GuardianAlertHandler {
    async fn handle(&self, event: &NotificationEvent) -> Result<DispatchReport> {
        let (student_id, kind, whatsapp_template, notification_type, data_for) =
            self.parse(&event.data)?;

        if event.event_type != self.event_type {
            warn!(
                expected = %self.event_type,
                actual = %event.event_type,
                "Handler received mismatched event type"
            );
        }

        Ok(notify_guardians(
            self.directory.as_ref(),
            &self.channels,
            &self.templates,
            &self.metrics,
            event.school_id,
            student_id,
            kind,
            notification_type,
            whatsapp_template,
            data_for.as_ref(),
        )
        .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_grade_trims_whole_numbers() {
        assert_eq!(format_grade(16.0), "16");
        assert_eq!(format_grade(15.5), "15.5");
        assert_eq!(format_grade(20.0), "20");
    }
}
