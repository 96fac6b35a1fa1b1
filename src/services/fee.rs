//! Fee notification service
//!
//! Three paths produce fee notifications:
//! - the overdue scan: due-or-past fees still pending/partial get flipped to
//!   overdue and a queue row enqueued, latched by `overdue_notice_sent`;
//! - the upcoming-due scan: pending fees due within the lead window get a
//!   reminder row, latched by `reminder_sent`;
//! - receipts: recording a payment enqueues a receipt row synchronously.
//!
//! The two latch flags are what make repeated scheduler runs idempotent.

use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::metrics::NotificationMetrics;
use crate::store::{FeeStore, QueueStore};
use crate::templates::{format_amount_cfa, format_date, MessageKind, TemplateRegistry};
use crate::types::{
    AssignedFee, ChannelKind, Language, NewNotificationJob, NotificationJob, NotificationType,
    Payment,
};

/// Channels every fee notification goes out on. SMS is not part of the set:
/// the channel is permanently disabled platform-wide.
const FEE_CHANNELS: [ChannelKind; 3] =
    [ChannelKind::Email, ChannelKind::Whatsapp, ChannelKind::Pwa];

pub struct FeeNotificationService {
    fees: Arc<dyn FeeStore>,
    queue: Arc<dyn QueueStore>,
    templates: Arc<TemplateRegistry>,
    metrics: NotificationMetrics,
}

impl FeeNotificationService {
    pub fn new(
        fees: Arc<dyn FeeStore>,
        queue: Arc<dyn QueueStore>,
        templates: Arc<TemplateRegistry>,
        metrics: NotificationMetrics,
    ) -> Self {
        Self {
            fees,
            queue,
            templates,
            metrics,
        }
    }

    /// Overdue scan: every fee due on or before `today`, still pending or
    /// partial and not yet noticed, becomes overdue with exactly one queue
    /// row. Returns how many notices were enqueued.
    pub async fn scan_overdue(&self, today: NaiveDate) -> Result<u32> {
        let candidates = self.fees.overdue_candidates(today).await?;
        let mut enqueued = 0;

        for fee in candidates {
            let rendered = self.fee_message(MessageKind::Overdue, &fee)?;

            self.queue
                .enqueue(NewNotificationJob {
                    school_id: fee.school_id,
                    subject_entity_id: fee.id,
                    notification_type: NotificationType::Overdue,
                    title: rendered.subject,
                    message: rendered.body,
                    channels: FEE_CHANNELS.to_vec(),
                    scheduled_for: None,
                })
                .await?;
            self.fees.mark_overdue_notified(fee.id).await?;
            self.metrics.record_enqueued(NotificationType::Overdue);
            enqueued += 1;
        }

        if enqueued > 0 {
            info!(count = enqueued, "Overdue fee scan enqueued notices");
        }
        Ok(enqueued)
    }

    /// Upcoming-due scan: pending fees due within `lead_days` (but not yet
    /// due) get one reminder row each.
    pub async fn scan_upcoming(&self, today: NaiveDate, lead_days: i64) -> Result<u32> {
        let candidates = self.fees.reminder_candidates(today, lead_days).await?;
        let mut enqueued = 0;

        for fee in candidates {
            let rendered = self.fee_message(MessageKind::Reminder, &fee)?;

            self.queue
                .enqueue(NewNotificationJob {
                    school_id: fee.school_id,
                    subject_entity_id: fee.id,
                    notification_type: NotificationType::Reminder,
                    title: rendered.subject,
                    message: rendered.body,
                    channels: FEE_CHANNELS.to_vec(),
                    scheduled_for: None,
                })
                .await?;
            self.fees.mark_reminder_sent(fee.id).await?;
            self.metrics.record_enqueued(NotificationType::Reminder);
            enqueued += 1;
        }

        if enqueued > 0 {
            info!(count = enqueued, "Upcoming-due scan enqueued reminders");
        }
        Ok(enqueued)
    }

    /// Record a payment and enqueue the receipt notification.
    ///
    /// The fee mutation always wins: if the receipt row cannot be enqueued
    /// the payment is still recorded and the failure only logged, so the
    /// business transaction never depends on the notification layer.
    pub async fn record_payment(
        &self,
        payment: &Payment,
    ) -> Result<(AssignedFee, Option<NotificationJob>)> {
        validator::Validate::validate(payment)?;

        let fee = self.fees.apply_payment(payment).await?;

        let job = match self.receipt_message(&fee, payment) {
            Ok(rendered) => {
                match self
                    .queue
                    .enqueue(NewNotificationJob {
                        school_id: fee.school_id,
                        subject_entity_id: fee.id,
                        notification_type: NotificationType::Receipt,
                        title: rendered.subject,
                        message: rendered.body,
                        channels: FEE_CHANNELS.to_vec(),
                        scheduled_for: None,
                    })
                    .await
                {
                    Ok(job) => {
                        self.metrics.record_enqueued(NotificationType::Receipt);
                        Some(job)
                    }
                    Err(e) => {
                        warn!(fee_id = fee.id, "Payment recorded but receipt notification failed: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!(fee_id = fee.id, "Payment recorded but receipt rendering failed: {}", e);
                None
            }
        };

        Ok((fee, job))
    }

    fn fee_message(
        &self,
        kind: MessageKind,
        fee: &AssignedFee,
    ) -> Result<crate::templates::RenderedMessage> {
        let data = |language: Language| {
            json!({
                "student_name": fee.student_name,
                "fee_label": fee.label,
                "amount": format_amount_cfa(fee.amount_cfa, language),
                "balance": format_amount_cfa(fee.balance_cfa, language),
                "due_date": format_date(fee.due_date, language),
            })
        };

        self.templates
            .render_bilingual(kind, &data(Language::Fr), &data(Language::En))
    }

    fn receipt_message(
        &self,
        fee: &AssignedFee,
        payment: &Payment,
    ) -> Result<crate::templates::RenderedMessage> {
        let data = |language: Language| {
            json!({
                "student_name": fee.student_name,
                "fee_label": fee.label,
                "amount": format_amount_cfa(payment.amount_cfa, language),
                "method": payment.method.label(language),
                "receipt_number": payment.receipt_number,
            })
        };

        self.templates
            .render_bilingual(MessageKind::Receipt, &data(Language::Fr), &data(Language::En))
    }
}
