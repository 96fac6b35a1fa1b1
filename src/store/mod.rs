//! Persistence seams for the notification subsystem
//!
//! Three collaborator traits cover the shared mutable state: the queue table
//! (plus in-app notification rows), the assigned-fee table, and the guardian
//! directory. The service is wired against the traits, so the Postgres
//! backend, the redis-cached directory, and the in-memory backend used in
//! tests and credential-less deployments are interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    AssignedFee, NewNotificationJob, NotificationJob, NotificationType, Payment, Recipient,
};

pub mod cache;
pub mod memory;
pub mod postgres;

pub use cache::CachedRecipientDirectory;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Per-channel delivery booleans recorded on a drained row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryFlags {
    pub email_sent: bool,
    pub whatsapp_sent: bool,
    pub pwa_sent: bool,
}

impl DeliveryFlags {
    pub fn any(&self) -> bool {
        self.email_sent || self.whatsapp_sent || self.pwa_sent
    }
}

/// An in-app notification row, what the PWA channel writes and the web
/// client's panel reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAppNotification {
    pub id: Uuid,
    pub school_id: i64,
    pub recipient_id: i64,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// The notification queue table. Rows are append-only: status flips and
/// delivery flags are the only mutations, nothing deletes.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new pending row.
    async fn enqueue(&self, job: NewNotificationJob) -> Result<NotificationJob>;

    /// Claim up to `limit` due rows and return them as `in_progress`.
    ///
    /// Due means: pending with `scheduled_for` null or past, or
    /// `in_progress` with a lease older than `lease_timeout` (an abandoned
    /// claim from a crashed drain). Claiming increments `attempts`.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease_timeout: Duration,
    ) -> Result<Vec<NotificationJob>>;

    /// Terminal success: at least one channel delivered.
    async fn mark_sent(
        &self,
        id: Uuid,
        flags: DeliveryFlags,
        sent_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()>;

    /// All channels failed but the row still has attempts left: back to
    /// pending with a backoff `scheduled_for`.
    async fn mark_retry(&self, id: Uuid, next_attempt_at: DateTime<Utc>, error: &str)
        -> Result<()>;

    /// Terminal failure.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()>;

    /// Insert an in-app notification row (the PWA channel's delivery).
    async fn record_in_app(
        &self,
        school_id: i64,
        recipient_id: i64,
        title: &str,
        body: &str,
    ) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<Option<NotificationJob>>;

    /// Rows for one subject entity and type, oldest first. Used by the debug
    /// surface and by the idempotence checks in tests.
    async fn jobs_for_entity(
        &self,
        subject_entity_id: i64,
        notification_type: NotificationType,
    ) -> Result<Vec<NotificationJob>>;

    /// Row counts per status for the stats endpoint.
    async fn status_counts(&self) -> Result<HashMap<String, u64>>;
}

/// The assigned-fee table with the two idempotency-guard flags.
#[async_trait]
pub trait FeeStore: Send + Sync {
    async fn insert_fee(&self, fee: AssignedFee) -> Result<()>;

    async fn get_fee(&self, fee_id: i64) -> Result<Option<AssignedFee>>;

    /// Fees due on or before `today`, still pending or partial, whose
    /// overdue notice has not gone out.
    async fn overdue_candidates(&self, today: NaiveDate) -> Result<Vec<AssignedFee>>;

    /// Flip a fee to overdue and latch `overdue_notice_sent`.
    async fn mark_overdue_notified(&self, fee_id: i64) -> Result<()>;

    /// Pending fees due within the next `lead_days` days (exclusive of
    /// today) whose reminder has not gone out.
    async fn reminder_candidates(&self, today: NaiveDate, lead_days: i64)
        -> Result<Vec<AssignedFee>>;

    /// Latch `reminder_sent`.
    async fn mark_reminder_sent(&self, fee_id: i64) -> Result<()>;

    /// Apply a payment: reduce the balance, flip to paid at zero, partial
    /// otherwise. Returns the updated fee.
    async fn apply_payment(&self, payment: &Payment) -> Result<AssignedFee>;
}

/// Resolves the guardians to notify for a student. In production this is a
/// lookup into the platform's user tables; tests seed it directly.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn guardians_of(&self, student_id: i64) -> Result<Vec<Recipient>>;

    async fn add_guardian(&self, student_id: i64, recipient: Recipient) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_flags_any() {
        assert!(!DeliveryFlags::default().any());
        assert!(DeliveryFlags {
            email_sent: true,
            ..Default::default()
        }
        .any());
        assert!(DeliveryFlags {
            pwa_sent: true,
            ..Default::default()
        }
        .any());
    }
}
