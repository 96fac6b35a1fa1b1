//! In-memory backend
//!
//! Backs the service when no `DATABASE_URL` is configured (local runs, the
//! synthetic test endpoints) and every test that exercises queue semantics.
//! Mirrors the Postgres backend's observable behaviour exactly; the
//! scheduler and services cannot tell them apart.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::store::{
    DeliveryFlags, FeeStore, InAppNotification, QueueStore, RecipientDirectory,
};
use crate::types::{
    AssignedFee, FeeStatus, JobStatus, NewNotificationJob, NotificationJob, NotificationType,
    Payment, Recipient,
};

#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<Uuid, NotificationJob>>,
    fees: RwLock<HashMap<i64, AssignedFee>>,
    guardians: RwLock<HashMap<i64, Vec<Recipient>>>,
    in_app: RwLock<Vec<InAppNotification>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of in-app rows recorded; test helper.
    pub async fn in_app_count(&self) -> usize {
        self.in_app.read().await.len()
    }

    /// Snapshot of in-app rows, newest last; test helper.
    pub async fn in_app_rows(&self) -> Vec<InAppNotification> {
        self.in_app.read().await.clone()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, job: NewNotificationJob) -> Result<NotificationJob> {
        let row = NotificationJob {
            id: Uuid::new_v4(),
            school_id: job.school_id,
            subject_entity_id: job.subject_entity_id,
            notification_type: job.notification_type,
            title: job.title,
            message: job.message,
            channels: job.channels,
            status: JobStatus::Pending,
            scheduled_for: job.scheduled_for,
            claimed_at: None,
            sent_at: None,
            attempts: 0,
            email_sent: false,
            whatsapp_sent: false,
            pwa_sent: false,
            error_message: None,
            created_at: Utc::now(),
        };

        self.jobs.write().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease_timeout: Duration,
    ) -> Result<Vec<NotificationJob>> {
        let mut jobs = self.jobs.write().await;

        let mut due: Vec<Uuid> = jobs
            .values()
            .filter(|job| match job.status {
                JobStatus::Pending => job
                    .scheduled_for
                    .map(|at| at <= now)
                    .unwrap_or(true),
                JobStatus::InProgress => job
                    .claimed_at
                    .map(|at| at + lease_timeout < now)
                    .unwrap_or(true),
                _ => false,
            })
            .map(|job| (job.created_at, job.id))
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        due.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::InProgress;
                job.claimed_at = Some(now);
                job.attempts += 1;
                claimed.push(job.clone());
            }
        }

        Ok(claimed)
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        flags: DeliveryFlags,
        sent_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| NotificationError::not_found("notification job"))?;

        job.status = JobStatus::Sent;
        job.sent_at = Some(sent_at);
        job.email_sent = flags.email_sent;
        job.whatsapp_sent = flags.whatsapp_sent;
        job.pwa_sent = flags.pwa_sent;
        job.error_message = error.map(str::to_string);
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| NotificationError::not_found("notification job"))?;

        job.status = JobStatus::Pending;
        job.scheduled_for = Some(next_attempt_at);
        job.claimed_at = None;
        job.error_message = Some(error.to_string());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| NotificationError::not_found("notification job"))?;

        job.status = JobStatus::Failed;
        job.error_message = Some(error.to_string());
        Ok(())
    }

    async fn record_in_app(
        &self,
        school_id: i64,
        recipient_id: i64,
        title: &str,
        body: &str,
    ) -> Result<()> {
        self.in_app.write().await.push(InAppNotification {
            id: Uuid::new_v4(),
            school_id,
            recipient_id,
            title: title.to_string(),
            body: body.to_string(),
            read: false,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<NotificationJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn jobs_for_entity(
        &self,
        subject_entity_id: i64,
        notification_type: NotificationType,
    ) -> Result<Vec<NotificationJob>> {
        let jobs = self.jobs.read().await;
        let mut rows: Vec<NotificationJob> = jobs
            .values()
            .filter(|job| {
                job.subject_entity_id == subject_entity_id
                    && job.notification_type == notification_type
            })
            .cloned()
            .collect();
        rows.sort_by_key(|job| job.created_at);
        Ok(rows)
    }

    async fn status_counts(&self) -> Result<HashMap<String, u64>> {
        let jobs = self.jobs.read().await;
        let mut counts = HashMap::new();
        for job in jobs.values() {
            *counts.entry(job.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl FeeStore for MemoryStore {
    async fn insert_fee(&self, fee: AssignedFee) -> Result<()> {
        self.fees.write().await.insert(fee.id, fee);
        Ok(())
    }

    async fn get_fee(&self, fee_id: i64) -> Result<Option<AssignedFee>> {
        Ok(self.fees.read().await.get(&fee_id).cloned())
    }

    async fn overdue_candidates(&self, today: NaiveDate) -> Result<Vec<AssignedFee>> {
        let fees = self.fees.read().await;
        let mut rows: Vec<AssignedFee> = fees
            .values()
            .filter(|fee| {
                fee.due_date <= today
                    && matches!(fee.status, FeeStatus::Pending | FeeStatus::Partial)
                    && !fee.overdue_notice_sent
            })
            .cloned()
            .collect();
        rows.sort_by_key(|fee| fee.id);
        Ok(rows)
    }

    async fn mark_overdue_notified(&self, fee_id: i64) -> Result<()> {
        let mut fees = self.fees.write().await;
        let fee = fees
            .get_mut(&fee_id)
            .ok_or_else(|| NotificationError::not_found("assigned fee"))?;

        fee.status = FeeStatus::Overdue;
        fee.overdue_notice_sent = true;
        Ok(())
    }

    async fn reminder_candidates(
        &self,
        today: NaiveDate,
        lead_days: i64,
    ) -> Result<Vec<AssignedFee>> {
        let horizon = today + Duration::days(lead_days);
        let fees = self.fees.read().await;
        let mut rows: Vec<AssignedFee> = fees
            .values()
            .filter(|fee| {
                fee.status == FeeStatus::Pending
                    && !fee.reminder_sent
                    && fee.due_date > today
                    && fee.due_date <= horizon
            })
            .cloned()
            .collect();
        rows.sort_by_key(|fee| fee.id);
        Ok(rows)
    }

    async fn mark_reminder_sent(&self, fee_id: i64) -> Result<()> {
        let mut fees = self.fees.write().await;
        let fee = fees
            .get_mut(&fee_id)
            .ok_or_else(|| NotificationError::not_found("assigned fee"))?;

        fee.reminder_sent = true;
        Ok(())
    }

    async fn apply_payment(&self, payment: &Payment) -> Result<AssignedFee> {
        let mut fees = self.fees.write().await;
        let fee = fees
            .get_mut(&payment.fee_id)
            .ok_or_else(|| NotificationError::not_found("assigned fee"))?;

        fee.balance_cfa = (fee.balance_cfa - payment.amount_cfa).max(0);
        fee.status = if fee.balance_cfa == 0 {
            FeeStatus::Paid
        } else if fee.status == FeeStatus::Overdue {
            FeeStatus::Overdue
        } else {
            FeeStatus::Partial
        };
        Ok(fee.clone())
    }
}

#[async_trait]
impl RecipientDirectory for MemoryStore {
    async fn guardians_of(&self, student_id: i64) -> Result<Vec<Recipient>> {
        Ok(self
            .guardians
            .read()
            .await
            .get(&student_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_guardian(&self, student_id: i64, recipient: Recipient) -> Result<()> {
        self.guardians
            .write()
            .await
            .entry(student_id)
            .or_default()
            .push(recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelKind, Language};

    fn new_job(entity: i64) -> NewNotificationJob {
        NewNotificationJob {
            school_id: 1,
            subject_entity_id: entity,
            notification_type: NotificationType::Reminder,
            title: "Rappel".to_string(),
            message: "corps".to_string(),
            channels: vec![ChannelKind::Email, ChannelKind::Whatsapp, ChannelKind::Pwa],
            scheduled_for: None,
        }
    }

    fn fee(id: i64, due: NaiveDate, status: FeeStatus) -> AssignedFee {
        AssignedFee {
            id,
            school_id: 1,
            student_id: 100 + id,
            student_name: "Test Student".to_string(),
            label: "Frais de scolarité".to_string(),
            amount_cfa: 50000,
            balance_cfa: 50000,
            due_date: due,
            status,
            overdue_notice_sent: false,
            reminder_sent: false,
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_claim() {
        let store = MemoryStore::new();
        let job = store.enqueue(new_job(1)).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);

        let claimed = store
            .claim_due(Utc::now(), 50, Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, JobStatus::InProgress);
        assert_eq!(claimed[0].attempts, 1);

        // A second claim sees nothing while the lease is fresh.
        let again = store
            .claim_due(Utc::now(), 50, Duration::minutes(15))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let store = MemoryStore::new();
        let job = store.enqueue(new_job(1)).await.unwrap();

        let first_claim_time = Utc::now();
        store
            .claim_due(first_claim_time, 50, Duration::minutes(15))
            .await
            .unwrap();

        let later = first_claim_time + Duration::minutes(20);
        let reclaimed = store
            .claim_due(later, 50, Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, job.id);
        assert_eq!(reclaimed[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_future_scheduled_rows_are_not_claimed() {
        let store = MemoryStore::new();
        let mut job = new_job(1);
        job.scheduled_for = Some(Utc::now() + Duration::hours(2));
        store.enqueue(job).await.unwrap();

        let claimed = store
            .claim_due(Utc::now(), 50, Duration::minutes(15))
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_batch_limit() {
        let store = MemoryStore::new();
        for i in 0..60 {
            store.enqueue(new_job(i)).await.unwrap();
        }

        let claimed = store
            .claim_due(Utc::now(), 50, Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 50);
    }

    #[tokio::test]
    async fn test_mark_sent_records_flags() {
        let store = MemoryStore::new();
        let job = store.enqueue(new_job(1)).await.unwrap();
        store
            .claim_due(Utc::now(), 50, Duration::minutes(15))
            .await
            .unwrap();

        let flags = DeliveryFlags {
            email_sent: true,
            whatsapp_sent: false,
            pwa_sent: true,
        };
        store
            .mark_sent(job.id, flags, Utc::now(), Some("whatsapp: API returned 500"))
            .await
            .unwrap();

        let row = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Sent);
        assert!(row.email_sent);
        assert!(!row.whatsapp_sent);
        assert!(row.pwa_sent);
        assert!(row.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_retry_reschedules() {
        let store = MemoryStore::new();
        let job = store.enqueue(new_job(1)).await.unwrap();
        store
            .claim_due(Utc::now(), 50, Duration::minutes(15))
            .await
            .unwrap();

        let next = Utc::now() + Duration::minutes(1);
        store.mark_retry(job.id, next, "smtp timeout").await.unwrap();

        let row = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Pending);
        assert_eq!(row.scheduled_for, Some(next));
        assert!(row.claimed_at.is_none());
        assert_eq!(row.attempts, 1);
    }

    #[tokio::test]
    async fn test_overdue_candidates_filtering() {
        let store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2026, 9, 10).unwrap();

        store
            .insert_fee(fee(1, today - Duration::days(1), FeeStatus::Pending))
            .await
            .unwrap();
        store
            .insert_fee(fee(2, today, FeeStatus::Partial))
            .await
            .unwrap();
        store
            .insert_fee(fee(3, today + Duration::days(1), FeeStatus::Pending))
            .await
            .unwrap();
        let mut already_notified = fee(4, today - Duration::days(2), FeeStatus::Pending);
        already_notified.overdue_notice_sent = true;
        store.insert_fee(already_notified).await.unwrap();

        let candidates = store.overdue_candidates(today).await.unwrap();
        let ids: Vec<i64> = candidates.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_reminder_candidates_window() {
        let store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2026, 9, 10).unwrap();

        store
            .insert_fee(fee(1, today + Duration::days(2), FeeStatus::Pending))
            .await
            .unwrap();
        store
            .insert_fee(fee(2, today + Duration::days(4), FeeStatus::Pending))
            .await
            .unwrap();
        store
            .insert_fee(fee(3, today, FeeStatus::Pending))
            .await
            .unwrap();

        let candidates = store.reminder_candidates(today, 3).await.unwrap();
        let ids: Vec<i64> = candidates.iter().map(|f| f.id).collect();
        // Fee 2 is beyond the window; fee 3 is due today and belongs to the
        // overdue scan instead.
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn test_apply_payment_flips_status() {
        let store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2026, 9, 10).unwrap();
        store
            .insert_fee(fee(1, today, FeeStatus::Pending))
            .await
            .unwrap();

        let partial = store
            .apply_payment(&Payment {
                fee_id: 1,
                amount_cfa: 20000,
                method: crate::types::PaymentMethod::Cash,
                receipt_number: "RCP-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(partial.status, FeeStatus::Partial);
        assert_eq!(partial.balance_cfa, 30000);

        let paid = store
            .apply_payment(&Payment {
                fee_id: 1,
                amount_cfa: 30000,
                method: crate::types::PaymentMethod::Cash,
                receipt_number: "RCP-2".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(paid.status, FeeStatus::Paid);
        assert_eq!(paid.balance_cfa, 0);
    }

    #[tokio::test]
    async fn test_guardian_directory() {
        let store = MemoryStore::new();
        assert!(store.guardians_of(5).await.unwrap().is_empty());

        store
            .add_guardian(
                5,
                Recipient {
                    id: 1,
                    display_name: "Mme Ngo".to_string(),
                    email: Some("ngo@example.cm".to_string()),
                    phone_e164: None,
                    whatsapp_opt_in: false,
                    preferred_language: Language::Fr,
                },
            )
            .await
            .unwrap();

        let guardians = store.guardians_of(5).await.unwrap();
        assert_eq!(guardians.len(), 1);
        assert_eq!(guardians[0].display_name, "Mme Ngo");
    }
}
