//! Polling scheduler
//!
//! The single recurring background task. After a warm-up delay it ticks on a
//! fixed interval and runs, in sequence: drain the pending queue (claim up
//! to a page of due rows, deliver each across its channel set), then the
//! overdue and upcoming-due fee scans that feed the queue for the next tick.
//!
//! Draining claims rows (`pending → in_progress` with a lease) before any
//! external send, so overlapping cycles and crashed drains never double-send
//! more than the claimed page. A row whose channels all failed retries with
//! exponential backoff until its attempts run out.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};

use crate::channels::{ChannelSet, OutboundMessage};
use crate::config::{RetryConfig, SchedulerConfig};
use crate::error::{NotificationError, Result};
use crate::metrics::NotificationMetrics;
use crate::services::FeeNotificationService;
use crate::store::{DeliveryFlags, FeeStore, QueueStore, RecipientDirectory};
use crate::types::{ChannelKind, JobStatus, NotificationJob, NotificationType};

/// Outcome of draining one row, mostly for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Sent,
    Retried,
    Failed,
}

#[derive(Clone)]
pub struct PollingScheduler {
    queue: Arc<dyn QueueStore>,
    fees: Arc<dyn FeeStore>,
    directory: Arc<dyn RecipientDirectory>,
    channels: Arc<ChannelSet>,
    fee_service: Arc<FeeNotificationService>,
    config: SchedulerConfig,
    retry: RetryConfig,
    metrics: NotificationMetrics,
    is_running: Arc<RwLock<bool>>,
    shutdown_tx: Arc<RwLock<Option<mpsc::Sender<()>>>>,
    task_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl PollingScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn QueueStore>,
        fees: Arc<dyn FeeStore>,
        directory: Arc<dyn RecipientDirectory>,
        channels: Arc<ChannelSet>,
        fee_service: Arc<FeeNotificationService>,
        config: SchedulerConfig,
        retry: RetryConfig,
        metrics: NotificationMetrics,
    ) -> Self {
        Self {
            queue,
            fees,
            directory,
            channels,
            fee_service,
            config,
            retry,
            metrics,
            is_running: Arc::new(RwLock::new(false)),
            shutdown_tx: Arc::new(RwLock::new(None)),
            task_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the background loop: warm-up delay, then one cycle per tick.
    pub async fn start(&self) -> Result<()> {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Ok(());
        }

        info!(
            warmup_seconds = self.config.warmup_delay_seconds,
            interval_seconds = self.config.poll_interval_seconds,
            "Starting polling scheduler"
        );

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let scheduler = self.clone();
        let warmup = Duration::from_secs(self.config.warmup_delay_seconds);
        let period = Duration::from_secs(self.config.poll_interval_seconds.max(1));

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = sleep(warmup) => {}
                _ = shutdown_rx.recv() => {
                    info!("Scheduler shutting down during warm-up");
                    return;
                }
            }

            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.run_cycle().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler loop shutting down");
                        break;
                    }
                }
            }
        });

        *self.task_handle.write().await = Some(handle);
        *is_running = true;
        Ok(())
    }

    /// Stop the background loop.
    pub async fn stop(&self) -> Result<()> {
        let mut is_running = self.is_running.write().await;
        if !*is_running {
            return Ok(());
        }

        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.task_handle.write().await.take() {
            handle.abort();
        }

        *is_running = false;
        info!("Polling scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// One full cycle: drain the queue, then both fee scans. Every step is
    /// error-isolated; a failing scan never prevents the next tick.
    pub async fn run_cycle(&self) {
        let drained = self.drain_queue().await;
        if let Err(e) = drained {
            error!("Queue drain failed: {}", e);
        }

        let today = Utc::now().date_naive();
        if let Err(e) = self.fee_service.scan_overdue(today).await {
            error!("Overdue fee scan failed: {}", e);
        }
        if let Err(e) = self
            .fee_service
            .scan_upcoming(today, self.config.reminder_lead_days)
            .await
        {
            error!("Upcoming-due fee scan failed: {}", e);
        }

        self.metrics.record_drain_cycle();

        if let Ok(counts) = self.queue.status_counts().await {
            for status in ["pending", "in_progress", "sent", "failed"] {
                let size = counts.get(status).copied().unwrap_or(0);
                self.metrics.record_queue_size(status, size as i64);
            }
        }
    }

    /// Claim and deliver one page of due rows.
    async fn drain_queue(&self) -> Result<u32> {
        let now = Utc::now();
        let jobs = self
            .queue
            .claim_due(
                now,
                self.config.batch_size,
                chrono::Duration::minutes(self.config.lease_timeout_minutes),
            )
            .await?;

        if jobs.is_empty() {
            return Ok(0);
        }

        info!(count = jobs.len(), "Draining pending notifications");

        let mut drained = 0;
        for job in jobs {
            match self.drain_job(&job).await {
                Ok(_) => drained += 1,
                Err(e) => {
                    // Row stays in_progress; the lease timeout makes it
                    // claimable again next cycle.
                    error!(job_id = %job.id, "Drain failed: {}", e);
                }
            }
        }

        Ok(drained)
    }

    /// Deliver one row across its declared channels and record the outcome.
    /// At-least-one-channel success counts as delivered.
    pub async fn drain_job(&self, job: &NotificationJob) -> Result<DrainOutcome> {
        debug_assert_eq!(job.status, JobStatus::InProgress);

        let recipients = self.resolve_recipients(job).await?;
        if recipients.is_empty() {
            self.queue
                .mark_failed(job.id, "no recipients resolved for subject entity")
                .await?;
            return Ok(DrainOutcome::Failed);
        }

        let mut flags = DeliveryFlags::default();
        let mut errors: Vec<String> = Vec::new();
        let mut any_retryable = false;

        for recipient in &recipients {
            let message = OutboundMessage::plain(
                recipient.clone(),
                job.title.clone(),
                job.message.clone(),
                job.notification_type,
                job.school_id,
                job.subject_entity_id,
            );

            for channel in &job.channels {
                let started = Instant::now();
                match self.channels.deliver(*channel, &message).await {
                    Ok(outcome) => {
                        if outcome.is_sent() {
                            match channel {
                                ChannelKind::Email => flags.email_sent = true,
                                ChannelKind::Whatsapp => flags.whatsapp_sent = true,
                                ChannelKind::Pwa => flags.pwa_sent = true,
                                ChannelKind::Sms => {}
                            }
                        }
                        self.metrics.record_delivery(
                            *channel,
                            outcome.as_str(),
                            started.elapsed().as_secs_f64(),
                        );
                    }
                    Err(e) => {
                        any_retryable |= e.is_retryable();
                        errors.push(format!("{}: {}", channel, e));
                        self.metrics.record_delivery(
                            *channel,
                            "failed",
                            started.elapsed().as_secs_f64(),
                        );
                    }
                }
            }
        }

        let error_summary = if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        };

        if flags.any() {
            self.queue
                .mark_sent(job.id, flags, Utc::now(), error_summary.as_deref())
                .await?;
            return Ok(DrainOutcome::Sent);
        }

        // Nothing went out. Retry only makes sense when a transport actually
        // failed; a row whose every channel is unaddressable stays failed.
        if any_retryable && job.attempts < self.retry.max_attempts {
            let delay = self.retry_delay(job.attempts);
            let next_attempt = Utc::now() + chrono::Duration::seconds(delay as i64);
            self.queue
                .mark_retry(
                    job.id,
                    next_attempt,
                    error_summary.as_deref().unwrap_or("delivery failed"),
                )
                .await?;
            warn!(job_id = %job.id, attempts = job.attempts, delay_seconds = delay, "Delivery failed, retry scheduled");
            return Ok(DrainOutcome::Retried);
        }

        self.queue
            .mark_failed(
                job.id,
                error_summary
                    .as_deref()
                    .unwrap_or("no channel could deliver"),
            )
            .await?;
        Ok(DrainOutcome::Failed)
    }

    /// Fee-subject rows resolve through the fee's student; everything else
    /// treats the subject entity as the student directly.
    async fn resolve_recipients(
        &self,
        job: &NotificationJob,
    ) -> Result<Vec<crate::types::Recipient>> {
        let student_id = match job.notification_type {
            NotificationType::Reminder
            | NotificationType::Overdue
            | NotificationType::Receipt => {
                let fee = self
                    .fees
                    .get_fee(job.subject_entity_id)
                    .await?
                    .ok_or_else(|| NotificationError::not_found("assigned fee"))?;
                fee.student_id
            }
            _ => job.subject_entity_id,
        };

        self.directory.guardians_of(student_id).await
    }

    /// Exponential backoff with a cap, in seconds.
    fn retry_delay(&self, attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(16) as i32;
        let delay = (self.retry.initial_delay_seconds as f64)
            * self.retry.backoff_multiplier.powi(exponent);
        (delay as u64).min(self.retry.max_delay_seconds)
    }
}

impl std::fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("batch_size", &self.config.batch_size)
            .field("poll_interval_seconds", &self.config.poll_interval_seconds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{EmailSender, PwaSender, SmsSender, WhatsappSender};
    use crate::config::PlatformConfig;
    use crate::store::MemoryStore;
    use crate::templates::TemplateRegistry;
    use crate::types::{
        AssignedFee, FeeStatus, Language, NewNotificationJob, Recipient,
    };
    use chrono::{Duration as ChronoDuration, NaiveDate};

    fn test_metrics() -> NotificationMetrics {
        NotificationMetrics::new(&crate::config::MetricsConfig {
            enabled: true,
            endpoint: "/metrics".to_string(),
            namespace: format!("scheduler_test_{}", uuid::Uuid::new_v4().simple()),
            histogram_buckets: vec![0.1, 1.0],
        })
        .unwrap()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        scheduler: PollingScheduler,
    }

    fn harness_with(mut mutate: impl FnMut(&mut PlatformConfig)) -> Harness {
        let mut config = PlatformConfig::default();
        // Offline defaults: only the in-app channel can deliver.
        config.email.enabled = false;
        config.whatsapp.phone_number_id = String::new();
        config.whatsapp.access_token = String::new();
        mutate(&mut config);

        let store = Arc::new(MemoryStore::new());
        let metrics = test_metrics();
        let templates = Arc::new(TemplateRegistry::new().unwrap());

        let email = Arc::new(EmailSender::new(&config.email, &config.support).unwrap());
        let sms = Arc::new(SmsSender::new());
        let whatsapp = Arc::new(WhatsappSender::new(&config.whatsapp).unwrap());
        let pwa = Arc::new(PwaSender::new(
            config.pwa.enabled,
            store.clone() as Arc<dyn QueueStore>,
        ));
        let channels = Arc::new(ChannelSet::new(&config, email, sms, whatsapp, pwa));

        let fee_service = Arc::new(FeeNotificationService::new(
            store.clone(),
            store.clone(),
            templates,
            metrics.clone(),
        ));

        let scheduler = PollingScheduler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            channels,
            fee_service,
            config.scheduler.clone(),
            config.retry.clone(),
            metrics,
        );

        Harness { store, scheduler }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn guardian(id: i64) -> Recipient {
        Recipient {
            id,
            display_name: format!("Guardian {}", id),
            email: Some(format!("guardian{}@example.cm", id)),
            phone_e164: None,
            whatsapp_opt_in: false,
            preferred_language: Language::Fr,
        }
    }

    fn fee(id: i64, student_id: i64, due: NaiveDate) -> AssignedFee {
        AssignedFee {
            id,
            school_id: 1,
            student_id,
            student_name: "Amina Njoya".to_string(),
            label: "Frais de scolarité".to_string(),
            amount_cfa: 50000,
            balance_cfa: 50000,
            due_date: due,
            status: FeeStatus::Pending,
            overdue_notice_sent: false,
            reminder_sent: false,
        }
    }

    #[tokio::test]
    async fn test_drain_marks_row_sent_on_any_channel_success() {
        let h = harness();
        h.store.add_guardian(7, guardian(1)).await.unwrap();

        let job = h
            .store
            .enqueue(NewNotificationJob {
                school_id: 1,
                subject_entity_id: 7,
                notification_type: NotificationType::Announcement,
                title: "Titre".to_string(),
                message: "Corps".to_string(),
                channels: vec![ChannelKind::Email, ChannelKind::Whatsapp, ChannelKind::Pwa],
                scheduled_for: None,
            })
            .await
            .unwrap();

        h.scheduler.run_cycle().await;

        let row = h.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Sent);
        assert!(row.pwa_sent);
        assert!(!row.email_sent);
        assert!(!row.whatsapp_sent);
        assert!(row.sent_at.is_some());
        assert_eq!(h.store.in_app_count().await, 1);
    }

    #[tokio::test]
    async fn test_unaddressable_row_fails_without_retry() {
        let h = harness_with(|config| {
            config.pwa.enabled = false;
        });
        h.store.add_guardian(7, guardian(1)).await.unwrap();

        let job = h
            .store
            .enqueue(NewNotificationJob {
                school_id: 1,
                subject_entity_id: 7,
                notification_type: NotificationType::Announcement,
                title: "Titre".to_string(),
                message: "Corps".to_string(),
                channels: vec![ChannelKind::Email, ChannelKind::Pwa],
                scheduled_for: None,
            })
            .await
            .unwrap();

        h.scheduler.run_cycle().await;

        let row = h.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.attempts, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_schedules_retry_with_backoff() {
        let h = harness_with(|config| {
            // Email hard-fails: enabled, but nothing listens on the port.
            config.email.enabled = true;
            config.email.smtp_host = "127.0.0.1".to_string();
            config.email.smtp_port = 9;
            config.email.timeout_seconds = 2;
            config.pwa.enabled = false;
        });
        h.store.add_guardian(7, guardian(1)).await.unwrap();

        let job = h
            .store
            .enqueue(NewNotificationJob {
                school_id: 1,
                subject_entity_id: 7,
                notification_type: NotificationType::Announcement,
                title: "Titre".to_string(),
                message: "Corps".to_string(),
                channels: vec![ChannelKind::Email],
                scheduled_for: None,
            })
            .await
            .unwrap();

        h.scheduler.run_cycle().await;

        let row = h.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Pending);
        assert!(row.scheduled_for.unwrap() > Utc::now());
        assert_eq!(row.attempts, 1);
        assert!(row.error_message.as_deref().unwrap().contains("email"));

        // The rescheduled row is not due yet, so the next cycle skips it.
        h.scheduler.run_cycle().await;
        let row = h.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(row.attempts, 1);
    }

    #[tokio::test]
    async fn test_retries_exhaust_into_terminal_failure() {
        let h = harness_with(|config| {
            config.email.enabled = true;
            config.email.smtp_host = "127.0.0.1".to_string();
            config.email.smtp_port = 9;
            config.email.timeout_seconds = 2;
            config.pwa.enabled = false;
            config.retry.max_attempts = 1;
        });
        h.store.add_guardian(7, guardian(1)).await.unwrap();

        let job = h
            .store
            .enqueue(NewNotificationJob {
                school_id: 1,
                subject_entity_id: 7,
                notification_type: NotificationType::Announcement,
                title: "Titre".to_string(),
                message: "Corps".to_string(),
                channels: vec![ChannelKind::Email],
                scheduled_for: None,
            })
            .await
            .unwrap();

        h.scheduler.run_cycle().await;

        let row = h.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_fee_lifecycle_across_two_cycles() {
        let h = harness();
        let today = Utc::now().date_naive();
        h.store.add_guardian(100, guardian(1)).await.unwrap();
        h.store
            .insert_fee(fee(1, 100, today - ChronoDuration::days(1)))
            .await
            .unwrap();

        // Cycle 1: the overdue scan enqueues the notice.
        h.scheduler.run_cycle().await;
        let jobs = h
            .store
            .jobs_for_entity(1, NotificationType::Overdue)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Pending);

        // Cycle 2: the drain delivers it through the in-app channel.
        h.scheduler.run_cycle().await;
        let jobs = h
            .store
            .jobs_for_entity(1, NotificationType::Overdue)
            .await
            .unwrap();
        assert_eq!(jobs[0].status, JobStatus::Sent);
        assert!(jobs[0].pwa_sent);

        // No second overdue notice ever appears.
        h.scheduler.run_cycle().await;
        let jobs = h
            .store
            .jobs_for_entity(1, NotificationType::Overdue)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_delay_backs_off_and_caps() {
        let h = harness();
        let d1 = h.scheduler.retry_delay(1);
        let d2 = h.scheduler.retry_delay(2);
        let d3 = h.scheduler.retry_delay(3);

        assert!(d2 > d1);
        assert!(d3 > d2);
        assert!(h.scheduler.retry_delay(30) <= h.scheduler.retry.max_delay_seconds);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let h = harness();
        assert!(!h.scheduler.is_running().await);

        h.scheduler.start().await.unwrap();
        assert!(h.scheduler.is_running().await);
        // Idempotent start.
        h.scheduler.start().await.unwrap();

        h.scheduler.stop().await.unwrap();
        assert!(!h.scheduler.is_running().await);
    }
}
