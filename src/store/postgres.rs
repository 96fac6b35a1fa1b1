//! Postgres backend
//!
//! Runtime-checked sqlx queries over the three notification tables. The
//! connection is optional at startup: a missing or unreachable
//! `DATABASE_URL` logs a warning and the service degrades to the in-memory
//! backend instead of refusing to boot.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{NotificationError, Result};
use crate::store::{DeliveryFlags, FeeStore, QueueStore, RecipientDirectory};
use crate::types::{
    AssignedFee, Language, NewNotificationJob, NotificationJob, NotificationType, Payment,
    Recipient,
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and run pending migrations. Returns `None` (with a warning)
    /// when no URL is configured or the database is unreachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Option<Self>> {
        if config.postgres_url.is_empty() {
            return Ok(None);
        }

        let pool = match PgPoolOptions::new()
            .max_connections(config.max_pool_size)
            .min_connections(config.min_pool_size)
            .acquire_timeout(std::time::Duration::from_secs(
                config.connection_timeout_seconds,
            ))
            .idle_timeout(std::time::Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.postgres_url)
            .await
        {
            Ok(pool) => pool,
            Err(e) => {
                warn!("Failed to connect to PostgreSQL: {}", e);
                return Ok(None);
            }
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| NotificationError::database(format!("migration failed: {}", e)))?;

        info!("Connected to PostgreSQL");
        Ok(Some(Self { pool }))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    fn map_job(row: &PgRow) -> Result<NotificationJob> {
        let notification_type: String = row.try_get("notification_type")?;
        let status: String = row.try_get("status")?;
        let channels: Vec<String> = row.try_get("channels")?;
        let attempts: i32 = row.try_get("attempts")?;

        Ok(NotificationJob {
            id: row.try_get("id")?,
            school_id: row.try_get("school_id")?,
            subject_entity_id: row.try_get("subject_entity_id")?,
            notification_type: notification_type.parse()?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            channels: channels
                .iter()
                .map(|c| c.parse())
                .collect::<Result<Vec<_>>>()?,
            status: status.parse()?,
            scheduled_for: row.try_get("scheduled_for")?,
            claimed_at: row.try_get("claimed_at")?,
            sent_at: row.try_get("sent_at")?,
            attempts: attempts.max(0) as u32,
            email_sent: row.try_get("email_sent")?,
            whatsapp_sent: row.try_get("whatsapp_sent")?,
            pwa_sent: row.try_get("pwa_sent")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn map_fee(row: &PgRow) -> Result<AssignedFee> {
        let status: String = row.try_get("status")?;

        Ok(AssignedFee {
            id: row.try_get("id")?,
            school_id: row.try_get("school_id")?,
            student_id: row.try_get("student_id")?,
            student_name: row.try_get("student_name")?,
            label: row.try_get("label")?,
            amount_cfa: row.try_get("amount_cfa")?,
            balance_cfa: row.try_get("balance_cfa")?,
            due_date: row.try_get("due_date")?,
            status: status.parse()?,
            overdue_notice_sent: row.try_get("overdue_notice_sent")?,
            reminder_sent: row.try_get("reminder_sent")?,
        })
    }

    fn map_recipient(row: &PgRow) -> Result<Recipient> {
        let language: String = row.try_get("preferred_language")?;

        Ok(Recipient {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            email: row.try_get("email")?,
            phone_e164: row.try_get("phone_e164")?,
            whatsapp_opt_in: row.try_get("whatsapp_opt_in")?,
            preferred_language: match language.as_str() {
                "en" => Language::En,
                _ => Language::Fr,
            },
        })
    }
}

const JOB_COLUMNS: &str = "id, school_id, subject_entity_id, notification_type, title, message, \
     channels, status, scheduled_for, claimed_at, sent_at, attempts, email_sent, whatsapp_sent, \
     pwa_sent, error_message, created_at";

const FEE_COLUMNS: &str = "id, school_id, student_id, student_name, label, amount_cfa, \
     balance_cfa, due_date, status, overdue_notice_sent, reminder_sent";

#[async_trait]
impl QueueStore for PgStore {
    async fn enqueue(&self, job: NewNotificationJob) -> Result<NotificationJob> {
        let channels: Vec<String> = job.channels.iter().map(|c| c.to_string()).collect();

        let row = sqlx::query(&format!(
            "INSERT INTO notification_jobs \
             (id, school_id, subject_entity_id, notification_type, title, message, channels, \
              status, scheduled_for, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(job.school_id)
        .bind(job.subject_entity_id)
        .bind(job.notification_type.to_string())
        .bind(&job.title)
        .bind(&job.message)
        .bind(&channels)
        .bind(job.scheduled_for)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Self::map_job(&row)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease_timeout: Duration,
    ) -> Result<Vec<NotificationJob>> {
        let lease_cutoff = now - lease_timeout;

        let rows = sqlx::query(&format!(
            "UPDATE notification_jobs \
             SET status = 'in_progress', claimed_at = $1, attempts = attempts + 1 \
             WHERE id IN (\
                 SELECT id FROM notification_jobs \
                 WHERE (status = 'pending' AND (scheduled_for IS NULL OR scheduled_for <= $1)) \
                    OR (status = 'in_progress' AND claimed_at IS NOT NULL AND claimed_at <= $2) \
                 ORDER BY created_at \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED\
             ) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .bind(lease_cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_job).collect()
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        flags: DeliveryFlags,
        sent_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE notification_jobs \
             SET status = 'sent', sent_at = $2, email_sent = $3, whatsapp_sent = $4, \
                 pwa_sent = $5, error_message = $6 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(sent_at)
        .bind(flags.email_sent)
        .bind(flags.whatsapp_sent)
        .bind(flags.pwa_sent)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE notification_jobs \
             SET status = 'pending', scheduled_for = $2, claimed_at = NULL, error_message = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE notification_jobs SET status = 'failed', error_message = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_in_app(
        &self,
        school_id: i64,
        recipient_id: i64,
        title: &str,
        body: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO in_app_notifications (id, school_id, recipient_id, title, body, read, created_at) \
             VALUES ($1, $2, $3, $4, $5, FALSE, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(school_id)
        .bind(recipient_id)
        .bind(title)
        .bind(body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<NotificationJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM notification_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_job).transpose()
    }

    async fn jobs_for_entity(
        &self,
        subject_entity_id: i64,
        notification_type: NotificationType,
    ) -> Result<Vec<NotificationJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM notification_jobs \
             WHERE subject_entity_id = $1 AND notification_type = $2 \
             ORDER BY created_at"
        ))
        .bind(subject_entity_id)
        .bind(notification_type.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_job).collect()
    }

    async fn status_counts(&self) -> Result<HashMap<String, u64>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM notification_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(status, count.max(0) as u64);
        }
        Ok(counts)
    }
}

#[async_trait]
impl FeeStore for PgStore {
    async fn insert_fee(&self, fee: AssignedFee) -> Result<()> {
        sqlx::query(
            "INSERT INTO assigned_fees \
             (id, school_id, student_id, student_name, label, amount_cfa, balance_cfa, due_date, \
              status, overdue_notice_sent, reminder_sent) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(fee.id)
        .bind(fee.school_id)
        .bind(fee.student_id)
        .bind(&fee.student_name)
        .bind(&fee.label)
        .bind(fee.amount_cfa)
        .bind(fee.balance_cfa)
        .bind(fee.due_date)
        .bind(fee.status.to_string())
        .bind(fee.overdue_notice_sent)
        .bind(fee.reminder_sent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_fee(&self, fee_id: i64) -> Result<Option<AssignedFee>> {
        let row = sqlx::query(&format!(
            "SELECT {FEE_COLUMNS} FROM assigned_fees WHERE id = $1"
        ))
        .bind(fee_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_fee).transpose()
    }

    async fn overdue_candidates(&self, today: NaiveDate) -> Result<Vec<AssignedFee>> {
        let rows = sqlx::query(&format!(
            "SELECT {FEE_COLUMNS} FROM assigned_fees \
             WHERE due_date <= $1 AND status IN ('pending', 'partial') \
               AND overdue_notice_sent = FALSE \
             ORDER BY id"
        ))
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_fee).collect()
    }

    async fn mark_overdue_notified(&self, fee_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE assigned_fees SET status = 'overdue', overdue_notice_sent = TRUE WHERE id = $1",
        )
        .bind(fee_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reminder_candidates(
        &self,
        today: NaiveDate,
        lead_days: i64,
    ) -> Result<Vec<AssignedFee>> {
        let horizon = today + Duration::days(lead_days);

        let rows = sqlx::query(&format!(
            "SELECT {FEE_COLUMNS} FROM assigned_fees \
             WHERE status = 'pending' AND reminder_sent = FALSE \
               AND due_date > $1 AND due_date <= $2 \
             ORDER BY id"
        ))
        .bind(today)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_fee).collect()
    }

    async fn mark_reminder_sent(&self, fee_id: i64) -> Result<()> {
        sqlx::query("UPDATE assigned_fees SET reminder_sent = TRUE WHERE id = $1")
            .bind(fee_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn apply_payment(&self, payment: &Payment) -> Result<AssignedFee> {
        let row = sqlx::query(&format!(
            "UPDATE assigned_fees \
             SET balance_cfa = GREATEST(balance_cfa - $2, 0), \
                 status = CASE \
                     WHEN balance_cfa - $2 <= 0 THEN 'paid' \
                     WHEN status = 'overdue' THEN 'overdue' \
                     ELSE 'partial' \
                 END \
             WHERE id = $1 \
             RETURNING {FEE_COLUMNS}"
        ))
        .bind(payment.fee_id)
        .bind(payment.amount_cfa)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NotificationError::not_found("assigned fee"))?;

        Self::map_fee(&row)
    }
}

#[async_trait]
impl RecipientDirectory for PgStore {
    async fn guardians_of(&self, student_id: i64) -> Result<Vec<Recipient>> {
        let rows = sqlx::query(
            "SELECT id, display_name, email, phone_e164, whatsapp_opt_in, preferred_language \
             FROM guardians WHERE student_id = $1 ORDER BY id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_recipient).collect()
    }

    async fn add_guardian(&self, student_id: i64, recipient: Recipient) -> Result<()> {
        sqlx::query(
            "INSERT INTO guardians \
             (id, student_id, display_name, email, phone_e164, whatsapp_opt_in, preferred_language) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(recipient.id)
        .bind(student_id)
        .bind(&recipient.display_name)
        .bind(&recipient.email)
        .bind(&recipient.phone_e164)
        .bind(recipient.whatsapp_opt_in)
        .bind(recipient.preferred_language.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
