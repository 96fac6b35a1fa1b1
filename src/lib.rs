//! # EDUCAFRIC Notification Service
//!
//! Multi-channel notification subsystem for the EDUCAFRIC school platform:
//! - Email notifications via SMTP (branded HTML + plain-text fallback)
//! - WhatsApp notifications via the Business Cloud API, with click-to-chat
//!   link generation for email embedding
//! - In-app (PWA) notification records
//! - SMS kept as a permanently disabled placeholder channel
//! - A persisted notification queue drained by a polling scheduler
//! - Overdue / upcoming-due fee scans with idempotency guards
//! - A typed event dispatcher with per-event-type toggles that never lets a
//!   notification failure crash the triggering request
//!
//! ## Usage
//!
//! ```rust,no_run
//! use educafric_notification::{NotificationService, PlatformConfig};
//! use educafric_notification::types::{EventType, NotificationEvent};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PlatformConfig::from_env()?;
//!     let service = NotificationService::new(config).await?;
//!     service.start_scheduler().await?;
//!
//!     let report = service
//!         .process_event(&NotificationEvent {
//!             event_type: EventType::Attendance,
//!             data: json!({
//!                 "student_id": 5,
//!                 "student_name": "Amina Njoya",
//!                 "status": "absent",
//!                 "date": "2026-05-12",
//!                 "class_name": "CM2 A",
//!                 "marked_by": "M. Kamga",
//!             }),
//!             school_id: 1,
//!             triggered_by: None,
//!         })
//!         .await;
//!     println!("sent: {}", report.notifications_sent);
//!
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod templates;
pub mod types;

pub use config::PlatformConfig;
pub use dispatcher::{DispatcherStats, EventDispatcher};
pub use error::{NotificationError, Result};
pub use scheduler::PollingScheduler;

use channels::{ChannelSet, EmailSender, PwaSender, SmsSender, WhatsappSender};
use channels::whatsapp::WhatsappStats;
use metrics::NotificationMetrics;
use serde_json::{json, Value};
use services::attendance::AttendanceEventHandler;
use services::{AttendanceNotificationService, FeeNotificationService, GuardianAlertHandler};
use store::{
    cache, CachedRecipientDirectory, FeeStore, MemoryStore, PgStore, QueueStore,
    RecipientDirectory,
};
use templates::{build_registry, MessageKind};
use types::{
    AssignedFee, DispatchReport, EventType, NotificationEvent, NotificationJob, Payment,
    Recipient,
};

/// Main service struct that coordinates all notification operations.
///
/// Explicitly constructed and dependency-injected: request handlers receive
/// it behind an `Arc`, tests build as many isolated instances as they need.
pub struct NotificationService {
    config: Arc<PlatformConfig>,
    dispatcher: Arc<EventDispatcher>,
    fee_service: Arc<FeeNotificationService>,
    scheduler: PollingScheduler,
    channels: Arc<ChannelSet>,
    metrics: NotificationMetrics,
    queue: Arc<dyn QueueStore>,
    fees: Arc<dyn FeeStore>,
    directory: Arc<dyn RecipientDirectory>,
    postgres: Option<PgStore>,
}

impl NotificationService {
    /// Create a new service with the given configuration.
    ///
    /// Database and redis are optional: missing URLs degrade to the
    /// in-memory backend with a warning instead of refusing to start.
    pub async fn new(config: PlatformConfig) -> Result<Self> {
        config.validate().map_err(NotificationError::config)?;
        let config = Arc::new(config);

        let metrics = NotificationMetrics::new(&config.metrics)?;
        let registry = Arc::new(build_registry()?);

        let postgres = PgStore::connect(&config.database).await?;

        let (queue, fees, directory_inner): (
            Arc<dyn QueueStore>,
            Arc<dyn FeeStore>,
            Arc<dyn RecipientDirectory>,
        ) = match &postgres {
            Some(pg) => (
                Arc::new(pg.clone()),
                Arc::new(pg.clone()),
                Arc::new(pg.clone()),
            ),
            None => {
                warn!("No database configured, using the in-memory backend");
                let memory = Arc::new(MemoryStore::new());
                (memory.clone(), memory.clone(), memory)
            }
        };

        let redis = cache::connect_redis(&config.redis).await;
        let directory: Arc<dyn RecipientDirectory> = Arc::new(CachedRecipientDirectory::new(
            directory_inner,
            redis,
            &config.redis,
        ));

        let email = Arc::new(EmailSender::new(&config.email, &config.support)?);
        let sms = Arc::new(SmsSender::new());
        let whatsapp = Arc::new(WhatsappSender::new(&config.whatsapp)?);
        let pwa = Arc::new(PwaSender::new(config.pwa.enabled, queue.clone()));
        let channels = Arc::new(ChannelSet::new(&config, email, sms, whatsapp, pwa));

        let attendance = Arc::new(AttendanceNotificationService::new(
            directory.clone(),
            channels.clone(),
            registry.clone(),
            metrics.clone(),
        ));
        let fee_service = Arc::new(FeeNotificationService::new(
            fees.clone(),
            queue.clone(),
            registry.clone(),
            metrics.clone(),
        ));

        let mut dispatcher = EventDispatcher::new(config.clone(), metrics.clone());
        dispatcher.register_handler(
            EventType::Attendance,
            Arc::new(AttendanceEventHandler::new(attendance)),
        );
        for event_type in [
            EventType::Grades,
            EventType::Payments,
            EventType::Geolocation,
            EventType::OnlineClasses,
            EventType::Timetable,
            EventType::Messages,
        ] {
            dispatcher.register_handler(
                event_type,
                Arc::new(GuardianAlertHandler::new(
                    directory.clone(),
                    channels.clone(),
                    registry.clone(),
                    metrics.clone(),
                    event_type,
                )),
            );
        }
        let dispatcher = Arc::new(dispatcher);

        let scheduler = PollingScheduler::new(
            queue.clone(),
            fees.clone(),
            directory.clone(),
            channels.clone(),
            fee_service.clone(),
            config.scheduler.clone(),
            config.retry.clone(),
            metrics.clone(),
        );

        Ok(Self {
            config,
            dispatcher,
            fee_service,
            scheduler,
            channels,
            metrics,
            queue,
            fees,
            directory,
            postgres,
        })
    }

    /// Dispatch one typed event. Infallible: failures come back inside the
    /// report.
    pub async fn process_event(&self, event: &NotificationEvent) -> DispatchReport {
        self.dispatcher.process_event(event).await
    }

    /// Dispatch an untyped payload; unknown event types become error
    /// reports.
    pub async fn process_raw(&self, raw: Value) -> DispatchReport {
        self.dispatcher.process_raw(raw).await
    }

    /// Record a payment against a fee and enqueue its receipt notification.
    pub async fn record_payment(
        &self,
        payment: &Payment,
    ) -> Result<(AssignedFee, Option<NotificationJob>)> {
        self.fee_service.record_payment(payment).await
    }

    /// Run one scheduler cycle inline (drain + fee scans).
    pub async fn run_scheduler_cycle(&self) {
        self.scheduler.run_cycle().await
    }

    /// Start the background polling scheduler.
    pub async fn start_scheduler(&self) -> Result<()> {
        if !self.config.scheduler.enabled {
            return Err(NotificationError::config("Scheduler is not enabled"));
        }
        self.scheduler.start().await
    }

    /// Stop the background polling scheduler.
    pub async fn stop_scheduler(&self) -> Result<()> {
        self.scheduler.stop().await
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    pub fn whatsapp_stats(&self) -> WhatsappStats {
        self.channels.whatsapp().stats()
    }

    pub async fn queue_status_counts(&self) -> Result<HashMap<String, u64>> {
        self.queue.status_counts().await
    }

    /// Register a guardian for a student. Administrative surface, also used
    /// to seed scenarios against the in-memory backend.
    pub async fn add_guardian(&self, student_id: i64, recipient: Recipient) -> Result<()> {
        self.directory.add_guardian(student_id, recipient).await
    }

    /// Create an assigned fee row.
    pub async fn insert_fee(&self, fee: AssignedFee) -> Result<()> {
        self.fees.insert_fee(fee).await
    }

    pub async fn get_fee(&self, fee_id: i64) -> Result<Option<AssignedFee>> {
        self.fees.get_fee(fee_id).await
    }

    pub async fn jobs_for_entity(
        &self,
        subject_entity_id: i64,
        notification_type: types::NotificationType,
    ) -> Result<Vec<NotificationJob>> {
        self.queue
            .jobs_for_entity(subject_entity_id, notification_type)
            .await
    }

    /// Sanitized configuration dump for the debug endpoint. Credentials are
    /// never included.
    pub fn config_snapshot(&self) -> Value {
        json!({
            "channels": {
                "email": self.config.email.enabled,
                "whatsapp": self.config.whatsapp.is_configured(),
                "pwa": self.config.pwa.enabled,
                "sms": false,
            },
            "auto_notify": self.config.auto_notify,
            "default_language": self.config.default_language,
            "support": self.config.support,
            "scheduler": {
                "enabled": self.config.scheduler.enabled,
                "warmup_delay_seconds": self.config.scheduler.warmup_delay_seconds,
                "poll_interval_seconds": self.config.scheduler.poll_interval_seconds,
                "batch_size": self.config.scheduler.batch_size,
                "reminder_lead_days": self.config.scheduler.reminder_lead_days,
            },
            "retry": self.config.retry,
        })
    }

    /// Service health summary for `/health`.
    pub async fn health_check(&self) -> Value {
        let mut components = serde_json::Map::new();

        if let Some(pg) = &self.postgres {
            components.insert(
                "postgres".to_string(),
                json!({ "status": if pg.ping().await { "healthy" } else { "unhealthy" } }),
            );
        } else {
            components.insert("postgres".to_string(), json!({ "status": "not_configured" }));
        }

        components.insert("channels".to_string(), json!(self.channels.infos()));
        components.insert(
            "scheduler".to_string(),
            json!({ "running": self.scheduler.is_running().await }),
        );
        components.insert(
            "templates".to_string(),
            json!({ "registered_kinds": MessageKind::ALL.len() }),
        );

        json!({
            "service": "educafric-notification",
            "status": "healthy",
            "timestamp": chrono::Utc::now(),
            "components": components,
        })
    }

    /// Prometheus text exposition.
    pub fn metrics_export(&self) -> Result<String> {
        self.metrics.export()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_service_creation_without_databases() {
        let mut config = PlatformConfig::default();
        config.database.postgres_url = String::new();
        config.redis.url = String::new();
        config.email.enabled = false;

        let service = NotificationService::new(config).await;
        assert!(service.is_ok());
    }

    #[tokio::test]
    async fn test_config_snapshot_has_no_credentials() {
        let mut config = PlatformConfig::default();
        config.database.postgres_url = String::new();
        config.redis.url = String::new();
        config.email.enabled = false;
        config.whatsapp.access_token = "secret-token".to_string();
        config.whatsapp.phone_number_id = "12345".to_string();

        let service = NotificationService::new(config).await.unwrap();
        let snapshot = service.config_snapshot().to_string();

        assert!(!snapshot.contains("secret-token"));
        assert!(snapshot.contains("auto_notify"));
    }

    #[tokio::test]
    async fn test_health_check_shape() {
        let mut config = PlatformConfig::default();
        config.database.postgres_url = String::new();
        config.redis.url = String::new();
        config.email.enabled = false;

        let service = NotificationService::new(config).await.unwrap();
        let health = service.health_check().await;

        assert_eq!(health["service"], "educafric-notification");
        assert!(health["components"]["channels"].is_array());
    }
}
