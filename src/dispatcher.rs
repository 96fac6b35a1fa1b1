//! Event dispatcher
//!
//! Single entry point for typed platform events (attendance marks, grades,
//! payments, geolocation alerts, online classes, timetable changes, direct
//! messages). The dispatcher checks the per-event-type toggles, routes the
//! event through a registered handler map, and folds every outcome into a
//! [`DispatchReport`].
//!
//! Nothing here ever propagates an error or panic to the caller: a failing
//! or panicking handler becomes `{success: false, errors: [...]}`. Feature
//! code triggering a notification must not be able to crash on it.

use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::PlatformConfig;
use crate::error::Result;
use crate::metrics::NotificationMetrics;
use crate::types::{DispatchReport, EventType, NotificationEvent};

/// One event-type handler. Implementations wrap the domain services.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &NotificationEvent) -> Result<DispatchReport>;
}

/// Snapshot of the in-memory dispatch counters.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub total_processed: u64,
    pub by_type: HashMap<String, u64>,
}

/// Dependency-injected dispatcher. Construct one per process and share it
/// behind an `Arc`; there is deliberately no global instance.
pub struct EventDispatcher {
    config: Arc<PlatformConfig>,
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
    metrics: NotificationMetrics,
    total_processed: AtomicU64,
    by_type: DashMap<EventType, u64>,
}

impl EventDispatcher {
    pub fn new(config: Arc<PlatformConfig>, metrics: NotificationMetrics) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
            metrics,
            total_processed: AtomicU64::new(0),
            by_type: DashMap::new(),
        }
    }

    /// Register the handler for one event type. New event types plug in here
    /// without touching the dispatch body.
    pub fn register_handler(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        if self.handlers.insert(event_type, handler).is_some() {
            warn!(%event_type, "Replacing previously registered handler");
        }
    }

    pub fn should_auto_notify(&self, event_type: EventType) -> bool {
        self.config.auto_notify.enabled_for(event_type)
    }

    /// Process one typed event. Infallible at the API boundary.
    pub async fn process_event(&self, event: &NotificationEvent) -> DispatchReport {
        let event_type = event.event_type;

        self.total_processed.fetch_add(1, Ordering::Relaxed);
        *self.by_type.entry(event_type).or_insert(0) += 1;
        self.metrics.record_event(event_type);

        if !self.should_auto_notify(event_type) {
            info!(%event_type, "Auto-notification disabled, skipping");
            return DispatchReport::skipped(format!(
                "auto-notification disabled for {}",
                event_type
            ));
        }

        let handler = match self.handlers.get(&event_type) {
            Some(handler) => handler.clone(),
            None => {
                error!(%event_type, "No handler registered");
                return DispatchReport::failure(format!(
                    "no handler registered for event type: {}",
                    event_type
                ));
            }
        };

        let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;

        match outcome {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                error!(%event_type, "Handler failed: {}", e);
                DispatchReport::failure(e.to_string())
            }
            Err(_) => {
                error!(%event_type, "Handler panicked");
                DispatchReport::failure(format!("handler for {} panicked", event_type))
            }
        }
    }

    /// Process an untyped payload, e.g. straight off the wire. An
    /// unrecognized `event_type` string becomes an error report, never an
    /// error return.
    pub async fn process_raw(&self, raw: serde_json::Value) -> DispatchReport {
        let type_hint = raw
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("<missing>")
            .to_string();

        match serde_json::from_value::<NotificationEvent>(raw) {
            Ok(event) => self.process_event(&event).await,
            Err(e) => {
                warn!(event_type = %type_hint, "Rejected event: {}", e);
                DispatchReport::failure(format!("unknown event type: {}", type_hint))
            }
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        let by_type = self
            .by_type
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();

        DispatcherStats {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            by_type,
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::error::NotificationError;
    use serde_json::json;

    struct FixedHandler(DispatchReport);

    #[async_trait::async_trait]
    impl EventHandler for FixedHandler {
        async fn handle(&self, _event: &NotificationEvent) -> Result<DispatchReport> {
            Ok(self.0.clone())
        }
    }

    struct ErroringHandler;

    #[async_trait::async_trait]
    impl EventHandler for ErroringHandler {
        async fn handle(&self, _event: &NotificationEvent) -> Result<DispatchReport> {
            Err(NotificationError::email("SMTP connection refused"))
        }
    }

    struct PanickingHandler;

    #[async_trait::async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _event: &NotificationEvent) -> Result<DispatchReport> {
            panic!("boom");
        }
    }

    fn metrics() -> NotificationMetrics {
        NotificationMetrics::new(&MetricsConfig {
            enabled: true,
            endpoint: "/metrics".to_string(),
            namespace: format!("dispatcher_test_{}", uuid::Uuid::new_v4().simple()),
            histogram_buckets: vec![0.1, 1.0],
        })
        .unwrap()
    }

    fn event(event_type: EventType) -> NotificationEvent {
        NotificationEvent {
            event_type,
            data: json!({}),
            school_id: 1,
            triggered_by: None,
        }
    }

    #[tokio::test]
    async fn test_disabled_event_type_is_skipped() {
        let mut config = PlatformConfig::default();
        config.auto_notify.grades = false;
        let dispatcher = EventDispatcher::new(Arc::new(config), metrics());

        let report = dispatcher.process_event(&event(EventType::Grades)).await;
        assert!(report.success);
        assert_eq!(report.notifications_sent, 0);
        assert!(report.detail.unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn test_missing_handler_reports_failure() {
        let dispatcher = EventDispatcher::new(Arc::new(PlatformConfig::default()), metrics());

        let report = dispatcher.process_event(&event(EventType::Timetable)).await;
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("no handler registered"));
    }

    #[tokio::test]
    async fn test_registered_handler_result_is_returned() {
        let mut dispatcher = EventDispatcher::new(Arc::new(PlatformConfig::default()), metrics());
        dispatcher.register_handler(
            EventType::Attendance,
            Arc::new(FixedHandler(DispatchReport {
                success: true,
                notifications_sent: 2,
                channels: vec!["email:sent".to_string(), "pwa:sent".to_string()],
                errors: vec![],
                detail: None,
            })),
        );

        let report = dispatcher.process_event(&event(EventType::Attendance)).await;
        assert!(report.success);
        assert_eq!(report.notifications_sent, 2);
    }

    #[tokio::test]
    async fn test_handler_error_is_folded_into_report() {
        let mut dispatcher = EventDispatcher::new(Arc::new(PlatformConfig::default()), metrics());
        dispatcher.register_handler(EventType::Attendance, Arc::new(ErroringHandler));

        let report = dispatcher.process_event(&event(EventType::Attendance)).await;
        assert!(!report.success);
        assert!(report.errors[0].contains("SMTP connection refused"));
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let mut dispatcher = EventDispatcher::new(Arc::new(PlatformConfig::default()), metrics());
        dispatcher.register_handler(EventType::Attendance, Arc::new(PanickingHandler));

        let report = dispatcher.process_event(&event(EventType::Attendance)).await;
        assert!(!report.success);
        assert!(report.errors[0].contains("panicked"));
    }

    #[tokio::test]
    async fn test_unknown_event_type_never_throws() {
        let dispatcher = EventDispatcher::new(Arc::new(PlatformConfig::default()), metrics());

        let report = dispatcher
            .process_raw(json!({
                "event_type": "bogus",
                "data": {},
                "school_id": 1
            }))
            .await;

        assert!(!report.success);
        assert!(report.errors[0].contains("unknown event type: bogus"));
    }

    #[tokio::test]
    async fn test_stats_track_totals_and_types() {
        let mut dispatcher = EventDispatcher::new(Arc::new(PlatformConfig::default()), metrics());
        dispatcher.register_handler(
            EventType::Attendance,
            Arc::new(FixedHandler(DispatchReport::default())),
        );

        dispatcher.process_event(&event(EventType::Attendance)).await;
        dispatcher.process_event(&event(EventType::Attendance)).await;
        dispatcher.process_event(&event(EventType::Grades)).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.by_type.get("attendance"), Some(&2));
        assert_eq!(stats.by_type.get("grades"), Some(&1));
    }
}
