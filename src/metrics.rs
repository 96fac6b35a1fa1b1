//! Metrics collection module for the notification service
//!
//! Prometheus registry covering event dispatch, channel deliveries, queue
//! depth, and drain timings. The same registry backs the `/metrics`
//! exposition endpoint and the aggregate numbers on the stats debug surface.

use crate::config::MetricsConfig;
use crate::error::{NotificationError, Result};
use crate::types::{ChannelKind, EventType, NotificationType};

use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry};
use std::sync::Arc;

/// Metrics collector for the notification service
#[derive(Clone)]
pub struct NotificationMetrics {
    registry: Arc<Registry>,

    events_total: IntCounterVec,
    deliveries_total: IntCounterVec,
    jobs_enqueued_total: IntCounterVec,
    drain_cycles_total: IntCounter,

    queue_size: IntGaugeVec,

    delivery_duration: HistogramVec,
}

impl NotificationMetrics {
    /// Create a new metrics collector
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        let registry = Registry::new();

        let events_total = IntCounterVec::new(
            prometheus::Opts::new("events_total", "Events received by the dispatcher")
                .namespace(&config.namespace),
            &["type"],
        )
        .map_err(|e| {
            NotificationError::internal(format!("Failed to create events_total counter: {}", e))
        })?;

        let deliveries_total = IntCounterVec::new(
            prometheus::Opts::new(
                "deliveries_total",
                "Channel delivery attempts by outcome",
            )
            .namespace(&config.namespace),
            &["channel", "outcome"],
        )
        .map_err(|e| {
            NotificationError::internal(format!("Failed to create deliveries_total counter: {}", e))
        })?;

        let jobs_enqueued_total = IntCounterVec::new(
            prometheus::Opts::new("jobs_enqueued_total", "Queue rows created")
                .namespace(&config.namespace),
            &["type"],
        )
        .map_err(|e| {
            NotificationError::internal(format!(
                "Failed to create jobs_enqueued_total counter: {}",
                e
            ))
        })?;

        let drain_cycles_total = IntCounter::with_opts(
            prometheus::Opts::new("drain_cycles_total", "Completed scheduler drain cycles")
                .namespace(&config.namespace),
        )
        .map_err(|e| {
            NotificationError::internal(format!(
                "Failed to create drain_cycles_total counter: {}",
                e
            ))
        })?;

        let queue_size = IntGaugeVec::new(
            prometheus::Opts::new("queue_size", "Queue rows by status")
                .namespace(&config.namespace),
            &["status"],
        )
        .map_err(|e| {
            NotificationError::internal(format!("Failed to create queue_size gauge: {}", e))
        })?;

        let delivery_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "delivery_duration_seconds",
                "Time taken per channel delivery attempt",
            )
            .namespace(&config.namespace)
            .buckets(config.histogram_buckets.clone()),
            &["channel", "status"],
        )
        .map_err(|e| {
            NotificationError::internal(format!(
                "Failed to create delivery_duration histogram: {}",
                e
            ))
        })?;

        registry
            .register(Box::new(events_total.clone()))
            .map_err(|e| NotificationError::internal(format!("Failed to register metric: {}", e)))?;
        registry
            .register(Box::new(deliveries_total.clone()))
            .map_err(|e| NotificationError::internal(format!("Failed to register metric: {}", e)))?;
        registry
            .register(Box::new(jobs_enqueued_total.clone()))
            .map_err(|e| NotificationError::internal(format!("Failed to register metric: {}", e)))?;
        registry
            .register(Box::new(drain_cycles_total.clone()))
            .map_err(|e| NotificationError::internal(format!("Failed to register metric: {}", e)))?;
        registry
            .register(Box::new(queue_size.clone()))
            .map_err(|e| NotificationError::internal(format!("Failed to register metric: {}", e)))?;
        registry
            .register(Box::new(delivery_duration.clone()))
            .map_err(|e| NotificationError::internal(format!("Failed to register metric: {}", e)))?;

        Ok(Self {
            registry: Arc::new(registry),
            events_total,
            deliveries_total,
            jobs_enqueued_total,
            drain_cycles_total,
            queue_size,
            delivery_duration,
        })
    }

    pub fn record_event(&self, event_type: EventType) {
        self.events_total
            .with_label_values(&[&event_type.to_string()])
            .inc();
    }

    pub fn record_delivery(&self, channel: ChannelKind, outcome: &str, duration_seconds: f64) {
        self.deliveries_total
            .with_label_values(&[&channel.to_string(), outcome])
            .inc();
        self.delivery_duration
            .with_label_values(&[&channel.to_string(), outcome])
            .observe(duration_seconds);
    }

    pub fn record_enqueued(&self, notification_type: NotificationType) {
        self.jobs_enqueued_total
            .with_label_values(&[&notification_type.to_string()])
            .inc();
    }

    pub fn record_drain_cycle(&self) {
        self.drain_cycles_total.inc();
    }

    pub fn record_queue_size(&self, status: &str, size: i64) {
        self.queue_size.with_label_values(&[status]).set(size);
    }

    /// Get Prometheus registry for the metrics endpoint
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String> {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        encoder
            .encode_to_string(&metric_families)
            .map_err(|e| NotificationError::internal(format!("Failed to encode metrics: {}", e)))
    }
}
