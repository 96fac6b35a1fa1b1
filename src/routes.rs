//! Routes module for the notification service
//!
//! Wires the synthetic test endpoints, the health check, and the Prometheus
//! exposition endpoint onto one axum router with the usual middleware stack.

use crate::handlers;
use crate::NotificationService;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

/// Build the main router for the notification service
pub fn create_router(service: Arc<NotificationService>) -> Router {
    let api_router = create_test_api_router(Arc::clone(&service));
    let health_router = create_health_router(service);

    Router::new()
        .merge(api_router)
        .merge(health_router)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .into_inner(),
        )
}

/// The manual-verification surface.
fn create_test_api_router(service: Arc<NotificationService>) -> Router {
    Router::new()
        .route("/api/test-notifications/config", get(handlers::get_config))
        .route("/api/test-notifications/stats", get(handlers::get_stats))
        .route(
            "/api/test-notifications/test-attendance",
            post(handlers::test_attendance),
        )
        .route(
            "/api/test-notifications/test-grades",
            post(handlers::test_grades),
        )
        .route(
            "/api/test-notifications/test-payments",
            post(handlers::test_payments),
        )
        .route(
            "/api/test-notifications/test-geolocation",
            post(handlers::test_geolocation),
        )
        .route(
            "/api/test-notifications/test-online-class",
            post(handlers::test_online_class),
        )
        .route(
            "/api/test-notifications/test-timetable",
            post(handlers::test_timetable),
        )
        .route(
            "/api/test-notifications/test-message",
            post(handlers::test_message),
        )
        .with_state(service)
}

/// Create health and metrics routes
fn create_health_router(service: Arc<NotificationService>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformConfig;

    #[tokio::test]
    async fn test_router_creation() {
        let mut config = PlatformConfig::default();
        config.email.enabled = false;
        let service = Arc::new(NotificationService::new(config).await.unwrap());
        let _app = create_router(service);
    }
}
