//! HTTP handlers for the notification debug and ambient endpoints
//!
//! The `/api/test-notifications/*` surface exists for manual verification:
//! each POST fires a synthetic event of one type through the real dispatcher
//! and returns the dispatch report. Nothing here is end-user facing.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::types::{EventType, NotificationEvent};
use crate::NotificationService;

/// Synthetic events default to this school when the payload does not name
/// one.
const TEST_SCHOOL_ID: i64 = 1;

fn synthetic_event(event_type: EventType, mut body: Value) -> NotificationEvent {
    let school_id = body
        .get("school_id")
        .and_then(Value::as_i64)
        .unwrap_or(TEST_SCHOOL_ID);

    if let Some(object) = body.as_object_mut() {
        object.remove("school_id");
    }

    NotificationEvent {
        event_type,
        data: body,
        school_id,
        triggered_by: None,
    }
}

async fn run_test_event(
    service: Arc<NotificationService>,
    event_type: EventType,
    body: Value,
) -> Json<Value> {
    let event = synthetic_event(event_type, body);
    let report = service.process_event(&event).await;

    Json(json!({
        "success": report.success,
        "message": format!("{} test event dispatched", event_type),
        "result": report,
    }))
}

/// GET `/api/test-notifications/config`
pub async fn get_config(State(service): State<Arc<NotificationService>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "config": service.config_snapshot(),
        "stats": service.dispatcher_stats(),
    }))
}

/// GET `/api/test-notifications/stats`
pub async fn get_stats(State(service): State<Arc<NotificationService>>) -> Json<Value> {
    let queue = service.queue_status_counts().await.unwrap_or_default();

    Json(json!({
        "success": true,
        "stats": {
            "dispatcher": service.dispatcher_stats(),
            "queue": queue,
        },
        "whatsappStats": service.whatsapp_stats(),
    }))
}

/// POST `/api/test-notifications/test-attendance`
pub async fn test_attendance(
    State(service): State<Arc<NotificationService>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    run_test_event(service, EventType::Attendance, body).await
}

/// POST `/api/test-notifications/test-grades`
pub async fn test_grades(
    State(service): State<Arc<NotificationService>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    run_test_event(service, EventType::Grades, body).await
}

/// POST `/api/test-notifications/test-payments`
pub async fn test_payments(
    State(service): State<Arc<NotificationService>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    run_test_event(service, EventType::Payments, body).await
}

/// POST `/api/test-notifications/test-geolocation`
pub async fn test_geolocation(
    State(service): State<Arc<NotificationService>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    run_test_event(service, EventType::Geolocation, body).await
}

/// POST `/api/test-notifications/test-online-class`
pub async fn test_online_class(
    State(service): State<Arc<NotificationService>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    run_test_event(service, EventType::OnlineClasses, body).await
}

/// POST `/api/test-notifications/test-timetable`
pub async fn test_timetable(
    State(service): State<Arc<NotificationService>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    run_test_event(service, EventType::Timetable, body).await
}

/// POST `/api/test-notifications/test-message`
pub async fn test_message(
    State(service): State<Arc<NotificationService>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    run_test_event(service, EventType::Messages, body).await
}

/// GET `/health`
pub async fn health(State(service): State<Arc<NotificationService>>) -> Json<Value> {
    Json(service.health_check().await)
}

/// GET `/metrics`
pub async fn metrics(State(service): State<Arc<NotificationService>>) -> Response {
    match service.metrics_export() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_event_defaults_school_id() {
        let event = synthetic_event(EventType::Grades, json!({"student_id": 5}));
        assert_eq!(event.school_id, TEST_SCHOOL_ID);
        assert_eq!(event.event_type, EventType::Grades);
    }

    #[test]
    fn test_synthetic_event_extracts_school_id() {
        let event = synthetic_event(
            EventType::Attendance,
            json!({"student_id": 5, "school_id": 77}),
        );
        assert_eq!(event.school_id, 77);
        // The school id is routing information, not payload.
        assert!(event.data.get("school_id").is_none());
    }
}
