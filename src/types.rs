//! Core domain types for the notification service
//!
//! Queue rows, dispatch events, recipients, and the fee/attendance payloads
//! the domain services translate into notifications.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::error::NotificationError;

// =============================================================================
// Languages and channels
// =============================================================================

/// Recipient language. French is the platform default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Fr,
    En,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fr => write!(f, "fr"),
            Self::En => write!(f, "en"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    Whatsapp,
    Pwa,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Email,
        ChannelKind::Sms,
        ChannelKind::Whatsapp,
        ChannelKind::Pwa,
    ];
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Sms => write!(f, "sms"),
            Self::Whatsapp => write!(f, "whatsapp"),
            Self::Pwa => write!(f, "pwa"),
        }
    }
}

impl FromStr for ChannelKind {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "whatsapp" => Ok(Self::Whatsapp),
            "pwa" => Ok(Self::Pwa),
            other => Err(NotificationError::validation(
                "channel",
                format!("unknown channel: {}", other),
            )),
        }
    }
}

// =============================================================================
// Notification queue rows
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Reminder,
    Overdue,
    Receipt,
    Absence,
    Grade,
    Announcement,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reminder => write!(f, "reminder"),
            Self::Overdue => write!(f, "overdue"),
            Self::Receipt => write!(f, "receipt"),
            Self::Absence => write!(f, "absence"),
            Self::Grade => write!(f, "grade"),
            Self::Announcement => write!(f, "announcement"),
        }
    }
}

impl FromStr for NotificationType {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reminder" => Ok(Self::Reminder),
            "overdue" => Ok(Self::Overdue),
            "receipt" => Ok(Self::Receipt),
            "absence" => Ok(Self::Absence),
            "grade" => Ok(Self::Grade),
            "announcement" => Ok(Self::Announcement),
            other => Err(NotificationError::validation(
                "notification_type",
                format!("unknown notification type: {}", other),
            )),
        }
    }
}

/// Queue row lifecycle.
///
/// `pending → in_progress (claimed by a drain, lease-bound) → sent | failed`.
/// A drain whose channels all failed with retryable errors puts the row back
/// to `pending` with a backoff `scheduled_for` until attempts run out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Sent,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(NotificationError::validation(
                "status",
                format!("unknown job status: {}", other),
            )),
        }
    }
}

/// A persisted notification job. Rows are append-only: the scheduler mutates
/// status and delivery flags but nothing ever deletes a row, so the table
/// doubles as the delivery audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: Uuid,
    pub school_id: i64,
    /// The fee, student, or other entity this notification is about.
    pub subject_entity_id: i64,
    pub notification_type: NotificationType,
    pub title: String,
    /// Bilingual composite body (French and English segments).
    pub message: String,
    pub channels: Vec<ChannelKind>,
    pub status: JobStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub email_sent: bool,
    pub whatsapp_sent: bool,
    pub pwa_sent: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a new queue row.
#[derive(Debug, Clone)]
pub struct NewNotificationJob {
    pub school_id: i64,
    pub subject_entity_id: i64,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub channels: Vec<ChannelKind>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

// =============================================================================
// Dispatch events
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Attendance,
    Grades,
    Payments,
    Geolocation,
    OnlineClasses,
    Timetable,
    Messages,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::Attendance,
        EventType::Grades,
        EventType::Payments,
        EventType::Geolocation,
        EventType::OnlineClasses,
        EventType::Timetable,
        EventType::Messages,
    ];
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Attendance => write!(f, "attendance"),
            Self::Grades => write!(f, "grades"),
            Self::Payments => write!(f, "payments"),
            Self::Geolocation => write!(f, "geolocation"),
            Self::OnlineClasses => write!(f, "onlineClasses"),
            Self::Timetable => write!(f, "timetable"),
            Self::Messages => write!(f, "messages"),
        }
    }
}

/// A transient, in-memory dispatch request. Not persisted; lives only for
/// the duration of one `process_event` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_type: EventType,
    pub data: Value,
    pub school_id: i64,
    pub triggered_by: Option<i64>,
}

/// Aggregated outcome of one dispatch. This is a report, never an error:
/// the dispatcher folds every failure into `errors` instead of propagating.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DispatchReport {
    pub success: bool,
    pub notifications_sent: u32,
    pub channels: Vec<String>,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DispatchReport {
    /// Non-error result for an event type whose auto-notification is off.
    pub fn skipped<S: Into<String>>(reason: S) -> Self {
        Self {
            success: true,
            detail: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn failure<S: Into<String>>(error: S) -> Self {
        Self {
            success: false,
            errors: vec![error.into()],
            ..Default::default()
        }
    }
}

// =============================================================================
// Recipients
// =============================================================================

/// A guardian (or other contact) resolved for a subject entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub display_name: String,
    pub email: Option<String>,
    pub phone_e164: Option<String>,
    pub whatsapp_opt_in: bool,
    #[serde(default)]
    pub preferred_language: Language,
}

impl Recipient {
    /// WhatsApp delivery needs both a stored number and an explicit opt-in.
    pub fn whatsapp_addressable(&self) -> bool {
        self.whatsapp_opt_in && self.phone_e164.is_some()
    }
}

// =============================================================================
// Fees and payments
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeeStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl std::fmt::Display for FeeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Partial => write!(f, "partial"),
            Self::Paid => write!(f, "paid"),
            Self::Overdue => write!(f, "overdue"),
        }
    }
}

impl FromStr for FeeStatus {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "partial" => Ok(Self::Partial),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            other => Err(NotificationError::validation(
                "fee_status",
                format!("unknown fee status: {}", other),
            )),
        }
    }
}

/// A fee structure instantiated against a specific student.
///
/// `overdue_notice_sent` and `reminder_sent` are the idempotency guards that
/// keep repeated scheduler scans from enqueueing duplicate notices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedFee {
    pub id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub label: String,
    pub amount_cfa: i64,
    pub balance_cfa: i64,
    pub due_date: NaiveDate,
    pub status: FeeStatus,
    pub overdue_notice_sent: bool,
    pub reminder_sent: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
    Card,
    Cheque,
}

impl PaymentMethod {
    /// Localized label used in receipt bodies.
    pub fn label(&self, language: Language) -> &'static str {
        match (self, language) {
            (Self::Cash, Language::Fr) => "Espèces",
            (Self::Cash, Language::En) => "Cash",
            (Self::MobileMoney, _) => "Mobile Money",
            (Self::BankTransfer, Language::Fr) => "Virement bancaire",
            (Self::BankTransfer, Language::En) => "Bank transfer",
            (Self::Card, Language::Fr) => "Carte bancaire",
            (Self::Card, Language::En) => "Card",
            (Self::Cheque, Language::Fr) => "Chèque",
            (Self::Cheque, Language::En) => "Cheque",
        }
    }
}

/// A recorded payment against an assigned fee.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Payment {
    pub fee_id: i64,
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount_cfa: i64,
    pub method: PaymentMethod,
    #[validate(length(min = 1, message = "receipt number required"))]
    pub receipt_number: String,
}

// =============================================================================
// Attendance
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Absent => write!(f, "absent"),
            Self::Late => write!(f, "late"),
            Self::Excused => write!(f, "excused"),
        }
    }
}

/// Attendance mark payload carried by `EventType::Attendance` events and the
/// synthetic test endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AttendanceEventData {
    pub student_id: i64,
    #[validate(length(min = 1, message = "student name required"))]
    pub student_name: String,
    pub status: AttendanceStatus,
    pub date: NaiveDate,
    pub class_name: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub marked_by: String,
}

// =============================================================================
// Remaining event payloads
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GradeEventData {
    pub student_id: i64,
    #[validate(length(min = 1, message = "student name required"))]
    pub student_name: String,
    pub subject: String,
    pub grade: f64,
    pub max_grade: f64,
    #[serde(default)]
    pub term: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PaymentEventData {
    pub student_id: i64,
    #[validate(length(min = 1, message = "student name required"))]
    pub student_name: String,
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount_cfa: i64,
    pub method: PaymentMethod,
    pub receipt_number: String,
    pub fee_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GeolocationEventData {
    pub student_id: i64,
    #[validate(length(min = 1, message = "student name required"))]
    pub student_name: String,
    pub zone: String,
    pub alert: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OnlineClassEventData {
    pub student_id: i64,
    #[validate(length(min = 1, message = "student name required"))]
    pub student_name: String,
    pub course: String,
    pub starts_at: DateTime<Utc>,
    pub join_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TimetableEventData {
    pub student_id: i64,
    pub class_name: String,
    #[validate(length(min = 1, message = "change summary required"))]
    pub change_summary: String,
    pub effective_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DirectMessageEventData {
    pub student_id: i64,
    #[validate(length(min = 1, message = "sender name required"))]
    pub sender_name: String,
    #[validate(length(min = 1, message = "message body required"))]
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trip() {
        for channel in ChannelKind::ALL {
            let parsed: ChannelKind = channel.to_string().parse().unwrap();
            assert_eq!(parsed, channel);
        }
        assert!("carrier_pigeon".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_event_type_serde_uses_camel_case() {
        let json = serde_json::to_string(&EventType::OnlineClasses).unwrap();
        assert_eq!(json, "\"onlineClasses\"");
        let back: EventType = serde_json::from_str("\"attendance\"").unwrap();
        assert_eq!(back, EventType::Attendance);
    }

    #[test]
    fn test_unknown_event_type_fails_deserialization() {
        let result = serde_json::from_str::<EventType>("\"bogus\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Sent,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_whatsapp_addressable() {
        let mut recipient = Recipient {
            id: 1,
            display_name: "Mme Ngo".to_string(),
            email: None,
            phone_e164: Some("+237677001122".to_string()),
            whatsapp_opt_in: true,
            preferred_language: Language::Fr,
        };
        assert!(recipient.whatsapp_addressable());

        recipient.whatsapp_opt_in = false;
        assert!(!recipient.whatsapp_addressable());

        recipient.whatsapp_opt_in = true;
        recipient.phone_e164 = None;
        assert!(!recipient.whatsapp_addressable());
    }

    #[test]
    fn test_payment_method_labels() {
        assert_eq!(PaymentMethod::Cash.label(Language::Fr), "Espèces");
        assert_eq!(PaymentMethod::Cash.label(Language::En), "Cash");
        assert_eq!(PaymentMethod::MobileMoney.label(Language::Fr), "Mobile Money");
    }

    #[test]
    fn test_skipped_report_is_not_an_error() {
        let report = DispatchReport::skipped("auto-notification disabled for grades");
        assert!(report.success);
        assert!(report.errors.is_empty());
        assert_eq!(report.notifications_sent, 0);
    }

    #[test]
    fn test_payment_validation() {
        use validator::Validate;

        let payment = Payment {
            fee_id: 1,
            amount_cfa: 0,
            method: PaymentMethod::Cash,
            receipt_number: "RCP-001".to_string(),
        };
        assert!(payment.validate().is_err());
    }
}
