//! Bilingual message templates
//!
//! This module replaces the platform's parallel French/English string
//! literals with a structured registry: every message kind registers one
//! subject and one body template per language with Handlebars, and the
//! services render them with pre-localized data (amounts, dates, labels).
//!
//! Queue rows store a bilingual composite (French first, English second) so
//! a single row serves guardians regardless of stored language preference.

use handlebars::Handlebars;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{NotificationError, Result};
use crate::types::{AttendanceStatus, Language};

/// Every renderable message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Attendance,
    Grade,
    Receipt,
    Reminder,
    Overdue,
    Geolocation,
    OnlineClass,
    Timetable,
    DirectMessage,
}

impl MessageKind {
    pub const ALL: [MessageKind; 9] = [
        MessageKind::Attendance,
        MessageKind::Grade,
        MessageKind::Receipt,
        MessageKind::Reminder,
        MessageKind::Overdue,
        MessageKind::Geolocation,
        MessageKind::OnlineClass,
        MessageKind::Timetable,
        MessageKind::DirectMessage,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Attendance => "attendance",
            Self::Grade => "grade",
            Self::Receipt => "receipt",
            Self::Reminder => "reminder",
            Self::Overdue => "overdue",
            Self::Geolocation => "geolocation",
            Self::OnlineClass => "online_class",
            Self::Timetable => "timetable",
            Self::DirectMessage => "direct_message",
        }
    }
}

/// Rendered subject/body pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Attendance status phrases, the translation table the attendance service
/// substitutes into subjects and bodies.
static STATUS_LABELS: Lazy<HashMap<(AttendanceStatus, Language), &'static str>> =
    Lazy::new(|| {
        let mut labels = HashMap::new();
        labels.insert((AttendanceStatus::Present, Language::Fr), "présent(e)");
        labels.insert((AttendanceStatus::Present, Language::En), "present");
        labels.insert((AttendanceStatus::Absent, Language::Fr), "absent(e)");
        labels.insert((AttendanceStatus::Absent, Language::En), "absent");
        labels.insert((AttendanceStatus::Late, Language::Fr), "en retard");
        labels.insert((AttendanceStatus::Late, Language::En), "late");
        labels.insert((AttendanceStatus::Excused, Language::Fr), "excusé(e)");
        labels.insert((AttendanceStatus::Excused, Language::En), "excused");
        labels
    });

/// Localized phrase for an attendance status.
pub fn attendance_status_label(status: AttendanceStatus, language: Language) -> &'static str {
    STATUS_LABELS
        .get(&(status, language))
        .copied()
        .unwrap_or("—")
}

/// Inline color used by the email detail table for an attendance status.
pub fn attendance_status_color(status: AttendanceStatus) -> &'static str {
    match status {
        AttendanceStatus::Present => "#16a34a",
        AttendanceStatus::Absent => "#dc2626",
        AttendanceStatus::Late => "#d97706",
        AttendanceStatus::Excused => "#2563eb",
    }
}

/// Locale-grouped integer amount with the fixed currency label.
///
/// French groups thousands with spaces, English with commas. There is no
/// currency conversion anywhere: every amount is CFA francs.
pub fn format_amount_cfa(amount: i64, language: Language) -> String {
    let digits = amount.abs().to_string();
    let separator = match language {
        Language::Fr => ' ',
        Language::En => ',',
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 6);
    let offset = digits.len() % 3;
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - offset) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(c);
    }

    let sign = if amount < 0 { "-" } else { "" };
    format!("{}{} FCFA", sign, grouped)
}

/// Localized date rendering.
pub fn format_date(date: chrono::NaiveDate, language: Language) -> String {
    match language {
        Language::Fr => date.format("%d/%m/%Y").to_string(),
        Language::En => date.format("%d %B %Y").to_string(),
    }
}

/// Template registry: one Handlebars instance with every built-in message
/// template registered at construction. Read-only after startup.
pub struct TemplateRegistry {
    handlebars: Handlebars<'static>,
}

/// (kind, language, subject template, body template)
///
/// Variables are rendered with triple braces: bodies are plain text and the
/// registry must not HTML-escape names like "N'Diaye".
const BUILTIN_TEMPLATES: &[(MessageKind, Language, &str, &str)] = &[
    (
        MessageKind::Attendance,
        Language::Fr,
        "Présence de {{{student_name}}}: {{{status_label}}}",
        "{{{student_name}}} a été marqué(e) {{{status_label}}} le {{{date}}} ({{{class_name}}}).{{#if notes}} Remarques: {{{notes}}}.{{/if}} Enregistré par {{{marked_by}}}.",
    ),
    (
        MessageKind::Attendance,
        Language::En,
        "Attendance for {{{student_name}}}: {{{status_label}}}",
        "{{{student_name}}} was marked {{{status_label}}} on {{{date}}} ({{{class_name}}}).{{#if notes}} Notes: {{{notes}}}.{{/if}} Recorded by {{{marked_by}}}.",
    ),
    (
        MessageKind::Grade,
        Language::Fr,
        "Nouvelle note pour {{{student_name}}}",
        "{{{student_name}}} a obtenu {{{grade}}}/{{{max_grade}}} en {{{subject}}}{{#if term}} ({{{term}}}){{/if}}.",
    ),
    (
        MessageKind::Grade,
        Language::En,
        "New grade for {{{student_name}}}",
        "{{{student_name}}} scored {{{grade}}}/{{{max_grade}}} in {{{subject}}}{{#if term}} ({{{term}}}){{/if}}.",
    ),
    (
        MessageKind::Receipt,
        Language::Fr,
        "Reçu de paiement {{{receipt_number}}}",
        "Paiement de {{{amount}}} reçu pour {{{fee_label}}} ({{{student_name}}}). Mode de paiement: {{{method}}}. Reçu N° {{{receipt_number}}}.",
    ),
    (
        MessageKind::Receipt,
        Language::En,
        "Payment receipt {{{receipt_number}}}",
        "Payment of {{{amount}}} received for {{{fee_label}}} ({{{student_name}}}). Payment method: {{{method}}}. Receipt No {{{receipt_number}}}.",
    ),
    (
        MessageKind::Reminder,
        Language::Fr,
        "Rappel d'échéance: {{{fee_label}}}",
        "{{{fee_label}}} de {{{amount}}} pour {{{student_name}}} arrive à échéance le {{{due_date}}}. Merci de régler avant cette date.",
    ),
    (
        MessageKind::Reminder,
        Language::En,
        "Payment reminder: {{{fee_label}}}",
        "{{{fee_label}}} of {{{amount}}} for {{{student_name}}} is due on {{{due_date}}}. Please settle before that date.",
    ),
    (
        MessageKind::Overdue,
        Language::Fr,
        "Échéance dépassée: {{{fee_label}}}",
        "{{{fee_label}}} de {{{amount}}} pour {{{student_name}}} était dû le {{{due_date}}}. Solde restant: {{{balance}}}.",
    ),
    (
        MessageKind::Overdue,
        Language::En,
        "Payment overdue: {{{fee_label}}}",
        "{{{fee_label}}} of {{{amount}}} for {{{student_name}}} was due on {{{due_date}}}. Outstanding balance: {{{balance}}}.",
    ),
    (
        MessageKind::Geolocation,
        Language::Fr,
        "Alerte de localisation: {{{student_name}}}",
        "{{{alert}}} — {{{student_name}}}, zone {{{zone}}}.",
    ),
    (
        MessageKind::Geolocation,
        Language::En,
        "Location alert: {{{student_name}}}",
        "{{{alert}}} — {{{student_name}}}, zone {{{zone}}}.",
    ),
    (
        MessageKind::OnlineClass,
        Language::Fr,
        "Cours en ligne: {{{course}}}",
        "Le cours {{{course}}} pour {{{student_name}}} commence le {{{starts_at}}}. Lien de connexion: {{{join_url}}}",
    ),
    (
        MessageKind::OnlineClass,
        Language::En,
        "Online class: {{{course}}}",
        "The class {{{course}}} for {{{student_name}}} starts at {{{starts_at}}}. Join link: {{{join_url}}}",
    ),
    (
        MessageKind::Timetable,
        Language::Fr,
        "Changement d'emploi du temps: {{{class_name}}}",
        "Emploi du temps modifié pour {{{class_name}}} à partir du {{{effective_date}}}: {{{change_summary}}}.",
    ),
    (
        MessageKind::Timetable,
        Language::En,
        "Timetable change: {{{class_name}}}",
        "Timetable updated for {{{class_name}}} effective {{{effective_date}}}: {{{change_summary}}}.",
    ),
    (
        MessageKind::DirectMessage,
        Language::Fr,
        "Message de {{{sender_name}}}",
        "{{{body}}}",
    ),
    (
        MessageKind::DirectMessage,
        Language::En,
        "Message from {{{sender_name}}}",
        "{{{body}}}",
    ),
];

impl TemplateRegistry {
    /// Build the registry with every built-in template registered.
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);

        for (kind, language, subject, body) in BUILTIN_TEMPLATES {
            handlebars
                .register_template_string(&Self::subject_key(*kind, *language), subject)?;
            handlebars.register_template_string(&Self::body_key(*kind, *language), body)?;
        }

        Ok(Self { handlebars })
    }

    fn subject_key(kind: MessageKind, language: Language) -> String {
        format!("{}_{}_subject", kind.name(), language)
    }

    fn body_key(kind: MessageKind, language: Language) -> String {
        format!("{}_{}_body", kind.name(), language)
    }

    /// Render subject and body for one kind in one language.
    pub fn render(
        &self,
        kind: MessageKind,
        language: Language,
        data: &Value,
    ) -> Result<RenderedMessage> {
        let subject = self
            .handlebars
            .render(&Self::subject_key(kind, language), data)?;
        let body = self.handlebars.render(&Self::body_key(kind, language), data)?;

        Ok(RenderedMessage { subject, body })
    }

    /// Render the bilingual composite stored on queue rows: French segment
    /// first, English second. The two data payloads differ because amounts,
    /// dates, and method labels are localized before rendering.
    pub fn render_bilingual(
        &self,
        kind: MessageKind,
        data_fr: &Value,
        data_en: &Value,
    ) -> Result<RenderedMessage> {
        let fr = self.render(kind, Language::Fr, data_fr)?;
        let en = self.render(kind, Language::En, data_en)?;

        Ok(RenderedMessage {
            subject: fr.subject,
            body: format!("{}\n\n{}", fr.body, en.body),
        })
    }

    /// Check that a kind has both languages registered. Used by the config
    /// debug endpoint to prove registry completeness.
    pub fn has_templates(&self, kind: MessageKind) -> bool {
        self.handlebars
            .get_template(&Self::subject_key(kind, Language::Fr))
            .is_some()
            && self
                .handlebars
                .get_template(&Self::subject_key(kind, Language::En))
                .is_some()
    }
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &BUILTIN_TEMPLATES.len())
            .finish()
    }
}

/// Convenience constructor failing loud at startup only.
pub fn build_registry() -> Result<TemplateRegistry> {
    TemplateRegistry::new().map_err(|e| {
        NotificationError::template(format!("failed to register built-in templates: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_all_kinds_registered_in_both_languages() {
        let registry = TemplateRegistry::new().unwrap();
        for kind in MessageKind::ALL {
            assert!(registry.has_templates(kind), "missing templates: {:?}", kind);
        }
    }

    #[test]
    fn test_amount_formatting_fr_groups_with_spaces() {
        assert_eq!(format_amount_cfa(50000, Language::Fr), "50 000 FCFA");
        assert_eq!(format_amount_cfa(1250500, Language::Fr), "1 250 500 FCFA");
        assert_eq!(format_amount_cfa(999, Language::Fr), "999 FCFA");
        assert_eq!(format_amount_cfa(0, Language::Fr), "0 FCFA");
    }

    #[test]
    fn test_amount_formatting_en_groups_with_commas() {
        assert_eq!(format_amount_cfa(50000, Language::En), "50,000 FCFA");
        assert_eq!(format_amount_cfa(1000, Language::En), "1,000 FCFA");
    }

    #[test]
    fn test_date_formatting() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        assert_eq!(format_date(date, Language::Fr), "05/03/2026");
        assert_eq!(format_date(date, Language::En), "05 March 2026");
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(
            attendance_status_label(AttendanceStatus::Absent, Language::Fr),
            "absent(e)"
        );
        assert_eq!(
            attendance_status_label(AttendanceStatus::Late, Language::En),
            "late"
        );
    }

    #[test]
    fn test_receipt_render_carries_amount_and_method() {
        let registry = TemplateRegistry::new().unwrap();
        let data = json!({
            "student_name": "Amina Njoya",
            "fee_label": "Frais de scolarité",
            "amount": format_amount_cfa(50000, Language::Fr),
            "method": "Espèces",
            "receipt_number": "RCP-2026-0042",
        });

        let rendered = registry.render(MessageKind::Receipt, Language::Fr, &data).unwrap();
        assert!(rendered.body.contains("50 000 FCFA"));
        assert!(rendered.body.contains("Espèces"));
        assert!(rendered.subject.contains("RCP-2026-0042"));
    }

    #[test]
    fn test_bilingual_composite_has_both_segments() {
        let registry = TemplateRegistry::new().unwrap();
        let data_fr = json!({
            "student_name": "Paul Etoo",
            "fee_label": "Frais d'examen",
            "amount": format_amount_cfa(15000, Language::Fr),
            "due_date": "10/09/2026",
        });
        let data_en = json!({
            "student_name": "Paul Etoo",
            "fee_label": "Frais d'examen",
            "amount": format_amount_cfa(15000, Language::En),
            "due_date": "10 September 2026",
        });

        let rendered = registry
            .render_bilingual(MessageKind::Reminder, &data_fr, &data_en)
            .unwrap();
        assert!(rendered.body.contains("15 000 FCFA"));
        assert!(rendered.body.contains("15,000 FCFA"));
        assert!(rendered.body.contains("arrive à échéance"));
        assert!(rendered.body.contains("is due on"));
    }

    #[test]
    fn test_names_are_not_html_escaped() {
        let registry = TemplateRegistry::new().unwrap();
        let data = json!({
            "student_name": "N'Diaye Aïcha",
            "status_label": "absent(e)",
            "date": "12/05/2026",
            "class_name": "CM2 A",
            "marked_by": "M. Kamga",
        });

        let rendered = registry
            .render(MessageKind::Attendance, Language::Fr, &data)
            .unwrap();
        assert!(rendered.body.contains("N'Diaye Aïcha"));
        assert!(!rendered.body.contains("&#x27;"));
    }

    #[test]
    fn test_optional_notes_block() {
        let registry = TemplateRegistry::new().unwrap();
        let without_notes = json!({
            "student_name": "Paul",
            "status_label": "late",
            "date": "12 May 2026",
            "class_name": "Form 1",
            "marked_by": "Mr Tabi",
        });
        let rendered = registry
            .render(MessageKind::Attendance, Language::En, &without_notes)
            .unwrap();
        assert!(!rendered.body.contains("Notes:"));

        let with_notes = json!({
            "student_name": "Paul",
            "status_label": "late",
            "date": "12 May 2026",
            "class_name": "Form 1",
            "notes": "arrived 20 minutes late",
            "marked_by": "Mr Tabi",
        });
        let rendered = registry
            .render(MessageKind::Attendance, Language::En, &with_notes)
            .unwrap();
        assert!(rendered.body.contains("Notes: arrived 20 minutes late"));
    }
}
