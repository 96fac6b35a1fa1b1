//! Email notification channel implementation using SMTP

use crate::channels::{ChannelInfo, ChannelSender, DeliveryOutcome, OutboundMessage};
use crate::config::{EmailConfig, SupportConfig};
use crate::error::{NotificationError, Result};
use crate::types::ChannelKind;
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{error, info};

/// Email channel for sending notifications via SMTP
#[derive(Clone)]
pub struct EmailSender {
    config: EmailConfig,
    support: SupportConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_mailbox: Mailbox,
}

impl EmailSender {
    /// Create a new email sender with the given configuration
    pub fn new(config: &EmailConfig, support: &SupportConfig) -> Result<Self> {
        info!("Initializing email channel");

        let from_mailbox = format!("{} <{}>", config.from_name, config.from_email)
            .parse::<Mailbox>()
            .map_err(|e| NotificationError::config(format!("Invalid from email address: {}", e)))?;

        let mut transport_builder = if config.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host).map_err(|e| {
                NotificationError::config(format!("Failed to create SMTP relay: {}", e))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        transport_builder = transport_builder.port(config.smtp_port);

        if !config.smtp_username.is_empty() && !config.smtp_password.is_empty() {
            let creds =
                Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
            transport_builder = transport_builder.credentials(creds);
        }

        transport_builder =
            transport_builder.pool_config(PoolConfig::new().max_size(10).min_idle(2));
        transport_builder =
            transport_builder.timeout(Some(Duration::from_secs(config.timeout_seconds)));

        let transport = transport_builder.build();

        Ok(Self {
            config: config.clone(),
            support: support.clone(),
            transport,
            from_mailbox,
        })
    }

    /// Build the branded multipart message for a recipient address.
    fn build_message(&self, message: &OutboundMessage, recipient_email: &str) -> Result<Message> {
        let to_mailbox = recipient_email
            .parse::<Mailbox>()
            .map_err(|e| NotificationError::email(format!("Invalid recipient email: {}", e)))?;

        let mut builder = Message::builder()
            .from(self.from_mailbox.clone())
            .to(to_mailbox)
            .subject(&message.subject);

        if let Some(ref reply_to) = self.config.reply_to {
            let reply_to_mailbox = reply_to
                .parse::<Mailbox>()
                .map_err(|e| NotificationError::email(format!("Invalid reply-to email: {}", e)))?;
            builder = builder.reply_to(reply_to_mailbox);
        }

        let html = self.compose_html(message);
        let plain = self.compose_plain(message);

        builder
            .multipart(MultiPart::alternative_plain_html(plain, html))
            .map_err(|e| NotificationError::email(format!("Failed to build email message: {}", e)))
    }

    /// Branded HTML: header bar, detail table with the status accent color,
    /// optional WhatsApp click-to-chat button, support footer.
    fn compose_html(&self, message: &OutboundMessage) -> String {
        let accent = message.accent_color.unwrap_or("#0f766e");

        let mut rows = String::new();
        for (label, value) in &message.detail_rows {
            rows.push_str(&format!(
                "<tr><td style=\"padding:6px 12px;color:#475569;\">{}</td>\
                 <td style=\"padding:6px 12px;font-weight:600;color:{};\">{}</td></tr>",
                html_escape(label),
                accent,
                html_escape(value)
            ));
        }

        let detail_table = if rows.is_empty() {
            String::new()
        } else {
            format!(
                "<table style=\"border-collapse:collapse;margin:16px 0;background:#f8fafc;\
                 border-radius:8px;\">{}</table>",
                rows
            )
        };

        let whatsapp_button = match &message.whatsapp_link {
            Some(link) => format!(
                "<p style=\"margin:20px 0;\"><a href=\"{}\" \
                 style=\"background:#25d366;color:#ffffff;padding:10px 24px;\
                 border-radius:6px;text-decoration:none;\">WhatsApp</a></p>",
                link
            ),
            None => String::new(),
        };

        format!(
            "<html><body style=\"font-family:Arial,sans-serif;color:#0f172a;margin:0;\">\
             <div style=\"background:{accent};color:#ffffff;padding:16px 24px;\">\
             <h2 style=\"margin:0;\">{from_name}</h2></div>\
             <div style=\"padding:24px;\">\
             <p>{body}</p>\
             {detail_table}\
             {whatsapp_button}\
             </div>\
             <div style=\"background:#f1f5f9;color:#64748b;padding:12px 24px;font-size:12px;\">\
             {support_email} · {support_phone}\
             </div></body></html>",
            accent = accent,
            from_name = html_escape(&self.config.from_name),
            body = html_escape(&message.body).replace('\n', "<br>"),
            detail_table = detail_table,
            whatsapp_button = whatsapp_button,
            support_email = html_escape(&self.support.email),
            support_phone = html_escape(&self.support.phone),
        )
    }

    fn compose_plain(&self, message: &OutboundMessage) -> String {
        let mut plain = message.body.clone();
        if !message.detail_rows.is_empty() {
            plain.push_str("\n\n");
            for (label, value) in &message.detail_rows {
                plain.push_str(&format!("{}: {}\n", label, value));
            }
        }
        if let Some(link) = &message.whatsapp_link {
            plain.push_str(&format!("\nWhatsApp: {}\n", link));
        }
        plain.push_str(&format!(
            "\n--\n{} · {}\n",
            self.support.email, self.support.phone
        ));
        plain
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryOutcome> {
        if !self.config.enabled {
            return Ok(DeliveryOutcome::Disabled);
        }

        let recipient_email = match &message.recipient.email {
            Some(address) if !address.is_empty() => address.clone(),
            _ => return Ok(DeliveryOutcome::NotProvided),
        };

        let email = self.build_message(message, &recipient_email)?;

        match self.transport.send(email).await {
            Ok(_response) => {
                info!(
                    recipient = %recipient_email,
                    notification_type = %message.notification_type,
                    "Email sent"
                );
                Ok(DeliveryOutcome::Sent)
            }
            Err(e) => {
                error!(recipient = %recipient_email, "Failed to send email: {}", e);
                Err(NotificationError::email(format!("SMTP error: {}", e)))
            }
        }
    }

    async fn health_check(&self) -> Result<bool> {
        match self.transport.test_connection().await {
            Ok(is_connected) => Ok(is_connected),
            Err(e) => {
                error!("Email channel health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            name: "Email".to_string(),
            description: "SMTP email notifications".to_string(),
            enabled: self.config.enabled,
            rate_limit_per_minute: Some(self.config.rate_limit_per_minute),
        }
    }
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
