//! Configuration module for the notification service
//!
//! This module provides configuration structures and defaults for all
//! notification channels and service settings. The whole tree is loaded once
//! at process start and treated as read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::types::{ChannelKind, EventType, Language};

/// Main configuration structure for the notification service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration for recipient-lookup caching
    pub redis: RedisConfig,

    /// Email (SMTP) configuration
    pub email: EmailConfig,

    /// WhatsApp Business Cloud API configuration
    pub whatsapp: WhatsappConfig,

    /// In-app (PWA) notification configuration
    pub pwa: PwaConfig,

    /// Per-event-type auto-notification toggles
    pub auto_notify: AutoNotifyConfig,

    /// Polling scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Retry configuration for failed queue drains
    pub retry: RetryConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Support contact identifiers rendered into message footers
    pub support: SupportConfig,

    /// Fallback language for recipients without a stored preference
    pub default_language: Language,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub timeout_seconds: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub postgres_url: String,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
    pub cache_ttl_seconds: u64,
    pub connection_timeout_seconds: u64,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_use_tls: bool,
    pub from_email: String,
    pub from_name: String,
    pub reply_to: Option<String>,
    pub timeout_seconds: u64,
    pub rate_limit_per_minute: u32,
}

/// WhatsApp Business Cloud API configuration.
///
/// A missing phone-number id or access token leaves the channel unconfigured:
/// sends report `not_provided` instead of erroring, matching the platform's
/// silent no-op behaviour when credentials are absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsappConfig {
    pub enabled: bool,
    pub phone_number_id: String,
    pub access_token: String,
    /// Overridable for tests pointing at a mock server.
    pub api_base_url: String,
    pub timeout_seconds: u64,
    pub rate_limit_per_minute: u32,
}

impl WhatsappConfig {
    pub fn is_configured(&self) -> bool {
        self.enabled && !self.phone_number_id.is_empty() && !self.access_token.is_empty()
    }
}

/// In-app notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwaConfig {
    pub enabled: bool,
}

/// Per-event-type auto-notification toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoNotifyConfig {
    pub attendance: bool,
    pub grades: bool,
    pub payments: bool,
    pub geolocation: bool,
    pub online_classes: bool,
    pub timetable: bool,
    pub messages: bool,
}

impl AutoNotifyConfig {
    pub fn enabled_for(&self, event_type: EventType) -> bool {
        match event_type {
            EventType::Attendance => self.attendance,
            EventType::Grades => self.grades,
            EventType::Payments => self.payments,
            EventType::Geolocation => self.geolocation,
            EventType::OnlineClasses => self.online_classes,
            EventType::Timetable => self.timetable,
            EventType::Messages => self.messages,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Initial delay before the first tick.
    pub warmup_delay_seconds: u64,
    /// Interval between drain-and-rescan cycles.
    pub poll_interval_seconds: u64,
    /// Maximum queue rows claimed per drain.
    pub batch_size: u32,
    /// An `in_progress` row older than this is considered abandoned and
    /// becomes claimable again.
    pub lease_timeout_minutes: i64,
    /// How far ahead the upcoming-due scan looks.
    pub reminder_lead_days: i64,
    pub worker_threads: usize,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub backoff_multiplier: f64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default_per_minute: u32,
    pub channel_limits: HashMap<String, u32>,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub namespace: String,
    pub histogram_buckets: Vec<f64>,
}

/// Support contact identifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportConfig {
    pub phone: String,
    pub email: String,
    pub timezone: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            email: EmailConfig::default(),
            whatsapp: WhatsappConfig::default(),
            pwa: PwaConfig::default(),
            auto_notify: AutoNotifyConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            metrics: MetricsConfig::default(),
            support: SupportConfig::default(),
            default_language: Language::Fr,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8087,
            workers: None,
            max_connections: 1000,
            timeout_seconds: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            max_pool_size: 20,
            min_pool_size: 5,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("REDIS_URL").unwrap_or_default(),
            key_prefix: "educafric:notify:".to_string(),
            cache_ttl_seconds: 3600,
            connection_timeout_seconds: 5,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            smtp_port: std::env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .unwrap_or(587),
            smtp_username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            smtp_password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            smtp_use_tls: std::env::var("SMTP_USE_TLS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            from_email: std::env::var("FROM_EMAIL")
                .unwrap_or_else(|_| "no-reply@educafric.com".to_string()),
            from_name: std::env::var("FROM_NAME").unwrap_or_else(|_| "EDUCAFRIC".to_string()),
            reply_to: std::env::var("REPLY_TO_EMAIL").ok(),
            timeout_seconds: 30,
            rate_limit_per_minute: 100,
        }
    }
}

impl Default for WhatsappConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            phone_number_id: std::env::var("WHATSAPP_PHONE_NUMBER_ID").unwrap_or_default(),
            access_token: std::env::var("WHATSAPP_ACCESS_TOKEN").unwrap_or_default(),
            api_base_url: std::env::var("WHATSAPP_API_BASE_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com/v18.0".to_string()),
            timeout_seconds: 30,
            rate_limit_per_minute: 60,
        }
    }
}

impl Default for PwaConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for AutoNotifyConfig {
    fn default() -> Self {
        Self {
            attendance: true,
            grades: true,
            payments: true,
            geolocation: true,
            online_classes: true,
            timetable: true,
            messages: true,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warmup_delay_seconds: 30,
            poll_interval_seconds: 3600,
            batch_size: 50,
            lease_timeout_minutes: 15,
            reminder_lead_days: 3,
            worker_threads: num_cpus::get(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_seconds: 60,
            max_delay_seconds: 3600,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut channel_limits = HashMap::new();
        channel_limits.insert("email".to_string(), 100);
        channel_limits.insert("whatsapp".to_string(), 60);
        channel_limits.insert("pwa".to_string(), 1000);

        Self {
            enabled: true,
            default_per_minute: 100,
            channel_limits,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/metrics".to_string(),
            namespace: "educafric_notification".to_string(),
            histogram_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            phone: std::env::var("SUPPORT_PHONE").unwrap_or_else(|_| "+237657004011".to_string()),
            email: std::env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@educafric.com".to_string()),
            timezone: "Africa/Douala".to_string(),
        }
    }
}

impl PlatformConfig {
    /// Load configuration from environment variables and config file
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut cfg = config::Config::builder();

        // Start with default configuration
        cfg = cfg.add_source(config::Config::try_from(&PlatformConfig::default())?);

        // Add environment variables with prefix
        cfg = cfg.add_source(
            config::Environment::with_prefix("EDUCAFRIC")
                .separator("__")
                .try_parsing(true),
        );

        // Add config file if it exists
        if let Ok(config_file) = std::env::var("EDUCAFRIC_CONFIG_FILE") {
            cfg = cfg.add_source(config::File::with_name(&config_file).required(false));
        }

        cfg.build()?.try_deserialize()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.email.enabled {
            if self.email.smtp_host.is_empty() {
                return Err("SMTP host is required when email is enabled".to_string());
            }
            if self.email.from_email.is_empty() {
                return Err("From email is required when email is enabled".to_string());
            }
        }

        if self.scheduler.batch_size == 0 {
            return Err("Scheduler batch size must be greater than 0".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("Max retry attempts must be greater than 0".to_string());
        }

        if self.retry.backoff_multiplier <= 1.0 {
            return Err("Backoff multiplier must be greater than 1.0".to_string());
        }

        Ok(())
    }

    /// Get timeout duration for the specified operation
    pub fn get_timeout(&self, operation: &str) -> Duration {
        let seconds = match operation {
            "email" => self.email.timeout_seconds,
            "whatsapp" => self.whatsapp.timeout_seconds,
            "server" => self.server.timeout_seconds,
            _ => 30,
        };
        Duration::from_secs(seconds)
    }

    /// Check if a delivery channel is enabled.
    ///
    /// SMS is permanently disabled at the platform level: no configuration
    /// can turn it on, and senders always report `not_provided` for it.
    pub fn is_channel_enabled(&self, channel: ChannelKind) -> bool {
        match channel {
            ChannelKind::Email => self.email.enabled,
            ChannelKind::Whatsapp => self.whatsapp.enabled,
            ChannelKind::Pwa => self.pwa.enabled,
            ChannelKind::Sms => false,
        }
    }

    /// Per-minute quota for a channel, falling back to the default.
    pub fn channel_rate_limit(&self, channel: ChannelKind) -> u32 {
        self.rate_limit
            .channel_limits
            .get(&channel.to_string())
            .copied()
            .unwrap_or(self.rate_limit.default_per_minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_config() {
        let config = PlatformConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8087);
        assert!(config.email.enabled);
        assert!(config.pwa.enabled);
        assert_eq!(config.scheduler.warmup_delay_seconds, 30);
        assert_eq!(config.scheduler.poll_interval_seconds, 3600);
        assert_eq!(config.scheduler.batch_size, 50);
        assert_eq!(config.default_language, Language::Fr);
    }

    #[test]
    #[serial]
    fn test_config_validation() {
        let config = PlatformConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid_config = config;
        invalid_config.server.port = 0;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_sms_is_never_enabled() {
        let config = PlatformConfig::default();
        assert!(!config.is_channel_enabled(ChannelKind::Sms));
    }

    #[test]
    #[serial]
    fn test_whatsapp_configured_requires_credentials() {
        let mut config = WhatsappConfig {
            enabled: true,
            phone_number_id: String::new(),
            access_token: String::new(),
            api_base_url: "https://graph.facebook.com/v18.0".to_string(),
            timeout_seconds: 30,
            rate_limit_per_minute: 60,
        };
        assert!(!config.is_configured());

        config.phone_number_id = "1234567890".to_string();
        config.access_token = "token".to_string();
        assert!(config.is_configured());

        config.enabled = false;
        assert!(!config.is_configured());
    }

    #[test]
    #[serial]
    fn test_auto_notify_toggles() {
        let mut toggles = AutoNotifyConfig::default();
        assert!(toggles.enabled_for(EventType::Attendance));

        toggles.grades = false;
        assert!(!toggles.enabled_for(EventType::Grades));
        assert!(toggles.enabled_for(EventType::Payments));
    }

    #[test]
    #[serial]
    fn test_channel_rate_limit_fallback() {
        let config = PlatformConfig::default();
        assert_eq!(config.channel_rate_limit(ChannelKind::Email), 100);
        assert_eq!(config.channel_rate_limit(ChannelKind::Whatsapp), 60);
        // SMS has no dedicated entry so the default applies.
        assert_eq!(
            config.channel_rate_limit(ChannelKind::Sms),
            config.rate_limit.default_per_minute
        );
    }

    #[test]
    #[serial]
    fn test_timeout_getter() {
        let config = PlatformConfig::default();
        assert_eq!(config.get_timeout("email"), Duration::from_secs(30));
        assert_eq!(config.get_timeout("unknown"), Duration::from_secs(30));
    }
}
