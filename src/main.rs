//! Main binary for the EDUCAFRIC Notification Service
//!
//! Serves the notification subsystem over HTTP:
//! - synthetic test endpoints for every event type
//! - config and stats debug endpoints
//! - `/health` and `/metrics`
//! and runs the polling scheduler that drains the notification queue and
//! scans fee due dates.

use educafric_notification::{routes::create_router, NotificationService, PlatformConfig};

use axum::serve;
use clap::{Arg, Command};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let matches = create_cli().get_matches();
    let config = load_config(&matches)?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("configuration validation failed: {}", e))?;

    info!("Starting EDUCAFRIC Notification Service");
    info!(
        "Configuration: Server {}:{}",
        config.server.host, config.server.port
    );
    info!(
        "Enabled channels: Email={}, WhatsApp={}, PWA={}, SMS=false",
        config.email.enabled,
        config.whatsapp.is_configured(),
        config.pwa.enabled,
    );

    let cancellation_token = CancellationToken::new();

    let scheduler_enabled = config.scheduler.enabled;
    let host = config.server.host.clone();
    let port = config.server.port;

    let service = Arc::new(NotificationService::new(config).await.map_err(|e| {
        error!("Failed to initialize notification service: {}", e);
        anyhow::anyhow!(e.to_string())
    })?);

    if scheduler_enabled {
        info!("Starting polling scheduler");
        if let Err(e) = service.start_scheduler().await {
            warn!("Failed to start scheduler: {}, continuing without it", e);
        }
    }

    let app = create_router(service.clone());

    let addr = SocketAddr::new(
        host.parse()
            .map_err(|e| anyhow::anyhow!("invalid host address: {}", e))?,
        port,
    );

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!("Notification service started successfully on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Metrics: http://{}/metrics", addr);
    info!("Test surface: http://{}/api/test-notifications", addr);

    let server_task = tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            let server = serve(listener, app);

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!("Server error: {}", e);
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Server shutdown requested");
                }
            }
        }
    });

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    cancellation_token.cancel();

    if scheduler_enabled {
        if let Err(e) = service.stop_scheduler().await {
            warn!("Failed to stop scheduler gracefully: {}", e);
        }
    }

    if let Err(e) = server_task.await {
        error!("Server task error during shutdown: {}", e);
    }

    info!("EDUCAFRIC Notification Service stopped gracefully");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "educafric_notification=info,tower_http=info,axum=info,sqlx=warn,redis=warn".into()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    Ok(())
}

/// Create CLI argument parser
fn create_cli() -> Command {
    Command::new("educafric-notification-server")
        .version("1.0.0")
        .about("EDUCAFRIC Notification Service - multi-channel school notifications")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Server host address"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server port"),
        )
}

/// Load configuration from file, environment, and CLI overrides
fn load_config(matches: &clap::ArgMatches) -> anyhow::Result<PlatformConfig> {
    let mut config = if let Some(config_file) = matches.get_one::<String>("config") {
        info!("Loading configuration from file: {}", config_file);
        std::env::set_var("EDUCAFRIC_CONFIG_FILE", config_file);
        PlatformConfig::from_env()
            .map_err(|e| anyhow::anyhow!("failed to load configuration: {}", e))?
    } else {
        PlatformConfig::from_env().unwrap_or_else(|e| {
            warn!(
                "Failed to load configuration from environment: {}, using defaults",
                e
            );
            PlatformConfig::default()
        })
    };

    if let Some(host) = matches.get_one::<String>("host") {
        config.server.host = host.clone();
    }

    if let Some(port_str) = matches.get_one::<String>("port") {
        config.server.port = port_str
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid port number '{}': {}", port_str, e))?;
    }

    Ok(config)
}

/// Wait for shutdown signals
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_cli() {
        let cli = create_cli();
        let matches = cli.try_get_matches_from(vec![
            "educafric-notification-server",
            "--port",
            "9090",
        ]);
        assert!(matches.is_ok());

        let matches = matches.unwrap();
        assert_eq!(matches.get_one::<String>("port"), Some(&"9090".to_string()));
    }

    #[test]
    fn test_load_config_with_overrides() {
        let cli = create_cli();
        let matches = cli.get_matches_from(vec![
            "educafric-notification-server",
            "--host",
            "127.0.0.1",
            "--port",
            "9999",
        ]);

        let config = load_config(&matches).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn test_invalid_port_handling() {
        let cli = create_cli();
        let matches =
            cli.get_matches_from(vec!["educafric-notification-server", "--port", "invalid"]);

        let config = load_config(&matches);
        assert!(config.is_err());
    }
}
