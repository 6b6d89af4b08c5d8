use anyhow::{Context, Result};
use gallery_service::{
    start_api_server, AdminPolicy, AppState, Authenticator, Config, JwtIdentityProvider,
    NoopNotifier, NotificationDispatcher, Notifier, PgPhotoStore, S3ObjectStore, SesNotifier,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting gallery service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let photo_store = Arc::new(
        PgPhotoStore::new(&config.database)
            .await
            .context("Failed to initialize photo store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        photo_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize object store")?,
    );

    let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
        Arc::new(SesNotifier::new(&config.notifications, &config.s3.region).await)
    } else {
        info!("E-mail notifications disabled");
        Arc::new(NoopNotifier)
    };

    let policy = AdminPolicy::new(&config.auth.admin_emails);
    if policy.emails().is_empty() {
        warn!("No admin e-mails configured, moderation endpoints will reject every caller");
    }

    let notifications = NotificationDispatcher::new(
        notifier,
        policy.emails(),
        config.notifications.admin_console_url.clone(),
    );
    let identity_provider = Arc::new(JwtIdentityProvider::new(&config.auth));
    let authenticator = Authenticator::new(identity_provider, policy);

    // Create API state
    let api_state = AppState::new(
        photo_store,
        object_store,
        notifications,
        authenticator,
        config.submission.clone(),
        config.listing.clone(),
    );

    info!("Gallery service started successfully");

    // Serve until SIGINT/SIGTERM, then drain in-flight requests
    if let Err(e) = start_api_server(api_state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("Gallery service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
