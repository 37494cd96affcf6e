//! RTC Controller
//!
//! Entry point. Loads configuration, chooses the ledger backend, wires the
//! provider clients and serves the HTTP API until SIGINT/SIGTERM.

use rtc_controller::config::Config;
use rtc_controller::observability::metrics::init_metrics_recorder;
use rtc_controller::repositories::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use rtc_controller::routes::{self, AppState};
use rtc_controller::services::artifacts::{ArtifactResolver, HttpArtifactResolver};
use rtc_controller::services::credentials::HmacCredentialIssuer;
use rtc_controller::services::gateway::HttpRtcGateway;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rtc_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting RTC Controller");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        region = %config.region,
        bind_address = %config.bind_address,
        sdk_app_id = config.sdk_app_id,
        recording_storage = config.recording_storage.is_some(),
        artifact_store = config.artifact_store.is_some(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to install metrics recorder: {}", e);
        e
    })?;

    let ledger: Arc<dyn LedgerStore> = match config.database_url.as_deref() {
        Some(database_url) => {
            info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .min_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
                .connect(&add_query_timeout(database_url, 5))
                .await
                .map_err(|e| {
                    error!("Failed to connect to database: {}", e);
                    e
                })?;

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    error!("Failed to run migrations: {}", e);
                    e
                })?;

            info!("Database connection established");
            Arc::new(PgLedgerStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, ledger is in-memory and will not survive restart");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    let gateway = Arc::new(HttpRtcGateway::new(&config)?);
    let credentials = Arc::new(HmacCredentialIssuer::new(
        config.sdk_app_id,
        config.sdk_secret.clone(),
        config.credential_expire_seconds,
    ));
    let artifacts: Option<Arc<dyn ArtifactResolver>> = match config.artifact_store.as_ref() {
        Some(store) => Some(Arc::new(HttpArtifactResolver::new(
            store,
            Duration::from_secs(config.request_timeout_seconds),
        )?)),
        None => {
            info!("No artifact store configured, recording results keep raw storage keys");
            None
        }
    };

    let bind_address = config.bind_address.clone();
    let drain_seconds = config.drain_seconds;

    let state = Arc::new(AppState::new(
        config,
        ledger,
        gateway,
        credentials,
        artifacts,
    ));
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("RTC Controller listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(drain_seconds))
        .await?;

    info!("RTC Controller shutdown complete");

    Ok(())
}

/// Returns once SIGINT or SIGTERM arrived and the drain period elapsed.
async fn shutdown_signal(drain_seconds: u64) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if drain_seconds > 0 {
        warn!("Draining connections for {} seconds...", drain_seconds);
        tokio::time::sleep(Duration::from_secs(drain_seconds)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (RTC_DRAIN_SECONDS=0)");
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
