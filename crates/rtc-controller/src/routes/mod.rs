//! HTTP routes for the RTC Controller.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::repositories::LedgerStore;
use crate::services::artifacts::ArtifactResolver;
use crate::services::credentials::CredentialIssuer;
use crate::services::gateway::RtcGateway;
use crate::services::{RoomRegistry, TaskEngine, WebhookReconciler};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    /// Ledger backend, used directly only by the readiness probe.
    pub ledger: Arc<dyn LedgerStore>,

    pub registry: RoomRegistry,

    pub engine: TaskEngine,

    pub webhooks: WebhookReconciler,
}

impl AppState {
    /// Wire the services onto one ledger, gateway and credential issuer.
    pub fn new(
        config: Config,
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn RtcGateway>,
        credentials: Arc<dyn CredentialIssuer>,
        artifacts: Option<Arc<dyn ArtifactResolver>>,
    ) -> Self {
        let engine = TaskEngine::new(
            ledger.clone(),
            gateway.clone(),
            credentials.clone(),
            artifacts.clone(),
        );
        let registry = RoomRegistry::new(ledger.clone(), gateway, credentials, engine.clone());
        let webhooks = WebhookReconciler::new(ledger.clone(), artifacts);

        Self {
            config,
            ledger,
            registry,
            engine,
            webhooks,
        }
    }
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - operational, unversioned
/// - `/api/v1/sessions` - session lookup
/// - `/api/v1/rooms/:room_id/...` - room lifecycle and tasks
/// - `/api/v1/webhooks/rtc` - provider callbacks
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let operational_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let api_routes = Router::new()
        .route("/api/v1/sessions", get(handlers::get_session))
        .route("/api/v1/rooms/:room_id/join", post(handlers::join_room))
        .route("/api/v1/rooms/:room_id/exit", post(handlers::exit_room))
        .route("/api/v1/rooms/:room_id/dismiss", post(handlers::dismiss_room))
        .route(
            "/api/v1/rooms/:room_id/remove-participant",
            post(handlers::remove_participant),
        )
        .route(
            "/api/v1/rooms/:room_id/recordings",
            post(handlers::start_recording),
        )
        .route(
            "/api/v1/rooms/:room_id/recordings/:task_id/stop",
            post(handlers::stop_recording),
        )
        .route(
            "/api/v1/rooms/:room_id/recordings/:task_id/check",
            post(handlers::check_recording),
        )
        .route(
            "/api/v1/rooms/:room_id/transcriptions",
            post(handlers::start_transcription),
        )
        .route(
            "/api/v1/rooms/:room_id/transcriptions/:task_id/stop",
            post(handlers::stop_transcription),
        )
        .route(
            "/api/v1/rooms/:room_id/tasks/:task_id",
            get(handlers::get_task),
        )
        .route("/api/v1/webhooks/rtc", post(handlers::receive_webhook))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees framework-level 404/405 too)
    operational_routes
        .merge(metrics_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
