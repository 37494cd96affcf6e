//! Test server harness for E2E testing
//!
//! Provides `TestRtcServer` for spawning real RTC Controller instances in
//! tests. The provider gateway and the artifact store are in-process mocks;
//! the ledger is in-memory unless a PostgreSQL pool is supplied.

use rtc_controller::config::Config;
use rtc_controller::observability::metrics::init_metrics_recorder;
use rtc_controller::repositories::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use rtc_controller::routes::{self, AppState};
use rtc_controller::services::artifacts::mock::MockArtifactResolver;
use rtc_controller::services::artifacts::ArtifactResolver;
use rtc_controller::services::credentials::HmacCredentialIssuer;
use rtc_controller::services::gateway::mock::MockGateway;
use sqlx::PgPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// SDK app id every test server signs credentials for.
pub const TEST_SDK_APP_ID: u64 = 1_400_000_001;

/// Builder for [`TestRtcServer`].
#[derive(Default)]
pub struct TestRtcServerBuilder {
    gateway: Option<MockGateway>,
    artifacts: Option<MockArtifactResolver>,
    pool: Option<PgPool>,
}

impl TestRtcServerBuilder {
    /// Use a pre-configured mock gateway (failure injection, running probes).
    pub fn gateway(mut self, gateway: MockGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Enable the artifact store, backed by a mock bucket.
    pub fn artifacts(mut self, artifacts: MockArtifactResolver) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Persist the ledger in PostgreSQL (typically a `#[sqlx::test]` pool).
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Bind to a random port on 127.0.0.1 and serve in the background.
    pub async fn spawn(self) -> Result<TestRtcServer, anyhow::Error> {
        let vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("RTC_REGION".to_string(), "test-region".to_string()),
            ("RTC_API_SECRET_ID".to_string(), "test-secret-id".to_string()),
            ("RTC_API_SECRET_KEY".to_string(), "test-secret-key".to_string()),
            ("RTC_SDK_APP_ID".to_string(), TEST_SDK_APP_ID.to_string()),
            ("RTC_SDK_SECRET".to_string(), "test-sdk-secret".to_string()),
            ("RTC_DRAIN_SECONDS".to_string(), "0".to_string()),
        ]);
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let ledger: Arc<dyn LedgerStore> = match self.pool {
            Some(pool) => Arc::new(PgLedgerStore::new(pool)),
            None => Arc::new(InMemoryLedgerStore::new()),
        };
        let gateway = Arc::new(self.gateway.unwrap_or_default());
        let credentials = Arc::new(HmacCredentialIssuer::new(
            config.sdk_app_id,
            config.sdk_secret.clone(),
            config.credential_expire_seconds,
        ));
        let artifacts = self.artifacts.map(Arc::new);
        let resolver = artifacts
            .clone()
            .map(|a| a as Arc<dyn ArtifactResolver>);

        // The global recorder can only be installed once per process; later
        // servers get a standalone recorder instead.
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                PrometheusBuilder::new().build_recorder().handle()
            }
        };

        let state = Arc::new(AppState::new(
            config.clone(),
            ledger.clone(),
            gateway.clone(),
            credentials.clone(),
            resolver,
        ));
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(TestRtcServer {
            addr,
            config,
            ledger,
            gateway,
            credentials,
            artifacts,
            handle,
        })
    }
}

/// A running RTC Controller for E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> Result<(), anyhow::Error> {
///     let server = TestRtcServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRtcServer {
    addr: SocketAddr,
    config: Config,
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<MockGateway>,
    credentials: Arc<HmacCredentialIssuer>,
    artifacts: Option<Arc<MockArtifactResolver>>,
    handle: JoinHandle<()>,
}

impl TestRtcServer {
    /// Spawn with an in-memory ledger, an always-succeeding gateway and no
    /// artifact store.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::builder().spawn().await
    }

    pub fn builder() -> TestRtcServerBuilder {
        TestRtcServerBuilder::default()
    }

    /// Base URL, e.g. `http://127.0.0.1:41234`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Direct ledger access, for asserting on state the API does not expose
    /// (e.g. the audit log).
    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn gateway(&self) -> &MockGateway {
        &self.gateway
    }

    /// The signer the server issues credentials with, for verifying them.
    pub fn credentials(&self) -> &HmacCredentialIssuer {
        &self.credentials
    }

    pub fn artifacts(&self) -> Option<&MockArtifactResolver> {
        self.artifacts.as_deref()
    }
}

impl Drop for TestRtcServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
