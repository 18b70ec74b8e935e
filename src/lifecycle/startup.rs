//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Bind the listener and serve until shutdown
//! - Persist the registry snapshot on the way out
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, except an unreachable Redis,
//!   which degrades breaker state to this process only
//! - Subsystems initialize in order, not concurrently
//! - Listener binds last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::{BridgeConfig, CircuitBreakerConfig};
use crate::hikcentral::{ClientError, HikCentralClient};
use crate::http::{AppState, HttpServer};
use crate::resilience::{CircuitBreaker, MemoryStore, RedisStore, StateStore};
use crate::residents::{ResidentRegistry, ResidentService};
use crate::signing::RequestSigner;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("HikCentral client: {0}")]
    Client(#[from] ClientError),

    #[error("resident snapshot: {0}")]
    Snapshot(#[source] std::io::Error),

    #[error("bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server: {0}")]
    Serve(#[source] std::io::Error),
}

/// How long startup waits for Redis before falling back to memory.
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Fully wired bridge, ready to serve.
pub struct Application {
    config: BridgeConfig,
    server: HttpServer,
    registry: Arc<ResidentRegistry>,
    breaker: Arc<CircuitBreaker>,
}

impl Application {
    /// Build every subsystem from a validated config.
    pub async fn build(config: BridgeConfig) -> Result<Self, StartupError> {
        let signer = Arc::new(RequestSigner::from_config(&config.hikcentral));
        let client = Arc::new(HikCentralClient::new(&config.hikcentral, signer)?);

        let store = breaker_store(&config.circuit_breaker).await;
        let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker, store));
        tracing::info!(
            failure_threshold = breaker.failure_threshold(),
            recovery_timeout_secs = breaker.recovery_timeout_secs(),
            store = breaker.store_kind(),
            "Circuit breaker initialized"
        );

        let registry = Arc::new(match &config.residents.snapshot_path {
            Some(path) => ResidentRegistry::load_from_file(path).map_err(StartupError::Snapshot)?,
            None => ResidentRegistry::new(None),
        });

        let service = Arc::new(ResidentService::new(
            client,
            breaker.clone(),
            registry.clone(),
            config.residents.clone(),
        ));
        let state = AppState::new(service, config.auth.clone());
        let server = HttpServer::new(&config.server, state);

        Ok(Self {
            config,
            server,
            registry,
            breaker,
        })
    }

    pub fn router(&self) -> axum::Router {
        self.server.router()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, StartupError> {
        let address = &self.config.server.bind_address;
        TcpListener::bind(address)
            .await
            .map_err(|source| StartupError::Bind {
                address: address.clone(),
                source,
            })
    }

    /// Serve on `listener` until `shutdown` fires, then save the registry.
    ///
    /// Subscribe before installing signal handlers so no signal is missed.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), StartupError> {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        tracing::info!(address = ?local, "Listening for connections");

        let served = self.server.run(listener, shutdown).await;

        if let Err(e) = self.registry.save_to_file() {
            tracing::error!(error = %e, "Failed to save resident registry snapshot");
        }
        served.map_err(StartupError::Serve)
    }
}

/// Shared Redis store when configured and reachable, otherwise process memory.
async fn breaker_store(config: &CircuitBreakerConfig) -> Arc<dyn StateStore> {
    let Some(url) = config.redis_url.as_deref() else {
        return Arc::new(MemoryStore::new());
    };
    match RedisStore::connect(url, REDIS_CONNECT_TIMEOUT).await {
        Ok(store) => {
            tracing::info!("Connected to Redis for circuit breaker state");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Redis unavailable, circuit breaker state is local to this process"
            );
            Arc::new(MemoryStore::new())
        }
    }
}
