//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit, metrics)
//! - Guard `/api/*` with the API key check
//! - Serve until the shutdown signal fires

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{AuthConfig, ServerConfig};
use crate::http::{auth, handlers};
use crate::observability::metrics;
use crate::residents::ResidentService;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ResidentService>,
    pub auth: Arc<AuthConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: Arc<ResidentService>, auth: AuthConfig) -> Self {
        Self {
            service,
            auth: Arc::new(auth),
            started_at: Instant::now(),
        }
    }
}

/// HTTP server for the bridge API.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &ServerConfig, state: AppState) -> Self {
        Self {
            router: build_router(config, state),
        }
    }

    /// Router with every layer applied, for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until a shutdown signal arrives.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &ServerConfig, state: AppState) -> Router {
    let api = Router::new()
        .route("/residents/check", post(handlers::check_resident))
        .route("/residents", post(handlers::create_resident))
        .route("/residents/batch", post(handlers::batch_create_residents))
        .route("/residents/sync/{person_id}", post(handlers::sync_resident))
        .route(
            "/residents/{owner_id}/{unit_id}",
            get(handlers::get_resident)
                .put(handlers::update_resident)
                .delete(handlers::delete_resident),
        )
        .route(
            "/residents/{owner_id}/{unit_id}/qrcode",
            post(handlers::generate_qr_code),
        )
        .route("/faces/validate", post(handlers::validate_face))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::api_key_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(middleware::from_fn(track_metrics))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http",
                method = %request.method(),
                path = %request.uri().path(),
                request_id
            )
        }))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::record_http_request(&method, response.status().as_u16(), start);
    response
}
