//! Lyve ⇄ HikCentral identity bridge.
//!
//! Keeps tenant identity records in Lyve and person records in a HikCentral
//! appliance in step, and issues access QR codes.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                       BRIDGE                          │
//!                       │                                                       │
//!   Lyve request        │  ┌─────────┐    ┌───────────┐    ┌────────────────┐  │
//!   ────────────────────┼─▶│  http   │───▶│ residents │───▶│ circuit        │  │
//!                       │  │ + auth  │    │  service  │    │ breaker        │  │
//!                       │  └─────────┘    └─────┬─────┘    └───────┬────────┘  │
//!                       │                       │                  │           │
//!                       │                       ▼                  ▼           │
//!                       │                ┌────────────┐    ┌────────────────┐  │    HikCentral
//!                       │                │  registry  │    │ hikcentral     │──┼──▶ OpenAPI
//!                       │                │ (snapshot) │    │ client+signing │  │    gateway
//!                       │                └────────────┘    └────────────────┘  │
//!                       │                                                       │
//!                       │  config · observability · lifecycle                   │
//!                       └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use lyve_bridge::config::{load_config, load_from_env};
use lyve_bridge::lifecycle::signals::spawn_signal_handler;
use lyve_bridge::observability::{logging, metrics};
use lyve_bridge::{Application, Shutdown};

#[derive(Parser)]
#[command(name = "lyve-bridge", version, about = "Lyve to HikCentral identity bridge")]
struct Args {
    /// TOML configuration file. Without it, defaults plus environment are used.
    #[arg(short, long, env = "LYVE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "lyve-bridge starting");
    tracing::info!(
        config_file = ?args.config,
        bind_address = %config.server.bind_address,
        hikcentral = %config.hikcentral.base_url,
        failure_threshold = config.circuit_breaker.failure_threshold,
        recovery_timeout_secs = config.circuit_breaker.recovery_timeout_secs,
        redis = config.circuit_breaker.redis_url.is_some(),
        require_api_key = config.auth.require_api_key,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = Application::build(config).await?;
    let listener = app.bind().await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    spawn_signal_handler(shutdown.clone());

    app.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
