//! Partner Trust Plane Server Binary
//!
//! Runs the HTTP server for partner certificate trust and API-key issuance.

use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use partner_trust_plane::{create_router, AppState, PlaneConfig, TracingEventSink};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match PlaneConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        name = ?config.name,
        port = config.port,
        max_chain_depth = config.max_chain_depth,
        apikey_length = config.apikey_length,
        "Starting partner trust plane"
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let state = Arc::new(AppState::from_config(config, Arc::new(TracingEventSink)));
    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind to address");
            return ExitCode::FAILURE;
        }
    };

    info!(addr = %addr, "Partner trust plane listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
