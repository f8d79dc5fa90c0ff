//! # Realtime Call Bridge - Main Application Entry Point
//!
//! Bridges telephony media streams (8 kHz μ-law over WebSocket) to a realtime
//! conversational AI session (24 kHz PCM16 over WebSocket).
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, optional TOML file, environment)
//! - **state**: Shared application state and call counters
//! - **audio**: μ-law codec, resampling, buffering and the outbound pacer
//! - **protocol**: Telephony and realtime AI wire messages
//! - **bridge**: The per-call state machine, transcript and outcome
//! - **integrations**: Realtime API client, caller directory, outcome sinks, call control
//! - **websocket**: The `/media` actor that wires a call to its sockets
//! - **health**: Liveness endpoint and unknown-path fallback
//! - **middleware**: Request logging
//! - **error**: Error types and HTTP error responses

mod audio;
mod bridge;
mod config;
mod error;
mod health;
mod integrations;
mod middleware;
mod protocol;
mod state;
mod websocket;

use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use integrations::Services;
use state::AppState;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting realtime-call-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        model = %config.realtime.model,
        frame_ms = config.audio.frame_ms,
        idle_timeout_secs = config.bridge.idle_timeout_secs,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    let services = Services::from_config(&config)?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, services)?;
    let shutdown_state = app_state.clone();
    info!(resample_ratio = app_state.transcoder.ratio(), "Audio transcoder ready");

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse order for responses
            .wrap(TracingLogger::default())
            .wrap(middleware::RequestLogging)
            .route("/health", web::get().to(health::health_check))
            .route("/media", web::get().to(websocket::media_stream))
            .default_service(web::to(health::not_found))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = shutdown_signal() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signals: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    let metrics = shutdown_state.metrics.snapshot();
    info!(
        uptime_secs = shutdown_state.get_uptime_seconds(),
        sessions_total = metrics.sessions_total,
        completed_calls = metrics.completed_calls,
        "Server stopped gracefully"
    );
    Ok(())
}

/// Structured console logging, filtered by `RUST_LOG`.
///
/// Defaults to `realtime_call_bridge=debug,actix_web=info` when `RUST_LOG` is unset.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_call_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on SIGTERM or SIGINT.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}
