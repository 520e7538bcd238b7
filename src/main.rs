//! # Voice Turn Agent - Main Application Entry Point
//!
//! Runs an Actix-web server that starts and stops voice agent sessions. Each
//! session joins a media room, listens to one designated participant and
//! answers every utterance through a speech-to-text → language model →
//! text-to-speech pipeline, handling interruptions and reconnects on the way.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **room**: media room client trait and its WebSocket implementation
//! - **audio**: PCM buffering and wire/WAV encoding
//! - **providers**: STT, LLM and TTS adapters
//! - **agent**: session lifecycle, turn state machine and orchestration
//! - **metrics**: per-session latency accounting
//! - **state / health / middleware / handlers**: the HTTP surface
//! - **error**: domain errors and the HTTP error envelope

mod agent;
mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod metrics;
mod middleware;
mod providers;
mod room;
mod state;

#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use agent::SessionRegistry;
use anyhow::Result;
use config::AppConfig;
use error::AppError;
use providers::ConfiguredProviders;
use room::WsRoomConnector;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ## Startup sequence:
/// 1. Load `.env`, set up logging
/// 2. Load and validate configuration
/// 3. Build the session registry (room connector + provider factory)
/// 4. Serve HTTP until SIGINT/SIGTERM, then end every live session
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        stt = %config.providers.stt.provider,
        llm = %config.providers.llm.provider,
        tts = %config.providers.tts.provider,
        room_url = %config.room.url,
        "Configuration loaded"
    );

    let registry = Arc::new(SessionRegistry::new(
        Arc::new(WsRoomConnector::new(config.room.clone())),
        Arc::new(ConfiguredProviders::new(
            config.providers.clone(),
            config.room.sample_rate,
        )),
        config.clone(),
    ));
    let app_state = AppState::new(config.clone(), registry.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Malformed JSON bodies get the same error envelope as everything else.
        let json_config = web::JsonConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into());

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(json_config)
            .wrap(cors)
            .wrap(middleware::RequestTelemetry)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/sessions", web::post().to(handlers::create_session))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/{session_id}", web::get().to(handlers::get_session))
                    .route("/sessions/{session_id}", web::delete().to(handlers::end_session))
                    .route(
                        "/sessions/{session_id}/metrics",
                        web::get().to(handlers::get_session_metrics),
                    ),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .disable_signals()
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
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    registry.shutdown_all().await;
    info!("Server stopped gracefully");
    Ok(())
}

/// Structured logging to stdout. `RUST_LOG` overrides the default filter
/// (`voice_turn_agent=debug,actix_web=info`).
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_turn_agent=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
