//! # ASR Stream Server - Entry Point
//!
//! Starts three listeners that share one [`AppState`]:
//! - the HTTP admin API (health, metrics, runtime config)
//! - the websocket streaming listener
//! - the raw TCP streaming listener (optional)
//!
//! All of them stop on SIGINT / SIGTERM.

use actix_cors::Cors;
use actix_web::{middleware::from_fn, web, App, HttpServer};
use anyhow::{Context, Result};
use asr_stream_server::transcription::{build_recognizer, warmup, RecognizerHandle};
use asr_stream_server::transport::{raw, websocket};
use asr_stream_server::{configure_routes, middleware, AppConfig, AppState, StreamContext};
use std::path::Path;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting asr-stream-server v{}", env!("CARGO_PKG_VERSION"));
    let raw_addr = if config.streaming.raw_enabled {
        config.raw_addr()
    } else {
        "disabled".to_string()
    };
    info!(
        http = %config.http_addr(),
        websocket = %config.websocket_addr(),
        raw = %raw_addr,
        "Configuration loaded"
    );

    let recognizer = build_recognizer(&config)?;
    info!(backend = recognizer.name(), "Recognizer ready");
    warm_up_recognizer(&config, &recognizer).await;

    let app_state = AppState::new(config.clone());
    let stream_ctx = StreamContext::new(app_state.clone(), recognizer.clone());

    let ws_listener = TcpListener::bind(config.websocket_addr())
        .await
        .with_context(|| format!("failed to bind websocket listener on {}", config.websocket_addr()))?;
    let ws_task = tokio::spawn(websocket::serve(ws_listener, stream_ctx.clone()));

    let raw_task = if config.streaming.raw_enabled {
        let raw_listener = TcpListener::bind(config.raw_addr())
            .await
            .with_context(|| format!("failed to bind raw listener on {}", config.raw_addr()))?;
        Some(tokio::spawn(raw::serve(raw_listener, stream_ctx.clone())))
    } else {
        None
    };

    let bind_addr = config.http_addr();
    info!("Starting HTTP server on {}", bind_addr);

    let http_state = app_state.clone();
    let http_recognizer = recognizer.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(http_state.clone()))
            .app_data(web::Data::new(http_recognizer.clone()))
            .wrap(cors)
            .wrap(from_fn(middleware::record_metrics))
            .wrap(TracingLogger::default())
            .configure(configure_routes)
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind HTTP server on {}", bind_addr))?
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

    ws_task.abort();
    if let Some(raw_task) = raw_task {
        raw_task.abort();
    }

    let metrics = app_state.get_metrics_snapshot();
    info!(
        total_sessions = metrics.total_sessions,
        active_sessions = metrics.active_sessions,
        "Server stopped gracefully"
    );
    Ok(())
}

/// `RUST_LOG` wins; otherwise debug for this crate, info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "asr_stream_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

/// Run the configured warm-up file through a throw-away recognizer.
///
/// Failures are logged; the server starts either way.
async fn warm_up_recognizer(config: &AppConfig, recognizer: &RecognizerHandle) {
    let Some(path) = config.recognizer.warmup_file.clone() else {
        info!("No warm-up file configured, first chunk may take longer");
        return;
    };

    let sample_rate = config.audio.sample_rate;
    let recognizer = recognizer.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let samples = warmup::load_warmup_samples(Path::new(&path), sample_rate)?;
        Ok::<_, anyhow::Error>(warmup::warm_up(&recognizer, &samples))
    })
    .await;

    match outcome {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!("Skipping recognizer warm-up: {:#}", err),
        Err(err) => warn!("Recognizer warm-up task failed: {}", err),
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
