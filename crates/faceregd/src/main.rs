use anyhow::{Context, Result};
use facereg_core::{CosineMatcher, ImageDecoder};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;
mod service;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("faceregd starting");

    let config = config::Config::load().context("failed to load configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        data_file = %config.data_file.display(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    let store = facereg_store::open_store(config.firestore()?, config.data_file.clone()).await;

    // Models load on first use or when /health is hit.
    let engine = Arc::new(engine::Engine::onnx(
        config.scrfd_model_path(),
        config.arcface_model_path(),
        config.max_detect_width,
    ));

    let service = Arc::new(service::FaceService::new(
        engine,
        store,
        ImageDecoder::new(config.temp_dir.clone()),
        CosineMatcher::new(config.match_threshold),
    ));
    let app = api::router(service, config.max_body_bytes);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "faceregd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("faceregd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
