use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tts_core::piper::{PiperBackend, PiperConfig};
use tts_core::{InferenceBackend, TtsEngine, TtsError};

use tts_server::config::{BackendKind, ServerConfig};
use tts_server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, max_concurrent={}, uploads={}",
        config.port,
        config.rate_limit_per_minute,
        config.max_concurrent,
        config.uploads_dir.display()
    );

    match config.backend {
        BackendKind::Piper => {
            let backend_config = PiperConfig {
                map_file: config.model_map.clone(),
                default_voice: config.default_voice.clone(),
            };
            info!("Loading Piper voices from {}", backend_config.map_file.display());
            let backend = tokio::task::spawn_blocking(move || PiperBackend::load(backend_config))
                .await?
                .map_err(TtsError::Init)?;
            let catalog = backend.voice_names();
            info!("Loaded {} Piper voices", catalog.len());
            serve(config.clone(), TtsEngine::with_backend(config.engine_config(catalog), backend)).await
        }
    }
}

async fn serve<B: InferenceBackend>(config: ServerConfig, engine: TtsEngine<B>) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.uploads_dir).await?;

    let engine = Arc::new(engine);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let app = build_router(AppState::new(Arc::clone(&engine), config))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&engine)))
        .await?;
    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, shutting the engine down so queued work
/// fails fast while open connections drain.
async fn shutdown_signal<B: InferenceBackend>(engine: Arc<TtsEngine<B>>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
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
                tracing::error!("Failed to listen for SIGTERM: {e}");
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

    info!("Shutdown signal received");
    engine.shutdown();
}
