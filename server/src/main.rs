use std::{net::SocketAddr, sync::Arc};

use engine_core::{EngineConfig, ElevenLabsEngine};
use tokio::net::TcpListener;
use tracing::info;

use server::{app, config::ServerConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the filter reads RUST_LOG.
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting call speech bridge...");

    let config = ServerConfig::from_env();
    let engine_config = EngineConfig::from_env()?;
    info!(
        "Engine configured: voice={}, model={}, sample_rate={}",
        engine_config.voice_id, engine_config.model_id, engine_config.sample_rate
    );
    let engine = Arc::new(ElevenLabsEngine::new(engine_config));

    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, clear_on_barge_in={}",
        config.port, config.rate_limit_per_minute, config.clear_on_barge_in
    );
    if let Some(url) = &config.call_logic_url {
        info!("New calls will be announced to {url}");
    }

    let port = config.port;
    let state = AppState::new(config, engine);
    let app = app(state)?;

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr} (media stream at ws://{addr}/media)");
    axum::serve(listener, app).await?;
    Ok(())
}
