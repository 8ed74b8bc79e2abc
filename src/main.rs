mod backend;
mod config;
mod entity;
mod error;
mod fallback;
mod http;
mod pipeline;
mod store;
mod utils;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    let store = store::ConversationStore::new(&config.data_dir).await?;
    let backend = backend::create_model_backend(&config)?;
    let pipeline = pipeline::ChatPipeline::new(store.clone(), backend);

    let router = http::create_router(Arc::new(http::AppState { store, pipeline }));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on {}", config.bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}
