use std::sync::Arc;

mod config;
mod controller;
mod gemini;
mod image;
mod models;
mod notify;
mod render;
mod server;
mod session;

use config::Config;
use gemini::GeminiClient;
use server::AppState;
use session::SessionStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let client = GeminiClient::new(&config)?;
    tracing::info!("using model {} at {}", config.model, client.endpoint());

    let state = AppState {
        sessions: SessionStore::new(config.session_ttl),
        analyzer: Arc::new(client),
    };
    let app = server::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
