use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use teloxide::types::Update;
use tracing::{debug, info, warn};

use crate::bot::AppState;
use crate::platform::telegram::incoming_from_update;

pub const LIVENESS_TEXT: &str = "Bot is running (Webhook mode)";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/webhook/{token}", post(webhook))
        .with_state(state)
}

async fn home() -> &'static str {
    LIVENESS_TEXT
}

/// Telegram pushes updates here. Anything that reaches the right token is
/// answered with `OK`, so Telegram never redelivers an update.
async fn webhook(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if token != state.config.telegram.bot_token {
        return (StatusCode::NOT_FOUND, "Not Found");
    }

    match serde_json::from_slice::<Update>(&body) {
        Ok(update) => match incoming_from_update(&update) {
            Some(msg) => {
                state.dispatch(msg).await;
            }
            None => debug!("Ignoring non-message update {:?}", update.id),
        },
        Err(e) => warn!("Undecodable webhook body ({} bytes): {}", body.len(), e),
    }

    (StatusCode::OK, "OK")
}

pub async fn serve<F>(state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Webhook server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    Ok(())
}
