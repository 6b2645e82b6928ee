//! Server bootstrap and router wiring.
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use crate::branch_runtime::handle_branch;
use crate::chat_runtime::{handle_chat_history, handle_chat_post, handle_edit_message};
use crate::thread_runtime::{handle_create_thread, handle_create_user, handle_list_threads};
use crate::types::ApiError;
use crate::{ForkchatServerConfig, ForkchatServerState};

pub(crate) const USERS_ENDPOINT: &str = "/users";
pub(crate) const THREADS_ENDPOINT: &str = "/threads";
pub(crate) const USER_THREADS_ENDPOINT: &str = "/threads/{user_id}";
pub(crate) const CHAT_ENDPOINT: &str = "/chat/{thread_id}";
pub(crate) const EDIT_ENDPOINT: &str = "/edit/{msg_id}";
pub(crate) const BRANCH_ENDPOINT: &str = "/branch";
pub(crate) const HEALTH_ENDPOINT: &str = "/healthz";

/// Binds `config.bind` and serves until ctrl-c.
pub async fn run_forkchat_server(config: ForkchatServerConfig) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind forkchat server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound forkchat server address")?;
    tracing::info!(addr = %local_addr, "forkchat server listening");

    let app = build_forkchat_router(Arc::new(ForkchatServerState::new(config)));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("forkchat server exited unexpectedly")?;
    tracing::info!("forkchat server stopped");
    Ok(())
}

pub fn build_forkchat_router(state: Arc<ForkchatServerState>) -> Router {
    Router::new()
        .route(USERS_ENDPOINT, post(handle_create_user))
        .route(THREADS_ENDPOINT, post(handle_create_thread))
        .route(USER_THREADS_ENDPOINT, get(handle_list_threads))
        .route(CHAT_ENDPOINT, post(handle_chat_post).get(handle_chat_history))
        .route(EDIT_ENDPOINT, put(handle_edit_message))
        .route(BRANCH_ENDPOINT, post(handle_branch))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(state)
}

async fn handle_health(State(state): State<Arc<ForkchatServerState>>) -> Response {
    match state.config.checkpoints.thread_ids() {
        Ok(ids) => Json(json!({
            "status": "ok",
            "checkpoint_threads": ids.len(),
        }))
        .into_response(),
        Err(error) => ApiError::unavailable(error.to_string()).into_response(),
    }
}
