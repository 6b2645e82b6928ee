use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::conversation_store::ConversationError;
use crate::types::{parse_json_body, parse_path_id, ApiError, CreateThreadRequest, CreateUserRequest};
use crate::{ForkchatServerState, DEFAULT_THREAD_TITLE};

pub(crate) async fn handle_create_user(
    State(state): State<Arc<ForkchatServerState>>,
    body: Bytes,
) -> Response {
    let request = match parse_json_body::<CreateUserRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let username = request.username.trim();
    if username.is_empty() {
        return ApiError::bad_request("invalid_username", "username must not be empty")
            .into_response();
    }

    match state.config.conversations.create_user(username) {
        Ok(user) => {
            tracing::info!(user_id = user.id, "user created");
            (
                StatusCode::CREATED,
                Json(json!({ "message": "User created", "user_id": user.id })),
            )
                .into_response()
        }
        Err(ConversationError::Conflict(_)) => {
            ApiError::bad_request("user_exists", "User exists").into_response()
        }
        Err(error) => ApiError::from(error).into_response(),
    }
}

pub(crate) async fn handle_create_thread(
    State(state): State<Arc<ForkchatServerState>>,
    body: Bytes,
) -> Response {
    let request = match parse_json_body::<CreateThreadRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or(DEFAULT_THREAD_TITLE);

    match state.config.conversations.create_thread(request.user_id, title) {
        Ok(thread) => Json(json!({ "thread_id": thread.id, "title": thread.title })).into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}

pub(crate) async fn handle_list_threads(
    State(state): State<Arc<ForkchatServerState>>,
    AxumPath(user_id): AxumPath<String>,
) -> Response {
    let user_id = match parse_path_id(&user_id, "user id") {
        Ok(user_id) => user_id,
        Err(error) => return error.into_response(),
    };
    match state.config.conversations.list_threads(user_id) {
        Ok(threads) => Json(threads).into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}
