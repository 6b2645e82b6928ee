//! Chat turns and relational message history.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use forkchat_agent::RunInput;
use forkchat_ai::Message;
use forkchat_checkpoint::ThreadId;
use serde_json::json;

use crate::conversation_store::TurnRole;
use crate::types::{parse_json_body, parse_path_id, ApiError, ChatRequestBody, EditMessageRequest};
use crate::ForkchatServerState;

/// Rejects blank input and input longer than `max_input_chars`.
pub(crate) fn validate_input_text(
    text: &str,
    field: &'static str,
    max_input_chars: usize,
) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::bad_request(
            "empty_input",
            format!("{field} must not be empty"),
        ));
    }
    validate_input_length(text, field, max_input_chars)
}

pub(crate) fn validate_input_length(
    text: &str,
    field: &'static str,
    max_input_chars: usize,
) -> Result<(), ApiError> {
    let chars = text.chars().count();
    if chars > max_input_chars {
        return Err(ApiError::payload_too_large(format!(
            "{field} has {chars} characters; limit is {max_input_chars}"
        )));
    }
    Ok(())
}

pub(crate) async fn handle_chat_post(
    State(state): State<Arc<ForkchatServerState>>,
    AxumPath(thread_id): AxumPath<String>,
    body: Bytes,
) -> Response {
    match chat_turn(&state, &thread_id, &body).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn chat_turn(
    state: &ForkchatServerState,
    raw_thread_id: &str,
    body: &Bytes,
) -> Result<Response, ApiError> {
    let thread_id = parse_path_id(raw_thread_id, "thread id")?;
    let request = parse_json_body::<ChatRequestBody>(body)?;
    validate_input_text(&request.message, "message", state.config.max_input_chars)?;

    let conversations = &state.config.conversations;
    conversations.reserve_thread_id(thread_id)?;
    let _display_guard = state.lock_thread(thread_id).await;
    let output = state
        .config
        .engine
        .run(
            &ThreadId::from(thread_id),
            RunInput::Append(Message::user(request.message.clone())),
        )
        .await
        .map_err(|error| {
            tracing::warn!(thread_id, error = %error, "chat turn failed");
            ApiError::from(error)
        })?;

    conversations.append_message(thread_id, TurnRole::User, &request.message)?;
    conversations.append_message(thread_id, TurnRole::Assistant, &output.reply)?;

    Ok(Json(json!({
        "user": request.message,
        "assistant": output.reply,
    }))
    .into_response())
}

pub(crate) async fn handle_chat_history(
    State(state): State<Arc<ForkchatServerState>>,
    AxumPath(thread_id): AxumPath<String>,
) -> Response {
    let thread_id = match parse_path_id(&thread_id, "thread id") {
        Ok(thread_id) => thread_id,
        Err(error) => return error.into_response(),
    };
    match state.config.conversations.list_messages(thread_id) {
        Ok(messages) => Json(messages).into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}

/// Rewrites a displayed message. The thread's checkpoint is not touched.
pub(crate) async fn handle_edit_message(
    State(state): State<Arc<ForkchatServerState>>,
    AxumPath(msg_id): AxumPath<String>,
    body: Bytes,
) -> Response {
    let result = parse_path_id(&msg_id, "message id").and_then(|msg_id| {
        let request = parse_json_body::<EditMessageRequest>(&body)?;
        state
            .config
            .conversations
            .edit_message(msg_id, &request.content)
            .map_err(ApiError::from)
    });
    match result {
        Ok(_) => Json(json!({ "message": "Edited" })).into_response(),
        Err(error) => error.into_response(),
    }
}
