//! `POST /branch`: fork a thread's checkpoint and record the new thread.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use forkchat_ai::{Message, MessageRole};
use forkchat_checkpoint::ThreadId;
use forkchat_orchestrator::{BranchEdit, BranchOutcome, BranchRequest};
use serde_json::json;

use crate::chat_runtime::validate_input_length;
use crate::conversation_store::TurnRole;
use crate::types::{parse_json_body, ApiError, BranchRequestBody};
use crate::{ForkchatServerState, DEFAULT_BRANCH_USER_ID};

pub(crate) async fn handle_branch(
    State(state): State<Arc<ForkchatServerState>>,
    body: Bytes,
) -> Response {
    match branch(&state, &body).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn branch(state: &ForkchatServerState, body: &Bytes) -> Result<Response, ApiError> {
    let request = parse_json_body::<BranchRequestBody>(body)?;
    let conversations = &state.config.conversations;

    let edit = match request.replace_msg {
        Some(replace) => {
            validate_input_length(&replace.new, "replace_msg.new", state.config.max_input_chars)?;
            Some(BranchEdit::new(replace.old, replace.new))
        }
        None => None,
    };

    let new_thread = match request.new_thread {
        Some(thread_id) => thread_id,
        None => conversations.allocate_thread_id()?,
    };
    let _display_guard = state.lock_thread(new_thread).await;
    if request.new_thread.is_some() && !conversations.list_messages(new_thread)?.is_empty() {
        return Err(ApiError::conflict(
            "thread_id_conflict",
            format!("thread {new_thread} already has messages"),
        ));
    }

    let outcome = state
        .orchestrator
        .branch(BranchRequest {
            source_thread_id: ThreadId::from(request.old_thread),
            new_thread_id: ThreadId::from(new_thread),
            edit,
        })
        .await
        .map_err(|error| {
            tracing::warn!(
                old_thread = request.old_thread,
                new_thread,
                error = %error,
                "branch failed"
            );
            ApiError::from(error)
        })?;

    let user_id = request.user_id.unwrap_or(DEFAULT_BRANCH_USER_ID);
    record_branch_thread(state, &outcome, request.old_thread, new_thread, user_id)?;

    Ok(Json(json!({
        "message": format!("Branched {} -> {}", request.old_thread, new_thread),
        "reply": outcome.reply,
        "new_thread": new_thread,
        "edit_applied": outcome.edit.applied(),
    }))
    .into_response())
}

/// Mirrors the branched checkpoint into the conversation store so the new
/// thread can be listed and displayed.
fn record_branch_thread(
    state: &ForkchatServerState,
    outcome: &BranchOutcome,
    old_thread: u64,
    new_thread: u64,
    user_id: u64,
) -> Result<(), ApiError> {
    let conversations = &state.config.conversations;
    conversations.claim_thread(new_thread, user_id, &format!("Branch of {old_thread}"))?;
    for (role, content) in displayable_turns(&outcome.history) {
        conversations.append_message(new_thread, role, &content)?;
    }
    Ok(())
}

/// User and assistant text turns; tool traffic and text-less tool-call
/// messages are not shown.
fn displayable_turns(history: &[Message]) -> Vec<(TurnRole, String)> {
    history
        .iter()
        .filter_map(|message| {
            let role = match message.role {
                MessageRole::User => TurnRole::User,
                MessageRole::Assistant => TurnRole::Assistant,
                MessageRole::System | MessageRole::Tool => return None,
            };
            let text = message.text_content();
            (!text.trim().is_empty()).then_some((role, text))
        })
        .collect()
}
