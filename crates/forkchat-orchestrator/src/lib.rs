//! Conversation branching: copy a thread's checkpoint into a new thread,
//! optionally rewrite one user turn, and let the generation engine answer it.
use std::sync::Arc;

use forkchat_agent::{GenerationEngine, GenerationError, RunInput};
use forkchat_ai::{Message, MessageRole};
use forkchat_checkpoint::{CheckpointError, CheckpointStore, ThreadId};
use thiserror::Error;


/// Rewrite applied to the first user turn whose text contains `matching`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchEdit {
    pub matching: String,
    pub replacement: String,
}

impl BranchEdit {
    pub fn new(matching: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            matching: matching.into(),
            replacement: replacement.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRequest {
    pub source_thread_id: ThreadId,
    pub new_thread_id: ThreadId,
    pub edit: Option<BranchEdit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    NotRequested,
    /// Index into the copied history of the user turn that was rewritten.
    Applied { message_index: usize },
    NotMatched,
}

impl EditOutcome {
    pub fn applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// The copy that will seed the new thread, computed without side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBranch {
    pub source_thread_id: ThreadId,
    pub new_thread_id: ThreadId,
    pub seed: Vec<Message>,
    pub edit: EditOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchOutcome {
    pub source_thread_id: ThreadId,
    pub new_thread_id: ThreadId,
    pub reply: String,
    pub edit: EditOutcome,
    /// History handed to the engine before generation.
    pub seeded_messages: Vec<Message>,
    /// Checkpoint of the new thread after generation.
    pub history: Vec<Message>,
}

#[derive(Debug, Error)]
pub enum BranchError {
    #[error("source thread '{thread_id}' has no checkpoint")]
    SourceNotFound { thread_id: ThreadId },
    #[error("thread '{thread_id}' already holds a conversation")]
    ThreadIdConflict { thread_id: ThreadId },
    #[error("source thread '{thread_id}' has an empty history")]
    EmptyBranchSource { thread_id: ThreadId },
    #[error("invalid edit: {0}")]
    InvalidEdit(String),
    #[error("generation failed: {0}")]
    GenerationFailure(#[source] GenerationError),
    #[error("checkpoint store unavailable: {0}")]
    StoreUnavailable(#[source] CheckpointError),
}

impl From<GenerationError> for BranchError {
    fn from(error: GenerationError) -> Self {
        match error {
            GenerationError::ThreadOccupied { thread_id } => Self::ThreadIdConflict { thread_id },
            GenerationError::Checkpoint(error) => Self::StoreUnavailable(error),
            other => Self::GenerationFailure(other),
        }
    }
}

/// Branches conversations. Stateless beyond the injected store and engine.
#[derive(Clone)]
pub struct BranchOrchestrator {
    store: Arc<dyn CheckpointStore>,
    engine: Arc<dyn GenerationEngine>,
}

impl BranchOrchestrator {
    pub fn new(store: Arc<dyn CheckpointStore>, engine: Arc<dyn GenerationEngine>) -> Self {
        Self { store, engine }
    }

    /// Reads the source checkpoint and builds the edited copy. Writes nothing.
    pub fn prepare(&self, request: &BranchRequest) -> Result<PreparedBranch, BranchError> {
        if request.new_thread_id == request.source_thread_id {
            return Err(BranchError::ThreadIdConflict {
                thread_id: request.new_thread_id.clone(),
            });
        }
        if let Some(edit) = &request.edit {
            if edit.matching.is_empty() {
                return Err(BranchError::InvalidEdit(
                    "edit match text must not be empty".to_string(),
                ));
            }
        }

        let source = match self.store.get(&request.source_thread_id) {
            Ok(history) => history,
            Err(error) if error.is_not_found() => {
                return Err(BranchError::SourceNotFound {
                    thread_id: request.source_thread_id.clone(),
                })
            }
            Err(error) => return Err(BranchError::StoreUnavailable(error)),
        };
        if source.is_empty() {
            return Err(BranchError::EmptyBranchSource {
                thread_id: request.source_thread_id.clone(),
            });
        }
        self.ensure_unpopulated(&request.new_thread_id)?;

        // `get` hands back an owned copy; edits never reach the source checkpoint.
        let mut seed = source;
        let edit = match &request.edit {
            Some(edit) => apply_edit(&mut seed, edit),
            None => EditOutcome::NotRequested,
        };
        if edit == EditOutcome::NotMatched {
            tracing::warn!(
                source_thread_id = %request.source_thread_id,
                new_thread_id = %request.new_thread_id,
                "branch edit matched no user turn; branching unedited copy"
            );
        }

        Ok(PreparedBranch {
            source_thread_id: request.source_thread_id.clone(),
            new_thread_id: request.new_thread_id.clone(),
            seed,
            edit,
        })
    }

    /// Prepares the copy and submits it to the engine for the new thread.
    pub async fn branch(&self, request: BranchRequest) -> Result<BranchOutcome, BranchError> {
        let prepared = self.prepare(&request)?;
        let seeded_messages = prepared.seed.clone();
        let output = self
            .engine
            .run(&prepared.new_thread_id, RunInput::Seed(prepared.seed))
            .await?;

        tracing::info!(
            source_thread_id = %prepared.source_thread_id,
            new_thread_id = %prepared.new_thread_id,
            seeded = seeded_messages.len(),
            edit_applied = prepared.edit.applied(),
            "branch created"
        );
        Ok(BranchOutcome {
            source_thread_id: prepared.source_thread_id,
            new_thread_id: prepared.new_thread_id,
            reply: output.reply,
            edit: prepared.edit,
            seeded_messages,
            history: output.history,
        })
    }

    fn ensure_unpopulated(&self, thread_id: &ThreadId) -> Result<(), BranchError> {
        match self.store.get(thread_id) {
            Ok(history) if !history.is_empty() => Err(BranchError::ThreadIdConflict {
                thread_id: thread_id.clone(),
            }),
            Ok(_) => Ok(()),
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(BranchError::StoreUnavailable(error)),
        }
    }
}

/// Rewrites the first user message containing `edit.matching`, replacing every
/// occurrence inside it. Other messages are left alone.
pub fn apply_edit(history: &mut [Message], edit: &BranchEdit) -> EditOutcome {
    if edit.matching.is_empty() {
        return EditOutcome::NotMatched;
    }
    let target = history.iter().position(|message| {
        message.role == MessageRole::User && message.text_contains(&edit.matching)
    });
    match target {
        Some(message_index) => {
            history[message_index].replace_text(&edit.matching, &edit.replacement);
            EditOutcome::Applied { message_index }
        }
        None => EditOutcome::NotMatched,
    }
}
