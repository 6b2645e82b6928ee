//! HTTP façade for the branching chat service.
use std::sync::Arc;

use forkchat_agent::GenerationEngine;
use forkchat_checkpoint::{CheckpointStore, ThreadId, ThreadLockGuard, ThreadLocks};
use forkchat_orchestrator::BranchOrchestrator;

mod branch_runtime;
mod chat_runtime;
mod conversation_store;
mod server_bootstrap;
mod thread_runtime;
mod types;

pub use conversation_store::{
    ConversationError, ConversationStore, InMemoryConversationStore, MessageRecord, ThreadRecord,
    TurnRole, UserRecord,
};
pub use server_bootstrap::{build_forkchat_router, run_forkchat_server};

pub const DEFAULT_BRANCH_USER_ID: u64 = 1;
pub const DEFAULT_THREAD_TITLE: &str = "New Chat";

#[derive(Clone)]
pub struct ForkchatServerConfig {
    pub bind: String,
    pub max_input_chars: usize,
    pub conversations: Arc<dyn ConversationStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub engine: Arc<dyn GenerationEngine>,
}

/// Shared handler state; built once per server.
///
/// `display_locks` is held across a generation run and the matching
/// conversation-store writes, so the displayed log of a thread follows the
/// same order as its checkpoint.
#[derive(Clone)]
pub struct ForkchatServerState {
    config: ForkchatServerConfig,
    orchestrator: BranchOrchestrator,
    display_locks: ThreadLocks,
}

impl ForkchatServerState {
    pub fn new(config: ForkchatServerConfig) -> Self {
        let orchestrator =
            BranchOrchestrator::new(Arc::clone(&config.checkpoints), Arc::clone(&config.engine));
        Self {
            config,
            orchestrator,
            display_locks: ThreadLocks::new(),
        }
    }

    pub(crate) async fn lock_thread(&self, thread_id: u64) -> ThreadLockGuard {
        let guard = self.display_locks.lock(&ThreadId::from(thread_id)).await;
        tracing::debug!(thread_id = %guard.thread_id(), "thread display lock acquired");
        guard
    }
}
