//! Per-thread conversation checkpoints: the materialized message history the
//! generation engine reads before a turn and writes back after it.
use std::{fmt, path::Path, str::FromStr, sync::Arc};

use forkchat_ai::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod checkpoint_locking;
mod checkpoint_memory;
mod checkpoint_sqlite;

pub use checkpoint_locking::{ThreadLockGuard, ThreadLocks};
pub use checkpoint_memory::InMemoryCheckpointStore;
pub use checkpoint_sqlite::SqliteCheckpointStore;

/// Opaque identifier of one conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThreadId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("thread id must not be empty")]
pub struct InvalidThreadId;

impl ThreadId {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidThreadId> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidThreadId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ThreadId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl FromStr for ThreadId {
    type Err = InvalidThreadId;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::new(raw)
    }
}

impl TryFrom<String> for ThreadId {
    type Error = InvalidThreadId;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<ThreadId> for String {
    fn from(value: ThreadId) -> Self {
        value.0
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint exists for thread '{thread_id}'")]
    NotFound { thread_id: ThreadId },
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
    #[error("checkpoint sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("checkpoint codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl CheckpointError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Storage contract for per-thread checkpoints.
///
/// `put` replaces the whole history for a thread and must be atomic with respect
/// to `get` on the same thread: readers observe either the previous or the new
/// history, never a mix. Writes under one thread id are never visible through
/// another.
pub trait CheckpointStore: Send + Sync {
    fn get(&self, thread_id: &ThreadId) -> Result<Vec<Message>, CheckpointError>;

    fn put(&self, thread_id: &ThreadId, history: Vec<Message>) -> Result<(), CheckpointError>;

    fn contains(&self, thread_id: &ThreadId) -> Result<bool, CheckpointError> {
        match self.get(thread_id) {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// All initialized thread ids in ascending order.
    fn thread_ids(&self) -> Result<Vec<ThreadId>, CheckpointError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointBackend {
    #[default]
    Memory,
    Sqlite,
}

impl CheckpointBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for CheckpointBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!(
                "unsupported checkpoint backend '{other}' (expected memory|sqlite)"
            )),
        }
    }
}

/// Builds the configured checkpoint store. `path` is only used by the sqlite backend.
pub fn open_checkpoint_store(
    backend: CheckpointBackend,
    path: &Path,
) -> Result<Arc<dyn CheckpointStore>, CheckpointError> {
    let store: Arc<dyn CheckpointStore> = match backend {
        CheckpointBackend::Memory => Arc::new(InMemoryCheckpointStore::new()),
        CheckpointBackend::Sqlite => Arc::new(SqliteCheckpointStore::open(path)?),
    };
    tracing::info!(backend = %backend, "checkpoint store ready");
    Ok(store)
}
