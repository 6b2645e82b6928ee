//! Relational view of users, threads and displayed turns.
//!
//! This is the listing/display side of the service. The checkpoint store stays
//! authoritative for what the model sees; edits made here never reach it.
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: u64,
    pub user_id: u64,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: u64,
    pub thread_id: u64,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conversation store unavailable: {0}")]
    Unavailable(String),
}

/// Storage contract for the relational side of the chat service.
///
/// Thread and user references are not enforced: a message may be appended to a
/// thread id that has no thread record yet.
pub trait ConversationStore: Send + Sync {
    fn create_user(&self, username: &str) -> Result<UserRecord, ConversationError>;

    fn create_thread(&self, user_id: u64, title: &str) -> Result<ThreadRecord, ConversationError>;

    /// Creates the record for a caller-chosen thread id, or retitles it when it
    /// already exists. Later `create_thread` ids never collide with claimed ones.
    fn claim_thread(
        &self,
        thread_id: u64,
        user_id: u64,
        title: &str,
    ) -> Result<ThreadRecord, ConversationError>;

    /// Reserves a thread id without creating a record for it.
    fn allocate_thread_id(&self) -> Result<u64, ConversationError>;

    /// Marks a caller-chosen thread id as used so allocation never returns it.
    fn reserve_thread_id(&self, thread_id: u64) -> Result<(), ConversationError>;

    fn list_threads(&self, user_id: u64) -> Result<Vec<ThreadRecord>, ConversationError>;

    fn thread(&self, thread_id: u64) -> Result<ThreadRecord, ConversationError>;

    fn append_message(
        &self,
        thread_id: u64,
        role: TurnRole,
        content: &str,
    ) -> Result<MessageRecord, ConversationError>;

    /// Messages of one thread in insertion order.
    fn list_messages(&self, thread_id: u64) -> Result<Vec<MessageRecord>, ConversationError>;

    fn edit_message(&self, message_id: u64, content: &str)
        -> Result<MessageRecord, ConversationError>;
}

#[derive(Debug)]
struct ConversationTables {
    users: BTreeMap<u64, UserRecord>,
    usernames: HashMap<String, u64>,
    threads: BTreeMap<u64, ThreadRecord>,
    messages: BTreeMap<u64, MessageRecord>,
    next_user_id: u64,
    next_thread_id: u64,
    next_message_id: u64,
}

impl ConversationTables {
    fn new(first_thread_id: u64) -> Self {
        Self {
            users: BTreeMap::new(),
            usernames: HashMap::new(),
            threads: BTreeMap::new(),
            messages: BTreeMap::new(),
            next_user_id: 1,
            next_thread_id: first_thread_id.max(1),
            next_message_id: 1,
        }
    }

    fn bump_thread_id_past(&mut self, thread_id: u64) {
        self.next_thread_id = self.next_thread_id.max(thread_id.saturating_add(1));
    }

    fn take_thread_id(&mut self) -> u64 {
        let id = self.next_thread_id;
        self.next_thread_id += 1;
        id
    }
}

/// Process-local [`ConversationStore`]. Ids start at 1 and increase monotonically.
#[derive(Debug)]
pub struct InMemoryConversationStore {
    tables: Mutex<ConversationTables>,
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::with_first_thread_id(1)
    }

    /// Starts thread id allocation at `first_thread_id`, e.g. past ids that
    /// already have persisted checkpoints.
    pub fn with_first_thread_id(first_thread_id: u64) -> Self {
        Self {
            tables: Mutex::new(ConversationTables::new(first_thread_id)),
        }
    }

    fn with_tables<T>(
        &self,
        f: impl FnOnce(&mut ConversationTables) -> Result<T, ConversationError>,
    ) -> Result<T, ConversationError> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| ConversationError::Unavailable("conversation lock poisoned".to_string()))?;
        f(&mut tables)
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn create_user(&self, username: &str) -> Result<UserRecord, ConversationError> {
        self.with_tables(|tables| {
            if tables.usernames.contains_key(username) {
                return Err(ConversationError::Conflict(format!(
                    "user '{username}' already exists"
                )));
            }
            let record = UserRecord {
                id: tables.next_user_id,
                username: username.to_string(),
                created_at: Utc::now(),
            };
            tables.next_user_id += 1;
            tables.usernames.insert(record.username.clone(), record.id);
            tables.users.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn create_thread(&self, user_id: u64, title: &str) -> Result<ThreadRecord, ConversationError> {
        self.with_tables(|tables| {
            let record = ThreadRecord {
                id: tables.take_thread_id(),
                user_id,
                title: title.to_string(),
                created_at: Utc::now(),
            };
            tables.threads.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn claim_thread(
        &self,
        thread_id: u64,
        user_id: u64,
        title: &str,
    ) -> Result<ThreadRecord, ConversationError> {
        self.with_tables(|tables| {
            tables.bump_thread_id_past(thread_id);
            let record = tables
                .threads
                .entry(thread_id)
                .and_modify(|record| record.title = title.to_string())
                .or_insert_with(|| ThreadRecord {
                    id: thread_id,
                    user_id,
                    title: title.to_string(),
                    created_at: Utc::now(),
                });
            Ok(record.clone())
        })
    }

    fn allocate_thread_id(&self) -> Result<u64, ConversationError> {
        self.with_tables(|tables| Ok(tables.take_thread_id()))
    }

    fn reserve_thread_id(&self, thread_id: u64) -> Result<(), ConversationError> {
        self.with_tables(|tables| {
            tables.bump_thread_id_past(thread_id);
            Ok(())
        })
    }

    fn list_threads(&self, user_id: u64) -> Result<Vec<ThreadRecord>, ConversationError> {
        self.with_tables(|tables| {
            Ok(tables
                .threads
                .values()
                .filter(|thread| thread.user_id == user_id)
                .cloned()
                .collect())
        })
    }

    fn thread(&self, thread_id: u64) -> Result<ThreadRecord, ConversationError> {
        self.with_tables(|tables| {
            tables
                .threads
                .get(&thread_id)
                .cloned()
                .ok_or_else(|| ConversationError::NotFound(format!("thread {thread_id}")))
        })
    }

    fn append_message(
        &self,
        thread_id: u64,
        role: TurnRole,
        content: &str,
    ) -> Result<MessageRecord, ConversationError> {
        self.with_tables(|tables| {
            let record = MessageRecord {
                id: tables.next_message_id,
                thread_id,
                role,
                content: content.to_string(),
                created_at: Utc::now(),
            };
            tables.next_message_id += 1;
            tables.messages.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn list_messages(&self, thread_id: u64) -> Result<Vec<MessageRecord>, ConversationError> {
        self.with_tables(|tables| {
            Ok(tables
                .messages
                .values()
                .filter(|message| message.thread_id == thread_id)
                .cloned()
                .collect())
        })
    }

    fn edit_message(
        &self,
        message_id: u64,
        content: &str,
    ) -> Result<MessageRecord, ConversationError> {
        self.with_tables(|tables| {
            let record = tables
                .messages
                .get_mut(&message_id)
                .ok_or_else(|| ConversationError::NotFound(format!("message {message_id}")))?;
            record.content = content.to_string();
            Ok(record.clone())
        })
    }
}
