//! Process-local checkpoint backend.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use forkchat_ai::Message;

use crate::{CheckpointError, CheckpointStore, ThreadId};

/// Keeps every thread's history behind one `RwLock`. A `put` swaps in a fresh
/// `Arc<Vec<Message>>`, so a reader that grabbed the old `Arc` keeps a complete
/// snapshot.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<ThreadId, Arc<Vec<Message>>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, thread_id: &ThreadId) -> Result<Option<Arc<Vec<Message>>>, CheckpointError> {
        let threads = self
            .threads
            .read()
            .map_err(|_| CheckpointError::Unavailable("checkpoint map lock poisoned".to_string()))?;
        Ok(threads.get(thread_id).cloned())
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn get(&self, thread_id: &ThreadId) -> Result<Vec<Message>, CheckpointError> {
        let snapshot = self
            .snapshot(thread_id)?
            .ok_or_else(|| CheckpointError::NotFound {
                thread_id: thread_id.clone(),
            })?;
        Ok(snapshot.as_ref().clone())
    }

    fn put(&self, thread_id: &ThreadId, history: Vec<Message>) -> Result<(), CheckpointError> {
        let history = Arc::new(history);
        let mut threads = self
            .threads
            .write()
            .map_err(|_| CheckpointError::Unavailable("checkpoint map lock poisoned".to_string()))?;
        threads.insert(thread_id.clone(), history);
        Ok(())
    }

    fn contains(&self, thread_id: &ThreadId) -> Result<bool, CheckpointError> {
        Ok(self.snapshot(thread_id)?.is_some())
    }

    fn thread_ids(&self) -> Result<Vec<ThreadId>, CheckpointError> {
        let threads = self
            .threads
            .read()
            .map_err(|_| CheckpointError::Unavailable("checkpoint map lock poisoned".to_string()))?;
        let mut ids = threads.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }
}
