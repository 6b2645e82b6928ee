//! Per-thread async locks that serialize read-generate-write cycles.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::ThreadId;

type LockTable = HashMap<ThreadId, Arc<AsyncMutex<()>>>;

/// Hands out one async mutex per thread id. Different ids never contend.
#[derive(Debug, Clone, Default)]
pub struct ThreadLocks {
    table: Arc<Mutex<LockTable>>,
}

/// Held for the duration of one turn on a thread.
#[derive(Debug)]
pub struct ThreadLockGuard {
    thread_id: ThreadId,
    _guard: OwnedMutexGuard<()>,
}

impl ThreadLockGuard {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, thread_id: &ThreadId) -> ThreadLockGuard {
        let mutex = self.entry(thread_id);
        let guard = mutex.lock_owned().await;
        ThreadLockGuard {
            thread_id: thread_id.clone(),
            _guard: guard,
        }
    }

    /// Number of thread ids that currently have a lock entry.
    pub fn tracked_threads(&self) -> usize {
        match self.table.lock() {
            Ok(table) => table.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn entry(&self, thread_id: &ThreadId) -> Arc<AsyncMutex<()>> {
        let mut table = match self.table.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Entries nobody else references are idle and can go.
        table.retain(|id, mutex| id == thread_id || Arc::strong_count(mutex) > 1);
        table
            .entry(thread_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
