//! SQLite-backed checkpoints that survive process restarts.
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use forkchat_ai::Message;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{CheckpointError, CheckpointStore, ThreadId};

const CHECKPOINT_SCHEMA_VERSION: i64 = 1;
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection per store, serialized by a mutex. Each `put` rewrites the
/// thread inside a single transaction.
#[derive(Debug)]
pub struct SqliteCheckpointStore {
    path: PathBuf,
    connection: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        let connection = open_checkpoint_sqlite_connection(&path)?;
        initialize_checkpoint_sqlite_schema(&connection)?;
        tracing::debug!(path = %path.display(), "opened sqlite checkpoint store");
        Ok(Self {
            path,
            connection: Mutex::new(connection),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, CheckpointError>,
    ) -> Result<T, CheckpointError> {
        let mut connection = self.connection.lock().map_err(|_| {
            CheckpointError::Unavailable(format!(
                "sqlite checkpoint connection lock poisoned for {}",
                self.path.display()
            ))
        })?;
        f(&mut connection)
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn get(&self, thread_id: &ThreadId) -> Result<Vec<Message>, CheckpointError> {
        self.with_connection(|connection| {
            if !thread_registered(connection, thread_id)? {
                return Err(CheckpointError::NotFound {
                    thread_id: thread_id.clone(),
                });
            }
            let mut statement = connection.prepare(
                r#"
                SELECT message_json
                FROM checkpoint_messages
                WHERE thread_id = ?1
                ORDER BY position ASC
                "#,
            )?;
            let mut rows = statement.query(params![thread_id.as_str()])?;
            let mut history = Vec::new();
            while let Some(row) = rows.next()? {
                let message_json: String = row.get(0)?;
                history.push(serde_json::from_str::<Message>(&message_json)?);
            }
            Ok(history)
        })
    }

    fn put(&self, thread_id: &ThreadId, history: Vec<Message>) -> Result<(), CheckpointError> {
        let encoded = history
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        self.with_connection(|connection| {
            let transaction = connection.transaction()?;
            transaction.execute(
                "DELETE FROM checkpoint_messages WHERE thread_id = ?1",
                params![thread_id.as_str()],
            )?;
            for (position, message_json) in encoded.iter().enumerate() {
                transaction.execute(
                    r#"
                    INSERT INTO checkpoint_messages (thread_id, position, message_json)
                    VALUES (?1, ?2, ?3)
                    "#,
                    params![thread_id.as_str(), position as i64, message_json],
                )?;
            }
            transaction.execute(
                r#"
                INSERT INTO checkpoint_threads (thread_id, message_count, updated_unix_ms)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(thread_id) DO UPDATE SET
                    message_count = excluded.message_count,
                    updated_unix_ms = excluded.updated_unix_ms
                "#,
                params![
                    thread_id.as_str(),
                    encoded.len() as i64,
                    current_unix_timestamp_ms() as i64
                ],
            )?;
            transaction.commit()?;
            Ok(())
        })
    }

    fn contains(&self, thread_id: &ThreadId) -> Result<bool, CheckpointError> {
        self.with_connection(|connection| thread_registered(connection, thread_id))
    }

    fn thread_ids(&self) -> Result<Vec<ThreadId>, CheckpointError> {
        self.with_connection(|connection| {
            let mut statement =
                connection.prepare("SELECT thread_id FROM checkpoint_threads ORDER BY thread_id")?;
            let mut rows = statement.query([])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                let raw: String = row.get(0)?;
                match ThreadId::new(raw) {
                    Ok(id) => ids.push(id),
                    Err(_) => tracing::warn!("skipping blank thread id in checkpoint store"),
                }
            }
            Ok(ids)
        })
    }
}

fn thread_registered(connection: &Connection, thread_id: &ThreadId) -> Result<bool, CheckpointError> {
    let found = connection
        .query_row(
            "SELECT 1 FROM checkpoint_threads WHERE thread_id = ?1",
            params![thread_id.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn open_checkpoint_sqlite_connection(path: &Path) -> Result<Connection, CheckpointError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|error| {
                CheckpointError::Unavailable(format!(
                    "failed to create checkpoint directory {}: {error}",
                    parent.display()
                ))
            })?;
        }
    }
    let connection = Connection::open(path)?;
    connection.busy_timeout(SQLITE_BUSY_TIMEOUT)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

fn initialize_checkpoint_sqlite_schema(connection: &Connection) -> Result<(), CheckpointError> {
    let version: i64 = connection.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > CHECKPOINT_SCHEMA_VERSION {
        return Err(CheckpointError::Unavailable(format!(
            "checkpoint schema version {version} is newer than supported version {CHECKPOINT_SCHEMA_VERSION}"
        )));
    }
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoint_threads (
            thread_id TEXT PRIMARY KEY,
            message_count INTEGER NOT NULL,
            updated_unix_ms INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS checkpoint_messages (
            thread_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            message_json TEXT NOT NULL,
            PRIMARY KEY (thread_id, position)
        );
        "#,
    )?;
    connection.pragma_update(None, "user_version", CHECKPOINT_SCHEMA_VERSION)?;
    Ok(())
}

fn current_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
