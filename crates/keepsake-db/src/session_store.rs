use std::path::Path;

use keepsake_common::{ConversationState, Error, Result};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::migrations::SESSION_SCHEMA_V1;

/// Conversation checkpoints keyed by session ID, stored as JSON.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening session store at {}", db_path.display());
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open session database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(SESSION_SCHEMA_V1.sql)
            .map_err(|e| Error::Database(format!("session migration failed: {e}")))?;
        Ok(())
    }

    /// Insert or overwrite the checkpoint for `session_id`.
    pub fn save_checkpoint(&self, session_id: &str, state: &ConversationState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.conn
            .execute(
                "INSERT INTO conversation_checkpoints (session_id, state, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(session_id) DO UPDATE SET
                    state = excluded.state,
                    updated_at = excluded.updated_at",
                params![session_id, json],
            )
            .map_err(|e| Error::Database(format!("failed to save checkpoint: {e}")))?;
        debug!(session_id, messages = state.messages.len(), "checkpoint saved");
        Ok(())
    }

    pub fn load_checkpoint(&self, session_id: &str) -> Result<Option<ConversationState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT state FROM conversation_checkpoints WHERE session_id = ?1")
            .map_err(|e| Error::Database(format!("failed to prepare checkpoint query: {e}")))?;

        let mut rows = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to load checkpoint: {e}")))?;

        match rows.next() {
            Some(row) => {
                let raw =
                    row.map_err(|e| Error::Database(format!("failed to read checkpoint: {e}")))?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// Returns `true` when a checkpoint existed.
    pub fn delete_checkpoint(&self, session_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM conversation_checkpoints WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(|e| Error::Database(format!("failed to delete checkpoint: {e}")))?;
        Ok(removed > 0)
    }

    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT session_id FROM conversation_checkpoints ORDER BY updated_at DESC, session_id",
            )
            .map_err(|e| Error::Database(format!("failed to prepare session list: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to list sessions: {e}")))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(|e| Error::Database(format!("failed to read session id: {e}")))?);
        }
        Ok(ids)
    }
}
