use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use keepsake_common::{Error, Result};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::migrations::MEMORY_SCHEMA_V1;
use crate::vector::{blob_to_vec, vec_to_blob};

/// A persisted long-term memory. Records are immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub tags: BTreeSet<String>,
    pub importance: u8,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for new records before the store assigns an ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemoryRecord {
    pub content: String,
    pub embedding: Vec<f32>,
    pub tags: BTreeSet<String>,
    pub importance: u8,
    /// Defaults to the insert time when absent.
    pub created_at: Option<DateTime<Utc>>,
}

/// Append-only archive of long-term memories shared by every session.
pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening memory store at {}", db_path.display());
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open memory database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
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
            .execute_batch(MEMORY_SCHEMA_V1.sql)
            .map_err(|e| Error::Database(format!("memory migration failed: {e}")))?;
        debug!(version = MEMORY_SCHEMA_V1.version, "memory schema ready");
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Persist a record under a freshly generated ID.
    pub fn insert(&self, record: NewMemoryRecord) -> Result<MemoryRecord> {
        if record.embedding.is_empty() {
            return Err(Error::Database(
                "refusing to store a memory without an embedding".to_string(),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = record.created_at.unwrap_or_else(Utc::now);
        let tags_json = serde_json::to_string(&record.tags)?;

        self.conn
            .execute(
                "INSERT INTO memory_records
                    (id, content, embedding, embedding_dimensions, tags, importance, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    record.content,
                    vec_to_blob(&record.embedding),
                    record.embedding.len() as i64,
                    tags_json,
                    record.importance,
                    created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to insert memory record: {e}")))?;

        debug!(%id, "stored long-term memory");
        Ok(MemoryRecord {
            id,
            content: record.content,
            embedding: record.embedding,
            tags: record.tags,
            importance: record.importance,
            created_at,
        })
    }

    /// Every record in insertion order.
    pub fn all_records(&self) -> Result<Vec<MemoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, content, embedding, tags, importance, created_at
                 FROM memory_records
                 ORDER BY rowid ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare memory query: {e}")))?;

        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| Error::Database(format!("failed to load memory records: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| Error::Database(format!("failed to read memory row: {e}")))?,
            );
        }
        Ok(records)
    }

    pub fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, content, embedding, tags, importance, created_at
                 FROM memory_records
                 WHERE id = ?1",
            )
            .map_err(|e| Error::Database(format!("failed to prepare memory query: {e}")))?;

        let mut rows = stmt
            .query_map(params![id], row_to_record)
            .map_err(|e| Error::Database(format!("failed to load memory record: {e}")))?;

        match rows.next() {
            Some(row) => Ok(Some(row.map_err(|e| {
                Error::Database(format!("failed to read memory row: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM memory_records", [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to count memory records: {e}")))?;
        Ok(count as usize)
    }

    /// Remove every record. Returns how many were deleted.
    pub fn delete_all(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM memory_records", [])
            .map_err(|e| Error::Database(format!("failed to reset memory records: {e}")))?;
        info!(removed, "long-term memory store reset");
        Ok(removed)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let embedding: Vec<u8> = row.get(2)?;
    let tags_raw: String = row.get(3)?;
    let importance: i64 = row.get(4)?;
    let created_raw: String = row.get(5)?;
    let id: String = row.get(0)?;
    let tags = serde_json::from_str(&tags_raw).unwrap_or_else(|e| {
        warn!(id = %id, "failed to parse memory tags '{}': {e}, dropping them", tags_raw);
        BTreeSet::new()
    });
    Ok(MemoryRecord {
        id,
        content: row.get(1)?,
        embedding: blob_to_vec(&embedding),
        tags,
        importance: importance.clamp(0, u8::MAX as i64) as u8,
        created_at: parse_timestamp(&created_raw),
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!(
                "failed to parse timestamp '{}': {e}, falling back to now",
                value
            );
            Utc::now()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(content: &str, embedding: Vec<f32>) -> NewMemoryRecord {
        NewMemoryRecord {
            content: content.to_string(),
            embedding,
            tags: ["animals".to_string()].into_iter().collect(),
            importance: 5,
            created_at: None,
        }
    }

    #[test]
    fn in_memory_creates_memory_records_table() {
        let store = MemoryStore::in_memory().expect("failed to create in-memory memory store");
        let exists: i64 = store
            .connection()
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='memory_records'",
                [],
                |row| row.get(0),
            )
            .expect("failed to query sqlite_master");

        assert_eq!(exists, 1);
    }

    #[test]
    fn insert_assigns_unique_ids_and_round_trips() {
        let store = MemoryStore::in_memory().unwrap();
        let a = store.insert(new_record("User has a dog.", vec![1.0, 0.0])).unwrap();
        let b = store.insert(new_record("User has a dog.", vec![1.0, 0.0])).unwrap();
        assert_ne!(a.id, b.id);

        let loaded = store.get(&a.id).unwrap().expect("record should exist");
        assert_eq!(loaded.content, "User has a dog.");
        assert_eq!(loaded.embedding, vec![1.0, 0.0]);
        assert!(loaded.tags.contains("animals"));
        assert_eq!(loaded.importance, 5);
    }

    #[test]
    fn all_records_preserves_insertion_order() {
        let store = MemoryStore::in_memory().unwrap();
        for content in ["first", "second", "third"] {
            store.insert(new_record(content, vec![0.5, 0.5])).unwrap();
        }
        let contents: Vec<String> = store
            .all_records()
            .unwrap()
            .into_iter()
            .map(|r| r.content)
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn explicit_created_at_is_kept() {
        let store = MemoryStore::in_memory().unwrap();
        let when = DateTime::parse_from_rfc3339("2025-01-15T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut record = new_record("old memory", vec![1.0]);
        record.created_at = Some(when);
        let stored = store.insert(record).unwrap();
        assert_eq!(store.get(&stored.id).unwrap().unwrap().created_at, when);
    }

    #[test]
    fn empty_embedding_is_rejected() {
        let store = MemoryStore::in_memory().unwrap();
        let err = store.insert(new_record("nothing", vec![])).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn corrupt_tags_load_as_empty() {
        let store = MemoryStore::in_memory().unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO memory_records
                 (id, content, embedding, embedding_dimensions, tags, importance, created_at)
                 VALUES ('m1', 'tagged badly', ?1, 1, 'not json', 7, '2025-01-15T10:00:00Z')",
                params![vec_to_blob(&[1.0])],
            )
            .unwrap();

        let loaded = store.get("m1").unwrap().expect("record should exist");
        assert!(loaded.tags.is_empty());
        assert_eq!(loaded.content, "tagged badly");
        assert_eq!(loaded.importance, 7);
    }

    #[test]
    fn delete_all_empties_the_store() {
        let store = MemoryStore::in_memory().unwrap();
        store.insert(new_record("a", vec![1.0])).unwrap();
        store.insert(new_record("b", vec![1.0])).unwrap();
        assert_eq!(store.delete_all().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.all_records().unwrap().is_empty());
    }

    #[test]
    fn open_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        {
            let store = MemoryStore::open(&path).unwrap();
            store.insert(new_record("persisted", vec![0.1, 0.2])).unwrap();
        }
        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
