/// A versioned block of schema SQL, applied with `execute_batch`.
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

pub const MEMORY_SCHEMA_V1: Migration = Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS memory_records (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            embedding_dimensions INTEGER NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            importance INTEGER NOT NULL DEFAULT 5,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memory_records_created_at
            ON memory_records(created_at);",
};

pub const SESSION_SCHEMA_V1: Migration = Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS conversation_checkpoints (
            session_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
};
