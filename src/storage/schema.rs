//! Database schema definitions.
//!
//! Fixed tables (queue, metadata, migrations) are created by [`apply_schema`].
//! Record tables are created per entity type by [`ensure_entity_table`], one
//! table named `rec_<entity>` for each registered entity.

use rusqlite::Connection;

use super::types::StorageError;

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Prefix of per-entity record tables.
pub const RECORD_TABLE_PREFIX: &str = "rec_";

/// Fixed part of the schema.
///
/// Timestamps are stored as INTEGER (Unix milliseconds).
pub const SCHEMA_SQL: &str = r"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Sync Queue
-- ====================

-- Durable log of local mutations awaiting delivery, in append (seq) order
CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    operation TEXT NOT NULL CHECK (operation IN ('create', 'update', 'delete')),
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    next_attempt_at INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_queue_seq ON sync_queue(seq);
CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status);
CREATE INDEX IF NOT EXISTS idx_sync_queue_entity_type ON sync_queue(entity_type);
CREATE INDEX IF NOT EXISTS idx_sync_queue_created ON sync_queue(created_at);

-- ====================
-- Sync Metadata
-- ====================

-- Key/value bookkeeping: last sync time, pull cursors
CREATE TABLE IF NOT EXISTS sync_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// Apply the schema to the database.
///
/// Idempotent: every statement uses `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    super::migrations::run_migrations(conn)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

/// Table name for an entity type.
///
/// # Errors
///
/// Returns `InvalidEntityType` unless the name is a plain identifier, since
/// it is spliced into DDL.
pub fn record_table(entity_type: &str) -> Result<String, StorageError> {
    let mut chars = entity_type.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StorageError::InvalidEntityType(entity_type.to_string()));
    }
    Ok(format!("{RECORD_TABLE_PREFIX}{entity_type}"))
}

/// Create the record table and its indexes for one entity type.
///
/// # Errors
///
/// Returns an error for an invalid entity name or if the DDL fails.
pub fn ensure_entity_table(conn: &Connection, entity_type: &str) -> Result<(), StorageError> {
    let table = record_table(entity_type)?;
    conn.execute_batch(&format!(
        r#"
CREATE TABLE IF NOT EXISTS "{table}" (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    sync_status TEXT NOT NULL DEFAULT 'pending' CHECK (sync_status IN ('pending', 'synced')),
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS "idx_{table}_sync_status" ON "{table}"(sync_status);
CREATE INDEX IF NOT EXISTS "idx_{table}_updated" ON "{table}"(updated_at);
"#
    ))?;
    Ok(())
}

/// Entity types that already have a record table.
///
/// # Errors
///
/// Returns an error if `sqlite_master` cannot be read.
pub fn existing_entity_types(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'rec\\_%' ESCAPE '\\'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names
        .into_iter()
        .filter_map(|n| n.strip_prefix(RECORD_TABLE_PREFIX).map(str::to_string))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"sync_queue".to_string()));
        assert!(tables.contains(&"sync_metadata".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("First apply failed");
        apply_schema(&conn).expect("Second apply failed");
    }

    #[test]
    fn test_queue_status_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let insert = |id: &str, seq: i64, status: &str| {
            conn.execute(
                "INSERT INTO sync_queue (id, seq, entity_type, entity_id, operation, payload,
                                         status, created_at, updated_at)
                 VALUES (?1, ?2, 'tours', 't1', 'create', '{}', ?3, 0, 0)",
                rusqlite::params![id, seq, status],
            )
        };
        assert!(insert("q1", 1, "pending").is_ok());
        assert!(insert("q2", 2, "done").is_err());
    }

    #[test]
    fn test_entity_tables() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        ensure_entity_table(&conn, "tours").unwrap();
        ensure_entity_table(&conn, "tours").unwrap();
        ensure_entity_table(&conn, "visa_apps").unwrap();

        assert_eq!(
            existing_entity_types(&conn).unwrap(),
            vec!["tours".to_string(), "visa_apps".to_string()]
        );
        assert!(matches!(
            ensure_entity_table(&conn, "tours; DROP TABLE x"),
            Err(StorageError::InvalidEntityType(_))
        ));
    }
}
