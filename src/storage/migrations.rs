//! Versioned schema upgrades for databases created by older releases.
//!
//! The base DDL in [`schema`](super::schema) always describes the current
//! layout, so on a fresh database every migration is a no-op. On an older
//! database the missing columns and indexes are added in order.

use rusqlite::Connection;
use tracing::{info, warn};

/// A single migration with version identifier and SQL content.
struct Migration {
    version: &'static str,
    sql: &'static str,
}

/// All migrations in order.
///
/// The `schema_migrations` table tracks which have been applied.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001_queue_backoff",
        sql: "ALTER TABLE sync_queue ADD COLUMN next_attempt_at INTEGER NOT NULL DEFAULT 0;",
    },
    Migration {
        version: "002_queue_record_index",
        sql: "CREATE INDEX IF NOT EXISTS idx_sync_queue_record
                  ON sync_queue(entity_type, entity_id);",
    },
];

/// Run all pending migrations on the database.
///
/// Already-applied migrations are skipped, so this is safe to call on
/// every open.
///
/// # Errors
///
/// Returns an error if a migration fails to apply. `ALTER TABLE` errors for
/// duplicate columns are logged and the migration marked complete, since the
/// base DDL may already have those columns.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied: std::collections::HashSet<String> = conn
        .prepare("SELECT version FROM schema_migrations")?
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    for migration in MIGRATIONS {
        if applied.contains(migration.version) {
            continue;
        }

        info!(version = migration.version, "Applying migration");

        if let Err(e) = conn.execute_batch(migration.sql) {
            if e.to_string().contains("duplicate column name") {
                warn!(
                    version = migration.version,
                    "Migration partially applied (columns exist), marking complete"
                );
            } else {
                return Err(e);
            }
        }

        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().timestamp_millis()],
        )?;

        info!(version = migration.version, "Migration complete");
    }

    Ok(())
}
