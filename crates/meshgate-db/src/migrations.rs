//! Database migration system.
//!
//! Schema version stored in `PRAGMA user_version` (0 for a fresh file).
//! Migrations are ordered and idempotent; each runs inside its own
//! transaction and the pragma is bumped only after the transaction
//! commits. Forward-only.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Run all pending migrations. Returns the number applied.
pub fn run(conn: &mut Connection) -> Result<u32> {
    let current: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(DbError::Sqlite)?;

    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    let mut applied = 0;
    for version in (current + 1)..=SCHEMA_VERSION {
        tracing::info!("Applying migration {version}");
        let tx = conn.transaction().map_err(DbError::Sqlite)?;
        apply(&tx, version)?;
        tx.commit().map_err(DbError::Sqlite)?;
        conn.pragma_update(None, "user_version", version)
            .map_err(DbError::Sqlite)?;
        applied += 1;
    }

    if applied > 0 {
        tracing::info!("Applied {applied} migration(s), schema at v{SCHEMA_VERSION}");
    } else {
        tracing::debug!("Schema up to date at v{current}");
    }
    Ok(applied)
}

fn apply(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => migrate_001_initial_schema(conn),
        2 => migrate_002_add_last_read_at(conn),
        3 => migrate_003_drop_decrypt_attempts(conn),
        other => Err(DbError::Migration(format!(
            "unknown migration version: {other}"
        ))),
    }
}

/// Initial schema and the single settings row.
fn migrate_001_initial_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(schema::SCHEMA_V1)
        .map_err(DbError::Sqlite)?;
    Ok(())
}

/// Server-side read tracking: `last_read_at` on contacts and channels.
fn migrate_002_add_last_read_at(conn: &Connection) -> Result<()> {
    for table in ["contacts", "channels"] {
        let sql = format!("ALTER TABLE {table} ADD COLUMN last_read_at INTEGER");
        match conn.execute(&sql, []) {
            Ok(_) => {}
            Err(e) if is_duplicate_column(&e) => {
                tracing::debug!("{table}.last_read_at already exists, skipping");
            }
            Err(e) => return Err(DbError::Sqlite(e)),
        }
    }
    Ok(())
}

/// Drop the never-read retry counter on raw packets.
///
/// `ALTER TABLE DROP COLUMN` needs SQLite 3.35+; on older engines the
/// column is harmless, so the failure is logged and the migration still
/// succeeds.
fn migrate_003_drop_decrypt_attempts(conn: &Connection) -> Result<()> {
    match conn.execute("ALTER TABLE raw_packets DROP COLUMN decrypt_attempts", []) {
        Ok(_) => {}
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("no such column") {
                tracing::debug!("raw_packets.decrypt_attempts already dropped");
            } else if msg.contains("syntax error") || msg.contains("drop column") {
                tracing::warn!("SQLite lacks DROP COLUMN, leaving decrypt_attempts in place");
            } else {
                return Err(DbError::Sqlite(e));
            }
        }
    }
    Ok(())
}

fn is_duplicate_column(e: &rusqlite::Error) -> bool {
    e.to_string().to_lowercase().contains("duplicate column name")
}
