//! Channel query functions.
//!
//! Channel keys are 32-char hex, stored upper-case.

use rusqlite::{Connection, OptionalExtension, Row};

use crate::models::{Channel, PUBLIC_CHANNEL_KEY, PUBLIC_CHANNEL_NAME};
use crate::{DbError, Result};

const COLUMNS: &str = "key, name, is_hashtag, on_radio, last_read_at";

fn row_to_channel(row: &Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        key: row.get(0)?,
        name: row.get(1)?,
        is_hashtag: row.get(2)?,
        on_radio: row.get(3)?,
        last_read_at: row.get(4)?,
    })
}

/// Insert or replace a channel's name/hashtag/on-radio state.
pub fn upsert(
    conn: &Connection,
    key: &str,
    name: &str,
    is_hashtag: bool,
    on_radio: bool,
) -> Result<()> {
    conn.execute(
        "INSERT INTO channels (key, name, is_hashtag, on_radio)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
             name = excluded.name,
             is_hashtag = excluded.is_hashtag,
             on_radio = excluded.on_radio",
        rusqlite::params![key.to_uppercase(), name, is_hashtag, on_radio],
    )?;
    Ok(())
}

pub fn get_by_key(conn: &Connection, key: &str) -> Result<Option<Channel>> {
    let sql = format!("SELECT {COLUMNS} FROM channels WHERE key = ?1");
    conn.query_row(&sql, [key.to_uppercase()], row_to_channel)
        .optional()
        .map_err(DbError::Sqlite)
}

pub fn get_all(conn: &Connection) -> Result<Vec<Channel>> {
    let sql = format!("SELECT {COLUMNS} FROM channels ORDER BY name");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_channel)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM channels WHERE key = ?1", [key.to_uppercase()])?;
    Ok(())
}

/// Returns false when the channel does not exist.
pub fn update_last_read_at(conn: &Connection, key: &str, timestamp: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE channels SET last_read_at = ?1 WHERE key = ?2",
        rusqlite::params![timestamp, key.to_uppercase()],
    )?;
    Ok(changed > 0)
}

pub fn mark_all_read(conn: &Connection, timestamp: i64) -> Result<()> {
    conn.execute("UPDATE channels SET last_read_at = ?1", [timestamp])?;
    Ok(())
}

/// Guarantee the protected Public channel exists under its canonical name.
/// Matched by key, not name; an existing row keeps its on-radio flag.
pub fn ensure_public_channel(conn: &Connection) -> Result<()> {
    let existing = get_by_key(conn, PUBLIC_CHANNEL_KEY)?;
    let needs_write = match &existing {
        Some(channel) => channel.name != PUBLIC_CHANNEL_NAME,
        None => true,
    };
    if needs_write {
        tracing::info!("Ensuring Public channel exists with canonical name");
        let on_radio = existing.map(|c| c.on_radio).unwrap_or(false);
        upsert(conn, PUBLIC_CHANNEL_KEY, PUBLIC_CHANNEL_NAME, false, on_radio)?;
    }
    Ok(())
}
