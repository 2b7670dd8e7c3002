//! Raw-packet storage with payload-hash deduplication.
//!
//! Every RF frame lands here first. The dedup key is the SHA-256 of the
//! payload after the path field, so the same flood arriving over a
//! different route maps to one row. Unparseable frames hash in full.

use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use meshgate_proto::{extract_payload, packet_payload_type, PayloadType};

use crate::{DbError, Result};

/// Compute the dedup hash for a frame.
pub fn payload_hash(data: &[u8]) -> String {
    let hashed = match extract_payload(data) {
        Some(payload) if !payload.is_empty() => Sha256::digest(payload),
        _ => Sha256::digest(data),
    };
    hex::encode(hashed)
}

/// Store a frame, deduplicating by payload hash.
///
/// Returns `(packet_id, is_new)`. Duplicates never error: a unique-index
/// race between the probe SELECT and the INSERT re-selects the winner.
pub fn upsert(conn: &Connection, data: &[u8], timestamp: i64) -> Result<(i64, bool)> {
    let hash = payload_hash(data);

    if let Some(id) = select_by_hash(conn, &hash)? {
        tracing::debug!("Duplicate payload (hash={}..., id={id})", &hash[..12]);
        return Ok((id, false));
    }

    match conn.execute(
        "INSERT INTO raw_packets (timestamp, data, payload_hash) VALUES (?1, ?2, ?3)",
        rusqlite::params![timestamp, data, hash],
    ) {
        Ok(_) => Ok((conn.last_insert_rowid(), true)),
        Err(e) if is_constraint_violation(&e) => {
            // Lost the insert race to a concurrent duplicate.
            let id = select_by_hash(conn, &hash)?
                .ok_or_else(|| DbError::NotFound("raw packet after constraint race".into()))?;
            Ok((id, false))
        }
        Err(e) => Err(DbError::Sqlite(e)),
    }
}

fn select_by_hash(conn: &Connection, hash: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM raw_packets WHERE payload_hash = ?1",
        [hash],
        |row| row.get(0),
    )
    .optional()
    .map_err(DbError::Sqlite)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

/// Link a packet to the message its payload decrypted into.
pub fn link_message(conn: &Connection, packet_id: i64, message_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE raw_packets SET message_id = ?1 WHERE id = ?2",
        rusqlite::params![message_id, packet_id],
    )?;
    Ok(())
}

pub fn undecrypted_count(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM raw_packets WHERE message_id IS NULL",
        [],
        |row| row.get(0),
    )
    .map_err(DbError::Sqlite)
}

/// Timestamp of the oldest packet nothing decrypted yet.
pub fn oldest_undecrypted(conn: &Connection) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT MIN(timestamp) FROM raw_packets WHERE message_id IS NULL",
        [],
        |row| row.get(0),
    )
    .map_err(DbError::Sqlite)
}

/// All packets with no linked message, oldest first: `(id, data, timestamp)`.
pub fn all_undecrypted(conn: &Connection) -> Result<Vec<(i64, Vec<u8>, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, data, timestamp FROM raw_packets
         WHERE message_id IS NULL ORDER BY timestamp ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get::<_, Vec<u8>>(1)?, row.get(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Undecrypted packets whose header says TEXT_MESSAGE: the candidates
/// for a historical DM decrypt sweep.
pub fn undecrypted_text_messages(conn: &Connection) -> Result<Vec<(i64, Vec<u8>, i64)>> {
    let rows = all_undecrypted(conn)?;
    Ok(rows
        .into_iter()
        .filter(|(_, data, _)| packet_payload_type(data) == Some(PayloadType::TextMessage))
        .collect())
}

/// Delete undecrypted packets older than `max_age_days`. Returns the
/// number deleted.
pub fn prune_old_undecrypted(conn: &Connection, max_age_days: i64, now: i64) -> Result<usize> {
    let cutoff = now - max_age_days * 86_400;
    let deleted = conn.execute(
        "DELETE FROM raw_packets WHERE message_id IS NULL AND timestamp < ?1",
        [cutoff],
    )?;
    Ok(deleted)
}
