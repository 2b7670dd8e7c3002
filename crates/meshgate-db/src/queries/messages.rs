//! Message query functions.
//!
//! The dedup contract lives here: `(type, conversation_key, text,
//! sender_timestamp)` is unique, inserts use `INSERT OR IGNORE`, and a
//! `None` id from [`create`] means "echo or dual-path race"; the caller
//! follows up with [`get_by_content`] / [`add_path`] /
//! [`increment_ack_count`].

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, Row};

use crate::models::{Message, MessagePath, UnreadSummary};
use crate::{DbError, Result};

const COLUMNS: &str = "id, type, conversation_key, text, sender_timestamp, received_at, \
                       paths, txt_type, signature, outgoing, acked";

/// Field set accepted by [`create`].
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    /// "PRIV" or "CHAN".
    pub msg_type: String,
    pub conversation_key: String,
    pub text: String,
    pub sender_timestamp: Option<i64>,
    pub received_at: i64,
    /// Hex routing path of the first observation; empty string is a legal
    /// zero-hop path, `None` means no path was observed at all.
    pub path: Option<String>,
    pub txt_type: i64,
    pub signature: Option<String>,
    pub outgoing: bool,
}

/// Pagination and filtering for [`list`]. Cursor pagination keys on
/// `(received_at, id)` descending.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub limit: i64,
    pub offset: i64,
    pub msg_type: Option<String>,
    pub conversation_key: Option<String>,
    pub before: Option<i64>,
    pub before_id: Option<i64>,
}

fn parse_paths(paths_json: Option<String>) -> Option<Vec<MessagePath>> {
    let json = paths_json?;
    serde_json::from_str(&json).ok()
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        msg_type: row.get(1)?,
        conversation_key: row.get(2)?,
        text: row.get(3)?,
        sender_timestamp: row.get(4)?,
        received_at: row.get(5)?,
        paths: parse_paths(row.get(6)?),
        txt_type: row.get(7)?,
        signature: row.get(8)?,
        outgoing: row.get(9)?,
        acked: row.get(10)?,
    })
}

/// Create a message, returning its id, or `None` when the unique key
/// already exists (the insert is silently dropped).
pub fn create(conn: &Connection, msg: &NewMessage) -> Result<Option<i64>> {
    let paths_json = match &msg.path {
        Some(path) => Some(
            serde_json::to_string(&[MessagePath {
                path: path.clone(),
                received_at: msg.received_at,
            }])
            .map_err(|e| DbError::Serialization(e.to_string()))?,
        ),
        None => None,
    };

    let changed = conn.execute(
        "INSERT OR IGNORE INTO messages (type, conversation_key, text, sender_timestamp,
                                         received_at, paths, txt_type, signature, outgoing)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            msg.msg_type,
            msg.conversation_key,
            msg.text,
            msg.sender_timestamp,
            msg.received_at,
            paths_json,
            msg.txt_type,
            msg.signature,
            msg.outgoing,
        ],
    )?;

    if changed == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

/// Look up a message by its unique content fields.
pub fn get_by_content(
    conn: &Connection,
    msg_type: &str,
    conversation_key: &str,
    text: &str,
    sender_timestamp: Option<i64>,
) -> Result<Option<Message>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM messages
         WHERE type = ?1 AND conversation_key = ?2 AND text = ?3
           AND sender_timestamp IS ?4"
    );
    conn.query_row(
        &sql,
        rusqlite::params![msg_type, conversation_key, text, sender_timestamp],
        row_to_message,
    )
    .optional()
    .map_err(DbError::Sqlite)
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Message>> {
    let sql = format!("SELECT {COLUMNS} FROM messages WHERE id = ?1");
    conn.query_row(&sql, [id], row_to_message)
        .optional()
        .map_err(DbError::Sqlite)
}

/// Append a path observation to a message. Identical paths are appended
/// again; each arrival is a separate observation. Returns the updated
/// list.
pub fn add_path(
    conn: &Connection,
    message_id: i64,
    path: &str,
    received_at: i64,
) -> Result<Vec<MessagePath>> {
    let paths_json: Option<Option<String>> = conn
        .query_row("SELECT paths FROM messages WHERE id = ?1", [message_id], |row| {
            row.get(0)
        })
        .optional()
        .map_err(DbError::Sqlite)?;

    let Some(paths_json) = paths_json else {
        return Ok(Vec::new());
    };

    let mut paths = parse_paths(paths_json).unwrap_or_default();
    paths.push(MessagePath {
        path: path.to_string(),
        received_at,
    });

    let json =
        serde_json::to_string(&paths).map_err(|e| DbError::Serialization(e.to_string()))?;
    conn.execute(
        "UPDATE messages SET paths = ?1 WHERE id = ?2",
        rusqlite::params![json, message_id],
    )?;
    Ok(paths)
}

/// Promote PRIV messages stored under a short prefix key to the full key,
/// but only when exactly one contact matches the prefix, since two contacts
/// sharing a prefix byte must keep separate conversations.
pub fn claim_prefix_messages(conn: &Connection, full_key: &str) -> Result<usize> {
    let lower = full_key.to_lowercase();
    let changed = conn.execute(
        "UPDATE messages SET conversation_key = ?1
         WHERE type = 'PRIV' AND length(conversation_key) < 64
           AND ?1 LIKE conversation_key || '%'
           AND (
               SELECT COUNT(*) FROM contacts
               WHERE public_key LIKE messages.conversation_key || '%'
           ) = 1",
        [&lower],
    )?;
    Ok(changed)
}

/// Increment the observed-echo counter and return the new value.
pub fn increment_ack_count(conn: &Connection, message_id: i64) -> Result<i64> {
    conn.execute(
        "UPDATE messages SET acked = acked + 1 WHERE id = ?1",
        [message_id],
    )?;
    get_ack_count(conn, message_id)
}

pub fn get_ack_count(conn: &Connection, message_id: i64) -> Result<i64> {
    let acked: Option<i64> = conn
        .query_row("SELECT acked FROM messages WHERE id = ?1", [message_id], |row| {
            row.get(0)
        })
        .optional()
        .map_err(DbError::Sqlite)?;
    Ok(acked.unwrap_or(0))
}

/// List messages, newest first. Conversation keys match by prefix so DM
/// conversations stored under a short key are still reachable.
pub fn list(conn: &Connection, filter: &MessageFilter) -> Result<Vec<Message>> {
    let mut sql = format!("SELECT {COLUMNS} FROM messages WHERE 1=1");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(msg_type) = &filter.msg_type {
        sql.push_str(&format!(" AND type = ?{}", params.len() + 1));
        params.push(Box::new(msg_type.clone()));
    }
    if let Some(key) = &filter.conversation_key {
        sql.push_str(&format!(" AND conversation_key LIKE ?{}", params.len() + 1));
        params.push(Box::new(format!("{key}%")));
    }

    let cursor = filter.before.zip(filter.before_id);
    if let Some((before, before_id)) = cursor {
        let p = params.len();
        sql.push_str(&format!(
            " AND (received_at < ?{} OR (received_at = ?{} AND id < ?{}))",
            p + 1,
            p + 1,
            p + 2
        ));
        params.push(Box::new(before));
        params.push(Box::new(before_id));
    }

    sql.push_str(&format!(
        " ORDER BY received_at DESC, id DESC LIMIT ?{}",
        params.len() + 1
    ));
    params.push(Box::new(filter.limit));

    if cursor.is_none() {
        sql.push_str(&format!(" OFFSET ?{}", params.len() + 1));
        params.push(Box::new(filter.offset));
    }

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), row_to_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fetch the newest messages for several conversations in one call.
/// Result keys are `"{type}:{conversation_key}"`.
pub fn get_bulk(
    conn: &Connection,
    conversations: &[(String, String)],
    limit_per_conversation: i64,
) -> Result<HashMap<String, Vec<Message>>> {
    let mut result = HashMap::new();
    for (msg_type, conversation_key) in conversations {
        let messages = list(
            conn,
            &MessageFilter {
                limit: limit_per_conversation,
                msg_type: Some(msg_type.clone()),
                conversation_key: Some(conversation_key.clone()),
                ..Default::default()
            },
        )?;
        result.insert(format!("{msg_type}:{conversation_key}"), messages);
    }
    Ok(result)
}

/// Aggregate unread counts, mention flags, and sidebar sort keys.
///
/// Unread = inbound messages newer than the conversation's
/// `last_read_at`. A mention is the literal token `@[name]` in the text.
/// `last_message_times` covers every conversation with any message,
/// whatever its read state; it is the sidebar sort key.
pub fn unread_summary(conn: &Connection, name: Option<&str>) -> Result<UnreadSummary> {
    let mut summary = UnreadSummary::default();
    let mention_token = name.map(|n| format!("@[{n}]")).unwrap_or_default();

    let channel_sql = "
        SELECT m.conversation_key,
               COUNT(*),
               SUM(CASE WHEN ?1 <> '' AND INSTR(m.text, ?1) > 0 THEN 1 ELSE 0 END) > 0
        FROM messages m
        JOIN channels c ON m.conversation_key = c.key
        WHERE m.type = 'CHAN' AND m.outgoing = 0
          AND m.received_at > COALESCE(c.last_read_at, 0)
        GROUP BY m.conversation_key";
    let contact_sql = "
        SELECT m.conversation_key,
               COUNT(*),
               SUM(CASE WHEN ?1 <> '' AND INSTR(m.text, ?1) > 0 THEN 1 ELSE 0 END) > 0
        FROM messages m
        JOIN contacts ct ON m.conversation_key = ct.public_key
        WHERE m.type = 'PRIV' AND m.outgoing = 0
          AND m.received_at > COALESCE(ct.last_read_at, 0)
        GROUP BY m.conversation_key";

    for (sql, prefix) in [(channel_sql, "channel"), (contact_sql, "contact")] {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([&mention_token], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?;
        for row in rows {
            let (key, count, has_mention) = row?;
            let state_key = format!("{prefix}-{key}");
            summary.counts.insert(state_key.clone(), count);
            if !mention_token.is_empty() && has_mention {
                summary.mentions.insert(state_key, true);
            }
        }
    }

    let mut stmt = conn.prepare(
        "SELECT type, conversation_key, MAX(received_at)
         FROM messages GROUP BY type, conversation_key",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    for row in rows {
        let (msg_type, key, last) = row?;
        let prefix = if msg_type == "CHAN" { "channel" } else { "contact" };
        summary.last_message_times.insert(format!("{prefix}-{key}"), last);
    }

    Ok(summary)
}
