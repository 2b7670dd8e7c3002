//! Contact query functions.
//!
//! All keys are stored lower-case; the write paths normalize.

use rusqlite::{Connection, OptionalExtension, Row};

use crate::models::{Contact, CONTACT_TYPE_REPEATER};
use crate::{DbError, Result};

const COLUMNS: &str = "public_key, name, type, flags, last_path, last_path_len, \
                       last_advert, lat, lon, last_seen, on_radio, last_contacted, \
                       last_read_at";

/// Field set accepted by [`upsert`]. Optional fields preserve the stored
/// value on conflict.
#[derive(Debug, Clone, Default)]
pub struct ContactUpsert {
    pub public_key: String,
    pub name: Option<String>,
    pub contact_type: i64,
    pub flags: i64,
    pub last_path: Option<String>,
    pub last_path_len: i64,
    pub last_advert: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub last_seen: i64,
    pub on_radio: bool,
    pub last_contacted: Option<i64>,
}

/// Result of a prefix lookup. More than one match is a distinguished
/// signal: the caller must supply more bytes before we touch anything.
#[derive(Debug, Clone, PartialEq)]
pub enum PrefixMatch {
    None,
    One(Contact),
    Ambiguous,
}

fn row_to_contact(row: &Row) -> rusqlite::Result<Contact> {
    Ok(Contact {
        public_key: row.get(0)?,
        name: row.get(1)?,
        contact_type: row.get(2)?,
        flags: row.get(3)?,
        last_path: row.get(4)?,
        last_path_len: row.get(5)?,
        last_advert: row.get(6)?,
        lat: row.get(7)?,
        lon: row.get(8)?,
        last_seen: row.get(9)?,
        on_radio: row.get(10)?,
        last_contacted: row.get(11)?,
        last_read_at: row.get(12)?,
    })
}

/// Insert or merge a contact.
///
/// Merge rules on conflict: name/path/advert/lat/lon/last_contacted keep
/// the stored value when the new one is null; type keeps the stored value
/// when the new one is 0; flags, path length, last_seen, and on_radio
/// overwrite.
pub fn upsert(conn: &Connection, contact: &ContactUpsert) -> Result<()> {
    conn.execute(
        "INSERT INTO contacts (public_key, name, type, flags, last_path, last_path_len,
                               last_advert, lat, lon, last_seen, on_radio, last_contacted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(public_key) DO UPDATE SET
             name = COALESCE(excluded.name, contacts.name),
             type = CASE WHEN excluded.type = 0 THEN contacts.type ELSE excluded.type END,
             flags = excluded.flags,
             last_path = COALESCE(excluded.last_path, contacts.last_path),
             last_path_len = excluded.last_path_len,
             last_advert = COALESCE(excluded.last_advert, contacts.last_advert),
             lat = COALESCE(excluded.lat, contacts.lat),
             lon = COALESCE(excluded.lon, contacts.lon),
             last_seen = excluded.last_seen,
             on_radio = excluded.on_radio,
             last_contacted = COALESCE(excluded.last_contacted, contacts.last_contacted)",
        rusqlite::params![
            contact.public_key.to_lowercase(),
            contact.name,
            contact.contact_type,
            contact.flags,
            contact.last_path,
            contact.last_path_len,
            contact.last_advert,
            contact.lat,
            contact.lon,
            contact.last_seen,
            contact.on_radio,
            contact.last_contacted,
        ],
    )?;
    Ok(())
}

/// Get a contact by its full public key.
pub fn get_by_key(conn: &Connection, public_key: &str) -> Result<Option<Contact>> {
    let sql = format!("SELECT {COLUMNS} FROM contacts WHERE public_key = ?1");
    conn.query_row(&sql, [public_key.to_lowercase()], row_to_contact)
        .optional()
        .map_err(DbError::Sqlite)
}

/// Look up by key prefix. Exactly one match returns the contact; more
/// than one returns [`PrefixMatch::Ambiguous`].
pub fn get_by_prefix(conn: &Connection, prefix: &str) -> Result<PrefixMatch> {
    let sql = format!(
        "SELECT {COLUMNS} FROM contacts WHERE public_key LIKE ?1 ORDER BY public_key LIMIT 2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([format!("{}%", prefix.to_lowercase())], row_to_contact)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(match rows.len() {
        0 => PrefixMatch::None,
        1 => PrefixMatch::One(rows.into_iter().next().ok_or_else(|| {
            DbError::NotFound("contact".into())
        })?),
        _ => PrefixMatch::Ambiguous,
    })
}

/// Resolve an input that may be a full 64-char key or a shorter prefix.
/// Exact lookups are unambiguous by definition.
pub fn get_by_key_or_prefix(conn: &Connection, key_or_prefix: &str) -> Result<PrefixMatch> {
    if key_or_prefix.len() == 64 {
        return Ok(match get_by_key(conn, key_or_prefix)? {
            Some(contact) => PrefixMatch::One(contact),
            None => PrefixMatch::None,
        });
    }
    if let Some(contact) = get_by_key(conn, key_or_prefix)? {
        return Ok(PrefixMatch::One(contact));
    }
    get_by_prefix(conn, key_or_prefix)
}

/// List contacts ordered by display name (key when unnamed).
pub fn get_all(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Contact>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM contacts ORDER BY COALESCE(name, public_key) LIMIT ?1 OFFSET ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([limit, offset], row_to_contact)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Most-recently-active non-repeater contacts, the candidates for the
/// radio's working set.
pub fn get_recent_non_repeaters(conn: &Connection, limit: i64) -> Result<Vec<Contact>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM contacts
         WHERE type != {CONTACT_TYPE_REPEATER}
         ORDER BY COALESCE(last_contacted, 0) DESC, COALESCE(last_advert, 0) DESC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([limit], row_to_contact)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Contacts whose public key starts with the given hex byte (two chars).
/// These are the DM decrypt candidates for a 1-byte source hash.
pub fn get_by_first_byte(conn: &Connection, hex_byte: &str) -> Result<Vec<Contact>> {
    let sql = format!("SELECT {COLUMNS} FROM contacts WHERE substr(public_key, 1, 2) = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([hex_byte.to_lowercase()], row_to_contact)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Overwrite a contact's routing path.
pub fn update_path(conn: &Connection, public_key: &str, path: &str, path_len: i64, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE contacts SET last_path = ?1, last_path_len = ?2, last_seen = ?3
         WHERE public_key = ?4",
        rusqlite::params![path, path_len, now, public_key.to_lowercase()],
    )?;
    Ok(())
}

pub fn set_on_radio(conn: &Connection, public_key: &str, on_radio: bool) -> Result<()> {
    conn.execute(
        "UPDATE contacts SET on_radio = ?1 WHERE public_key = ?2",
        rusqlite::params![on_radio, public_key.to_lowercase()],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, public_key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM contacts WHERE public_key = ?1",
        [public_key.to_lowercase()],
    )?;
    Ok(())
}

pub fn update_last_contacted(conn: &Connection, public_key: &str, timestamp: i64) -> Result<()> {
    conn.execute(
        "UPDATE contacts SET last_contacted = ?1, last_seen = ?1 WHERE public_key = ?2",
        rusqlite::params![timestamp, public_key.to_lowercase()],
    )?;
    Ok(())
}

/// Returns false when the contact does not exist.
pub fn update_last_read_at(conn: &Connection, public_key: &str, timestamp: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE contacts SET last_read_at = ?1 WHERE public_key = ?2",
        rusqlite::params![timestamp, public_key.to_lowercase()],
    )?;
    Ok(changed > 0)
}

pub fn mark_all_read(conn: &Connection, timestamp: i64) -> Result<()> {
    conn.execute("UPDATE contacts SET last_read_at = ?1", [timestamp])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn key(first: &str) -> String {
        format!("{first}{}", "0".repeat(64 - first.len()))
    }

    fn simple(public_key: &str, name: Option<&str>) -> ContactUpsert {
        ContactUpsert {
            public_key: public_key.to_string(),
            name: name.map(str::to_string),
            contact_type: 1,
            last_seen: 1000,
            last_path_len: -1,
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = test_db();
        let k = key("aa");
        upsert(&conn, &simple(&k, Some("Alice"))).expect("upsert");

        let contact = get_by_key(&conn, &k).expect("get").expect("exists");
        assert_eq!(contact.name.as_deref(), Some("Alice"));
        assert_eq!(contact.contact_type, 1);
        assert_eq!(contact.last_path_len, -1);
        assert!(!contact.on_radio);
    }

    #[test]
    fn test_keys_stored_lower_case() {
        let conn = test_db();
        let k = key("AB").to_uppercase();
        upsert(&conn, &simple(&k, None)).expect("upsert");

        let contact = get_by_key(&conn, &k).expect("get").expect("exists");
        assert_eq!(contact.public_key, k.to_lowercase());
    }

    #[test]
    fn test_merge_preserves_name_and_type() {
        let conn = test_db();
        let k = key("aa");
        upsert(&conn, &simple(&k, Some("Alice"))).expect("first");

        // Nameless, type-0 update must not erase either field.
        let mut update = simple(&k, None);
        update.contact_type = 0;
        update.last_seen = 2000;
        upsert(&conn, &update).expect("second");

        let contact = get_by_key(&conn, &k).expect("get").expect("exists");
        assert_eq!(contact.name.as_deref(), Some("Alice"));
        assert_eq!(contact.contact_type, 1);
        assert_eq!(contact.last_seen, Some(2000));
    }

    #[test]
    fn test_merge_preserves_location_when_absent() {
        let conn = test_db();
        let k = key("aa");
        let mut first = simple(&k, None);
        first.lat = Some(49.0);
        first.lon = Some(-123.0);
        upsert(&conn, &first).expect("first");

        upsert(&conn, &simple(&k, None)).expect("second");

        let contact = get_by_key(&conn, &k).expect("get").expect("exists");
        assert_eq!(contact.lat, Some(49.0));
        assert_eq!(contact.lon, Some(-123.0));
    }

    #[test]
    fn test_prefix_lookup_single() {
        let conn = test_db();
        upsert(&conn, &simple(&key("aa"), Some("Alice"))).expect("upsert");
        upsert(&conn, &simple(&key("bb"), Some("Bob"))).expect("upsert");

        match get_by_prefix(&conn, "aa").expect("lookup") {
            PrefixMatch::One(c) => assert_eq!(c.name.as_deref(), Some("Alice")),
            other => panic!("expected single match, got {other:?}"),
        }
    }

    #[test]
    fn test_prefix_lookup_ambiguous() {
        let conn = test_db();
        upsert(&conn, &simple(&format!("aa11{}", "0".repeat(60)), None)).expect("upsert");
        upsert(&conn, &simple(&format!("aa22{}", "0".repeat(60)), None)).expect("upsert");

        assert_eq!(get_by_prefix(&conn, "aa").expect("lookup"), PrefixMatch::Ambiguous);
        assert_eq!(get_by_prefix(&conn, "cc").expect("lookup"), PrefixMatch::None);
    }

    #[test]
    fn test_exact_key_lookup_is_unambiguous() {
        let conn = test_db();
        let k1 = format!("aa11{}", "0".repeat(60));
        upsert(&conn, &simple(&k1, Some("One"))).expect("upsert");
        upsert(&conn, &simple(&format!("aa22{}", "0".repeat(60)), Some("Two"))).expect("upsert");

        match get_by_key_or_prefix(&conn, &k1).expect("lookup") {
            PrefixMatch::One(c) => assert_eq!(c.name.as_deref(), Some("One")),
            other => panic!("expected exact match, got {other:?}"),
        }
    }

    #[test]
    fn test_recent_non_repeaters_excludes_repeaters() {
        let conn = test_db();
        let mut chat = simple(&key("aa"), Some("Chat"));
        chat.last_contacted = Some(5000);
        upsert(&conn, &chat).expect("upsert");

        let mut repeater = simple(&key("bb"), Some("Repeater"));
        repeater.contact_type = CONTACT_TYPE_REPEATER;
        repeater.last_contacted = Some(9000);
        upsert(&conn, &repeater).expect("upsert");

        let recent = get_recent_non_repeaters(&conn, 10).expect("query");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name.as_deref(), Some("Chat"));
    }

    #[test]
    fn test_recent_non_repeaters_ordering() {
        let conn = test_db();
        let mut old = simple(&key("aa"), Some("Old"));
        old.last_contacted = Some(100);
        upsert(&conn, &old).expect("upsert");

        let mut fresh = simple(&key("bb"), Some("Fresh"));
        fresh.last_contacted = Some(900);
        upsert(&conn, &fresh).expect("upsert");

        let recent = get_recent_non_repeaters(&conn, 10).expect("query");
        assert_eq!(recent[0].name.as_deref(), Some("Fresh"));
        assert_eq!(recent[1].name.as_deref(), Some("Old"));
    }

    #[test]
    fn test_get_by_first_byte() {
        let conn = test_db();
        upsert(&conn, &simple(&format!("a1{}", "0".repeat(62)), None)).expect("upsert");
        upsert(&conn, &simple(&format!("a2{}", "0".repeat(62)), None)).expect("upsert");

        let matches = get_by_first_byte(&conn, "a1").expect("query");
        assert_eq!(matches.len(), 1);
        assert!(matches[0].public_key.starts_with("a1"));
    }

    #[test]
    fn test_update_last_read_at() {
        let conn = test_db();
        let k = key("aa");
        upsert(&conn, &simple(&k, None)).expect("upsert");

        assert!(update_last_read_at(&conn, &k, 4242).expect("update"));
        assert!(!update_last_read_at(&conn, &key("ff"), 4242).expect("missing"));

        let contact = get_by_key(&conn, &k).expect("get").expect("exists");
        assert_eq!(contact.last_read_at, Some(4242));
    }

    #[test]
    fn test_delete() {
        let conn = test_db();
        let k = key("aa");
        upsert(&conn, &simple(&k, None)).expect("upsert");
        delete(&conn, &k).expect("delete");
        assert!(get_by_key(&conn, &k).expect("get").is_none());
    }
}
