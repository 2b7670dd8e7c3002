//! Initial database schema.
//!
//! Case discipline is enforced by the write paths, not the schema: contact
//! keys are stored lower-case, channel keys upper-case.

/// Schema as first shipped (migration 1). Later migrations add
/// `last_read_at` tracking and drop the unused retry counter.
pub const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS contacts (
    public_key     TEXT PRIMARY KEY,
    name           TEXT,
    type           INTEGER NOT NULL DEFAULT 0,
    flags          INTEGER NOT NULL DEFAULT 0,
    last_path      TEXT,
    last_path_len  INTEGER NOT NULL DEFAULT -1,
    last_advert    INTEGER,
    lat            REAL,
    lon            REAL,
    last_seen      INTEGER,
    on_radio       INTEGER NOT NULL DEFAULT 0,
    last_contacted INTEGER
);

CREATE INDEX IF NOT EXISTS idx_contacts_on_radio ON contacts(on_radio);

CREATE TABLE IF NOT EXISTS channels (
    key          TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    is_hashtag   INTEGER NOT NULL DEFAULT 0,
    on_radio     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messages (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    type             TEXT NOT NULL,
    conversation_key TEXT NOT NULL,
    text             TEXT NOT NULL,
    sender_timestamp INTEGER,
    received_at      INTEGER NOT NULL,
    paths            TEXT,
    txt_type         INTEGER NOT NULL DEFAULT 0,
    signature        TEXT,
    outgoing         INTEGER NOT NULL DEFAULT 0,
    acked            INTEGER NOT NULL DEFAULT 0,
    UNIQUE(type, conversation_key, text, sender_timestamp)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(type, conversation_key);
CREATE INDEX IF NOT EXISTS idx_messages_received_at ON messages(received_at);

CREATE TABLE IF NOT EXISTS raw_packets (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp        INTEGER NOT NULL,
    data             BLOB NOT NULL,
    message_id       INTEGER REFERENCES messages(id),
    payload_hash     TEXT,
    decrypt_attempts INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_raw_packets_payload_hash
    ON raw_packets(payload_hash);
CREATE INDEX IF NOT EXISTS idx_raw_packets_message_id
    ON raw_packets(message_id);

CREATE TABLE IF NOT EXISTS app_settings (
    id                        INTEGER PRIMARY KEY CHECK (id = 1),
    max_radio_contacts        INTEGER NOT NULL DEFAULT 200,
    favorites                 TEXT,
    auto_decrypt_dm_on_advert INTEGER NOT NULL DEFAULT 0,
    sidebar_sort_order        TEXT NOT NULL DEFAULT 'recent',
    last_message_times        TEXT,
    preferences_migrated      INTEGER NOT NULL DEFAULT 0,
    advert_interval           INTEGER NOT NULL DEFAULT 0,
    last_advert_time          INTEGER NOT NULL DEFAULT 0,
    bots                      TEXT
);

INSERT OR IGNORE INTO app_settings (id) VALUES (1);
";
