//! Typed rows and JSON-column payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Contact type for repeater nodes (they forward traffic and answer CLI
/// over direct messages; they never appear in the radio working set).
pub const CONTACT_TYPE_REPEATER: i64 = 2;

/// The protected Public channel: well-known key, canonical name.
pub const PUBLIC_CHANNEL_KEY: &str = "8B3387E9C5CDEA6AC9E5EDBAA115CD72";
pub const PUBLIC_CHANNEL_NAME: &str = "Public";

/// A peer node, keyed by its 64-char lower-case hex Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub public_key: String,
    pub name: Option<String>,
    /// 0=unknown, 1=chat, 2=repeater, 3=room, 4=sensor.
    #[serde(rename = "type")]
    pub contact_type: i64,
    pub flags: i64,
    /// Hex routing path, two chars per hop.
    pub last_path: Option<String>,
    /// Hop count; -1 = unknown.
    pub last_path_len: i64,
    /// Sender's clock from its last advertisement.
    pub last_advert: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Our receive clock when last heard.
    pub last_seen: Option<i64>,
    /// Currently present in the radio's flash contact table.
    pub on_radio: bool,
    pub last_contacted: Option<i64>,
    pub last_read_at: Option<i64>,
}

/// A symmetrically keyed group chat, keyed by 32-char upper-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub key: String,
    pub name: String,
    pub is_hashtag: bool,
    pub on_radio: bool,
    pub last_read_at: Option<i64>,
}

/// One observed route for a message. Echoes over the same route are
/// separate observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePath {
    /// Hex-encoded path, empty for zero-hop direct receptions.
    pub path: String,
    pub received_at: i64,
}

/// A stored conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    /// "PRIV" or "CHAN".
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Contact pubkey (lower-case) for PRIV, channel key (upper-case) for
    /// CHAN.
    pub conversation_key: String,
    pub text: String,
    pub sender_timestamp: Option<i64>,
    pub received_at: i64,
    pub paths: Option<Vec<MessagePath>>,
    pub txt_type: i64,
    pub signature: Option<String>,
    pub outgoing: bool,
    /// Observed-echo counter for outgoing messages.
    pub acked: i64,
}

/// A favorited conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorite {
    /// "channel" or "contact".
    #[serde(rename = "type")]
    pub fav_type: String,
    /// Channel key or contact public key.
    pub id: String,
}

/// Stored configuration for one scripted responder. Execution happens in
/// an external host; the gateway only persists the definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub code: String,
}

/// Application settings (single row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Cap for the radio's non-repeater working set.
    pub max_radio_contacts: i64,
    pub favorites: Vec<Favorite>,
    pub auto_decrypt_dm_on_advert: bool,
    /// "recent" or "alpha".
    pub sidebar_sort_order: String,
    pub last_message_times: HashMap<String, i64>,
    pub preferences_migrated: bool,
    /// Periodic advertisement interval in seconds; 0 = disabled.
    pub advert_interval: i64,
    /// Unix timestamp of the last advertisement; 0 = never.
    pub last_advert_time: i64,
    pub bots: Vec<BotConfig>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            max_radio_contacts: 200,
            favorites: Vec::new(),
            auto_decrypt_dm_on_advert: false,
            sidebar_sort_order: "recent".to_string(),
            last_message_times: HashMap::new(),
            preferences_migrated: false,
            advert_interval: 0,
            last_advert_time: 0,
            bots: Vec::new(),
        }
    }
}

/// Aggregated unread counts, mention flags, and sidebar sort keys.
///
/// Keys are `"channel-{KEY}"` / `"contact-{pubkey}"` state keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnreadSummary {
    pub counts: HashMap<String, i64>,
    pub mentions: HashMap<String, bool>,
    pub last_message_times: HashMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_serializes_type_field() {
        let contact = Contact {
            public_key: "ab".repeat(32),
            name: Some("Alice".to_string()),
            contact_type: 1,
            flags: 0,
            last_path: None,
            last_path_len: -1,
            last_advert: None,
            lat: None,
            lon: None,
            last_seen: Some(1000),
            on_radio: false,
            last_contacted: None,
            last_read_at: None,
        };
        let value = serde_json::to_value(&contact).expect("serialize");
        assert_eq!(value["type"], 1);
        assert!(value.get("contact_type").is_none());
    }

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.max_radio_contacts, 200);
        assert_eq!(settings.sidebar_sort_order, "recent");
        assert_eq!(settings.advert_interval, 0);
        assert!(settings.favorites.is_empty());
    }

    #[test]
    fn test_bot_config_defaults_on_deserialize() {
        let bot: BotConfig =
            serde_json::from_str(r#"{"id":"b1","name":"Greeter"}"#).expect("parse");
        assert!(!bot.enabled);
        assert_eq!(bot.code, "");
    }
}
