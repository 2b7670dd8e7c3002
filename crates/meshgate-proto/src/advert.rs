//! Advertisement beacon parsing.
//!
//! ## Payload layout (101+ bytes)
//!
//! ```text
//! public_key (32)    Ed25519 identity
//! timestamp (4 LE)   sender's clock
//! signature (64)     not verified here
//! flags (1)          bits 0-3 device role (1=chat, 2=repeater, 3=room,
//!                    4=sensor); 0x10 location; 0x20/0x40 feature1/2;
//!                    0x80 name
//! [location (8)]     lat, lon as signed i32 LE / 1e6
//! [feature1 (2)]     skipped
//! [feature2 (2)]     skipped
//! [name (rest)]      UTF-8, NUL-trimmed, control chars stripped
//! ```

use crate::{packet, PayloadType};

/// Parsed advertisement beacon.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAdvertisement {
    /// 64-char lower-case hex public key.
    pub public_key: String,
    /// Sender's clock at broadcast time.
    pub timestamp: u32,
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// 1=chat, 2=repeater, 3=room, 4=sensor.
    pub device_role: u8,
}

/// Parse an advertisement payload.
pub fn parse_advertisement(payload: &[u8]) -> Option<ParsedAdvertisement> {
    if payload.len() < 101 {
        return None;
    }

    let public_key = hex::encode(&payload[0..32]);
    let timestamp = u32::from_le_bytes([payload[32], payload[33], payload[34], payload[35]]);
    // signature at 36..100 is not verified
    let flags = payload[100];

    let device_role = flags & 0x0F;
    let has_location = flags & 0x10 != 0;
    let has_feature1 = flags & 0x20 != 0;
    let has_feature2 = flags & 0x40 != 0;
    let has_name = flags & 0x80 != 0;

    let mut offset = 101;
    let mut lat = None;
    let mut lon = None;

    if has_location {
        if payload.len() < offset + 8 {
            // Truncated app data: keep the identity, drop the extras.
            return Some(ParsedAdvertisement {
                public_key,
                timestamp,
                name: None,
                lat: None,
                lon: None,
                device_role,
            });
        }
        let lat_raw = i32::from_le_bytes([
            payload[offset],
            payload[offset + 1],
            payload[offset + 2],
            payload[offset + 3],
        ]);
        let lon_raw = i32::from_le_bytes([
            payload[offset + 4],
            payload[offset + 5],
            payload[offset + 6],
            payload[offset + 7],
        ]);
        lat = Some(f64::from(lat_raw) / 1_000_000.0);
        lon = Some(f64::from(lon_raw) / 1_000_000.0);
        offset += 8;
    }

    if has_feature1 {
        offset += 2;
    }
    if has_feature2 {
        offset += 2;
    }

    let mut name = None;
    if has_name && payload.len() > offset {
        name = parse_name(&payload[offset..]);
    }

    Some(ParsedAdvertisement {
        public_key,
        timestamp,
        name,
        lat,
        lon,
        device_role,
    })
}

/// Decode the trailing name bytes: lossy UTF-8, trimmed at the first NUL,
/// control characters stripped. A name with no alphanumeric content is
/// treated as absent.
fn parse_name(bytes: &[u8]) -> Option<String> {
    let raw = String::from_utf8_lossy(bytes);
    let trimmed = match raw.find('\0') {
        Some(idx) => &raw[..idx],
        None => &raw[..],
    };
    let cleaned: String = trimmed
        .chars()
        .filter(|&c| c >= ' ' || c == '\t')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || !cleaned.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(cleaned.to_string())
}

/// Try to parse a full raw frame as an advertisement.
pub fn try_parse_advertisement(raw: &[u8]) -> Option<ParsedAdvertisement> {
    let info = packet::parse_packet(raw)?;
    if info.payload_type != PayloadType::Advert {
        return None;
    }
    parse_advertisement(&info.payload)
}
