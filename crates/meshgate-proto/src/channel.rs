//! Group-text (channel) envelope.
//!
//! ## Payload layout
//!
//! ```text
//! channel_hash (1)   first byte of SHA-256(channel_key)
//! mac (2)            HMAC-SHA256(channel_key || 16 zero bytes, ciphertext)[..2]
//! ciphertext (n*16)  AES-128-ECB under channel_key
//! ```
//!
//! Decrypted plaintext: `timestamp (4 LE) || flags (1) || utf8 text`,
//! NUL-padded to the block boundary. Channel text carries the sender as a
//! `"Sender: message"` prefix on the wire.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::{packet, PayloadType};

type HmacSha256 = Hmac<Sha256>;

/// Result of decrypting a group-text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedGroupText {
    pub timestamp: u32,
    pub flags: u8,
    /// Parsed sender name, when the text carried a `"Sender: "` prefix.
    pub sender: Option<String>,
    /// Message text with any sender prefix removed.
    pub message: String,
    /// The payload's channel-hash byte as two hex digits.
    pub channel_hash: String,
}

/// First byte of SHA-256 over the 16-byte channel key, as two hex digits.
/// Lets decrypt attempts skip keys that cannot match.
pub fn calculate_channel_hash(channel_key: &[u8; 16]) -> String {
    let digest = Sha256::digest(channel_key);
    format!("{:02x}", digest[0])
}

/// Derive a hashtag channel's key from its name: `SHA-256(name)[..16]`.
pub fn derive_hashtag_key(name: &str) -> [u8; 16] {
    let digest = Sha256::digest(name.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// The 32-byte MAC secret: channel key followed by 16 zero bytes.
fn channel_secret(channel_key: &[u8; 16]) -> [u8; 32] {
    let mut secret = [0u8; 32];
    secret[..16].copy_from_slice(channel_key);
    secret
}

/// Decrypt a group-text payload with a channel key.
pub fn decrypt_group_text(payload: &[u8], channel_key: &[u8; 16]) -> Option<DecryptedGroupText> {
    if payload.len() < 3 {
        return None;
    }

    let channel_hash = format!("{:02x}", payload[0]);
    let mac_tag = &payload[1..3];
    let ciphertext = &payload[3..];

    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return None;
    }

    // Truncated-MAC verify in constant time before touching the ciphertext.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&channel_secret(channel_key)).ok()?;
    mac.update(ciphertext);
    mac.verify_truncated_left(mac_tag).ok()?;

    let plaintext = ecb_decrypt(channel_key, ciphertext);
    let (timestamp, flags, text) = parse_text_payload(&plaintext)?;
    let (sender, message) = split_sender(&text);

    Some(DecryptedGroupText {
        timestamp,
        flags,
        sender,
        message,
        channel_hash,
    })
}

/// Build an encrypted group-text payload (the inverse of
/// [`decrypt_group_text`]). Used by tests and fixtures.
pub fn encrypt_group_text(
    channel_key: &[u8; 16],
    timestamp: u32,
    flags: u8,
    text: &str,
) -> Option<Vec<u8>> {
    let mut plaintext = Vec::with_capacity(5 + text.len() + 16);
    plaintext.extend_from_slice(&timestamp.to_le_bytes());
    plaintext.push(flags);
    plaintext.extend_from_slice(text.as_bytes());
    plaintext.push(0);
    while plaintext.len() % 16 != 0 {
        plaintext.push(0);
    }

    let ciphertext = ecb_encrypt(channel_key, &plaintext);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(&channel_secret(channel_key)).ok()?;
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let digest = Sha256::digest(channel_key);
    let mut payload = Vec::with_capacity(3 + ciphertext.len());
    payload.push(digest[0]);
    payload.extend_from_slice(&tag[..2]);
    payload.extend_from_slice(&ciphertext);
    Some(payload)
}

/// Try to decrypt a full raw frame with a channel key.
///
/// Only GROUP_TEXT frames qualify, and the payload's channel-hash byte must
/// match the key before any MAC work is done.
pub fn try_decrypt_packet_with_channel_key(
    raw: &[u8],
    channel_key: &[u8; 16],
) -> Option<DecryptedGroupText> {
    let info = packet::parse_packet(raw)?;
    if info.payload_type != PayloadType::GroupText {
        return None;
    }

    let first = *info.payload.first()?;
    if format!("{first:02x}") != calculate_channel_hash(channel_key) {
        return None;
    }

    decrypt_group_text(&info.payload, channel_key)
}

/// Parse the decrypted envelope plaintext shared by channel and direct
/// messages: `timestamp (4 LE) || flags (1) || utf8 text`, NUL-trimmed.
pub(crate) fn parse_text_payload(plaintext: &[u8]) -> Option<(u32, u8, String)> {
    if plaintext.len() < 5 {
        return None;
    }
    let timestamp = u32::from_le_bytes([plaintext[0], plaintext[1], plaintext[2], plaintext[3]]);
    let flags = plaintext[4];

    let text = std::str::from_utf8(&plaintext[5..]).ok()?;
    let text = match text.find('\0') {
        Some(idx) => &text[..idx],
        None => text,
    };
    Some((timestamp, flags, text.to_string()))
}

/// Split `"Sender: message"` when the prefix looks like a sender name:
/// the separator appears within the first 50 characters and the prefix
/// contains none of `:`, `[`, `]`, NUL.
pub(crate) fn split_sender(text: &str) -> (Option<String>, String) {
    if let Some(idx) = text.find(": ") {
        let prefix = &text[..idx];
        if idx > 0
            && prefix.chars().count() < 50
            && !prefix.contains([':', '[', ']', '\0'])
        {
            return (Some(prefix.to_string()), text[idx + 2..].to_string());
        }
    }
    (None, text.to_string())
}

fn ecb_decrypt(key: &[u8; 16], ciphertext: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = ciphertext.to_vec();
    for block in out.chunks_exact_mut(16) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

fn ecb_encrypt(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = plaintext.to_vec();
    for block in out.chunks_exact_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(name: &str) -> [u8; 16] {
        derive_hashtag_key(name)
    }

    #[test]
    fn test_channel_hash() {
        let key = [0u8; 16];
        let digest = Sha256::digest(key);
        assert_eq!(calculate_channel_hash(&key), format!("{:02x}", digest[0]));
        assert_eq!(calculate_channel_hash(&key).len(), 2);
    }

    #[test]
    fn test_hashtag_key_derivation() {
        let key = derive_hashtag_key("#six77");
        assert_eq!(hex::encode(key), "7aba109edcf304a84433cb71d0f3ab73");
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key("#testchannel");
        let payload =
            encrypt_group_text(&key, 1700000000, 0, "TestUser: Hello world").expect("encrypt");

        let result = decrypt_group_text(&payload, &key).expect("decrypt");
        assert_eq!(result.timestamp, 1700000000);
        assert_eq!(result.sender.as_deref(), Some("TestUser"));
        assert_eq!(result.message, "Hello world");
    }

    #[test]
    fn test_decrypt_without_sender_prefix() {
        let key = test_key("#test");
        let payload =
            encrypt_group_text(&key, 1234567890, 0, "Just a plain message").expect("encrypt");

        let result = decrypt_group_text(&payload, &key).expect("decrypt");
        assert_eq!(result.sender, None);
        assert_eq!(result.message, "Just a plain message");
    }

    #[test]
    fn test_wrong_key_fails_mac() {
        let payload =
            encrypt_group_text(&test_key("#correct"), 1234567890, 0, "test").expect("encrypt");
        assert_eq!(decrypt_group_text(&payload, &test_key("#wrong")), None);
    }

    #[test]
    fn test_corrupted_mac_fails() {
        let key = test_key("#test");
        let mut payload = encrypt_group_text(&key, 1234567890, 0, "test").expect("encrypt");
        payload[1] ^= 0xFF;
        payload[2] ^= 0xFF;
        assert_eq!(decrypt_group_text(&payload, &key), None);
    }

    #[test]
    fn test_empty_ciphertext_rejected() {
        let key = test_key("#test");
        let digest = Sha256::digest(key);
        // hash + mac but no ciphertext blocks
        assert_eq!(decrypt_group_text(&[digest[0], 0x00, 0x00], &key), None);
    }

    #[test]
    fn test_partial_block_rejected() {
        let key = test_key("#test");
        let mut payload = encrypt_group_text(&key, 1, 0, "x").expect("encrypt");
        payload.pop();
        assert_eq!(decrypt_group_text(&payload, &key), None);
    }

    #[test]
    fn test_sender_with_invalid_chars_not_split() {
        let key = test_key("#test");
        let payload = encrypt_group_text(&key, 1, 0, "a[b]: message").expect("encrypt");
        let result = decrypt_group_text(&payload, &key).expect("decrypt");
        assert_eq!(result.sender, None);
        assert_eq!(result.message, "a[b]: message");
    }

    #[test]
    fn test_non_group_text_packet_not_decrypted() {
        // TEXT_MESSAGE header: (0 << 6) | (2 << 2) | 1 = 0x09
        let mut raw = vec![0x09, 0x00];
        raw.extend_from_slice(&[0u8; 20]);
        assert_eq!(try_decrypt_packet_with_channel_key(&raw, &[0u8; 16]), None);
    }

    #[test]
    fn test_channel_hash_mismatch_short_circuits() {
        let mut raw = vec![0x15, 0x00, 0xFF];
        raw.extend_from_slice(&[0u8; 20]);
        let key = test_key("#test");
        assert_eq!(try_decrypt_packet_with_channel_key(&raw, &key), None);
    }

    #[test]
    fn test_decrypt_captured_six77_packet() {
        // Real capture from the #six77 hashtag channel.
        let raw = hex::decode(concat!(
            "1500E69C7A89DD0AF6A2D69F5823B88F9720731E4B887C56932BF889255D8D926D",
            "99195927144323A42DD8A158F878B518B8304DF55E80501C7D02A9FFD578D35182",
            "83156BBA257BF8413E80A237393B2E4149BBBC864371140A9BBC4E23EB9BF203EF",
            "0D029214B3E3AAC3C0295690ACDB89A28619E7E5F22C83E16073AD679D25FA904D",
            "07E5ACF1DB5A7C77D7E1719FB9AE5BF55541EE0D7F59ED890E12CF0FEED6700818",
        ))
        .expect("valid hex");

        let key = derive_hashtag_key("#six77");
        let result = try_decrypt_packet_with_channel_key(&raw, &key).expect("decrypt");

        assert_eq!(result.sender.as_deref(), Some("Flightless\u{1f95d}"));
        assert!(result.message.contains("hashtag room is essentially public"));
        assert_eq!(result.channel_hash, "e6");
        assert_eq!(result.timestamp, 1766604717);
    }
}
