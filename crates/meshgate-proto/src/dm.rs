//! Direct-message envelope: X25519 ECDH over Ed25519 identities.
//!
//! The radio reuses its Ed25519 identity for ECDH. The exported 64-byte
//! private key is the *already-clamped* scalar followed by the signing
//! prefix, not an Ed25519 seed. Key derivation therefore multiplies the
//! first 32 bytes by the basepoint directly; feeding the blob to a
//! seed-expecting Ed25519 library produces a wrong public key. Bytes
//! 32..63 are never used here.
//!
//! ## Payload layout
//!
//! ```text
//! dest_hash (1)      first byte of the destination public key
//! src_hash (1)       first byte of the source public key
//! mac (2)            HMAC-SHA256(shared_secret, ciphertext)[..2]
//! ciphertext (n*16)  AES-128-ECB under shared_secret[..16]
//! ```

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes128;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::channel::parse_text_payload;
use crate::{packet, PayloadType, ProtoError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Result of decrypting a direct-message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedDirectMessage {
    pub timestamp: u32,
    pub flags: u8,
    pub message: String,
    /// First byte of the destination public key, as two hex digits.
    pub dest_hash: String,
    /// First byte of the source public key, as two hex digits.
    pub src_hash: String,
}

/// Clamp the first 32 bytes of a scalar per RFC 7748.
pub fn clamp_scalar(input: &[u8]) -> [u8; 32] {
    let mut scalar = [0u8; 32];
    let take = input.len().min(32);
    scalar[..take].copy_from_slice(&input[..take]);
    scalar[0] &= 0xF8;
    scalar[31] &= 0x7F;
    scalar[31] |= 0x40;
    scalar
}

/// Derive the Ed25519 public key from a radio-format private key.
///
/// Accepts the full 64-byte export or just the 32-byte scalar; bytes
/// 32..63 (the signing prefix) are ignored.
pub fn derive_public_key(private_key: &[u8]) -> Result<[u8; 32]> {
    if private_key.len() != 32 && private_key.len() != 64 {
        return Err(ProtoError::InvalidKeyLength {
            expected: 64,
            actual: private_key.len(),
        });
    }
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&private_key[..32]);
    Ok(EdwardsPoint::mul_base_clamped(scalar).compress().to_bytes())
}

/// ECDH: clamp our scalar, convert the peer's Ed25519 public key to its
/// Montgomery form, and multiply.
pub fn derive_shared_secret(
    private_key: &[u8],
    peer_public: &[u8],
) -> Result<Zeroizing<[u8; 32]>> {
    if private_key.len() != 32 && private_key.len() != 64 {
        return Err(ProtoError::InvalidKeyLength {
            expected: 64,
            actual: private_key.len(),
        });
    }
    let peer: [u8; 32] = peer_public
        .try_into()
        .map_err(|_| ProtoError::InvalidKeyLength {
            expected: 32,
            actual: peer_public.len(),
        })?;

    let montgomery = CompressedEdwardsY(peer)
        .decompress()
        .ok_or(ProtoError::InvalidPublicKey)?
        .to_montgomery();

    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&private_key[..32]);
    let shared = montgomery.mul_clamped(scalar);
    Ok(Zeroizing::new(shared.to_bytes()))
}

/// Decrypt a direct-message payload with a previously derived shared
/// secret. The full 32 bytes key the MAC; the first 16 key the cipher.
pub fn decrypt_direct_message(
    payload: &[u8],
    shared_secret: &[u8; 32],
) -> Option<DecryptedDirectMessage> {
    if payload.len() < 4 {
        return None;
    }

    let dest_hash = format!("{:02x}", payload[0]);
    let src_hash = format!("{:02x}", payload[1]);
    let mac_tag = &payload[2..4];
    let ciphertext = &payload[4..];

    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return None;
    }

    let mut mac = <HmacSha256 as Mac>::new_from_slice(shared_secret).ok()?;
    mac.update(ciphertext);
    mac.verify_truncated_left(mac_tag).ok()?;

    let aes_key: [u8; 16] = shared_secret[..16].try_into().ok()?;
    let cipher = Aes128::new(GenericArray::from_slice(&aes_key));
    let mut plaintext = ciphertext.to_vec();
    for block in plaintext.chunks_exact_mut(16) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    let (timestamp, flags, message) = parse_text_payload(&plaintext)?;
    Some(DecryptedDirectMessage {
        timestamp,
        flags,
        message,
        dest_hash,
        src_hash,
    })
}

/// Try to decrypt a full raw frame as a direct message between us and one
/// candidate peer.
///
/// The payload's 1-byte hashes must be consistent with the pair: either
/// inbound (src matches the peer, dest matches us) or outbound echo (the
/// reverse). Without `our_public` only the inbound direction is checked.
pub fn try_decrypt_dm(
    raw: &[u8],
    private_key: &[u8],
    peer_public: &[u8],
    our_public: Option<&[u8; 32]>,
) -> Option<DecryptedDirectMessage> {
    let info = packet::parse_packet(raw)?;
    if info.payload_type != PayloadType::TextMessage {
        return None;
    }
    if info.payload.len() < 4 {
        return None;
    }

    let dest = info.payload[0];
    let src = info.payload[1];
    let peer_first = *peer_public.first()?;

    let plausible = match our_public {
        Some(ours) => {
            (dest == ours[0] && src == peer_first) || (dest == peer_first && src == ours[0])
        }
        None => src == peer_first,
    };
    if !plausible {
        return None;
    }

    let shared = derive_shared_secret(private_key, peer_public).ok()?;
    decrypt_direct_message(&info.payload, &shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Real key material: the first 32 bytes are the post-SHA-512 clamped
    // scalar, the last 32 the signing prefix. The derived public key starts
    // with 0xFA ("face12"), which is NOT the prefix bytes.
    const FACE12_PRIV: &str = concat!(
        "58BA1940E97099CBB4357C62CE9C7F4B245C94C90D722E67201B989F9FEACF7B",
        "77ACADDB84438514022BDB0FC3140C2501859BE1772AC7B8C7E41DC0F40490A1",
    );
    const FACE12_PUB: &str = "FACE123334789E2B81519AFDBC39A3C9EB7EA3457AD367D3243597A484847E46";
    const A1B2C3_PUB: &str = "a1b2c3d3ba9f5fa8705b9845fe11cc6f01d1d49caaf4d122ac7121663c5beec7";

    // [dest_hash][src_hash][mac][ciphertext] decrypting to
    // "Hello there, Mr. Face!"
    const DM_PAYLOAD: &str =
        "FAA1295471ADB44A98B13CA528A4B5C4FBC29B4DA3CED477519B2FBD8FD5467C31E5D58B";
    // Full frame: header 0x09 (FLOOD, TEXT_MESSAGE), empty path, payload.
    const DM_PACKET: &str =
        "0900FAA1295471ADB44A98B13CA528A4B5C4FBC29B4DA3CED477519B2FBD8FD5467C31E5D58B";

    fn face12_priv() -> Vec<u8> {
        hex::decode(FACE12_PRIV).expect("valid hex")
    }

    fn a1b2c3_pub() -> Vec<u8> {
        hex::decode(A1B2C3_PUB).expect("valid hex")
    }

    fn face12_pub() -> [u8; 32] {
        hex::decode(FACE12_PUB)
            .expect("valid hex")
            .try_into()
            .expect("32 bytes")
    }

    #[test]
    fn test_clamp_first_byte() {
        let mut input = [0u8; 32];
        input[0] = 0xFF;
        assert_eq!(clamp_scalar(&input)[0], 0xF8);
    }

    #[test]
    fn test_clamp_last_byte() {
        let mut input = [0u8; 32];
        input[31] = 0xFF;
        assert_eq!(clamp_scalar(&input)[31], 0x7F);
    }

    #[test]
    fn test_clamp_preserves_middle_and_truncates() {
        let input = [0xABu8; 64];
        let out = clamp_scalar(&input);
        assert_eq!(out.len(), 32);
        assert_eq!(&out[1..31], &[0xABu8; 30][..]);
    }

    #[test]
    fn test_derive_public_key_from_radio_private() {
        let result = derive_public_key(&face12_priv()).expect("derive");
        assert_eq!(result, face12_pub());
    }

    #[test]
    fn test_derive_public_key_from_scalar_only() {
        let result = derive_public_key(&face12_priv()[..32]).expect("derive");
        assert_eq!(result, face12_pub());
    }

    #[test]
    fn test_derive_public_key_rejects_bad_length() {
        assert!(derive_public_key(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_shared_secret_deterministic() {
        let a = derive_shared_secret(&face12_priv(), &a1b2c3_pub()).expect("derive");
        let b = derive_shared_secret(&face12_priv(), &a1b2c3_pub()).expect("derive");
        assert_eq!(*a, *b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_decrypt_real_dm_payload() {
        let payload = hex::decode(DM_PAYLOAD).expect("valid hex");
        let shared = derive_shared_secret(&face12_priv(), &a1b2c3_pub()).expect("derive");

        let result = decrypt_direct_message(&payload, &shared).expect("decrypt");
        assert_eq!(result.message, "Hello there, Mr. Face!");
        assert_eq!(result.dest_hash, "fa");
        assert_eq!(result.src_hash, "a1");
        assert!(result.timestamp > 0);
    }

    #[test]
    fn test_decrypt_with_wrong_secret_fails() {
        let payload = hex::decode(DM_PAYLOAD).expect("valid hex");
        assert_eq!(decrypt_direct_message(&payload, &[0u8; 32]), None);
    }

    #[test]
    fn test_decrypt_with_corrupted_mac_fails() {
        let mut payload = hex::decode(DM_PAYLOAD).expect("valid hex");
        payload[2] = 0xFF;
        payload[3] = 0xFF;
        let shared = derive_shared_secret(&face12_priv(), &a1b2c3_pub()).expect("derive");
        assert_eq!(decrypt_direct_message(&payload, &shared), None);
    }

    #[test]
    fn test_decrypt_short_payload_fails() {
        let shared = derive_shared_secret(&face12_priv(), &a1b2c3_pub()).expect("derive");
        assert_eq!(decrypt_direct_message(&[0u8; 3], &shared), None);
    }

    #[test]
    fn test_decrypt_partial_block_fails() {
        let shared = derive_shared_secret(&face12_priv(), &a1b2c3_pub()).expect("derive");
        assert_eq!(decrypt_direct_message(&[0u8; 4 + 15], &shared), None);
    }

    #[test]
    fn test_try_decrypt_dm_full_packet() {
        let raw = hex::decode(DM_PACKET).expect("valid hex");
        let result = try_decrypt_dm(&raw, &face12_priv(), &a1b2c3_pub(), Some(&face12_pub()))
            .expect("decrypt");
        assert_eq!(result.message, "Hello there, Mr. Face!");
        assert_eq!(result.dest_hash, "fa");
        assert_eq!(result.src_hash, "a1");
    }

    #[test]
    fn test_try_decrypt_dm_inbound_without_our_key() {
        let raw = hex::decode(DM_PACKET).expect("valid hex");
        let result =
            try_decrypt_dm(&raw, &face12_priv(), &a1b2c3_pub(), None).expect("decrypt");
        assert_eq!(result.src_hash, "a1");
    }

    #[test]
    fn test_try_decrypt_dm_rejects_group_text() {
        let mut raw = hex::decode(DM_PACKET).expect("valid hex");
        raw[0] = 0x15;
        assert_eq!(try_decrypt_dm(&raw, &face12_priv(), &a1b2c3_pub(), None), None);
    }

    #[test]
    fn test_try_decrypt_dm_wrong_src_hash() {
        let mut raw = hex::decode(DM_PACKET).expect("valid hex");
        raw[3] = 0xBB; // src_hash no longer matches a1b2c3
        assert_eq!(
            try_decrypt_dm(&raw, &face12_priv(), &a1b2c3_pub(), Some(&face12_pub())),
            None
        );
    }

    #[test]
    fn test_try_decrypt_dm_empty_and_truncated() {
        let raw = hex::decode(DM_PACKET).expect("valid hex");
        assert_eq!(try_decrypt_dm(&[], &face12_priv(), &a1b2c3_pub(), None), None);
        assert_eq!(
            try_decrypt_dm(&raw[..5], &face12_priv(), &a1b2c3_pub(), None),
            None
        );
    }
}
