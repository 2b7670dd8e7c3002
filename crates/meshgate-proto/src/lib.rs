//! # meshgate-proto
//!
//! Pure packet parsing and cryptography for the MeshCore over-the-air
//! format. No I/O: every function here takes bytes and returns parsed
//! structures, so the same code serves live ingest, historical decrypt
//! sweeps, and tests.
//!
//! ## Modules
//!
//! - [`packet`] — header/route/path parsing and payload extraction
//! - [`channel`] — group-text envelope (AES-128-ECB + truncated HMAC)
//! - [`dm`] — direct-message envelope (X25519 ECDH over Ed25519 identities)
//! - [`advert`] — advertisement beacon parsing

pub mod advert;
pub mod channel;
pub mod dm;
pub mod packet;

pub use advert::{parse_advertisement, try_parse_advertisement, ParsedAdvertisement};
pub use channel::{
    calculate_channel_hash, decrypt_group_text, derive_hashtag_key, encrypt_group_text,
    try_decrypt_packet_with_channel_key, DecryptedGroupText,
};
pub use dm::{
    decrypt_direct_message, derive_public_key, derive_shared_secret, try_decrypt_dm,
    DecryptedDirectMessage,
};
pub use packet::{extract_payload, packet_payload_type, parse_packet, PacketInfo};

/// Error types for key-material handling.
///
/// Parse and decrypt functions return `Option` instead: a malformed or
/// undecryptable frame carries no diagnostic value and is silently skipped
/// by callers, which keep the raw bytes around for later retry.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// A key blob had the wrong length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// A peer public key did not decode to a curve point.
    #[error("invalid public key: not a valid curve point")]
    InvalidPublicKey,
}

pub type Result<T> = std::result::Result<T, ProtoError>;

/// Payload types carried in the packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    Request = 0x00,
    Response = 0x01,
    TextMessage = 0x02,
    Ack = 0x03,
    Advert = 0x04,
    GroupText = 0x05,
    GroupData = 0x06,
    AnonRequest = 0x07,
    Path = 0x08,
    Trace = 0x09,
    Multipart = 0x0A,
    Control = 0x0B,
    RawCustom = 0x0F,
}

impl PayloadType {
    /// Decode a 4-bit payload type. Unassigned values are rejected.
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0x00 => Self::Request,
            0x01 => Self::Response,
            0x02 => Self::TextMessage,
            0x03 => Self::Ack,
            0x04 => Self::Advert,
            0x05 => Self::GroupText,
            0x06 => Self::GroupData,
            0x07 => Self::AnonRequest,
            0x08 => Self::Path,
            0x09 => Self::Trace,
            0x0A => Self::Multipart,
            0x0B => Self::Control,
            0x0F => Self::RawCustom,
            _ => return None,
        })
    }

    /// Wire name used in raw-packet feed events.
    pub fn name(self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Response => "RESPONSE",
            Self::TextMessage => "TEXT_MESSAGE",
            Self::Ack => "ACK",
            Self::Advert => "ADVERT",
            Self::GroupText => "GROUP_TEXT",
            Self::GroupData => "GROUP_DATA",
            Self::AnonRequest => "ANON_REQUEST",
            Self::Path => "PATH",
            Self::Trace => "TRACE",
            Self::Multipart => "MULTIPART",
            Self::Control => "CONTROL",
            Self::RawCustom => "RAW_CUSTOM",
        }
    }
}

/// Route types carried in the low two header bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouteType {
    TransportFlood = 0x00,
    Flood = 0x01,
    Direct = 0x02,
    TransportDirect = 0x03,
}

impl RouteType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x00 => Self::TransportFlood,
            0x01 => Self::Flood,
            0x02 => Self::Direct,
            _ => Self::TransportDirect,
        }
    }

    /// Transport routes carry a 4-byte transport code after the header.
    pub fn has_transport_codes(self) -> bool {
        matches!(self, Self::TransportFlood | Self::TransportDirect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_type_roundtrip() {
        for bits in 0x00..=0x0B {
            let ty = PayloadType::from_bits(bits).expect("assigned type");
            assert_eq!(ty as u8, bits);
        }
        assert_eq!(PayloadType::from_bits(0x0F), Some(PayloadType::RawCustom));
    }

    #[test]
    fn test_unassigned_payload_types_rejected() {
        assert_eq!(PayloadType::from_bits(0x0C), None);
        assert_eq!(PayloadType::from_bits(0x0D), None);
        assert_eq!(PayloadType::from_bits(0x0E), None);
    }

    #[test]
    fn test_route_type_transport_codes() {
        assert!(RouteType::TransportFlood.has_transport_codes());
        assert!(RouteType::TransportDirect.has_transport_codes());
        assert!(!RouteType::Flood.has_transport_codes());
        assert!(!RouteType::Direct.has_transport_codes());
    }
}
