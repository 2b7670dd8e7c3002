//! Companion protocol messages.
//!
//! One place defines every command the host can issue and every
//! response/push the radio can emit, with fixed little-endian layouts.
//! Reply codes below 0x80 answer the in-flight command; codes at 0x80
//! and above are unsolicited pushes.

use crate::{RadioError, Result};

// Command codes (host -> radio).
const CMD_APP_START: u8 = 0x01;
const CMD_SEND_TXT_MSG: u8 = 0x02;
const CMD_SEND_CHANNEL_TXT_MSG: u8 = 0x03;
const CMD_GET_CONTACTS: u8 = 0x04;
const CMD_SET_DEVICE_TIME: u8 = 0x06;
const CMD_SEND_SELF_ADVERT: u8 = 0x07;
const CMD_SET_ADVERT_NAME: u8 = 0x08;
const CMD_ADD_UPDATE_CONTACT: u8 = 0x09;
const CMD_SYNC_NEXT_MESSAGE: u8 = 0x0A;
const CMD_SET_RADIO_PARAMS: u8 = 0x0B;
const CMD_SET_TX_POWER: u8 = 0x0C;
const CMD_REMOVE_CONTACT: u8 = 0x0F;
const CMD_SET_ADVERT_LATLON: u8 = 0x11;
const CMD_EXPORT_PRIVATE_KEY: u8 = 0x16;
const CMD_IMPORT_PRIVATE_KEY: u8 = 0x17;
const CMD_REBOOT: u8 = 0x18;
const CMD_GET_CHANNEL: u8 = 0x1A;
const CMD_SET_CHANNEL: u8 = 0x1B;
const CMD_GET_TELEMETRY: u8 = 0x27;
const CMD_SEND_TRACE: u8 = 0x24;

// Reply codes (radio -> host).
const RESP_OK: u8 = 0x00;
const RESP_ERROR: u8 = 0x01;
const RESP_CONTACTS_START: u8 = 0x02;
const RESP_CONTACT: u8 = 0x03;
const RESP_END_OF_CONTACTS: u8 = 0x04;
const RESP_SELF_INFO: u8 = 0x05;
const RESP_SENT: u8 = 0x06;
const RESP_CONTACT_MSG_RECV: u8 = 0x07;
const RESP_CHANNEL_MSG_RECV: u8 = 0x08;
const RESP_CHANNEL_INFO: u8 = 0x09;
const RESP_NO_MORE_MESSAGES: u8 = 0x0A;
const RESP_PRIVATE_KEY: u8 = 0x0B;
const RESP_DISABLED: u8 = 0x0C;
const RESP_TELEMETRY: u8 = 0x0D;

// Push codes (radio -> host, unsolicited).
const PUSH_ADVERT: u8 = 0x80;
const PUSH_PATH_UPDATED: u8 = 0x81;
const PUSH_SEND_CONFIRMED: u8 = 0x82;
const PUSH_MSGS_WAITING: u8 = 0x83;
const PUSH_RX_LOG_DATA: u8 = 0x84;
const PUSH_NEW_CONTACT: u8 = 0x85;
const PUSH_TRACE_DATA: u8 = 0x86;

/// Fixed-width name fields are NUL-padded on the wire.
const NAME_LEN: usize = 32;
/// Out-path field width in contact records.
const PATH_LEN: usize = 64;

/// A contact record as the radio stores it in flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioContact {
    pub public_key: [u8; 32],
    pub contact_type: u8,
    pub flags: u8,
    /// -1 = unknown.
    pub out_path_len: i8,
    pub out_path: Vec<u8>,
    pub name: String,
    pub last_advert: u32,
    /// Degrees * 1e6.
    pub lat_e6: i32,
    pub lon_e6: i32,
}

/// The radio's own identity and RF configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfInfo {
    pub public_key: [u8; 32],
    pub name: String,
    pub tx_power: u8,
    pub max_tx_power: u8,
    pub lat_e6: i32,
    pub lon_e6: i32,
    pub freq_khz: u32,
    pub bw_hz: u32,
    pub sf: u8,
    pub cr: u8,
}

impl SelfInfo {
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }
}

/// A message the radio decrypted internally and queued for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub pubkey_prefix: [u8; 6],
    pub path_len: u8,
    pub txt_type: u8,
    pub sender_timestamp: u32,
    pub text: String,
}

impl IncomingMessage {
    pub fn pubkey_prefix_hex(&self) -> String {
        hex::encode(self.pubkey_prefix)
    }
}

/// Repeater telemetry block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Telemetry {
    pub battery_mv: u16,
    pub tx_queue_len: u16,
    pub noise_floor_dbm: i16,
    pub last_rssi_dbm: i16,
    /// SNR in quarter-dB.
    pub last_snr_q4: i16,
    pub packets_received: u32,
    pub packets_sent: u32,
    pub airtime_seconds: u32,
    pub rx_airtime_seconds: u32,
    pub uptime_seconds: u32,
    pub sent_flood: u32,
    pub sent_direct: u32,
    pub recv_flood: u32,
    pub recv_direct: u32,
    pub flood_dups: u16,
    pub direct_dups: u16,
    pub full_events: u16,
}

/// Commands the host can issue.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AppStart,
    SendTextMessage {
        txt_type: u8,
        attempt: u8,
        sender_timestamp: u32,
        pubkey_prefix: [u8; 6],
        text: String,
    },
    SendChannelTextMessage {
        txt_type: u8,
        channel_idx: u8,
        sender_timestamp: u32,
        text: String,
    },
    GetContacts,
    SetDeviceTime(u32),
    SendSelfAdvert {
        flood: bool,
    },
    SetAdvertName(String),
    AddUpdateContact(RadioContact),
    RemoveContact([u8; 32]),
    SyncNextMessage,
    SetRadioParams {
        freq_khz: u32,
        bw_hz: u32,
        sf: u8,
        cr: u8,
    },
    SetTxPower(u8),
    SetAdvertLatLon {
        lat_e6: i32,
        lon_e6: i32,
    },
    GetChannel(u8),
    SetChannel {
        index: u8,
        name: String,
        secret: [u8; 16],
    },
    ExportPrivateKey,
    ImportPrivateKey(Vec<u8>),
    Reboot,
    GetTelemetry {
        pubkey_prefix: [u8; 6],
    },
    SendTrace {
        tag: u32,
        auth: u32,
        flags: u8,
        path: Vec<u8>,
    },
}

/// Replies to the in-flight command.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Error { code: u8 },
    ContactsStart { count: u32 },
    Contact(RadioContact),
    EndOfContacts,
    SelfInfo(SelfInfo),
    Sent { ack_code: u32, suggested_timeout_ms: u32 },
    ContactMsgRecv(IncomingMessage),
    ChannelMsgRecv {
        channel_idx: u8,
        path_len: u8,
        txt_type: u8,
        sender_timestamp: u32,
        text: String,
    },
    ChannelInfo {
        index: u8,
        name: String,
        secret: [u8; 16],
    },
    NoMoreMessages,
    PrivateKey(Vec<u8>),
    Disabled,
    Telemetry(Telemetry),
}

/// Unsolicited pushes.
#[derive(Debug, Clone, PartialEq)]
pub enum Push {
    Advert {
        public_key: [u8; 32],
    },
    PathUpdated {
        pubkey_prefix: [u8; 6],
        path: Vec<u8>,
    },
    SendConfirmed {
        ack_code: u32,
        round_trip_ms: u32,
    },
    MessagesWaiting,
    RxLogData {
        /// SNR in quarter-dB.
        snr_q4: i16,
        rssi_dbm: i16,
        payload: Vec<u8>,
    },
    NewContact(RadioContact),
    TraceData {
        tag: u32,
        flags: u8,
        path: Vec<u8>,
        /// One SNR reading (quarter-dB) per traversed hop.
        snrs_q4: Vec<i8>,
    },
}

/// True when a reply frame carries a push rather than a response.
pub fn is_push(frame: &[u8]) -> bool {
    frame.first().is_some_and(|&code| code >= 0x80)
}

fn push_padded_name(out: &mut Vec<u8>, name: &str) {
    let mut field = [0u8; NAME_LEN];
    let bytes = name.as_bytes();
    let take = bytes.len().min(NAME_LEN);
    field[..take].copy_from_slice(&bytes[..take]);
    out.extend_from_slice(&field);
}

fn parse_padded_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl RadioContact {
    /// Wire size of a contact record.
    pub const ENCODED_LEN: usize = 32 + 1 + 1 + 1 + PATH_LEN + NAME_LEN + 4 + 4 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.public_key);
        out.push(self.contact_type);
        out.push(self.flags);
        out.push(self.out_path_len as u8);
        let mut path = [0u8; PATH_LEN];
        let take = self.out_path.len().min(PATH_LEN);
        path[..take].copy_from_slice(&self.out_path[..take]);
        out.extend_from_slice(&path);
        push_padded_name(&mut out, &self.name);
        out.extend_from_slice(&self.last_advert.to_le_bytes());
        out.extend_from_slice(&self.lat_e6.to_le_bytes());
        out.extend_from_slice(&self.lon_e6.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(RadioError::Protocol(format!(
                "contact record too short: {} bytes",
                bytes.len()
            )));
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&bytes[0..32]);
        let contact_type = bytes[32];
        let flags = bytes[33];
        let out_path_len = bytes[34] as i8;
        let path_field = &bytes[35..35 + PATH_LEN];
        let out_path = if out_path_len > 0 {
            path_field[..(out_path_len as usize).min(PATH_LEN)].to_vec()
        } else {
            Vec::new()
        };
        let name_start = 35 + PATH_LEN;
        let name = parse_padded_name(&bytes[name_start..name_start + NAME_LEN]);
        let tail = name_start + NAME_LEN;
        let last_advert = u32::from_le_bytes([
            bytes[tail],
            bytes[tail + 1],
            bytes[tail + 2],
            bytes[tail + 3],
        ]);
        let lat_e6 = i32::from_le_bytes([
            bytes[tail + 4],
            bytes[tail + 5],
            bytes[tail + 6],
            bytes[tail + 7],
        ]);
        let lon_e6 = i32::from_le_bytes([
            bytes[tail + 8],
            bytes[tail + 9],
            bytes[tail + 10],
            bytes[tail + 11],
        ]);
        Ok(Self {
            public_key,
            contact_type,
            flags,
            out_path_len,
            out_path,
            name,
            last_advert,
            lat_e6,
            lon_e6,
        })
    }
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::AppStart => vec![CMD_APP_START],
            Command::SendTextMessage {
                txt_type,
                attempt,
                sender_timestamp,
                pubkey_prefix,
                text,
            } => {
                let mut out = vec![CMD_SEND_TXT_MSG, *txt_type, *attempt];
                out.extend_from_slice(&sender_timestamp.to_le_bytes());
                out.extend_from_slice(pubkey_prefix);
                out.extend_from_slice(text.as_bytes());
                out
            }
            Command::SendChannelTextMessage {
                txt_type,
                channel_idx,
                sender_timestamp,
                text,
            } => {
                let mut out = vec![CMD_SEND_CHANNEL_TXT_MSG, *txt_type, *channel_idx];
                out.extend_from_slice(&sender_timestamp.to_le_bytes());
                out.extend_from_slice(text.as_bytes());
                out
            }
            Command::GetContacts => vec![CMD_GET_CONTACTS],
            Command::SetDeviceTime(secs) => {
                let mut out = vec![CMD_SET_DEVICE_TIME];
                out.extend_from_slice(&secs.to_le_bytes());
                out
            }
            Command::SendSelfAdvert { flood } => vec![CMD_SEND_SELF_ADVERT, u8::from(*flood)],
            Command::SetAdvertName(name) => {
                let mut out = vec![CMD_SET_ADVERT_NAME];
                out.extend_from_slice(name.as_bytes());
                out
            }
            Command::AddUpdateContact(contact) => {
                let mut out = vec![CMD_ADD_UPDATE_CONTACT];
                out.extend_from_slice(&contact.encode());
                out
            }
            Command::RemoveContact(public_key) => {
                let mut out = vec![CMD_REMOVE_CONTACT];
                out.extend_from_slice(public_key);
                out
            }
            Command::SyncNextMessage => vec![CMD_SYNC_NEXT_MESSAGE],
            Command::SetRadioParams {
                freq_khz,
                bw_hz,
                sf,
                cr,
            } => {
                let mut out = vec![CMD_SET_RADIO_PARAMS];
                out.extend_from_slice(&freq_khz.to_le_bytes());
                out.extend_from_slice(&bw_hz.to_le_bytes());
                out.push(*sf);
                out.push(*cr);
                out
            }
            Command::SetTxPower(dbm) => vec![CMD_SET_TX_POWER, *dbm],
            Command::SetAdvertLatLon { lat_e6, lon_e6 } => {
                let mut out = vec![CMD_SET_ADVERT_LATLON];
                out.extend_from_slice(&lat_e6.to_le_bytes());
                out.extend_from_slice(&lon_e6.to_le_bytes());
                out
            }
            Command::GetChannel(index) => vec![CMD_GET_CHANNEL, *index],
            Command::SetChannel {
                index,
                name,
                secret,
            } => {
                let mut out = vec![CMD_SET_CHANNEL, *index];
                push_padded_name(&mut out, name);
                out.extend_from_slice(secret);
                out
            }
            Command::ExportPrivateKey => vec![CMD_EXPORT_PRIVATE_KEY],
            Command::ImportPrivateKey(key) => {
                let mut out = vec![CMD_IMPORT_PRIVATE_KEY];
                out.extend_from_slice(key);
                out
            }
            Command::Reboot => vec![CMD_REBOOT],
            Command::GetTelemetry { pubkey_prefix } => {
                let mut out = vec![CMD_GET_TELEMETRY];
                out.extend_from_slice(pubkey_prefix);
                out
            }
            Command::SendTrace {
                tag,
                auth,
                flags,
                path,
            } => {
                let mut out = vec![CMD_SEND_TRACE];
                out.extend_from_slice(&tag.to_le_bytes());
                out.extend_from_slice(&auth.to_le_bytes());
                out.push(*flags);
                out.extend_from_slice(path);
                out
            }
        }
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    let slice: [u8; 4] = bytes
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| RadioError::Protocol("truncated u32 field".into()))?;
    Ok(u32::from_le_bytes(slice))
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16> {
    let slice: [u8; 2] = bytes
        .get(at..at + 2)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| RadioError::Protocol("truncated u16 field".into()))?;
    Ok(u16::from_le_bytes(slice))
}

impl Response {
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let code = *frame
            .first()
            .ok_or_else(|| RadioError::Protocol("empty reply frame".into()))?;
        let body = &frame[1..];

        Ok(match code {
            RESP_OK => Response::Ok,
            RESP_ERROR => Response::Error {
                code: body.first().copied().unwrap_or(0),
            },
            RESP_CONTACTS_START => Response::ContactsStart {
                count: read_u32(body, 0)?,
            },
            RESP_CONTACT => Response::Contact(RadioContact::decode(body)?),
            RESP_END_OF_CONTACTS => Response::EndOfContacts,
            RESP_SELF_INFO => Response::SelfInfo(decode_self_info(body)?),
            RESP_SENT => Response::Sent {
                ack_code: read_u32(body, 0)?,
                suggested_timeout_ms: read_u32(body, 4)?,
            },
            RESP_CONTACT_MSG_RECV => Response::ContactMsgRecv(decode_incoming_message(body)?),
            RESP_CHANNEL_MSG_RECV => {
                if body.len() < 7 {
                    return Err(RadioError::Protocol("short channel message".into()));
                }
                Response::ChannelMsgRecv {
                    channel_idx: body[0],
                    path_len: body[1],
                    txt_type: body[2],
                    sender_timestamp: read_u32(body, 3)?,
                    text: String::from_utf8_lossy(&body[7..]).into_owned(),
                }
            }
            RESP_CHANNEL_INFO => {
                if body.len() < 1 + NAME_LEN + 16 {
                    return Err(RadioError::Protocol("short channel info".into()));
                }
                let mut secret = [0u8; 16];
                secret.copy_from_slice(&body[1 + NAME_LEN..1 + NAME_LEN + 16]);
                Response::ChannelInfo {
                    index: body[0],
                    name: parse_padded_name(&body[1..1 + NAME_LEN]),
                    secret,
                }
            }
            RESP_NO_MORE_MESSAGES => Response::NoMoreMessages,
            RESP_PRIVATE_KEY => Response::PrivateKey(body.to_vec()),
            RESP_DISABLED => Response::Disabled,
            RESP_TELEMETRY => Response::Telemetry(decode_telemetry(body)?),
            other => {
                return Err(RadioError::Protocol(format!(
                    "unknown response code 0x{other:02x}"
                )))
            }
        })
    }
}

fn decode_self_info(body: &[u8]) -> Result<SelfInfo> {
    if body.len() < 32 + 2 + 8 + 8 + 2 {
        return Err(RadioError::Protocol("short self info".into()));
    }
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&body[0..32]);
    Ok(SelfInfo {
        public_key,
        tx_power: body[32],
        max_tx_power: body[33],
        lat_e6: read_u32(body, 34)? as i32,
        lon_e6: read_u32(body, 38)? as i32,
        freq_khz: read_u32(body, 42)?,
        bw_hz: read_u32(body, 46)?,
        sf: body[50],
        cr: body[51],
        name: String::from_utf8_lossy(&body[52..]).into_owned(),
    })
}

fn decode_incoming_message(body: &[u8]) -> Result<IncomingMessage> {
    if body.len() < 12 {
        return Err(RadioError::Protocol("short contact message".into()));
    }
    let mut pubkey_prefix = [0u8; 6];
    pubkey_prefix.copy_from_slice(&body[0..6]);
    Ok(IncomingMessage {
        pubkey_prefix,
        path_len: body[6],
        txt_type: body[7],
        sender_timestamp: read_u32(body, 8)?,
        text: String::from_utf8_lossy(&body[12..]).into_owned(),
    })
}

fn decode_telemetry(body: &[u8]) -> Result<Telemetry> {
    if body.len() < 52 {
        return Err(RadioError::Protocol("short telemetry".into()));
    }
    Ok(Telemetry {
        battery_mv: read_u16(body, 0)?,
        tx_queue_len: read_u16(body, 2)?,
        noise_floor_dbm: read_u16(body, 4)? as i16,
        last_rssi_dbm: read_u16(body, 6)? as i16,
        last_snr_q4: read_u16(body, 8)? as i16,
        packets_received: read_u32(body, 10)?,
        packets_sent: read_u32(body, 14)?,
        airtime_seconds: read_u32(body, 18)?,
        rx_airtime_seconds: read_u32(body, 22)?,
        uptime_seconds: read_u32(body, 26)?,
        sent_flood: read_u32(body, 30)?,
        sent_direct: read_u32(body, 34)?,
        recv_flood: read_u32(body, 38)?,
        recv_direct: read_u32(body, 42)?,
        flood_dups: read_u16(body, 46)?,
        direct_dups: read_u16(body, 48)?,
        full_events: read_u16(body, 50)?,
    })
}

impl Push {
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let code = *frame
            .first()
            .ok_or_else(|| RadioError::Protocol("empty push frame".into()))?;
        let body = &frame[1..];

        Ok(match code {
            PUSH_ADVERT => {
                let mut public_key = [0u8; 32];
                let slice = body
                    .get(0..32)
                    .ok_or_else(|| RadioError::Protocol("short advert push".into()))?;
                public_key.copy_from_slice(slice);
                Push::Advert { public_key }
            }
            PUSH_PATH_UPDATED => {
                if body.len() < 7 {
                    return Err(RadioError::Protocol("short path update".into()));
                }
                let mut pubkey_prefix = [0u8; 6];
                pubkey_prefix.copy_from_slice(&body[0..6]);
                let path_len = body[6] as usize;
                let path = body
                    .get(7..7 + path_len)
                    .ok_or_else(|| RadioError::Protocol("truncated path update".into()))?
                    .to_vec();
                Push::PathUpdated {
                    pubkey_prefix,
                    path,
                }
            }
            PUSH_SEND_CONFIRMED => Push::SendConfirmed {
                ack_code: read_u32(body, 0)?,
                round_trip_ms: read_u32(body, 4)?,
            },
            PUSH_MSGS_WAITING => Push::MessagesWaiting,
            PUSH_RX_LOG_DATA => {
                if body.len() < 4 {
                    return Err(RadioError::Protocol("short rx log push".into()));
                }
                Push::RxLogData {
                    snr_q4: read_u16(body, 0)? as i16,
                    rssi_dbm: read_u16(body, 2)? as i16,
                    payload: body[4..].to_vec(),
                }
            }
            PUSH_NEW_CONTACT => Push::NewContact(RadioContact::decode(body)?),
            PUSH_TRACE_DATA => {
                if body.len() < 6 {
                    return Err(RadioError::Protocol("short trace push".into()));
                }
                let tag = read_u32(body, 0)?;
                let flags = body[4];
                let path_len = body[5] as usize;
                let path = body
                    .get(6..6 + path_len)
                    .ok_or_else(|| RadioError::Protocol("truncated trace path".into()))?
                    .to_vec();
                let snrs_q4 = body[6 + path_len..].iter().map(|&b| b as i8).collect();
                Push::TraceData {
                    tag,
                    flags,
                    path,
                    snrs_q4,
                }
            }
            other => {
                return Err(RadioError::Protocol(format!(
                    "unknown push code 0x{other:02x}"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_contact() -> RadioContact {
        RadioContact {
            public_key: [0xAB; 32],
            contact_type: 1,
            flags: 0,
            out_path_len: 2,
            out_path: vec![0x11, 0x22],
            name: "Alice".to_string(),
            last_advert: 1_700_000_000,
            lat_e6: 49_020_560,
            lon_e6: -123_829_350,
        }
    }

    #[test]
    fn test_contact_roundtrip() {
        let contact = sample_contact();
        let encoded = contact.encode();
        assert_eq!(encoded.len(), RadioContact::ENCODED_LEN);

        let decoded = RadioContact::decode(&encoded).expect("decode");
        assert_eq!(decoded, contact);
    }

    #[test]
    fn test_contact_unknown_path() {
        let mut contact = sample_contact();
        contact.out_path_len = -1;
        contact.out_path = Vec::new();

        let decoded = RadioContact::decode(&contact.encode()).expect("decode");
        assert_eq!(decoded.out_path_len, -1);
        assert!(decoded.out_path.is_empty());
    }

    #[test]
    fn test_contact_too_short_rejected() {
        assert!(RadioContact::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_command_encoding_codes() {
        assert_eq!(Command::AppStart.encode(), vec![CMD_APP_START]);
        assert_eq!(Command::GetContacts.encode(), vec![CMD_GET_CONTACTS]);
        assert_eq!(
            Command::SendSelfAdvert { flood: true }.encode(),
            vec![CMD_SEND_SELF_ADVERT, 1]
        );
        assert_eq!(
            Command::SetDeviceTime(0x01020304).encode(),
            vec![CMD_SET_DEVICE_TIME, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_set_channel_layout() {
        let cmd = Command::SetChannel {
            index: 3,
            name: "Public".to_string(),
            secret: [0x5A; 16],
        };
        let encoded = cmd.encode();
        assert_eq!(encoded[0], CMD_SET_CHANNEL);
        assert_eq!(encoded[1], 3);
        assert_eq!(&encoded[2..8], b"Public");
        assert_eq!(encoded.len(), 2 + NAME_LEN + 16);
    }

    #[test]
    fn test_response_sent_roundtrip() {
        let mut frame = vec![RESP_SENT];
        frame.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        frame.extend_from_slice(&12_000u32.to_le_bytes());

        let response = Response::decode(&frame).expect("decode");
        assert_eq!(
            response,
            Response::Sent {
                ack_code: 0xDEADBEEF,
                suggested_timeout_ms: 12_000
            }
        );
    }

    #[test]
    fn test_response_private_key_and_disabled() {
        let mut frame = vec![RESP_PRIVATE_KEY];
        frame.extend_from_slice(&[0x42; 64]);
        assert_eq!(
            Response::decode(&frame).expect("decode"),
            Response::PrivateKey(vec![0x42; 64])
        );

        assert_eq!(
            Response::decode(&[RESP_DISABLED]).expect("decode"),
            Response::Disabled
        );
    }

    #[test]
    fn test_response_channel_info() {
        let mut frame = vec![RESP_CHANNEL_INFO, 7];
        let mut name = [0u8; NAME_LEN];
        name[..4].copy_from_slice(b"Test");
        frame.extend_from_slice(&name);
        frame.extend_from_slice(&[0x33; 16]);

        match Response::decode(&frame).expect("decode") {
            Response::ChannelInfo {
                index,
                name,
                secret,
            } => {
                assert_eq!(index, 7);
                assert_eq!(name, "Test");
                assert_eq!(secret, [0x33; 16]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_incoming_message_decode() {
        let mut frame = vec![RESP_CONTACT_MSG_RECV];
        frame.extend_from_slice(&[0xA1, 0xB2, 0xC3, 0x00, 0x00, 0x00]);
        frame.push(2); // path_len
        frame.push(0); // txt_type
        frame.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        frame.extend_from_slice("hello".as_bytes());

        match Response::decode(&frame).expect("decode") {
            Response::ContactMsgRecv(msg) => {
                assert_eq!(msg.pubkey_prefix_hex(), "a1b2c3000000");
                assert_eq!(msg.text, "hello");
                assert_eq!(msg.sender_timestamp, 1_700_000_000);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_push_classification() {
        assert!(is_push(&[PUSH_MSGS_WAITING]));
        assert!(!is_push(&[RESP_OK]));
        assert!(!is_push(&[]));
    }

    #[test]
    fn test_push_rx_log_data() {
        let mut frame = vec![PUSH_RX_LOG_DATA];
        frame.extend_from_slice(&(26u16).to_le_bytes()); // 6.5 dB in quarter-dB
        frame.extend_from_slice(&((-92i16) as u16).to_le_bytes());
        frame.extend_from_slice(&[0x15, 0x00, 0xAA]);

        match Push::decode(&frame).expect("decode") {
            Push::RxLogData {
                snr_q4,
                rssi_dbm,
                payload,
            } => {
                assert_eq!(snr_q4, 26);
                assert_eq!(rssi_dbm, -92);
                assert_eq!(payload, vec![0x15, 0x00, 0xAA]);
            }
            other => panic!("unexpected push: {other:?}"),
        }
    }

    #[test]
    fn test_push_send_confirmed() {
        let mut frame = vec![PUSH_SEND_CONFIRMED];
        frame.extend_from_slice(&7u32.to_le_bytes());
        frame.extend_from_slice(&1500u32.to_le_bytes());

        assert_eq!(
            Push::decode(&frame).expect("decode"),
            Push::SendConfirmed {
                ack_code: 7,
                round_trip_ms: 1500
            }
        );
    }

    #[test]
    fn test_push_path_updated() {
        let mut frame = vec![PUSH_PATH_UPDATED];
        frame.extend_from_slice(&[0xA1; 6]);
        frame.push(2);
        frame.extend_from_slice(&[0x11, 0x22]);

        match Push::decode(&frame).expect("decode") {
            Push::PathUpdated {
                pubkey_prefix,
                path,
            } => {
                assert_eq!(pubkey_prefix, [0xA1; 6]);
                assert_eq!(path, vec![0x11, 0x22]);
            }
            other => panic!("unexpected push: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_codes_rejected() {
        assert!(Response::decode(&[0x7F]).is_err());
        assert!(Push::decode(&[0xFF]).is_err());
    }
}
