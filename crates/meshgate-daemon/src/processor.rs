//! Central packet ingress.
//!
//! Every RF frame lands here: stored raw (deduplicated by payload hash),
//! classified, decrypted when a key matches, and mirrored to push
//! clients. A mesh echo of a known message never creates a second row;
//! it appends a path observation and, for our own outgoing floods, bumps
//! the ack counter.

use meshgate_db::models::CONTACT_TYPE_REPEATER;
use meshgate_db::now_secs;
use meshgate_db::queries::{channels, contacts, messages, raw_packets};
use meshgate_proto::{self as proto, PacketInfo, PayloadType};

use crate::error::Result;
use crate::state::Gateway;
use crate::{retry, sync};

/// Seconds within which a fresh, shorter stored path beats a new one.
/// Handles advertisement echoes through longer routes.
const PATH_FRESHNESS_SECONDS: i64 = 60;

/// What one frame produced, as reported on the raw-packet feed.
#[derive(Debug, Default)]
pub struct PacketOutcome {
    pub packet_id: i64,
    pub payload_type: String,
    pub decrypted: bool,
    pub message_id: Option<i64>,
    pub channel_name: Option<String>,
    pub sender: Option<String>,
}

/// Main entry point for all incoming RF frames.
///
/// Duplicates (same payload over another route) skip advertisement and DM
/// processing but still go through channel decryption: the message-level
/// dedup turns them into path observations. The raw-packet feed event is
/// published for every frame, duplicate or not.
pub async fn process_raw_packet(
    gw: &Gateway,
    raw: &[u8],
    snr: Option<f64>,
    rssi: Option<i64>,
) -> Result<PacketOutcome> {
    let ts = now_secs();
    let raw_owned = raw.to_vec();
    let (packet_id, is_new) = gw
        .with_db(move |conn| raw_packets::upsert(conn, &raw_owned, ts))
        .await?;

    let info = proto::parse_packet(raw);
    let payload_type = info.as_ref().map(|i| i.payload_type);
    let payload_type_name = payload_type.map(|t| t.name()).unwrap_or("Unknown");

    tracing::debug!(
        "Packet received: type={payload_type_name}, is_new={is_new}, packet_id={packet_id}, path='{}'",
        info.as_ref().map(|i| i.path_hex()).unwrap_or_default(),
    );

    let mut outcome = PacketOutcome {
        packet_id,
        payload_type: payload_type_name.to_string(),
        ..Default::default()
    };

    match payload_type {
        Some(PayloadType::GroupText) => {
            // Always attempted, even for duplicates: the dedup branch in
            // create_channel_message records the extra path.
            if let Some((channel_name, sender, message_id)) =
                process_group_text(gw, raw, packet_id, ts, info.as_ref()).await?
            {
                outcome.decrypted = true;
                outcome.channel_name = Some(channel_name);
                outcome.sender = sender;
                outcome.message_id = message_id;
            }
        }
        Some(PayloadType::Advert) if is_new => {
            if let Some(info) = info.as_ref() {
                process_advertisement(gw, ts, info).await?;
            }
        }
        Some(PayloadType::TextMessage) if is_new => {
            if let Some(info) = info.as_ref() {
                if let Some((sender, message_id)) =
                    process_direct_message(gw, raw, packet_id, ts, info).await?
                {
                    outcome.decrypted = true;
                    outcome.sender = sender;
                    outcome.message_id = message_id;
                }
            }
        }
        _ => {}
    }

    publish_raw_packet_event(gw, raw, ts, snr, rssi, &outcome).await;
    Ok(outcome)
}

async fn publish_raw_packet_event(
    gw: &Gateway,
    raw: &[u8],
    ts: i64,
    snr: Option<f64>,
    rssi: Option<i64>,
    outcome: &PacketOutcome,
) {
    let decrypted_info = outcome.decrypted.then(|| {
        serde_json::json!({
            "channel_name": outcome.channel_name,
            "sender": outcome.sender,
        })
    });
    gw.bus
        .broadcast(
            "raw_packet",
            serde_json::json!({
                "id": outcome.packet_id,
                "timestamp": ts,
                "data": hex::encode(raw),
                "payload_type": outcome.payload_type,
                "snr": snr,
                "rssi": rssi,
                "decrypted": outcome.decrypted,
                "decrypted_info": decrypted_info,
            }),
        )
        .await;
}

/// Try every stored channel key against a GROUP_TEXT frame.
async fn process_group_text(
    gw: &Gateway,
    raw: &[u8],
    packet_id: i64,
    ts: i64,
    info: Option<&PacketInfo>,
) -> Result<Option<(String, Option<String>, Option<i64>)>> {
    let channel_list = gw.with_db(channels::get_all).await?;

    for channel in channel_list {
        let Ok(key_bytes) = hex::decode(&channel.key) else {
            continue;
        };
        let Ok(key) = <[u8; 16]>::try_from(key_bytes.as_slice()) else {
            continue;
        };
        let Some(decrypted) = proto::try_decrypt_packet_with_channel_key(raw, &key) else {
            continue;
        };

        tracing::debug!(
            "Decrypted channel message for {}: {:.50}",
            channel.name,
            decrypted.message
        );
        let message_id = create_channel_message(
            gw,
            packet_id,
            &channel.key,
            decrypted.sender.as_deref(),
            &decrypted.message,
            decrypted.timestamp,
            ts,
            info.map(|i| i.path_hex()),
        )
        .await?;

        return Ok(Some((channel.name, decrypted.sender, message_id)));
    }

    Ok(None)
}

/// Store a decrypted channel message, or fold an echo into the existing
/// row. Shared by live ingest and historical decryption.
#[allow(clippy::too_many_arguments)]
pub async fn create_channel_message(
    gw: &Gateway,
    packet_id: i64,
    channel_key: &str,
    sender: Option<&str>,
    message_text: &str,
    timestamp: u32,
    received_at: i64,
    path: Option<String>,
) -> Result<Option<i64>> {
    let text = match sender {
        Some(sender) => format!("{sender}: {message_text}"),
        None => message_text.to_string(),
    };
    let conversation_key = channel_key.to_uppercase();

    create_or_fold_echo(
        gw,
        packet_id,
        messages::NewMessage {
            msg_type: "CHAN".to_string(),
            conversation_key,
            text,
            sender_timestamp: Some(i64::from(timestamp)),
            received_at,
            path,
            ..Default::default()
        },
    )
    .await
}

/// Store a decrypted direct message, or fold an echo into the existing
/// row. `outgoing` marks our own flood heard back from the mesh.
pub async fn create_direct_message(
    gw: &Gateway,
    packet_id: i64,
    peer_public_key: &str,
    message_text: &str,
    timestamp: u32,
    received_at: i64,
    path: Option<String>,
    outgoing: bool,
) -> Result<Option<i64>> {
    create_or_fold_echo(
        gw,
        packet_id,
        messages::NewMessage {
            msg_type: "PRIV".to_string(),
            conversation_key: peer_public_key.to_lowercase(),
            text: message_text.to_string(),
            sender_timestamp: Some(i64::from(timestamp)),
            received_at,
            path,
            outgoing,
            ..Default::default()
        },
    )
    .await
}

/// The create-or-echo contract: a fresh row publishes `message`; a
/// duplicate appends its path, bumps `acked` when the stored row is our
/// own outgoing message, and publishes `message_acked`. Either way the
/// raw packet ends up linked.
async fn create_or_fold_echo(
    gw: &Gateway,
    packet_id: i64,
    new_message: messages::NewMessage,
) -> Result<Option<i64>> {
    let insert = new_message.clone();
    let created = gw.with_db(move |conn| messages::create(conn, &insert)).await?;

    if let Some(message_id) = created {
        gw.with_db(move |conn| raw_packets::link_message(conn, packet_id, message_id))
            .await?;
        if let Some(message) = gw
            .with_db(move |conn| messages::get_by_id(conn, message_id))
            .await?
        {
            gw.bus
                .broadcast("message", serde_json::to_value(&message).unwrap_or_default())
                .await;
        }
        tracing::info!(
            "Stored {} message {message_id} for {:.8}",
            new_message.msg_type,
            new_message.conversation_key
        );
        return Ok(Some(message_id));
    }

    // Duplicate: our own echo coming back, or the same message over a
    // second route.
    let lookup = new_message.clone();
    let existing = gw
        .with_db(move |conn| {
            messages::get_by_content(
                conn,
                &lookup.msg_type,
                &lookup.conversation_key,
                &lookup.text,
                lookup.sender_timestamp,
            )
        })
        .await?;
    let Some(existing) = existing else {
        tracing::warn!(
            "Duplicate message for {:.8} but no existing row found",
            new_message.conversation_key
        );
        return Ok(None);
    };

    let existing_id = existing.id;
    let paths = match new_message.path {
        Some(path) => {
            let received_at = new_message.received_at;
            gw.with_db(move |conn| messages::add_path(conn, existing_id, &path, received_at))
                .await?
        }
        None => existing.paths.clone().unwrap_or_default(),
    };

    let ack_count = if existing.outgoing {
        gw.with_db(move |conn| messages::increment_ack_count(conn, existing_id))
            .await?
    } else {
        existing.acked
    };

    gw.bus
        .broadcast(
            "message_acked",
            serde_json::json!({
                "message_id": existing_id,
                "ack_count": ack_count,
                "paths": paths,
            }),
        )
        .await;

    gw.with_db(move |conn| raw_packets::link_message(conn, packet_id, existing_id))
        .await?;
    Ok(None)
}

/// Decrypt a TEXT_MESSAGE frame against candidate peers chosen by the
/// 1-byte source/destination hashes.
///
/// Direction table (O = first byte of our public key):
/// dest=O, src≠O → incoming from the contact matching src;
/// dest≠O, src=O → echo of our own outgoing flood;
/// both=O → 1/256 collision, treated as incoming;
/// neither → not ours, no decrypt attempt.
async fn process_direct_message(
    gw: &Gateway,
    raw: &[u8],
    packet_id: i64,
    ts: i64,
    info: &PacketInfo,
) -> Result<Option<(Option<String>, Option<i64>)>> {
    let (Some(private), Some(our_public)) = (gw.keystore.private_key(), gw.keystore.public_key())
    else {
        return Ok(None);
    };
    if info.payload.len() < 4 {
        return Ok(None);
    }

    let dest = info.payload[0];
    let src = info.payload[1];
    let ours = our_public[0];

    let (peer_hash, outgoing) = match (dest == ours, src == ours) {
        (true, false) => (src, false),
        (false, true) => (dest, true),
        (true, true) => (src, false),
        (false, false) => return Ok(None),
    };

    let peer_hash_hex = format!("{peer_hash:02x}");
    let candidates = gw
        .with_db(move |conn| contacts::get_by_first_byte(conn, &peer_hash_hex))
        .await?;

    for candidate in candidates {
        let Ok(peer_public) = hex::decode(&candidate.public_key) else {
            continue;
        };
        let Some(decrypted) =
            proto::try_decrypt_dm(raw, &private, &peer_public, Some(&our_public))
        else {
            continue;
        };

        tracing::debug!(
            "Decrypted DM with {:.12} (outgoing={outgoing})",
            candidate.public_key
        );
        let message_id = create_direct_message(
            gw,
            packet_id,
            &candidate.public_key,
            &decrypted.message,
            decrypted.timestamp,
            ts,
            Some(info.path_hex()),
            outgoing,
        )
        .await?;

        let peer_key = candidate.public_key.clone();
        if !outgoing {
            gw.with_db(move |conn| contacts::update_last_contacted(conn, &peer_key, ts))
                .await?;
        }
        return Ok(Some((candidate.name, message_id)));
    }

    Ok(None)
}

/// Advertisement ingest: merge identity/location/name into the contact
/// table and let interested clients know.
pub(crate) async fn process_advertisement(gw: &Gateway, ts: i64, info: &PacketInfo) -> Result<()> {
    let Some(advert) = proto::parse_advertisement(&info.payload) else {
        tracing::debug!("Failed to parse advertisement payload");
        return Ok(());
    };

    let advert_key = advert.public_key.clone();
    let existing = gw
        .with_db(move |conn| contacts::get_by_key(conn, &advert_key))
        .await?;

    // Path freshness: keep a recently heard path that is no longer than
    // the new one.
    let new_path_len = info.path_len() as i64;
    let (path_hex, path_len) = match &existing {
        Some(existing) if existing.last_seen.is_some_and(|seen| {
            let age = ts - seen;
            let stored_len = if existing.last_path_len >= 0 {
                existing.last_path_len
            } else {
                i64::MAX
            };
            age <= PATH_FRESHNESS_SECONDS && stored_len <= new_path_len
        }) =>
        {
            tracing::debug!(
                "Keeping existing shorter path for {:.12} (stored={}, new={new_path_len})",
                advert.public_key,
                existing.last_path_len,
            );
            (
                existing.last_path.clone().unwrap_or_default(),
                existing.last_path_len,
            )
        }
        _ => (info.path_hex(), new_path_len),
    };

    let contact_type = if advert.device_role > 0 {
        i64::from(advert.device_role)
    } else {
        existing.as_ref().map(|c| c.contact_type).unwrap_or(0)
    };
    let last_advert = if advert.timestamp > 0 {
        i64::from(advert.timestamp)
    } else {
        ts
    };

    let upsert = contacts::ContactUpsert {
        public_key: advert.public_key.clone(),
        name: advert.name.clone(),
        contact_type,
        flags: existing.as_ref().map(|c| c.flags).unwrap_or(0),
        last_path: Some(path_hex),
        last_path_len: path_len,
        last_advert: Some(last_advert),
        lat: advert.lat,
        lon: advert.lon,
        last_seen: ts,
        on_radio: false,
        last_contacted: None,
    };
    gw.with_db(move |conn| contacts::upsert(conn, &upsert)).await?;

    let advert_key = advert.public_key.clone();
    let stored = gw
        .with_db(move |conn| contacts::get_by_key(conn, &advert_key))
        .await?;
    if let Some(stored) = &stored {
        gw.bus
            .broadcast("contact", serde_json::to_value(stored).unwrap_or_default())
            .await;
    }

    if contact_type != CONTACT_TYPE_REPEATER {
        // Keep the radio's working set warm so it can auto-ACK DMs from
        // people who are actually around.
        let gw_clone = gw.clone();
        tokio::spawn(async move {
            if let Err(e) = sync::sync_recent_contacts_to_radio(&gw_clone, false).await {
                tracing::debug!("Contact push after advert failed: {e}");
            }
        });
    }

    // Optional: a newly heard contact may unlock stored DMs.
    let settings = gw.with_db(meshgate_db::queries::settings::get).await?;
    if settings.auto_decrypt_dm_on_advert && gw.keystore.has_key() {
        if let Some(private) = gw.keystore.private_key() {
            if let Ok(peer) = hex::decode(&advert.public_key) {
                let gw_clone = gw.clone();
                let peer_key_hex = advert.public_key.clone();
                tokio::spawn(async move {
                    retry::run_historical_dm_decryption(
                        &gw_clone,
                        &private,
                        &peer,
                        &peer_key_hex,
                        None,
                    )
                    .await;
                });
            }
        }
    }

    Ok(())
}
