//! Historical decrypt sweeps.
//!
//! On-demand jobs that re-try stored-but-undecrypted packets with newly
//! supplied key material: a channel key (or hashtag name) or a contact's
//! DM keys. Successes flow through the same create-or-echo path as live
//! ingest, so path and ack accounting stay uniform. Jobs run as isolated
//! tasks; several can sweep concurrently.

use meshgate_db::queries::raw_packets;
use meshgate_proto as proto;

use crate::processor;
use crate::state::Gateway;

/// Sweep all unlinked packets with a channel key. Returns the number of
/// packets that produced or matched a message.
pub async fn run_historical_channel_decryption(
    gw: &Gateway,
    channel_key: [u8; 16],
    channel_key_hex: &str,
    display_name: Option<String>,
) -> usize {
    let packets = match gw.with_db(raw_packets::all_undecrypted).await {
        Ok(packets) => packets,
        Err(e) => {
            tracing::error!("Historical channel decryption failed to list packets: {e}");
            return 0;
        }
    };
    if packets.is_empty() {
        tracing::info!("No undecrypted packets to process");
        return 0;
    }

    tracing::info!("Starting historical channel decryption of {} packets", packets.len());
    let mut decrypted = 0;
    for (packet_id, data, packet_timestamp) in packets {
        let Some(result) = proto::try_decrypt_packet_with_channel_key(&data, &channel_key) else {
            continue;
        };
        let path = proto::parse_packet(&data).map(|info| info.path_hex());

        let created = processor::create_channel_message(
            gw,
            packet_id,
            channel_key_hex,
            result.sender.as_deref(),
            &result.message,
            result.timestamp,
            packet_timestamp,
            path,
        )
        .await;
        match created {
            Ok(Some(_)) => decrypted += 1,
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to store historical message: {e}"),
        }
    }

    tracing::info!("Historical channel decryption complete: {decrypted} messages");
    if decrypted > 0 {
        let name = display_name.unwrap_or_else(|| channel_key_hex.chars().take(12).collect());
        let plural = if decrypted == 1 { "" } else { "s" };
        gw.bus
            .broadcast_success(
                &format!("Historical decrypt complete for {name}"),
                Some(&format!("Decrypted {decrypted} message{plural}")),
            )
            .await;
    }
    decrypted
}

/// Sweep unlinked TEXT_MESSAGE packets with a contact's DM keys.
pub async fn run_historical_dm_decryption(
    gw: &Gateway,
    private_key: &[u8],
    peer_public: &[u8],
    peer_key_hex: &str,
    display_name: Option<String>,
) -> usize {
    let Ok(our_public) = proto::derive_public_key(private_key) else {
        tracing::error!("Historical DM decryption given an invalid private key");
        return 0;
    };

    let packets = match gw.with_db(raw_packets::undecrypted_text_messages).await {
        Ok(packets) => packets,
        Err(e) => {
            tracing::error!("Historical DM decryption failed to list packets: {e}");
            return 0;
        }
    };
    if packets.is_empty() {
        tracing::info!("No undecrypted TEXT_MESSAGE packets to process");
        return 0;
    }

    tracing::info!("Starting historical DM decryption of {} packets", packets.len());
    let mut decrypted = 0;
    for (packet_id, data, packet_timestamp) in packets {
        let Some(result) = proto::try_decrypt_dm(&data, private_key, peer_public, Some(&our_public))
        else {
            continue;
        };

        // Echo of our own flood when the source hash is ours.
        let outgoing = result.src_hash == format!("{:02x}", our_public[0])
            && result.dest_hash != result.src_hash;
        let path = proto::parse_packet(&data).map(|info| info.path_hex());

        let created = processor::create_direct_message(
            gw,
            packet_id,
            peer_key_hex,
            &result.message,
            result.timestamp,
            packet_timestamp,
            path,
            outgoing,
        )
        .await;
        match created {
            Ok(Some(_)) => decrypted += 1,
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to store historical DM: {e}"),
        }
    }

    tracing::info!("Historical DM decryption complete: {decrypted} messages");
    if decrypted > 0 {
        let name = display_name.unwrap_or_else(|| peer_key_hex.chars().take(12).collect());
        let plural = if decrypted == 1 { "" } else { "s" };
        gw.bus
            .broadcast_success(
                &format!("Historical decrypt complete for {name}"),
                Some(&format!("Decrypted {decrypted} message{plural}")),
            )
            .await;
    }
    decrypted
}
