//! Radio push dispatch.
//!
//! One dispatcher task per connection consumes the link's push stream.
//! Reconnects replace the task (the equivalent of unsubscribing stale
//! handlers), so pushes are never processed twice.

use meshgate_db::models::CONTACT_TYPE_REPEATER;
use meshgate_db::now_secs;
use meshgate_db::queries::{contacts, messages};
use meshgate_radio::{Push, RadioContact, RadioMessage};

use crate::error::Result;
use crate::state::{resolve_cli_waiter, resolve_trace_waiter, CliReply, Gateway, PushReceiver, TraceReply};
use crate::{processor, sync};

/// Replace the push dispatcher with one driving the given stream.
pub fn spawn_dispatcher(gw: &Gateway, mut pushes: PushReceiver) {
    let gw_clone = gw.clone();
    gw.tasks.replace("push-dispatcher", move || {
        tokio::spawn(async move {
            while let Some(push) = pushes.recv().await {
                if let Err(e) = handle_push(&gw_clone, push).await {
                    tracing::error!("Error handling radio push, continuing: {e}");
                }
            }
            tracing::debug!("Push dispatcher stopped");
        })
    });
    tracing::info!("Radio push dispatcher registered");
}

async fn handle_push(gw: &Gateway, push: Push) -> Result<()> {
    match push {
        Push::RxLogData {
            snr_q4,
            rssi_dbm,
            payload,
        } => {
            processor::process_raw_packet(
                gw,
                &payload,
                Some(f64::from(snr_q4) / 4.0),
                Some(i64::from(rssi_dbm)),
            )
            .await?;
        }
        Push::MessagesWaiting => {
            if gw.radio.auto_fetch_enabled() {
                let drained = sync::drain_pending_messages(gw).await;
                tracing::debug!("Drained {drained} message(s) after waiting push");
            }
        }
        Push::SendConfirmed { ack_code, .. } => {
            handle_ack(gw, ack_code).await?;
        }
        Push::PathUpdated {
            pubkey_prefix,
            path,
        } => {
            handle_path_update(gw, &hex::encode(pubkey_prefix), &hex::encode(&path), path.len())
                .await?;
        }
        Push::NewContact(contact) => {
            handle_new_contact(gw, contact).await?;
        }
        Push::TraceData {
            tag, path, snrs_q4, ..
        } => {
            resolve_trace_waiter(gw, tag, TraceReply { path, snrs_q4 });
        }
        Push::Advert { public_key } => {
            // Advertisements are processed from the raw RX log; the push
            // only tells us the radio heard one.
            tracing::debug!("Advert push for {:.12}", hex::encode(public_key));
        }
    }
    Ok(())
}

/// Map a send-confirmed code back to its outgoing message.
async fn handle_ack(gw: &Gateway, ack_code: u32) -> Result<()> {
    let Some(message_id) = gw.acks.take(ack_code) else {
        tracing::debug!("ACK {ack_code:08x} does not match any pending message");
        return Ok(());
    };
    tracing::info!("ACK received for message {message_id}");

    let ack_count = gw
        .with_db(move |conn| messages::increment_ack_count(conn, message_id))
        .await?;
    gw.bus
        .broadcast(
            "message_acked",
            serde_json::json!({ "message_id": message_id, "ack_count": ack_count }),
        )
        .await;
    Ok(())
}

async fn handle_path_update(
    gw: &Gateway,
    pubkey_prefix: &str,
    path_hex: &str,
    path_len: usize,
) -> Result<()> {
    tracing::debug!("Path update for {pubkey_prefix}");
    let prefix = pubkey_prefix.to_string();
    let matched = gw
        .with_db(move |conn| contacts::get_by_prefix(conn, &prefix))
        .await?;
    if let contacts::PrefixMatch::One(contact) = matched {
        let key = contact.public_key;
        let path = path_hex.to_string();
        let now = now_secs();
        gw.with_db(move |conn| contacts::update_path(conn, &key, &path, path_len as i64, now))
            .await?;
    }
    Ok(())
}

/// A contact pushed from the radio's own flash table (not an RF advert).
async fn handle_new_contact(gw: &Gateway, contact: RadioContact) -> Result<()> {
    let key_hex = hex::encode(contact.public_key);
    tracing::debug!("New contact from radio: {:.12}", key_hex);

    let upsert = radio_contact_to_upsert(&contact, true, now_secs());
    gw.with_db(move |conn| contacts::upsert(conn, &upsert)).await?;

    let lookup = key_hex.clone();
    if let Some(stored) = gw
        .with_db(move |conn| contacts::get_by_key(conn, &lookup))
        .await?
    {
        gw.bus
            .broadcast("contact", serde_json::to_value(&stored).unwrap_or_default())
            .await;
    }
    Ok(())
}

/// Convert a radio flash record into our upsert shape.
pub fn radio_contact_to_upsert(
    contact: &RadioContact,
    on_radio: bool,
    last_seen: i64,
) -> contacts::ContactUpsert {
    contacts::ContactUpsert {
        public_key: hex::encode(contact.public_key),
        name: (!contact.name.is_empty()).then(|| contact.name.clone()),
        contact_type: i64::from(contact.contact_type),
        flags: i64::from(contact.flags),
        last_path: (!contact.out_path.is_empty()).then(|| hex::encode(&contact.out_path)),
        last_path_len: i64::from(contact.out_path_len),
        last_advert: (contact.last_advert > 0).then_some(i64::from(contact.last_advert)),
        lat: (contact.lat_e6 != 0).then(|| f64::from(contact.lat_e6) / 1e6),
        lon: (contact.lon_e6 != 0).then(|| f64::from(contact.lon_e6) / 1e6),
        last_seen,
        on_radio,
        last_contacted: None,
    }
}

/// Fallback ingest for messages the radio decrypted internally.
///
/// The raw-RF path is primary; this path only stores something when the
/// processor could not (no exported key, or sender unknown). The shared
/// unique key makes either order collapse to one row.
pub async fn handle_radio_message(gw: &Gateway, message: RadioMessage) -> Result<()> {
    let RadioMessage::Contact(msg) = message else {
        // Channel messages always arrive via the RX log too; that path
        // owns CHAN rows.
        return Ok(());
    };

    let received_at = now_secs();
    let prefix_hex = msg.pubkey_prefix_hex();

    // CLI responses route to a waiting repeater command, never chat.
    if msg.txt_type == 1 {
        let delivered = resolve_cli_waiter(
            gw,
            &prefix_hex,
            CliReply {
                text: msg.text.clone(),
                sender_timestamp: msg.sender_timestamp,
            },
        );
        if !delivered {
            tracing::debug!("Unclaimed CLI response from {prefix_hex}");
        }
        return Ok(());
    }

    let lookup = prefix_hex.clone();
    let matched = gw
        .with_db(move |conn| contacts::get_by_key_or_prefix(conn, &lookup))
        .await?;

    let mut conversation_key = prefix_hex.clone();
    let mut contact = None;
    if let contacts::PrefixMatch::One(found) = matched {
        conversation_key = found.public_key.clone();

        let full_key = found.public_key.clone();
        gw.with_db(move |conn| messages::claim_prefix_messages(conn, &full_key))
            .await?;

        if found.contact_type == CONTACT_TYPE_REPEATER {
            tracing::debug!("Skipping chat message from repeater {:.12}", found.public_key);
            return Ok(());
        }
        contact = Some(found);
    }

    let new_message = messages::NewMessage {
        msg_type: "PRIV".to_string(),
        conversation_key: conversation_key.to_lowercase(),
        text: msg.text.clone(),
        sender_timestamp: Some(if msg.sender_timestamp > 0 {
            i64::from(msg.sender_timestamp)
        } else {
            received_at
        }),
        received_at,
        txt_type: i64::from(msg.txt_type),
        ..Default::default()
    };
    let insert = new_message.clone();
    let Some(message_id) = gw.with_db(move |conn| messages::create(conn, &insert)).await? else {
        tracing::debug!("DM from {prefix_hex} already stored by the packet processor");
        return Ok(());
    };

    tracing::debug!("DM from {prefix_hex} stored by fallback handler");
    if let Some(stored) = gw
        .with_db(move |conn| messages::get_by_id(conn, message_id))
        .await?
    {
        gw.bus
            .broadcast("message", serde_json::to_value(&stored).unwrap_or_default())
            .await;
    }

    if let Some(contact) = contact {
        let key = contact.public_key;
        gw.with_db(move |conn| contacts::update_last_contacted(conn, &key, received_at))
            .await?;
    }

    Ok(())
}
