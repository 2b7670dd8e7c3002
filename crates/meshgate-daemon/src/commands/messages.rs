//! Message queries and outgoing sends.
//!
//! Send paths capture one `now` and use it for both the on-wire
//! timestamp and the stored row. The mesh echo carries that timestamp
//! back, so the dedup key matches and the echo lands as an ack instead
//! of a duplicate row.

use serde::Deserialize;
use serde_json::Value;

use meshgate_db::now_secs;
use meshgate_db::queries::{channels, contacts, messages};

use super::{contacts as contact_commands, parse_params};
use crate::error::{GatewayError, Result};
use crate::manager::{self, OperationOptions};
use crate::state::Gateway;

/// Channel slot borrowed for outgoing channel sends.
const TEMP_RADIO_SLOT: u8 = 0;

/// Window for re-transmitting an outgoing channel message.
const RESEND_WINDOW_SECS: i64 = 30;

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
    #[serde(rename = "type", default)]
    msg_type: Option<String>,
    #[serde(default)]
    conversation_key: Option<String>,
    #[serde(default)]
    before: Option<i64>,
    #[serde(default)]
    before_id: Option<i64>,
}

fn default_limit() -> i64 {
    100
}

#[derive(Deserialize)]
struct BulkParams {
    conversations: Vec<BulkConversation>,
    #[serde(default = "default_limit")]
    limit_per_conversation: i64,
}

#[derive(Deserialize)]
struct BulkConversation {
    #[serde(rename = "type")]
    msg_type: String,
    conversation_key: String,
}

#[derive(Deserialize)]
struct UnreadParams {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct SendDirectParams {
    destination: String,
    text: String,
}

#[derive(Deserialize)]
struct SendChannelParams {
    channel_key: String,
    text: String,
}

#[derive(Deserialize)]
struct ResendParams {
    message_id: i64,
}

pub async fn list(gw: &Gateway, params: Value) -> Result<Value> {
    let params: ListParams = parse_params(params)?;
    let filter = messages::MessageFilter {
        limit: params.limit.clamp(1, 1000),
        offset: params.offset.max(0),
        msg_type: params.msg_type,
        conversation_key: params.conversation_key,
        before: params.before,
        before_id: params.before_id,
    };
    let rows = gw.with_db(move |conn| messages::list(conn, &filter)).await?;
    Ok(serde_json::to_value(rows).unwrap_or_default())
}

pub async fn bulk(gw: &Gateway, params: Value) -> Result<Value> {
    let params: BulkParams = parse_params(params)?;
    let conversations: Vec<(String, String)> = params
        .conversations
        .into_iter()
        .map(|c| (c.msg_type, c.conversation_key))
        .collect();
    let limit = params.limit_per_conversation.clamp(1, 1000);
    let result = gw
        .with_db(move |conn| messages::get_bulk(conn, &conversations, limit))
        .await?;
    Ok(serde_json::to_value(result).unwrap_or_default())
}

pub async fn unread(gw: &Gateway, params: Value) -> Result<Value> {
    let params: UnreadParams = if params.is_null() {
        UnreadParams { name: None }
    } else {
        parse_params(params)?
    };
    let summary = gw
        .with_db(move |conn| messages::unread_summary(conn, params.name.as_deref()))
        .await?;
    Ok(serde_json::to_value(summary).unwrap_or_default())
}

fn pubkey_prefix6(public_key_hex: &str) -> Result<[u8; 6]> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|_| GatewayError::BadRequest("invalid public key".to_string()))?;
    bytes
        .get(..6)
        .and_then(|s| <[u8; 6]>::try_from(s).ok())
        .ok_or_else(|| GatewayError::BadRequest("public key too short".to_string()))
}

/// Send a direct message: resolve the destination, make sure the radio
/// knows the contact, transmit, store the outgoing row, then start
/// tracking the expected ACK (in that order: the ACK must never be
/// observable before the row exists).
pub async fn send_direct(gw: &Gateway, params: Value) -> Result<Value> {
    let params: SendDirectParams = parse_params(params)?;
    if params.text.is_empty() {
        return Err(GatewayError::BadRequest("text must not be empty".to_string()));
    }

    let contact = contact_commands::resolve(gw, &params.destination).await?;
    let prefix = pubkey_prefix6(&contact.public_key)?;
    let radio_contact = crate::sync::contact_to_radio(&contact)
        .ok_or_else(|| GatewayError::BadRequest("contact key is malformed".to_string()))?;

    let text = params.text.clone();
    let sent = manager::with_radio_operation(
        gw,
        "send-dm",
        OperationOptions {
            blocking: true,
            ..Default::default()
        },
        |link| async move {
            // The radio may have dropped the contact since the last
            // offload; add is idempotent.
            if let Err(e) = link.add_contact(&radio_contact).await {
                tracing::warn!("Failed to push contact before send: {e}");
            }
            let now = now_secs();
            let info = link
                .send_text_message(prefix, &text, now as u32, 0)
                .await?;
            Ok((now, info))
        },
    )
    .await?;
    let (now, sent_info) = sent;

    let new_message = messages::NewMessage {
        msg_type: "PRIV".to_string(),
        conversation_key: contact.public_key.clone(),
        text: params.text.clone(),
        sender_timestamp: Some(now),
        received_at: now,
        outgoing: true,
        ..Default::default()
    };
    let message_id = gw
        .with_db(move |conn| messages::create(conn, &new_message))
        .await?
        .ok_or_else(|| {
            GatewayError::BadRequest("outgoing message is an unexpected duplicate".to_string())
        })?;

    let contact_key = contact.public_key.clone();
    gw.with_db(move |conn| contacts::update_last_contacted(conn, &contact_key, now))
        .await?;

    // Row committed; now the ACK can resolve against it.
    gw.acks
        .track(sent_info.ack_code, message_id, sent_info.suggested_timeout_ms);

    let stored = gw
        .with_db(move |conn| messages::get_by_id(conn, message_id))
        .await?
        .ok_or_else(|| GatewayError::NotFound("message after send".to_string()))?;
    Ok(serde_json::to_value(stored).unwrap_or_default())
}

/// Send a channel message. The stored text carries the same
/// `"Name: text"` prefix the radio puts on the air.
pub async fn send_channel(gw: &Gateway, params: Value) -> Result<Value> {
    let params: SendChannelParams = parse_params(params)?;
    if params.text.is_empty() {
        return Err(GatewayError::BadRequest("text must not be empty".to_string()));
    }

    let lookup = params.channel_key.clone();
    let channel = gw
        .with_db(move |conn| channels::get_by_key(conn, &lookup))
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("channel {}", params.channel_key)))?;

    let key_bytes = hex::decode(&channel.key)
        .ok()
        .and_then(|b| <[u8; 16]>::try_from(b.as_slice()).ok())
        .ok_or_else(|| GatewayError::BadRequest("invalid channel key".to_string()))?;

    let channel_name = channel.name.clone();
    let text = params.text.clone();
    let (now, radio_name) = manager::with_radio_operation(
        gw,
        "send-channel",
        OperationOptions {
            blocking: true,
            ..Default::default()
        },
        |link| async move {
            if let Err(e) = link
                .set_channel(TEMP_RADIO_SLOT, &channel_name, key_bytes)
                .await
            {
                tracing::warn!("Failed to load channel into slot {TEMP_RADIO_SLOT}: {e}");
            }
            let now = now_secs();
            link.send_channel_message(TEMP_RADIO_SLOT, &text, now as u32)
                .await?;
            let name = link.self_info().map(|info| info.name).unwrap_or_default();
            Ok((now, name))
        },
    )
    .await?;

    let stored_text = if radio_name.is_empty() {
        params.text.clone()
    } else {
        format!("{radio_name}: {}", params.text)
    };
    let new_message = messages::NewMessage {
        msg_type: "CHAN".to_string(),
        conversation_key: channel.key.clone(),
        text: stored_text,
        sender_timestamp: Some(now),
        received_at: now,
        outgoing: true,
        ..Default::default()
    };
    let message_id = gw
        .with_db(move |conn| messages::create(conn, &new_message))
        .await?
        .ok_or_else(|| {
            GatewayError::BadRequest("outgoing message is an unexpected duplicate".to_string())
        })?;

    let stored = gw
        .with_db(move |conn| messages::get_by_id(conn, message_id))
        .await?
        .ok_or_else(|| GatewayError::NotFound("message after send".to_string()))?;
    Ok(serde_json::to_value(stored).unwrap_or_default())
}

/// Re-transmit a recently sent channel message (same timestamp, so the
/// mesh still dedups it against the original).
pub async fn resend_channel(gw: &Gateway, params: Value) -> Result<Value> {
    let params: ResendParams = parse_params(params)?;
    let message = gw
        .with_db(move |conn| messages::get_by_id(conn, params.message_id))
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("message {}", params.message_id)))?;

    if message.msg_type != "CHAN" || !message.outgoing {
        return Err(GatewayError::BadRequest(
            "only outgoing channel messages can be resent".to_string(),
        ));
    }
    if now_secs() - message.received_at > RESEND_WINDOW_SECS {
        return Err(GatewayError::BadRequest(format!(
            "resend window of {RESEND_WINDOW_SECS}s has passed"
        )));
    }

    let lookup = message.conversation_key.clone();
    let channel = gw
        .with_db(move |conn| channels::get_by_key(conn, &lookup))
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("channel {}", message.conversation_key)))?;
    let key_bytes = hex::decode(&channel.key)
        .ok()
        .and_then(|b| <[u8; 16]>::try_from(b.as_slice()).ok())
        .ok_or_else(|| GatewayError::BadRequest("invalid channel key".to_string()))?;

    let sender_timestamp = message.sender_timestamp.unwrap_or(message.received_at) as u32;
    manager::with_radio_operation(
        gw,
        "resend-channel",
        OperationOptions {
            blocking: true,
            ..Default::default()
        },
        |link| async move {
            if let Err(e) = link.set_channel(TEMP_RADIO_SLOT, &channel.name, key_bytes).await {
                tracing::warn!("Failed to load channel into slot {TEMP_RADIO_SLOT}: {e}");
            }
            // Strip our own name prefix; the radio re-applies it on air.
            let radio_name = link.self_info().map(|info| info.name).unwrap_or_default();
            let wire_text = message
                .text
                .strip_prefix(&format!("{radio_name}: "))
                .unwrap_or(&message.text);
            link.send_channel_message(TEMP_RADIO_SLOT, wire_text, sender_timestamp)
                .await?;
            Ok(())
        },
    )
    .await?;

    Ok(serde_json::json!({ "status": "ok", "message_id": params.message_id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_gateway;
    use crate::testutil::FakeRadio;

    async fn seed_contact(gw: &Gateway, key: &str) {
        let upsert = contacts::ContactUpsert {
            public_key: key.to_string(),
            contact_type: 1,
            last_seen: 1,
            last_path_len: -1,
            ..Default::default()
        };
        gw.with_db(move |conn| contacts::upsert(conn, &upsert))
            .await
            .expect("contact");
    }

    #[tokio::test]
    async fn test_send_direct_stores_and_tracks_ack() {
        let gw = test_gateway();
        let fake = FakeRadio::start().await;
        fake.attach(&gw).await;

        let peer = "ab".repeat(32);
        seed_contact(&gw, &peer).await;

        let sent = send_direct(
            &gw,
            serde_json::json!({ "destination": peer, "text": "hello out there" }),
        )
        .await
        .expect("send");

        assert_eq!(sent["type"], "PRIV");
        assert_eq!(sent["outgoing"], true);
        assert_eq!(sent["text"], "hello out there");
        // Wire timestamp and stored row share one clock capture.
        assert_eq!(sent["sender_timestamp"], sent["received_at"]);

        // The fake radio always answers with ack code 0xACC0DE.
        assert_eq!(gw.acks.pending_count(), 1);
        let message_id = sent["id"].as_i64().expect("id");
        assert_eq!(gw.acks.take(0xACC0DE), Some(message_id));
    }

    #[tokio::test]
    async fn test_send_direct_unknown_destination() {
        let gw = test_gateway();
        let result = send_direct(
            &gw,
            serde_json::json!({ "destination": "ff00", "text": "x" }),
        )
        .await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_send_channel_stores_sender_prefixed_text() {
        let gw = test_gateway();
        let fake = FakeRadio::start().await;
        fake.attach(&gw).await;

        gw.with_db(|conn| channels::upsert(conn, "7ABA109EDCF304A84433CB71D0F3AB73", "#six77", true, false))
            .await
            .expect("channel");

        let sent = send_channel(
            &gw,
            serde_json::json!({
                "channel_key": "7aba109edcf304a84433cb71d0f3ab73",
                "text": "good morning mesh",
            }),
        )
        .await
        .expect("send");

        // The fake radio identifies as "TestNode"; the stored text must
        // match what the mesh will echo back.
        assert_eq!(sent["text"], "TestNode: good morning mesh");
        assert_eq!(sent["conversation_key"], "7ABA109EDCF304A84433CB71D0F3AB73");
        assert_eq!(sent["outgoing"], true);

        // Channel got loaded into the temp slot before the send.
        assert!(fake.saw_command(0x1B).await);
        assert!(fake.saw_command(0x03).await);
    }

    #[tokio::test]
    async fn test_resend_channel_within_window() {
        let gw = test_gateway();
        let fake = FakeRadio::start().await;
        fake.attach(&gw).await;

        gw.with_db(|conn| channels::upsert(conn, "7ABA109EDCF304A84433CB71D0F3AB73", "#six77", true, false))
            .await
            .expect("channel");

        let sent = send_channel(
            &gw,
            serde_json::json!({
                "channel_key": "7ABA109EDCF304A84433CB71D0F3AB73",
                "text": "resend me",
            }),
        )
        .await
        .expect("send");
        let message_id = sent["id"].as_i64().expect("id");

        let result = resend_channel(&gw, serde_json::json!({ "message_id": message_id }))
            .await
            .expect("resend");
        assert_eq!(result["status"], "ok");
    }

    #[tokio::test]
    async fn test_resend_rejects_old_or_inbound() {
        let gw = test_gateway();

        // An inbound row is never resendable.
        let inbound = gw
            .with_db(|conn| {
                messages::create(
                    conn,
                    &messages::NewMessage {
                        msg_type: "CHAN".to_string(),
                        conversation_key: "AA11".to_string(),
                        text: "Bob: hi".to_string(),
                        sender_timestamp: Some(1),
                        received_at: 1,
                        ..Default::default()
                    },
                )
            })
            .await
            .expect("db")
            .expect("created");
        assert!(matches!(
            resend_channel(&gw, serde_json::json!({ "message_id": inbound })).await,
            Err(GatewayError::BadRequest(_))
        ));

        // An outgoing row outside the 30 s window is too old.
        let old = gw
            .with_db(|conn| {
                messages::create(
                    conn,
                    &messages::NewMessage {
                        msg_type: "CHAN".to_string(),
                        conversation_key: "AA11".to_string(),
                        text: "Me: old".to_string(),
                        sender_timestamp: Some(2),
                        received_at: 2,
                        outgoing: true,
                        ..Default::default()
                    },
                )
            })
            .await
            .expect("db")
            .expect("created");
        assert!(matches!(
            resend_channel(&gw, serde_json::json!({ "message_id": old })).await,
            Err(GatewayError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unread_via_rpc_shape() {
        let gw = test_gateway();
        gw.with_db(|conn| channels::upsert(conn, "CC11", "Chat", false, false))
            .await
            .expect("channel");
        gw.with_db(|conn| {
            messages::create(
                conn,
                &messages::NewMessage {
                    msg_type: "CHAN".to_string(),
                    conversation_key: "CC11".to_string(),
                    text: "Bob: @[Me] ping".to_string(),
                    sender_timestamp: Some(10),
                    received_at: 10,
                    ..Default::default()
                },
            )
        })
        .await
        .expect("message");

        let summary = unread(&gw, serde_json::json!({ "name": "Me" }))
            .await
            .expect("unread");
        assert_eq!(summary["counts"]["channel-CC11"], 1);
        assert_eq!(summary["mentions"]["channel-CC11"], true);
        assert_eq!(summary["last_message_times"]["channel-CC11"], 10);
    }
}
