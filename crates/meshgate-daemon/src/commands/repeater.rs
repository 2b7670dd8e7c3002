//! Repeater operations: telemetry, trace, CLI exchange.
//!
//! Each borrows the shared operation lock, pauses the fallback poll, and
//! suspends auto-fetch so the radio stays quiet for the exchange. A held
//! lock surfaces as Busy immediately; these are interactive calls, the
//! client retries.

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;

use meshgate_db::now_secs;

use super::{contacts as contact_commands, parse_params};
use crate::error::{GatewayError, Result};
use crate::handlers;
use crate::manager::{self, OperationOptions};
use crate::state::{register_cli_waiter, register_trace_waiter, Gateway};
use crate::sync::contact_to_radio;

/// Budget for one CLI exchange attempt.
const CLI_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
/// CLI attempts before a structured timeout.
const CLI_ATTEMPTS: u32 = 2;
/// Budget for a trace bounce-back.
const TRACE_TIMEOUT: Duration = Duration::from_secs(15);
/// Telemetry attempts before a structured timeout.
const TELEMETRY_ATTEMPTS: u32 = 2;

const REPEATER_OPTIONS: OperationOptions = OperationOptions {
    pause_polling: true,
    suspend_auto_fetch: true,
    blocking: false,
};

#[derive(Deserialize)]
struct KeyParams {
    key: String,
}

#[derive(Deserialize)]
struct CommandParams {
    key: String,
    command: String,
}

fn prefix6(public_key_hex: &str) -> Result<[u8; 6]> {
    hex::decode(public_key_hex)
        .ok()
        .and_then(|bytes| bytes.get(..6).and_then(|s| <[u8; 6]>::try_from(s).ok()))
        .ok_or_else(|| GatewayError::BadRequest("contact key is malformed".to_string()))
}

/// Fetch a telemetry block from a repeater.
pub async fn telemetry(gw: &Gateway, params: Value) -> Result<Value> {
    let params: KeyParams = parse_params(params)?;
    let contact = contact_commands::resolve(gw, &params.key).await?;
    let prefix = prefix6(&contact.public_key)?;
    let radio_contact = contact_to_radio(&contact)
        .ok_or_else(|| GatewayError::BadRequest("contact key is malformed".to_string()))?;
    let prefix_hex = contact.public_key.chars().take(12).collect::<String>();

    let telemetry = manager::with_radio_operation(gw, "telemetry", REPEATER_OPTIONS, |link| {
        async move {
            if let Err(e) = link.add_contact(&radio_contact).await {
                tracing::warn!("Failed to push repeater contact before telemetry: {e}");
            }
            let mut last_err = GatewayError::Timeout(format!("telemetry from {prefix_hex}"));
            for attempt in 0..TELEMETRY_ATTEMPTS {
                match link.get_telemetry(prefix).await {
                    Ok(telemetry) => return Ok(telemetry),
                    Err(meshgate_radio::RadioError::Timeout) => {
                        tracing::debug!("Telemetry attempt {} timed out", attempt + 1);
                        last_err = GatewayError::Timeout(format!("telemetry from {prefix_hex}"));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(last_err)
        }
    })
    .await?;

    Ok(serde_json::json!({
        "pubkey_prefix": contact.public_key.chars().take(12).collect::<String>(),
        "battery_volts": f64::from(telemetry.battery_mv) / 1000.0,
        "tx_queue_len": telemetry.tx_queue_len,
        "noise_floor_dbm": telemetry.noise_floor_dbm,
        "last_rssi_dbm": telemetry.last_rssi_dbm,
        "last_snr_db": f64::from(telemetry.last_snr_q4) / 4.0,
        "packets_received": telemetry.packets_received,
        "packets_sent": telemetry.packets_sent,
        "airtime_seconds": telemetry.airtime_seconds,
        "rx_airtime_seconds": telemetry.rx_airtime_seconds,
        "uptime_seconds": telemetry.uptime_seconds,
        "sent_flood": telemetry.sent_flood,
        "sent_direct": telemetry.sent_direct,
        "recv_flood": telemetry.recv_flood,
        "recv_direct": telemetry.recv_direct,
        "flood_dups": telemetry.flood_dups,
        "direct_dups": telemetry.direct_dups,
        "full_events": telemetry.full_events,
    }))
}

/// Trace the stored path to a contact and report per-hop SNR.
pub async fn trace(gw: &Gateway, params: Value) -> Result<Value> {
    let params: KeyParams = parse_params(params)?;
    let contact = contact_commands::resolve(gw, &params.key).await?;
    let path = contact
        .last_path
        .as_deref()
        .and_then(|p| hex::decode(p).ok())
        .unwrap_or_default();

    let tag: u32 = rand::random();
    let waiter = register_trace_waiter(gw, tag);

    let reply = manager::with_radio_operation(gw, "trace", REPEATER_OPTIONS, |link| {
        let path = path.clone();
        async move {
            link.send_trace(tag, &path).await?;
            match tokio::time::timeout(TRACE_TIMEOUT, waiter).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) | Err(_) => Err(GatewayError::Timeout("trace bounce-back".to_string())),
            }
        }
    })
    .await?;

    let remote_snr = reply.snrs_q4.first().map(|&s| f64::from(s) / 4.0);
    let local_snr = reply.snrs_q4.last().map(|&s| f64::from(s) / 4.0);
    Ok(serde_json::json!({
        "remote_snr": remote_snr,
        "local_snr": local_snr,
        "path_len": reply.path.len(),
    }))
}

/// Run one CLI command against a repeater and wait for its reply.
pub async fn command(gw: &Gateway, params: Value) -> Result<Value> {
    let params: CommandParams = parse_params(params)?;
    if params.command.is_empty() {
        return Err(GatewayError::BadRequest("command must not be empty".to_string()));
    }

    let contact = contact_commands::resolve(gw, &params.key).await?;
    let prefix = prefix6(&contact.public_key)?;
    let prefix_hex: String = contact.public_key.chars().take(12).collect();
    let radio_contact = contact_to_radio(&contact)
        .ok_or_else(|| GatewayError::BadRequest("contact key is malformed".to_string()))?;

    let command_text = params.command.clone();
    let gw_inner = gw.clone();
    let waiter_prefix = prefix_hex.clone();
    let reply = manager::with_radio_operation(gw, "repeater-cli", REPEATER_OPTIONS, |link| {
        async move {
            if let Err(e) = link.add_contact(&radio_contact).await {
                tracing::warn!("Failed to push repeater contact before CLI: {e}");
            }

            for attempt in 0..CLI_ATTEMPTS {
                let mut waiter = register_cli_waiter(&gw_inner, &waiter_prefix);
                link.send_text_message(prefix, &command_text, now_secs() as u32, 1)
                    .await?;

                // Replies come through the radio's message queue; with
                // auto-fetch suspended we pump it ourselves.
                let deadline = Instant::now() + CLI_REPLY_TIMEOUT;
                while Instant::now() < deadline {
                    if let Ok(reply) = waiter.try_recv() {
                        return Ok(reply);
                    }
                    match link.sync_next_message().await {
                        Ok(Some(message)) => {
                            if let Err(e) =
                                handlers::handle_radio_message(&gw_inner, message).await
                            {
                                tracing::debug!("Error routing CLI-era message: {e}");
                            }
                        }
                        Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
                        Err(_) => tokio::time::sleep(Duration::from_millis(500)).await,
                    }
                }
                tracing::debug!("CLI attempt {} timed out", attempt + 1);
            }
            Err(GatewayError::Timeout(format!("CLI reply from {waiter_prefix}")))
        }
    })
    .await?;

    Ok(serde_json::json!({
        "command": params.command,
        "response": reply.text,
        "sender_timestamp": reply.sender_timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_gateway;
    use meshgate_db::queries::contacts;

    async fn seed_repeater(gw: &Gateway) -> String {
        let key = format!("cc11{}", "0".repeat(60));
        let upsert = contacts::ContactUpsert {
            public_key: key.clone(),
            name: Some("Hilltop".to_string()),
            contact_type: 2,
            last_path: Some("aabb".to_string()),
            last_path_len: 2,
            last_seen: 1,
            ..Default::default()
        };
        gw.with_db(move |conn| contacts::upsert(conn, &upsert))
            .await
            .expect("contact");
        key
    }

    #[tokio::test]
    async fn test_busy_lock_fails_fast() {
        let gw = test_gateway();
        let key = seed_repeater(&gw).await;
        let _held = manager::acquire_operation(&gw, "outer", true)
            .await
            .expect("acquire");

        let result = telemetry(&gw, serde_json::json!({ "key": key })).await;
        assert!(matches!(result, Err(GatewayError::Busy(_))));
    }

    #[tokio::test]
    async fn test_unknown_repeater_not_found() {
        let gw = test_gateway();
        let result = telemetry(&gw, serde_json::json!({ "key": "ff00" })).await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_command_requires_text() {
        let gw = test_gateway();
        let key = seed_repeater(&gw).await;
        let result = command(&gw, serde_json::json!({ "key": key, "command": "" })).await;
        assert!(matches!(result, Err(GatewayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_repeater_ops_without_radio_unavailable() {
        let gw = test_gateway();
        let key = seed_repeater(&gw).await;
        let result = telemetry(&gw, serde_json::json!({ "key": key })).await;
        assert!(matches!(result, Err(GatewayError::RadioUnavailable)));
        // Lock released and auto-fetch state intact afterwards.
        assert!(manager::acquire_operation(&gw, "after", false).await.is_ok());
    }
}
