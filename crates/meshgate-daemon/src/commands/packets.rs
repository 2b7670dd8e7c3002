//! Raw-packet queries, historical decrypt jobs, and maintenance.

use serde::Deserialize;
use serde_json::Value;

use meshgate_db::now_secs;
use meshgate_db::queries::{channels, raw_packets};
use meshgate_proto::derive_hashtag_key;

use super::parse_params;
use crate::error::{GatewayError, Result};
use crate::retry;
use crate::state::Gateway;

#[derive(Deserialize)]
struct DecryptParams {
    /// "channel" or "contact".
    key_type: String,
    #[serde(default)]
    channel_key: Option<String>,
    #[serde(default)]
    channel_name: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    contact_public_key: Option<String>,
}

#[derive(Deserialize)]
struct MaintenanceParams {
    prune_undecrypted_days: i64,
}

pub async fn undecrypted_count(gw: &Gateway, _params: Value) -> Result<Value> {
    let count = gw.with_db(raw_packets::undecrypted_count).await?;
    Ok(serde_json::json!({ "count": count }))
}

fn job_accepted(total: i64, message: String) -> Value {
    serde_json::json!({
        "started": true,
        "total_packets": total,
        "message": message,
    })
}

/// Submit a historical decrypt sweep. The job runs in the background;
/// the reply reports how many packets it will look at.
pub async fn decrypt_historical(gw: &Gateway, params: Value) -> Result<Value> {
    let params: DecryptParams = parse_params(params)?;

    match params.key_type.as_str() {
        "channel" => {
            let (key, key_hex) = match (&params.channel_key, &params.channel_name) {
                (Some(key_hex), _) => {
                    let bytes = hex::decode(key_hex).map_err(|_| {
                        GatewayError::BadRequest("invalid hex string for channel key".to_string())
                    })?;
                    let key: [u8; 16] = bytes.try_into().map_err(|_| {
                        GatewayError::BadRequest(
                            "channel key must be 16 bytes (32 hex chars)".to_string(),
                        )
                    })?;
                    (key, key_hex.to_uppercase())
                }
                (None, Some(name)) => {
                    let key = derive_hashtag_key(name);
                    (key, hex::encode(key).to_uppercase())
                }
                (None, None) => {
                    return Err(GatewayError::BadRequest(
                        "must provide channel_key or channel_name".to_string(),
                    ))
                }
            };

            let total = gw.with_db(raw_packets::undecrypted_count).await?;
            if total == 0 {
                return Ok(serde_json::json!({
                    "started": false,
                    "total_packets": 0,
                    "message": "No undecrypted packets to process",
                }));
            }

            let display = {
                let lookup = key_hex.clone();
                gw.with_db(move |conn| channels::get_by_key(conn, &lookup))
                    .await?
                    .map(|c| c.name)
                    .or(params.channel_name.clone())
            };

            let gw_clone = gw.clone();
            let key_hex_job = key_hex.clone();
            tokio::spawn(async move {
                retry::run_historical_channel_decryption(&gw_clone, key, &key_hex_job, display)
                    .await;
            });

            Ok(job_accepted(
                total,
                format!("Started channel decryption of {total} packets in background"),
            ))
        }

        "contact" => {
            let private_hex = params.private_key.as_deref().ok_or_else(|| {
                GatewayError::BadRequest("must provide private_key for contact decryption".to_string())
            })?;
            let peer_hex = params.contact_public_key.as_deref().ok_or_else(|| {
                GatewayError::BadRequest(
                    "must provide contact_public_key for contact decryption".to_string(),
                )
            })?;

            let private = hex::decode(private_hex).map_err(|_| {
                GatewayError::BadRequest("invalid hex string for private key".to_string())
            })?;
            if private.len() != 64 {
                return Err(GatewayError::BadRequest(
                    "private key must be 64 bytes (128 hex chars)".to_string(),
                ));
            }
            let peer = hex::decode(peer_hex).map_err(|_| {
                GatewayError::BadRequest("invalid hex string for contact public key".to_string())
            })?;
            if peer.len() != 32 {
                return Err(GatewayError::BadRequest(
                    "contact public key must be 32 bytes (64 hex chars)".to_string(),
                ));
            }

            let targets = gw.with_db(raw_packets::undecrypted_text_messages).await?;
            let total = targets.len() as i64;
            if total == 0 {
                return Ok(serde_json::json!({
                    "started": false,
                    "total_packets": 0,
                    "message": "No undecrypted TEXT_MESSAGE packets to process",
                }));
            }

            let peer_key_lower = peer_hex.to_lowercase();
            let display = {
                let lookup = peer_key_lower.clone();
                gw.with_db(move |conn| {
                    meshgate_db::queries::contacts::get_by_key(conn, &lookup)
                })
                .await?
                .and_then(|c| c.name)
            };

            let gw_clone = gw.clone();
            tokio::spawn(async move {
                retry::run_historical_dm_decryption(
                    &gw_clone,
                    &private,
                    &peer,
                    &peer_key_lower,
                    display,
                )
                .await;
            });

            Ok(job_accepted(
                total,
                format!("Started DM decryption of {total} TEXT_MESSAGE packets in background"),
            ))
        }

        other => Err(GatewayError::BadRequest(format!(
            "key_type must be 'channel' or 'contact', got '{other}'"
        ))),
    }
}

/// Prune aged undecrypted packets and reclaim disk space.
pub async fn maintenance(gw: &Gateway, params: Value) -> Result<Value> {
    let params: MaintenanceParams = parse_params(params)?;
    if params.prune_undecrypted_days < 1 {
        return Err(GatewayError::BadRequest(
            "prune_undecrypted_days must be at least 1".to_string(),
        ));
    }

    tracing::info!(
        "Running maintenance: pruning packets older than {} days",
        params.prune_undecrypted_days
    );
    let deleted = gw
        .with_db(move |conn| {
            raw_packets::prune_old_undecrypted(conn, params.prune_undecrypted_days, now_secs())
        })
        .await?;
    tracing::info!("Deleted {deleted} old undecrypted packets");

    gw.with_db(|conn| {
        conn.execute_batch("VACUUM;")
            .map_err(meshgate_db::DbError::Sqlite)
    })
    .await?;
    tracing::info!("Database vacuumed");

    Ok(serde_json::json!({ "packets_deleted": deleted, "vacuumed": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_gateway;

    #[tokio::test]
    async fn test_decrypt_requires_targets() {
        let gw = test_gateway();
        let result = decrypt_historical(
            &gw,
            serde_json::json!({ "key_type": "channel", "channel_name": "#x" }),
        )
        .await
        .expect("submit");
        assert_eq!(result["started"], false);
        assert_eq!(result["total_packets"], 0);
    }

    #[tokio::test]
    async fn test_decrypt_channel_job_reports_targets() {
        let gw = test_gateway();
        gw.with_db(|conn| raw_packets::upsert(conn, &[0x15, 0x00, 0x01, 0x02, 0x03], 100))
            .await
            .expect("store");

        let result = decrypt_historical(
            &gw,
            serde_json::json!({ "key_type": "channel", "channel_name": "#x" }),
        )
        .await
        .expect("submit");
        assert_eq!(result["started"], true);
        assert_eq!(result["total_packets"], 1);
    }

    #[tokio::test]
    async fn test_decrypt_contact_validates_key_lengths() {
        let gw = test_gateway();
        let result = decrypt_historical(
            &gw,
            serde_json::json!({
                "key_type": "contact",
                "private_key": "aabb",
                "contact_public_key": "cc".repeat(32),
            }),
        )
        .await;
        assert!(matches!(result, Err(GatewayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_unknown_key_type_rejected() {
        let gw = test_gateway();
        let result = decrypt_historical(&gw, serde_json::json!({ "key_type": "magic" })).await;
        assert!(matches!(result, Err(GatewayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_maintenance_prunes_and_vacuums() {
        let gw = test_gateway();
        gw.with_db(|conn| raw_packets::upsert(conn, &[0x15, 0x00, 0xAA], 1))
            .await
            .expect("store");

        let result = maintenance(&gw, serde_json::json!({ "prune_undecrypted_days": 1 }))
            .await
            .expect("maintenance");
        assert_eq!(result["packets_deleted"], 1);
        assert_eq!(result["vacuumed"], true);
    }
}
