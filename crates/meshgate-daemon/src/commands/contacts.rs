//! Contact CRUD.

use serde::Deserialize;
use serde_json::Value;

use meshgate_db::now_secs;
use meshgate_db::queries::contacts::{self, ContactUpsert, PrefixMatch};

use super::parse_params;
use crate::error::{GatewayError, Result};
use crate::retry;
use crate::state::Gateway;

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Deserialize)]
struct KeyParams {
    key: String,
}

#[derive(Deserialize)]
struct CreateParams {
    public_key: String,
    #[serde(default)]
    name: Option<String>,
    /// Attempt to decrypt stored DM packets for this contact using the
    /// exported radio key.
    #[serde(default)]
    try_historical: bool,
}

pub async fn list(gw: &Gateway, params: Value) -> Result<Value> {
    let params: ListParams = if params.is_null() {
        ListParams {
            limit: default_limit(),
            offset: 0,
        }
    } else {
        parse_params(params)?
    };
    let rows = gw
        .with_db(move |conn| contacts::get_all(conn, params.limit.clamp(1, 1000), params.offset.max(0)))
        .await?;
    Ok(serde_json::to_value(rows).unwrap_or_default())
}

/// Resolve a full key or unambiguous prefix to a contact, mapping the
/// lookup outcomes onto the error surface.
pub async fn resolve(gw: &Gateway, key_or_prefix: &str) -> Result<meshgate_db::models::Contact> {
    let lookup = key_or_prefix.to_string();
    let matched = gw
        .with_db(move |conn| contacts::get_by_key_or_prefix(conn, &lookup))
        .await?;
    match matched {
        PrefixMatch::One(contact) => Ok(contact),
        PrefixMatch::None => Err(GatewayError::NotFound(format!(
            "contact {key_or_prefix}"
        ))),
        PrefixMatch::Ambiguous => Err(GatewayError::AmbiguousPrefix(key_or_prefix.to_string())),
    }
}

pub async fn get(gw: &Gateway, params: Value) -> Result<Value> {
    let params: KeyParams = parse_params(params)?;
    let contact = resolve(gw, &params.key).await?;
    Ok(serde_json::to_value(contact).unwrap_or_default())
}

pub async fn create(gw: &Gateway, params: Value) -> Result<Value> {
    let params: CreateParams = parse_params(params)?;
    if params.public_key.len() != 64 || hex::decode(&params.public_key).is_err() {
        return Err(GatewayError::BadRequest(
            "public_key must be 64 hex chars".to_string(),
        ));
    }

    let upsert = ContactUpsert {
        public_key: params.public_key.clone(),
        name: params.name.clone(),
        contact_type: 1,
        last_path_len: -1,
        last_seen: now_secs(),
        ..Default::default()
    };
    gw.with_db(move |conn| contacts::upsert(conn, &upsert)).await?;

    let lookup = params.public_key.to_lowercase();
    let stored = gw
        .with_db(move |conn| contacts::get_by_key(conn, &lookup))
        .await?
        .ok_or_else(|| GatewayError::NotFound("contact after create".to_string()))?;

    gw.bus
        .broadcast("contact", serde_json::to_value(&stored).unwrap_or_default())
        .await;

    if params.try_historical {
        if let Some(private) = gw.keystore.private_key() {
            if let Ok(peer) = hex::decode(&stored.public_key) {
                let gw_clone = gw.clone();
                let peer_hex = stored.public_key.clone();
                let display = stored.name.clone();
                tokio::spawn(async move {
                    retry::run_historical_dm_decryption(&gw_clone, &private, &peer, &peer_hex, display)
                        .await;
                });
            }
        } else {
            tracing::info!("Historical decrypt skipped: no private key in keystore");
        }
    }

    Ok(serde_json::to_value(stored).unwrap_or_default())
}

pub async fn delete(gw: &Gateway, params: Value) -> Result<Value> {
    let params: KeyParams = parse_params(params)?;
    let contact = resolve(gw, &params.key).await?;
    let key = contact.public_key.clone();
    gw.with_db(move |conn| contacts::delete(conn, &key)).await?;
    Ok(serde_json::json!({ "status": "ok" }))
}
