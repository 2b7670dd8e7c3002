//! Channel CRUD.

use serde::Deserialize;
use serde_json::Value;

use meshgate_db::models::PUBLIC_CHANNEL_KEY;
use meshgate_db::queries::channels;
use meshgate_proto::derive_hashtag_key;

use super::parse_params;
use crate::error::{GatewayError, Result};
use crate::state::Gateway;

#[derive(Deserialize)]
struct CreateParams {
    /// 32-hex-char key; omitted for hashtag channels, whose key derives
    /// from the name.
    #[serde(default)]
    key: Option<String>,
    name: String,
}

#[derive(Deserialize)]
struct KeyParams {
    key: String,
}

pub async fn list(gw: &Gateway, _params: Value) -> Result<Value> {
    let rows = gw.with_db(channels::get_all).await?;
    Ok(serde_json::to_value(rows).unwrap_or_default())
}

pub async fn create(gw: &Gateway, params: Value) -> Result<Value> {
    let params: CreateParams = parse_params(params)?;
    let is_hashtag = params.name.starts_with('#');

    let key = match params.key {
        Some(key) => {
            let bytes =
                hex::decode(&key).map_err(|_| GatewayError::BadRequest("invalid hex key".into()))?;
            if bytes.len() != 16 {
                return Err(GatewayError::BadRequest(
                    "channel key must be 16 bytes (32 hex chars)".to_string(),
                ));
            }
            key.to_uppercase()
        }
        None if is_hashtag => hex::encode(derive_hashtag_key(&params.name)).to_uppercase(),
        None => {
            return Err(GatewayError::BadRequest(
                "key required for non-hashtag channels".to_string(),
            ))
        }
    };

    let upsert_key = key.clone();
    let name = params.name.clone();
    gw.with_db(move |conn| channels::upsert(conn, &upsert_key, &name, is_hashtag, false))
        .await?;

    let lookup = key.clone();
    let stored = gw
        .with_db(move |conn| channels::get_by_key(conn, &lookup))
        .await?
        .ok_or_else(|| GatewayError::NotFound("channel after create".to_string()))?;
    Ok(serde_json::to_value(stored).unwrap_or_default())
}

pub async fn delete(gw: &Gateway, params: Value) -> Result<Value> {
    let params: KeyParams = parse_params(params)?;
    let key = params.key.to_uppercase();
    if key == PUBLIC_CHANNEL_KEY {
        return Err(GatewayError::BadRequest(
            "the Public channel cannot be deleted".to_string(),
        ));
    }

    let exists = gw
        .with_db({
            let key = key.clone();
            move |conn| channels::get_by_key(conn, &key)
        })
        .await?;
    if exists.is_none() {
        return Err(GatewayError::NotFound(format!("channel {key}")));
    }

    gw.with_db(move |conn| channels::delete(conn, &key)).await?;
    Ok(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_gateway;

    #[tokio::test]
    async fn test_hashtag_key_derivation() {
        let gw = test_gateway();
        let created = create(&gw, serde_json::json!({ "name": "#six77" }))
            .await
            .expect("create");
        assert_eq!(created["key"], "7ABA109EDCF304A84433CB71D0F3AB73");
        assert_eq!(created["is_hashtag"], true);
    }

    #[tokio::test]
    async fn test_explicit_key_normalized_upper() {
        let gw = test_gateway();
        let created = create(
            &gw,
            serde_json::json!({ "name": "Ops", "key": "aabbccddeeff00112233445566778899" }),
        )
        .await
        .expect("create");
        assert_eq!(created["key"], "AABBCCDDEEFF00112233445566778899");
    }

    #[tokio::test]
    async fn test_non_hashtag_without_key_rejected() {
        let gw = test_gateway();
        let result = create(&gw, serde_json::json!({ "name": "Ops" })).await;
        assert!(matches!(result, Err(GatewayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_public_channel_protected() {
        let gw = test_gateway();
        gw.with_db(channels::ensure_public_channel).await.expect("ensure");

        let result = delete(&gw, serde_json::json!({ "key": PUBLIC_CHANNEL_KEY })).await;
        assert!(matches!(result, Err(GatewayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_channel() {
        let gw = test_gateway();
        let result = delete(
            &gw,
            serde_json::json!({ "key": "00000000000000000000000000000001" }),
        )
        .await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }
}
