//! Server-side read-state tracking.

use serde::Deserialize;
use serde_json::Value;

use meshgate_db::now_secs;
use meshgate_db::queries::{channels, contacts};

use super::parse_params;
use crate::error::{GatewayError, Result};
use crate::state::Gateway;

#[derive(Deserialize)]
struct MarkReadParams {
    /// "contact" or "channel".
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Deserialize, Default)]
struct MarkAllParams {
    #[serde(default)]
    timestamp: Option<i64>,
}

pub async fn mark_read(gw: &Gateway, params: Value) -> Result<Value> {
    let params: MarkReadParams = parse_params(params)?;
    let ts = params.timestamp.unwrap_or_else(now_secs);

    let updated = match params.kind.as_str() {
        "contact" => {
            let id = params.id.clone();
            gw.with_db(move |conn| contacts::update_last_read_at(conn, &id, ts))
                .await?
        }
        "channel" => {
            let id = params.id.clone();
            gw.with_db(move |conn| channels::update_last_read_at(conn, &id, ts))
                .await?
        }
        other => {
            return Err(GatewayError::BadRequest(format!(
                "type must be 'contact' or 'channel', got '{other}'"
            )))
        }
    };

    if !updated {
        return Err(GatewayError::NotFound(format!("{} {}", params.kind, params.id)));
    }
    Ok(serde_json::json!({ "status": "ok", "last_read_at": ts }))
}

pub async fn mark_all_read(gw: &Gateway, params: Value) -> Result<Value> {
    let params: MarkAllParams = if params.is_null() {
        MarkAllParams::default()
    } else {
        parse_params(params)?
    };
    let ts = params.timestamp.unwrap_or_else(now_secs);

    gw.with_db(move |conn| {
        contacts::mark_all_read(conn, ts)?;
        channels::mark_all_read(conn, ts)
    })
    .await?;
    Ok(serde_json::json!({ "status": "ok", "last_read_at": ts }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_gateway;

    #[tokio::test]
    async fn test_mark_channel_read() {
        let gw = test_gateway();
        gw.with_db(|conn| channels::upsert(conn, "AA11", "Chat", false, false))
            .await
            .expect("channel");

        let result = mark_read(
            &gw,
            serde_json::json!({ "type": "channel", "id": "aa11", "timestamp": 5000 }),
        )
        .await
        .expect("mark");
        assert_eq!(result["last_read_at"], 5000);

        let channel = gw
            .with_db(|conn| channels::get_by_key(conn, "AA11"))
            .await
            .expect("db")
            .expect("row");
        assert_eq!(channel.last_read_at, Some(5000));
    }

    #[tokio::test]
    async fn test_mark_read_unknown_conversation() {
        let gw = test_gateway();
        let result = mark_read(
            &gw,
            serde_json::json!({ "type": "channel", "id": "FF00", "timestamp": 1 }),
        )
        .await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_all_read_touches_both_tables() {
        let gw = test_gateway();
        gw.with_db(|conn| channels::upsert(conn, "AA11", "Chat", false, false))
            .await
            .expect("channel");
        let key = "ab".repeat(32);
        gw.with_db(move |conn| {
            contacts::upsert(
                conn,
                &contacts::ContactUpsert {
                    public_key: key,
                    contact_type: 1,
                    last_seen: 1,
                    last_path_len: -1,
                    ..Default::default()
                },
            )
        })
        .await
        .expect("contact");

        mark_all_read(&gw, serde_json::json!({ "timestamp": 7000 }))
            .await
            .expect("mark all");

        let channel = gw
            .with_db(|conn| channels::get_by_key(conn, "AA11"))
            .await
            .expect("db")
            .expect("row");
        assert_eq!(channel.last_read_at, Some(7000));

        let key = "ab".repeat(32);
        let contact = gw
            .with_db(move |conn| contacts::get_by_key(conn, &key))
            .await
            .expect("db")
            .expect("row");
        assert_eq!(contact.last_read_at, Some(7000));
    }
}
