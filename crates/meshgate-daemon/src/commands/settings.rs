//! Application settings.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use meshgate_db::models::{BotConfig, Favorite};
use meshgate_db::queries::settings;

use super::parse_params;
use crate::error::{GatewayError, Result};
use crate::state::Gateway;

#[derive(Deserialize)]
struct UpdateParams {
    #[serde(default)]
    max_radio_contacts: Option<i64>,
    #[serde(default)]
    favorites: Option<Vec<Favorite>>,
    #[serde(default)]
    auto_decrypt_dm_on_advert: Option<bool>,
    #[serde(default)]
    sidebar_sort_order: Option<String>,
    #[serde(default)]
    last_message_times: Option<HashMap<String, i64>>,
    #[serde(default)]
    advert_interval: Option<i64>,
    #[serde(default)]
    bots: Option<Vec<BotConfig>>,
}

#[derive(Deserialize)]
struct FavoriteParams {
    #[serde(rename = "type")]
    fav_type: String,
    id: String,
}

#[derive(Deserialize)]
struct MigrateParams {
    #[serde(default)]
    favorites: Vec<Favorite>,
    #[serde(default = "default_sort")]
    sort_order: String,
    #[serde(default)]
    last_message_times: HashMap<String, i64>,
}

fn default_sort() -> String {
    "recent".to_string()
}

pub async fn get(gw: &Gateway, _params: Value) -> Result<Value> {
    let current = gw.with_db(settings::get).await?;
    Ok(serde_json::to_value(current).unwrap_or_default())
}

pub async fn update(gw: &Gateway, params: Value) -> Result<Value> {
    let params: UpdateParams = parse_params(params)?;

    if let Some(order) = &params.sidebar_sort_order {
        if !matches!(order.as_str(), "recent" | "alpha") {
            return Err(GatewayError::BadRequest(
                "sidebar_sort_order must be 'recent' or 'alpha'".to_string(),
            ));
        }
    }
    if let Some(interval) = params.advert_interval {
        if interval < 0 {
            return Err(GatewayError::BadRequest(
                "advert_interval must not be negative".to_string(),
            ));
        }
    }
    if let Some(max) = params.max_radio_contacts {
        if max < 1 {
            return Err(GatewayError::BadRequest(
                "max_radio_contacts must be at least 1".to_string(),
            ));
        }
    }

    let change = settings::SettingsUpdate {
        max_radio_contacts: params.max_radio_contacts,
        favorites: params.favorites,
        auto_decrypt_dm_on_advert: params.auto_decrypt_dm_on_advert,
        sidebar_sort_order: params.sidebar_sort_order,
        last_message_times: params.last_message_times,
        advert_interval: params.advert_interval,
        bots: params.bots,
        ..Default::default()
    };
    let updated = gw.with_db(move |conn| settings::update(conn, &change)).await?;
    Ok(serde_json::to_value(updated).unwrap_or_default())
}

fn validate_favorite(params: &FavoriteParams) -> Result<()> {
    if !matches!(params.fav_type.as_str(), "channel" | "contact") {
        return Err(GatewayError::BadRequest(
            "favorite type must be 'channel' or 'contact'".to_string(),
        ));
    }
    if params.id.is_empty() {
        return Err(GatewayError::BadRequest("favorite id must not be empty".to_string()));
    }
    Ok(())
}

pub async fn add_favorite(gw: &Gateway, params: Value) -> Result<Value> {
    let params: FavoriteParams = parse_params(params)?;
    validate_favorite(&params)?;
    let updated = gw
        .with_db(move |conn| settings::add_favorite(conn, &params.fav_type, &params.id))
        .await?;
    Ok(serde_json::to_value(updated).unwrap_or_default())
}

pub async fn remove_favorite(gw: &Gateway, params: Value) -> Result<Value> {
    let params: FavoriteParams = parse_params(params)?;
    validate_favorite(&params)?;
    let updated = gw
        .with_db(move |conn| settings::remove_favorite(conn, &params.fav_type, &params.id))
        .await?;
    Ok(serde_json::to_value(updated).unwrap_or_default())
}

/// One-shot import of client-side preferences.
pub async fn migrate_preferences(gw: &Gateway, params: Value) -> Result<Value> {
    let params: MigrateParams = parse_params(params)?;
    let (updated, migrated) = gw
        .with_db(move |conn| {
            settings::migrate_preferences(
                conn,
                params.favorites,
                &params.sort_order,
                params.last_message_times,
            )
        })
        .await?;
    let mut payload = serde_json::to_value(updated).unwrap_or_default();
    payload["migrated"] = Value::Bool(migrated);
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_gateway;

    #[tokio::test]
    async fn test_get_defaults() {
        let gw = test_gateway();
        let current = get(&gw, Value::Null).await.expect("get");
        assert_eq!(current["max_radio_contacts"], 200);
        assert_eq!(current["sidebar_sort_order"], "recent");
    }

    #[tokio::test]
    async fn test_update_and_validation() {
        let gw = test_gateway();
        let updated = update(
            &gw,
            serde_json::json!({ "advert_interval": 1800, "max_radio_contacts": 80 }),
        )
        .await
        .expect("update");
        assert_eq!(updated["advert_interval"], 1800);
        assert_eq!(updated["max_radio_contacts"], 80);

        assert!(matches!(
            update(&gw, serde_json::json!({ "sidebar_sort_order": "zigzag" })).await,
            Err(GatewayError::BadRequest(_))
        ));
        assert!(matches!(
            update(&gw, serde_json::json!({ "advert_interval": -5 })).await,
            Err(GatewayError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_favorites_flow() {
        let gw = test_gateway();
        let updated = add_favorite(
            &gw,
            serde_json::json!({ "type": "channel", "id": "AA11" }),
        )
        .await
        .expect("add");
        assert_eq!(updated["favorites"][0]["id"], "AA11");

        let updated = remove_favorite(
            &gw,
            serde_json::json!({ "type": "channel", "id": "AA11" }),
        )
        .await
        .expect("remove");
        assert_eq!(updated["favorites"].as_array().expect("array").len(), 0);

        assert!(matches!(
            add_favorite(&gw, serde_json::json!({ "type": "group", "id": "x" })).await,
            Err(GatewayError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_migrate_once() {
        let gw = test_gateway();
        let first = migrate_preferences(
            &gw,
            serde_json::json!({
                "favorites": [{ "type": "contact", "id": "ab12" }],
                "sort_order": "alpha",
                "last_message_times": { "contact-ab12": 99 },
            }),
        )
        .await
        .expect("migrate");
        assert_eq!(first["migrated"], true);
        assert_eq!(first["sidebar_sort_order"], "alpha");

        let second = migrate_preferences(&gw, serde_json::json!({})).await.expect("second");
        assert_eq!(second["migrated"], false);
        assert_eq!(second["sidebar_sort_order"], "alpha");
    }
}
