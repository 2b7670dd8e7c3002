//! Application settings (single-row table).

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};

use crate::models::{AppSettings, BotConfig, Favorite};
use crate::{DbError, Result};

/// Partial update: only `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub max_radio_contacts: Option<i64>,
    pub favorites: Option<Vec<Favorite>>,
    pub auto_decrypt_dm_on_advert: Option<bool>,
    pub sidebar_sort_order: Option<String>,
    pub last_message_times: Option<HashMap<String, i64>>,
    pub preferences_migrated: Option<bool>,
    pub advert_interval: Option<i64>,
    pub last_advert_time: Option<i64>,
    pub bots: Option<Vec<BotConfig>>,
}

fn parse_json_column<T: serde::de::DeserializeOwned + Default>(
    column: Option<String>,
    what: &str,
) -> T {
    match column {
        Some(json) if !json.is_empty() => match serde_json::from_str(&json) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to parse {what} JSON, using default: {e}");
                T::default()
            }
        },
        _ => T::default(),
    }
}

/// Get the current settings. The migration seeds the row, so a missing
/// row only happens on a hand-edited database; defaults cover it.
pub fn get(conn: &Connection) -> Result<AppSettings> {
    let row = conn
        .query_row(
            "SELECT max_radio_contacts, favorites, auto_decrypt_dm_on_advert,
                    sidebar_sort_order, last_message_times, preferences_migrated,
                    advert_interval, last_advert_time, bots
             FROM app_settings WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            },
        )
        .optional()
        .map_err(DbError::Sqlite)?;

    let Some((
        max_radio_contacts,
        favorites,
        auto_decrypt_dm_on_advert,
        sidebar_sort_order,
        last_message_times,
        preferences_migrated,
        advert_interval,
        last_advert_time,
        bots,
    )) = row
    else {
        return Ok(AppSettings::default());
    };

    let sidebar_sort_order = if matches!(sidebar_sort_order.as_str(), "recent" | "alpha") {
        sidebar_sort_order
    } else {
        "recent".to_string()
    };

    Ok(AppSettings {
        max_radio_contacts,
        favorites: parse_json_column(favorites, "favorites"),
        auto_decrypt_dm_on_advert,
        sidebar_sort_order,
        last_message_times: parse_json_column(last_message_times, "last_message_times"),
        preferences_migrated,
        advert_interval: advert_interval.unwrap_or(0),
        last_advert_time: last_advert_time.unwrap_or(0),
        bots: parse_json_column(bots, "bots"),
    })
}

/// Apply a partial update and return the resulting settings.
pub fn update(conn: &Connection, update: &SettingsUpdate) -> Result<AppSettings> {
    let mut sets: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    let mut push = |sets: &mut Vec<String>,
                    params: &mut Vec<Box<dyn rusqlite::ToSql>>,
                    column: &str,
                    value: Box<dyn rusqlite::ToSql>| {
        params.push(value);
        sets.push(format!("{column} = ?{}", params.len()));
    };

    if let Some(v) = update.max_radio_contacts {
        push(&mut sets, &mut params, "max_radio_contacts", Box::new(v));
    }
    if let Some(v) = &update.favorites {
        let json = serde_json::to_string(v).map_err(|e| DbError::Serialization(e.to_string()))?;
        push(&mut sets, &mut params, "favorites", Box::new(json));
    }
    if let Some(v) = update.auto_decrypt_dm_on_advert {
        push(&mut sets, &mut params, "auto_decrypt_dm_on_advert", Box::new(v));
    }
    if let Some(v) = &update.sidebar_sort_order {
        push(&mut sets, &mut params, "sidebar_sort_order", Box::new(v.clone()));
    }
    if let Some(v) = &update.last_message_times {
        let json = serde_json::to_string(v).map_err(|e| DbError::Serialization(e.to_string()))?;
        push(&mut sets, &mut params, "last_message_times", Box::new(json));
    }
    if let Some(v) = update.preferences_migrated {
        push(&mut sets, &mut params, "preferences_migrated", Box::new(v));
    }
    if let Some(v) = update.advert_interval {
        push(&mut sets, &mut params, "advert_interval", Box::new(v));
    }
    if let Some(v) = update.last_advert_time {
        push(&mut sets, &mut params, "last_advert_time", Box::new(v));
    }
    if let Some(v) = &update.bots {
        let json = serde_json::to_string(v).map_err(|e| DbError::Serialization(e.to_string()))?;
        push(&mut sets, &mut params, "bots", Box::new(json));
    }

    if !sets.is_empty() {
        let sql = format!("UPDATE app_settings SET {} WHERE id = 1", sets.join(", "));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        conn.execute(&sql, param_refs.as_slice())?;
    }

    get(conn)
}

/// Add a favorite, skipping duplicates.
pub fn add_favorite(conn: &Connection, fav_type: &str, fav_id: &str) -> Result<AppSettings> {
    let settings = get(conn)?;
    if settings
        .favorites
        .iter()
        .any(|f| f.fav_type == fav_type && f.id == fav_id)
    {
        return Ok(settings);
    }

    let mut favorites = settings.favorites;
    favorites.push(Favorite {
        fav_type: fav_type.to_string(),
        id: fav_id.to_string(),
    });
    update(
        conn,
        &SettingsUpdate {
            favorites: Some(favorites),
            ..Default::default()
        },
    )
}

pub fn remove_favorite(conn: &Connection, fav_type: &str, fav_id: &str) -> Result<AppSettings> {
    let settings = get(conn)?;
    let favorites: Vec<Favorite> = settings
        .favorites
        .into_iter()
        .filter(|f| !(f.fav_type == fav_type && f.id == fav_id))
        .collect();
    update(
        conn,
        &SettingsUpdate {
            favorites: Some(favorites),
            ..Default::default()
        },
    )
}

/// One-shot migration of client-side preferences. A second call returns
/// the stored settings untouched.
pub fn migrate_preferences(
    conn: &Connection,
    favorites: Vec<Favorite>,
    sort_order: &str,
    last_message_times: HashMap<String, i64>,
) -> Result<(AppSettings, bool)> {
    let settings = get(conn)?;
    if settings.preferences_migrated {
        return Ok((settings, false));
    }

    let favorites = favorites
        .into_iter()
        .filter(|f| matches!(f.fav_type.as_str(), "channel" | "contact") && !f.id.is_empty())
        .collect();
    let sort_order = if matches!(sort_order, "recent" | "alpha") {
        sort_order.to_string()
    } else {
        "recent".to_string()
    };

    let updated = update(
        conn,
        &SettingsUpdate {
            favorites: Some(favorites),
            sidebar_sort_order: Some(sort_order),
            last_message_times: Some(last_message_times),
            preferences_migrated: Some(true),
            ..Default::default()
        },
    )?;
    Ok((updated, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_defaults_after_migration() {
        let conn = test_db();
        let settings = get(&conn).expect("get");
        assert_eq!(settings.max_radio_contacts, 200);
        assert_eq!(settings.sidebar_sort_order, "recent");
        assert!(!settings.preferences_migrated);
        assert!(settings.favorites.is_empty());
    }

    #[test]
    fn test_partial_update() {
        let conn = test_db();
        let updated = update(
            &conn,
            &SettingsUpdate {
                advert_interval: Some(3600),
                max_radio_contacts: Some(50),
                ..Default::default()
            },
        )
        .expect("update");

        assert_eq!(updated.advert_interval, 3600);
        assert_eq!(updated.max_radio_contacts, 50);
        // Untouched fields keep their values.
        assert_eq!(updated.sidebar_sort_order, "recent");
    }

    #[test]
    fn test_favorites_roundtrip() {
        let conn = test_db();
        add_favorite(&conn, "channel", "AA11").expect("add");
        add_favorite(&conn, "contact", "bb22").expect("add");
        // Duplicate add is a no-op.
        let settings = add_favorite(&conn, "channel", "AA11").expect("add dup");
        assert_eq!(settings.favorites.len(), 2);

        let settings = remove_favorite(&conn, "channel", "AA11").expect("remove");
        assert_eq!(settings.favorites.len(), 1);
        assert_eq!(settings.favorites[0].fav_type, "contact");
    }

    #[test]
    fn test_invalid_sort_order_falls_back() {
        let conn = test_db();
        update(
            &conn,
            &SettingsUpdate {
                sidebar_sort_order: Some("bogus".to_string()),
                ..Default::default()
            },
        )
        .expect("update");
        assert_eq!(get(&conn).expect("get").sidebar_sort_order, "recent");
    }

    #[test]
    fn test_corrupt_favorites_json_tolerated() {
        let conn = test_db();
        conn.execute("UPDATE app_settings SET favorites = 'not-json' WHERE id = 1", [])
            .expect("corrupt");
        let settings = get(&conn).expect("get");
        assert!(settings.favorites.is_empty());
    }

    #[test]
    fn test_migrate_preferences_once() {
        let conn = test_db();
        let favorites = vec![
            Favorite {
                fav_type: "channel".to_string(),
                id: "AA11".to_string(),
            },
            Favorite {
                fav_type: "bogus".to_string(),
                id: "x".to_string(),
            },
        ];

        let (settings, migrated) =
            migrate_preferences(&conn, favorites, "alpha", HashMap::new()).expect("migrate");
        assert!(migrated);
        assert_eq!(settings.favorites.len(), 1);
        assert_eq!(settings.sidebar_sort_order, "alpha");

        let (again, migrated_again) =
            migrate_preferences(&conn, Vec::new(), "recent", HashMap::new()).expect("second");
        assert!(!migrated_again);
        // First migration's data survives.
        assert_eq!(again.favorites.len(), 1);
        assert_eq!(again.sidebar_sort_order, "alpha");
    }

    #[test]
    fn test_bots_roundtrip() {
        let conn = test_db();
        let bots = vec![BotConfig {
            id: "b1".to_string(),
            name: "Greeter".to_string(),
            enabled: true,
            code: "reply('hi')".to_string(),
        }];
        let settings = update(
            &conn,
            &SettingsUpdate {
                bots: Some(bots.clone()),
                ..Default::default()
            },
        )
        .expect("update");
        assert_eq!(settings.bots, bots);
    }
}
