//! RPC command handlers, one module per area.

pub mod channels;
pub mod contacts;
pub mod health;
pub mod messages;
pub mod packets;
pub mod radio;
pub mod read_state;
pub mod repeater;
pub mod settings;

use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::state::Gateway;

/// Deserialize request params into a handler's input shape.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| GatewayError::BadRequest(format!("bad params: {e}")))
}

/// Route a method call to its handler. `events.subscribe` is handled by
/// the RPC connection loop itself, not here.
pub async fn dispatch(gw: &Gateway, method: &str, params: Value) -> Result<Value> {
    match method {
        "health.status" => health::status(gw, params).await,

        "contacts.list" => contacts::list(gw, params).await,
        "contacts.get" => contacts::get(gw, params).await,
        "contacts.create" => contacts::create(gw, params).await,
        "contacts.delete" => contacts::delete(gw, params).await,

        "channels.list" => channels::list(gw, params).await,
        "channels.create" => channels::create(gw, params).await,
        "channels.delete" => channels::delete(gw, params).await,

        "messages.list" => messages::list(gw, params).await,
        "messages.bulk" => messages::bulk(gw, params).await,
        "messages.unread" => messages::unread(gw, params).await,
        "messages.send_direct" => messages::send_direct(gw, params).await,
        "messages.send_channel" => messages::send_channel(gw, params).await,
        "messages.resend_channel" => messages::resend_channel(gw, params).await,

        "packets.undecrypted_count" => packets::undecrypted_count(gw, params).await,
        "packets.decrypt_historical" => packets::decrypt_historical(gw, params).await,
        "packets.maintenance" => packets::maintenance(gw, params).await,

        "radio.config" => radio::config(gw, params).await,
        "radio.update_config" => radio::update_config(gw, params).await,
        "radio.import_private_key" => radio::import_private_key(gw, params).await,
        "radio.advertise" => radio::advertise(gw, params).await,
        "radio.reboot" => radio::reboot(gw, params).await,
        "radio.reconnect" => radio::reconnect(gw, params).await,

        "repeater.telemetry" => repeater::telemetry(gw, params).await,
        "repeater.trace" => repeater::trace(gw, params).await,
        "repeater.command" => repeater::command(gw, params).await,

        "settings.get" => settings::get(gw, params).await,
        "settings.update" => settings::update(gw, params).await,
        "settings.add_favorite" => settings::add_favorite(gw, params).await,
        "settings.remove_favorite" => settings::remove_favorite(gw, params).await,
        "settings.migrate_preferences" => settings::migrate_preferences(gw, params).await,

        "read_state.mark_read" => read_state::mark_read(gw, params).await,
        "read_state.mark_all_read" => read_state::mark_all_read(gw, params).await,

        other => Err(GatewayError::NotFound(format!("method {other}"))),
    }
}
