//! Health snapshot.

use serde_json::Value;

use meshgate_db::queries::raw_packets;

use crate::error::Result;
use crate::state::Gateway;

/// Build the health payload shared by the RPC endpoint and health
/// broadcasts.
pub async fn build_health_data(gw: &Gateway, radio_connected: bool) -> Value {
    let database_size_mb = std::fs::metadata(&gw.config.database_path)
        .map(|meta| (meta.len() as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0)
        .unwrap_or(0.0);

    let oldest_undecrypted = gw
        .with_db(raw_packets::oldest_undecrypted)
        .await
        .unwrap_or(None);

    serde_json::json!({
        "status": if radio_connected { "ok" } else { "degraded" },
        "radio_connected": radio_connected,
        "connection_info": gw.radio.connection_info(),
        "database_size_mb": database_size_mb,
        "oldest_undecrypted_timestamp": oldest_undecrypted,
    })
}

pub async fn status(gw: &Gateway, _params: Value) -> Result<Value> {
    Ok(build_health_data(gw, gw.radio.is_connected()).await)
}
