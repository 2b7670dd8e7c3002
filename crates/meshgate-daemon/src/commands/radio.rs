//! Radio configuration and lifecycle commands.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::manager::{self, OperationOptions};
use crate::state::Gateway;
use crate::sync;

#[derive(Deserialize)]
struct RadioParams {
    /// MHz.
    freq: f64,
    /// kHz.
    bw: f64,
    sf: u8,
    cr: u8,
}

#[derive(Deserialize)]
struct UpdateParams {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    tx_power: Option<u8>,
    #[serde(default)]
    radio: Option<RadioParams>,
}

#[derive(Deserialize)]
struct ImportKeyParams {
    private_key: String,
}

fn config_payload(info: &meshgate_radio::SelfInfo) -> Value {
    serde_json::json!({
        "public_key": info.public_key_hex(),
        "name": info.name,
        "lat": f64::from(info.lat_e6) / 1e6,
        "lon": f64::from(info.lon_e6) / 1e6,
        "tx_power": info.tx_power,
        "max_tx_power": info.max_tx_power,
        "radio": {
            "freq": f64::from(info.freq_khz) / 1000.0,
            "bw": f64::from(info.bw_hz) / 1000.0,
            "sf": info.sf,
            "cr": info.cr,
        },
    })
}

pub async fn config(gw: &Gateway, _params: Value) -> Result<Value> {
    let link = gw.radio.link().ok_or(GatewayError::RadioUnavailable)?;
    let info = link.self_info().ok_or(GatewayError::RadioUnavailable)?;
    Ok(config_payload(&info))
}

/// Apply the provided fields, resync the clock, and re-read self-info so
/// the reply reflects what the radio actually stored.
pub async fn update_config(gw: &Gateway, params: Value) -> Result<Value> {
    let params: UpdateParams = parse(params)?;

    let info = manager::with_radio_operation(
        gw,
        "radio-config",
        OperationOptions {
            blocking: true,
            ..Default::default()
        },
        |link| async move {
            if let Some(name) = &params.name {
                tracing::info!("Setting radio name to {name}");
                link.set_name(name).await?;
            }
            if params.lat.is_some() || params.lon.is_some() {
                let current = link.self_info().ok_or(GatewayError::RadioUnavailable)?;
                let lat = params.lat.unwrap_or(f64::from(current.lat_e6) / 1e6);
                let lon = params.lon.unwrap_or(f64::from(current.lon_e6) / 1e6);
                tracing::info!("Setting radio coordinates to {lat}, {lon}");
                link.set_coords(lat, lon).await?;
            }
            if let Some(dbm) = params.tx_power {
                tracing::info!("Setting TX power to {dbm} dBm");
                link.set_tx_power(dbm).await?;
            }
            if let Some(radio) = &params.radio {
                tracing::info!(
                    "Setting radio params: freq={} MHz, bw={} kHz, sf={}, cr={}",
                    radio.freq,
                    radio.bw,
                    radio.sf,
                    radio.cr
                );
                link.set_radio_params(
                    (radio.freq * 1000.0) as u32,
                    (radio.bw * 1000.0) as u32,
                    radio.sf,
                    radio.cr,
                )
                .await?;
            }

            // Writes land in flash without refreshing the cached
            // identity; a fresh app-start round-trips the truth.
            let info = link.refresh_info().await?;
            Ok(info)
        },
    )
    .await?;

    sync::sync_radio_time(gw).await;
    Ok(config_payload(&info))
}

/// Write-only import of a 64-byte private key.
pub async fn import_private_key(gw: &Gateway, params: Value) -> Result<Value> {
    let params: ImportKeyParams = parse(params)?;
    let key = hex::decode(&params.private_key)
        .map_err(|_| GatewayError::BadRequest("invalid hex string for private key".to_string()))?;

    let link = gw.radio.link().ok_or(GatewayError::RadioUnavailable)?;
    tracing::info!("Importing private key");
    link.import_private_key(&key).await?;
    Ok(serde_json::json!({ "status": "ok" }))
}

/// Manual advertisement: always sends, updating the stored advert clock.
pub async fn advertise(gw: &Gateway, _params: Value) -> Result<Value> {
    if gw.radio.link().is_none() {
        return Err(GatewayError::RadioUnavailable);
    }
    tracing::info!("Sending flood advertisement");
    if !sync::send_advertisement(gw, true).await {
        return Err(GatewayError::RadioUnavailable);
    }
    Ok(serde_json::json!({ "status": "ok" }))
}

/// Reboot when connected, otherwise behave like a reconnect request.
pub async fn reboot(gw: &Gateway, params: Value) -> Result<Value> {
    if gw.radio.is_connected() {
        if let Some(link) = gw.radio.link() {
            tracing::info!("Rebooting radio");
            link.reboot().await?;
            return Ok(serde_json::json!({
                "status": "ok",
                "message": "Reboot command sent. Radio will reconnect automatically.",
            }));
        }
    }
    reconnect(gw, params).await
}

pub async fn reconnect(gw: &Gateway, _params: Value) -> Result<Value> {
    if gw.radio.is_connected() {
        return Ok(serde_json::json!({
            "status": "ok",
            "message": "Already connected",
            "connected": true,
        }));
    }
    if gw.radio.is_reconnecting() {
        return Ok(serde_json::json!({
            "status": "pending",
            "message": "Reconnection already in progress",
            "connected": false,
        }));
    }

    tracing::info!("Manual reconnect requested");
    if manager::reconnect_and_setup(gw).await? {
        Ok(serde_json::json!({
            "status": "ok",
            "message": "Reconnected successfully",
            "connected": true,
        }))
    } else {
        Err(GatewayError::RadioUnavailable)
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    super::parse_params(params)
}
