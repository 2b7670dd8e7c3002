//! JSON-RPC server over a Unix socket.
//!
//! Line-delimited JSON both ways. A connection is either a plain
//! request/response channel, or (after `events.subscribe`) a push
//! stream carrying `{type, data}` envelopes, starting with the
//! initial-state replay (health, contacts, channels) and then live
//! events.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};

use meshgate_db::queries::{channels, contacts};

use crate::commands;
use crate::error::GatewayError;
use crate::state::Gateway;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Clone)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Map a gateway error onto the stable wire codes.
    pub fn from_gateway(error: &GatewayError) -> Self {
        let (code, message) = match error {
            GatewayError::BadRequest(_) => (-32602, "INVALID_PARAMS"),
            GatewayError::RadioUnavailable => (-32003, "RADIO_UNAVAILABLE"),
            GatewayError::NotFound(_) => (-32004, "NOT_FOUND"),
            GatewayError::Busy(_) => (-32005, "BUSY"),
            GatewayError::Timeout(_) => (-32008, "TIMEOUT"),
            GatewayError::AmbiguousPrefix(_) => (-32009, "CONFLICT"),
            GatewayError::Db(_) | GatewayError::Radio(_) => (-32603, "INTERNAL_ERROR"),
        };
        Self {
            code,
            message: message.to_string(),
            data: Some(serde_json::json!({ "detail": error.to_string() })),
        }
    }
}

pub struct RpcServer {
    gw: Gateway,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(gw: Gateway, socket_path: PathBuf) -> Self {
        Self { gw, socket_path }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        // A stale socket from an unclean shutdown blocks the bind.
        let _ = std::fs::remove_file(&self.socket_path);
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("RPC server listening on {:?}", self.socket_path);

        loop {
            let (stream, _) = listener.accept().await?;
            let gw = self.gw.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(gw, stream).await {
                    tracing::debug!("RPC connection ended: {e}");
                }
            });
        }
    }
}

async fn write_json<T: Serialize>(write: &mut OwnedWriteHalf, value: &T) -> std::io::Result<()> {
    let mut line = serde_json::to_string(value).unwrap_or_default();
    line.push('\n');
    write.write_all(line.as_bytes()).await
}

async fn handle_connection(gw: Gateway, stream: UnixStream) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(_) => {
                write_json(
                    &mut write_half,
                    &RpcResponse::failure(serde_json::Value::Null, RpcError::parse_error()),
                )
                .await?;
                continue;
            }
        };
        if request.jsonrpc != "2.0" {
            write_json(
                &mut write_half,
                &RpcResponse::failure(request.id, RpcError::invalid_request()),
            )
            .await?;
            continue;
        }

        if request.method == "events.subscribe" {
            write_json(
                &mut write_half,
                &RpcResponse::success(request.id, serde_json::json!({ "subscribed": true })),
            )
            .await?;
            // The connection becomes a dedicated push stream.
            return stream_events(gw, write_half).await;
        }

        let response = match commands::dispatch(&gw, &request.method, request.params).await {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(e) => {
                tracing::debug!("RPC {} failed: {e}", request.method);
                RpcResponse::failure(request.id, RpcError::from_gateway(&e))
            }
        };
        write_json(&mut write_half, &response).await?;
    }
    Ok(())
}

/// Initial-state replay, then live events until the client goes away.
async fn stream_events(gw: Gateway, mut write: OwnedWriteHalf) -> std::io::Result<()> {
    let (subscriber_id, mut events) = gw.bus.subscribe().await;

    let replay = async {
        let health = commands::health::build_health_data(&gw, gw.radio.is_connected()).await;
        write_event(&mut write, "health", health).await?;

        if let Ok(all_contacts) = gw.with_db(|conn| contacts::get_all(conn, 500, 0)).await {
            write_event(
                &mut write,
                "contacts",
                serde_json::to_value(all_contacts).unwrap_or_default(),
            )
            .await?;
        }
        if let Ok(all_channels) = gw.with_db(channels::get_all).await {
            write_event(
                &mut write,
                "channels",
                serde_json::to_value(all_channels).unwrap_or_default(),
            )
            .await?;
        }
        Ok::<(), std::io::Error>(())
    }
    .await;

    if replay.is_ok() {
        while let Some(event) = events.recv().await {
            if write_json(&mut write, &event).await.is_err() {
                break;
            }
        }
    }

    gw.bus.unsubscribe(subscriber_id).await;
    Ok(())
}

async fn write_event(
    write: &mut OwnedWriteHalf,
    event_type: &str,
    data: serde_json::Value,
) -> std::io::Result<()> {
    write_json(
        write,
        &serde_json::json!({ "type": event_type, "data": data }),
    )
    .await
}
