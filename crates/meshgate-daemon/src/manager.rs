//! Radio connection management.
//!
//! Owns the lifecycle policy around the link: the shared operation lock
//! for multi-command sequences, reconnection (with a try-lock so only
//! one attempt runs), the idempotent post-connect setup sequence, and
//! the supervisor loop that keeps the link alive. Health is only
//! reported `true` after a post-connect setup completes; a half-set-up
//! radio must not look healthy to clients.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;

use meshgate_radio::{detect, transport, KeyExport, RadioLink};

use crate::config::ConnectionType;
use crate::error::{GatewayError, Result};
use crate::state::Gateway;
use crate::{commands, handlers, sync};

/// Supervisor check cadence.
const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Opt-ins for [`with_radio_operation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationOptions {
    /// Pause the fallback message poll while held.
    pub pause_polling: bool,
    /// Stop reacting to messages-waiting pushes while held; restored on
    /// every exit path.
    pub suspend_auto_fetch: bool,
    /// `false` fails immediately with Busy when the lock is held.
    pub blocking: bool,
}

/// Acquire the shared radio operation lock.
pub async fn acquire_operation(
    gw: &Gateway,
    name: &str,
    blocking: bool,
) -> Result<OwnedMutexGuard<()>> {
    let lock = gw.radio.operation_lock.clone();
    let guard = if blocking {
        lock.lock_owned().await
    } else {
        lock.try_lock_owned()
            .map_err(|_| GatewayError::Busy(name.to_string()))?
    };
    tracing::debug!("Acquired radio operation lock ({name})");
    Ok(guard)
}

/// Run a command sequence under the operation lock with the requested
/// opt-ins. Auto-fetch restarts and the lock release happen on every
/// exit path, including when the body errors.
pub async fn with_radio_operation<T, F, Fut>(
    gw: &Gateway,
    name: &str,
    opts: OperationOptions,
    f: F,
) -> Result<T>
where
    F: FnOnce(std::sync::Arc<RadioLink>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let guard = acquire_operation(gw, name, opts.blocking).await?;
    let _poll_guard = opts.pause_polling.then(|| gw.poll_pause.pause());

    let suspended = opts.suspend_auto_fetch && gw.radio.auto_fetch_enabled();
    if suspended {
        gw.radio.set_auto_fetch(false);
        tracing::debug!("Auto message fetch suspended ({name})");
    }

    let result = match gw.radio.link() {
        Some(link) => f(link).await,
        None => Err(GatewayError::RadioUnavailable),
    };

    if suspended {
        gw.radio.set_auto_fetch(true);
        // Catch up on anything queued while the radio was kept quiet.
        let drained = sync::drain_pending_messages(gw).await;
        if drained > 0 {
            tracing::debug!("Drained {drained} message(s) after {name}");
        }
    }

    drop(guard);
    tracing::debug!("Released radio operation lock ({name})");
    result
}

/// Connect using the configured transport and install the link.
pub async fn connect(gw: &Gateway) -> Result<()> {
    let config = &gw.config;
    let (io, info) = match config.connection_type() {
        ConnectionType::Tcp => {
            tracing::debug!("Connecting to radio at {}:{} (TCP)", config.tcp_host, config.tcp_port);
            let io = transport::connect_tcp(&config.tcp_host, config.tcp_port).await?;
            (io, format!("TCP: {}:{}", config.tcp_host, config.tcp_port))
        }
        ConnectionType::Ble => {
            #[cfg(feature = "ble")]
            {
                tracing::debug!("Connecting to radio at {} (BLE)", config.ble_address);
                let io = transport::connect_ble(&config.ble_address, &config.ble_pin).await?;
                (io, format!("BLE: {}", config.ble_address))
            }
            #[cfg(not(feature = "ble"))]
            {
                return Err(GatewayError::BadRequest(
                    "BLE transport not compiled in".to_string(),
                ));
            }
        }
        ConnectionType::Serial => {
            let port = if config.serial_port.is_empty() {
                tracing::info!("No serial port specified, auto-detecting");
                detect::find_radio_port(config.serial_baudrate).await?
            } else {
                config.serial_port.clone()
            };
            tracing::debug!("Connecting to radio at {port} ({} baud)", config.serial_baudrate);
            let io = transport::connect_serial(&port, config.serial_baudrate)?;
            (io, format!("Serial: {port}"))
        }
    };

    let (link, pushes) = RadioLink::connect(io).await?;
    // Replacing the dispatcher is what unsubscribes the previous
    // connection's handlers.
    handlers::spawn_dispatcher(gw, pushes);
    gw.radio.set_link(Some(link));
    gw.radio.set_connection_info(Some(info));
    Ok(())
}

/// Drop the current link. Auto-fetch stops with it.
pub fn disconnect(gw: &Gateway) {
    gw.radio.set_auto_fetch(false);
    gw.radio.set_link(None);
    tracing::debug!("Radio disconnected");
}

/// Attempt one reconnect. Returns false when another attempt already
/// holds the reconnect lock or the connect fails. Never reports health
/// itself; callers do that after setup.
pub async fn reconnect(gw: &Gateway) -> bool {
    let Ok(_guard) = gw.radio.reconnect_lock.clone().try_lock_owned() else {
        tracing::debug!("Reconnection already in progress");
        return false;
    };
    tracing::info!("Attempting to reconnect to radio");

    disconnect(gw);
    match connect(gw).await {
        Ok(()) if gw.radio.is_connected() => {
            tracing::info!(
                "Radio reconnected at {}",
                gw.radio.connection_info().unwrap_or_default()
            );
            true
        }
        Ok(()) => {
            tracing::warn!("Reconnection failed: not connected after connect");
            false
        }
        Err(e) => {
            tracing::warn!("Reconnection failed: {e}");
            gw.bus
                .broadcast_error("Reconnection failed", Some(&e.to_string()))
                .await;
            false
        }
    }
}

/// Export the radio's private key into the keystore.
///
/// `Disabled` is an expected firmware policy: DMs simply cannot be
/// decrypted server-side. Only a real key populates the store.
pub async fn export_and_store_private_key(gw: &Gateway) -> bool {
    let Some(link) = gw.radio.link() else {
        return false;
    };

    // A different radio identity invalidates whatever we held.
    if let (Some(ours), Some(info)) = (gw.keystore.public_key(), link.self_info()) {
        if ours != info.public_key {
            tracing::info!("Radio identity changed, clearing stale keystore");
            gw.keystore.clear();
        }
    }

    tracing::info!("Exporting private key from radio");
    match link.export_private_key().await {
        Ok(KeyExport::Key(key)) => match gw.keystore.set(&key) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Exported key rejected: {e}");
                false
            }
        },
        Ok(KeyExport::Disabled) => {
            tracing::info!(
                "Private key export disabled by firmware; server-side DM decryption unavailable"
            );
            false
        }
        Err(e) => {
            tracing::error!("Error exporting private key: {e}");
            false
        }
    }
}

/// Full post-connection setup. Idempotent: periodic loops have start
/// guards, the channel guarantee is a conditional write, and handler
/// registration replaces rather than stacks.
pub async fn post_connect_setup(gw: &Gateway) -> Result<()> {
    let _setup = gw.radio.setup_lock.lock().await;
    if gw.radio.link().is_none() {
        return Ok(());
    }

    export_and_store_private_key(gw).await;
    sync::sync_radio_time(gw).await;

    tracing::info!("Syncing and offloading radio data");
    sync::sync_and_offload_all(gw).await?;

    sync::start_periodic_sync(gw);

    if sync::send_advertisement(gw, false).await {
        tracing::info!("Advertisement sent");
    } else {
        tracing::debug!("Advertisement skipped (disabled or throttled)");
    }
    sync::start_periodic_advert(gw);

    gw.radio.set_auto_fetch(true);
    tracing::info!("Auto message fetching started");

    let drained = sync::drain_pending_messages(gw).await;
    if drained > 0 {
        tracing::info!("Drained {drained} pending message(s)");
    }

    sync::start_message_polling(gw);
    tracing::info!("Post-connect setup complete");
    Ok(())
}

/// Broadcast the current health snapshot.
pub async fn broadcast_health(gw: &Gateway, radio_connected: bool) {
    let data = commands::health::build_health_data(gw, radio_connected).await;
    gw.bus.broadcast("health", data).await;
}

/// Reconnect + setup + health, the sequence manual reconnect requests
/// use.
pub async fn reconnect_and_setup(gw: &Gateway) -> Result<bool> {
    if !reconnect(gw).await {
        return Ok(false);
    }
    post_connect_setup(gw).await?;
    broadcast_health(gw, true).await;
    gw.radio.last_connected.store(true, Ordering::SeqCst);
    Ok(true)
}

/// Start the connection supervisor (idempotent). It never exits on an
/// error inside the loop; health transitions follow the table:
/// connected→disconnected broadcasts unhealthy; while disconnected it
/// keeps attempting reconnect+setup; a link that recovered on its own
/// still goes through setup before being reported healthy.
pub fn start_connection_monitor(gw: &Gateway) {
    let gw_clone = gw.clone();
    if gw.tasks.start("connection-monitor", move || {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CHECK_INTERVAL).await;
                let connected = gw_clone.radio.is_connected();
                let last = gw_clone.radio.last_connected.load(Ordering::SeqCst);

                if last && !connected {
                    tracing::warn!("Radio connection lost");
                    broadcast_health(&gw_clone, false).await;
                    gw_clone.radio.last_connected.store(false, Ordering::SeqCst);
                }

                if !connected {
                    if !gw_clone.radio.is_reconnecting() && reconnect(&gw_clone).await {
                        match post_connect_setup(&gw_clone).await {
                            Ok(()) => {
                                broadcast_health(&gw_clone, true).await;
                                gw_clone.radio.last_connected.store(true, Ordering::SeqCst);
                            }
                            Err(e) => {
                                tracing::error!("Post-connect setup failed, staying unhealthy: {e}");
                            }
                        }
                    }
                } else if !last {
                    // Restored underneath us; setup before reporting healthy.
                    tracing::info!("Radio connection restored");
                    match post_connect_setup(&gw_clone).await {
                        Ok(()) => {
                            broadcast_health(&gw_clone, true).await;
                            gw_clone.radio.last_connected.store(true, Ordering::SeqCst);
                        }
                        Err(e) => {
                            tracing::error!("Post-connect setup failed, staying unhealthy: {e}");
                        }
                    }
                }
            }
        })
    }) {
        tracing::info!("Radio connection monitor started");
    }
}
