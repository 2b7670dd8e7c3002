//! Serial auto-detection: enumerate candidate devices, probe each with a
//! short handshake, first radio wins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::timeout;

use crate::link::RadioLink;
use crate::{transport, RadioError, Result};

/// Per-device probe budget.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.flatten().map(|e| e.path()).collect())
        .unwrap_or_default()
}

/// Candidate serial devices for this platform.
pub fn detect_serial_devices() -> Vec<String> {
    let mut devices: Vec<String> = Vec::new();

    if cfg!(target_os = "macos") {
        // Callout devices, preferred over tty.*
        for path in list_dir(Path::new("/dev")) {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with("cu.usb")
                || name.starts_with("cu.wchusbserial")
                || name.starts_with("cu.SLAB_USBtoUART")
            {
                devices.push(path.to_string_lossy().into_owned());
            }
        }
    } else {
        // Prefer stable by-id names, fall back to raw ACM/USB nodes that
        // do not resolve to an already-listed device.
        let by_id: Vec<PathBuf> = list_dir(Path::new("/dev/serial/by-id"));
        let mut resolved: Vec<PathBuf> = Vec::new();
        for path in &by_id {
            devices.push(path.to_string_lossy().into_owned());
            if let Ok(target) = std::fs::canonicalize(path) {
                resolved.push(target);
            }
        }

        for path in list_dir(Path::new("/dev")) {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !(name.starts_with("ttyACM") || name.starts_with("ttyUSB")) {
                continue;
            }
            let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            if !resolved.contains(&canonical) {
                devices.push(path.to_string_lossy().into_owned());
            }
        }
    }

    devices.sort();
    devices
}

/// Probe one device: open it, run the app-start handshake, and report
/// whether a radio answered within the budget.
pub async fn probe_serial_device(port: &str, baudrate: u32) -> bool {
    tracing::debug!("Probing serial device {port}");
    let io = match transport::connect_serial(port, baudrate) {
        Ok(io) => io,
        Err(e) => {
            tracing::debug!("Device {port} failed to open: {e}");
            return false;
        }
    };

    match timeout(PROBE_TIMEOUT, RadioLink::connect(io)).await {
        Ok(Ok((link, _pushes))) => {
            let found = link.self_info().is_some();
            if found {
                tracing::debug!("Device {port} answered with self info");
            }
            found
        }
        Ok(Err(e)) => {
            tracing::debug!("Device {port} handshake failed: {e}");
            false
        }
        Err(_) => {
            tracing::debug!("Device {port} timed out");
            false
        }
    }
}

/// Find the first serial port with a responding radio.
///
/// Zero candidates and all-candidates-failed both yield the distinct
/// [`RadioError::NoRadioFound`].
pub async fn find_radio_port(baudrate: u32) -> Result<String> {
    let devices = detect_serial_devices();
    if devices.is_empty() {
        tracing::warn!("No serial devices found");
        return Err(RadioError::NoRadioFound);
    }

    tracing::info!("Found {} serial device(s), probing for a radio", devices.len());
    for device in devices {
        if probe_serial_device(&device, baudrate).await {
            tracing::info!("Found radio at {device}");
            return Ok(device);
        }
    }

    tracing::warn!("No radio answered on any serial device");
    Err(RadioError::NoRadioFound)
}
