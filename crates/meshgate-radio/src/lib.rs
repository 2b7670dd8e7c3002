//! # meshgate-radio
//!
//! Transport and protocol layer for the MeshCore companion radio: frame
//! codec, command/response/push messages, serial and TCP transports
//! (BLE behind the `ble` feature), serial auto-detect, and the
//! [`link::RadioLink`] handle that serializes commands over one
//! connection.
//!
//! Policy lives above this crate: reconnection, the shared operation
//! lock, and post-connect setup are the daemon's job. This crate only
//! moves frames.

pub mod detect;
pub mod link;
pub mod protocol;
pub mod transport;
pub mod wire;

pub use link::{KeyExport, RadioLink, RadioMessage, SentInfo};
pub use protocol::{
    Command, IncomingMessage, Push, RadioContact, Response, SelfInfo, Telemetry,
};

/// Radio layer error types.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("radio link is disconnected")]
    Disconnected,

    #[error("timed out waiting for radio response")]
    Timeout,

    #[error("radio returned error code {0}")]
    Command(u8),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no radio found on any serial device")]
    NoRadioFound,

    #[cfg(feature = "ble")]
    #[error("BLE error: {0}")]
    Ble(#[from] bluer::Error),
}

pub type Result<T> = std::result::Result<T, RadioError>;
