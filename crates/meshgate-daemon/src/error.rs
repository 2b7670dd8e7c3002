//! Daemon-level error types.

/// Errors surfaced by gateway operations. The RPC layer maps each kind to
/// a stable error code; see `rpc`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Radio I/O attempted with no live link.
    #[error("radio is not connected")]
    RadioUnavailable,

    /// Non-blocking acquire of the shared operation lock failed.
    #[error("radio is busy (operation: {0})")]
    Busy(String),

    /// A prefix matched more than one contact; the caller must supply
    /// more bytes.
    #[error("ambiguous key prefix: {0}")]
    AmbiguousPrefix(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    /// A bounded wait for the radio (ACK, CLI reply, trace) ran out.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error(transparent)]
    Db(#[from] meshgate_db::DbError),

    #[error(transparent)]
    Radio(#[from] meshgate_radio::RadioError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
