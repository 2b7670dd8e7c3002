//! In-memory identity keystore.
//!
//! Holds at most one radio identity: the 64-byte private key exported
//! from the radio and the public key derived from its scalar half. Never
//! touches disk; cleared when the radio's identity changes. Used for
//! server-side decryption of direct messages.

use zeroize::Zeroizing;

use meshgate_proto::derive_public_key;

use crate::error::{GatewayError, Result};

struct Identity {
    private: Zeroizing<Vec<u8>>,
    public: [u8; 32],
}

/// Process-lifetime key holder.
#[derive(Default)]
pub struct Keystore {
    inner: std::sync::Mutex<Option<Identity>>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a 64-byte radio-format private key and derive its public
    /// key.
    pub fn set(&self, key: &[u8]) -> Result<()> {
        if key.len() != 64 {
            return Err(GatewayError::BadRequest(format!(
                "private key must be 64 bytes, got {}",
                key.len()
            )));
        }
        let public = derive_public_key(key)
            .map_err(|e| GatewayError::BadRequest(format!("bad private key: {e}")))?;

        if let Ok(mut slot) = self.inner.lock() {
            *slot = Some(Identity {
                private: Zeroizing::new(key.to_vec()),
                public,
            });
        }
        tracing::info!("Private key stored in keystore (public key: {}...)", {
            let mut prefix = hex::encode(public);
            prefix.truncate(12);
            prefix
        });
        Ok(())
    }

    pub fn private_key(&self) -> Option<Zeroizing<Vec<u8>>> {
        self.inner
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|id| id.private.clone()))
    }

    pub fn public_key(&self) -> Option<[u8; 32]> {
        self.inner
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|id| id.public))
    }

    pub fn has_key(&self) -> bool {
        self.inner
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = None;
        }
        tracing::info!("Private key cleared from keystore");
    }
}
