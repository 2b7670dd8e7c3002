//! Pending-ACK tracking for outgoing direct messages.
//!
//! The radio answers a DM send with an expected-ACK code and a suggested
//! timeout. When the matching send-confirmed push arrives, the entry maps
//! the code back to the stored message. Entries that outlive twice their
//! suggested timeout are swept lazily on the next lookup or insert.

use std::collections::HashMap;
use std::time::Instant;

struct PendingAck {
    message_id: i64,
    created_at: Instant,
    timeout_ms: u32,
}

#[derive(Default)]
pub struct AckTracker {
    inner: std::sync::Mutex<HashMap<u32, PendingAck>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an expected ACK code for a stored outgoing message.
    pub fn track(&self, ack_code: u32, message_id: i64, timeout_ms: u32) {
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        Self::sweep(&mut map);
        map.insert(
            ack_code,
            PendingAck {
                message_id,
                created_at: Instant::now(),
                timeout_ms,
            },
        );
        tracing::debug!("Tracking pending ACK {ack_code:08x} for message {message_id} ({timeout_ms}ms)");
    }

    /// Resolve an ACK code to its message id, removing the entry.
    pub fn take(&self, ack_code: u32) -> Option<i64> {
        let mut map = self.inner.lock().ok()?;
        Self::sweep(&mut map);
        map.remove(&ack_code).map(|entry| entry.message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    fn sweep(map: &mut HashMap<u32, PendingAck>) {
        map.retain(|code, entry| {
            let budget_ms = u64::from(entry.timeout_ms) * 2;
            let keep = entry.created_at.elapsed().as_millis() <= u128::from(budget_ms);
            if !keep {
                tracing::debug!("Expired pending ACK {code:08x}");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_take() {
        let tracker = AckTracker::new();
        tracker.track(0xDEAD, 42, 10_000);

        assert_eq!(tracker.take(0xDEAD), Some(42));
        // Consumed: a duplicate confirmation finds nothing.
        assert_eq!(tracker.take(0xDEAD), None);
    }

    #[test]
    fn test_unknown_code() {
        let tracker = AckTracker::new();
        assert_eq!(tracker.take(0xBEEF), None);
    }

    #[test]
    fn test_expired_entries_swept() {
        let tracker = AckTracker::new();
        // Zero suggested timeout expires immediately.
        tracker.track(0x1, 1, 0);
        std::thread::sleep(std::time::Duration::from_millis(5));

        tracker.track(0x2, 2, 10_000);
        assert_eq!(tracker.pending_count(), 1);
        assert_eq!(tracker.take(0x1), None);
        assert_eq!(tracker.take(0x2), Some(2));
    }
}
