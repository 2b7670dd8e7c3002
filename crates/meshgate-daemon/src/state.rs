//! Gateway-wide shared state.
//!
//! One [`GatewayState`] per process, shared as `Arc` by every component:
//! the single database connection, the event bus, the keystore, the
//! radio link slot with its locks, background-task registry, and the
//! small waiter maps for ACKs, traces, and CLI replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use meshgate_radio::RadioLink;

use crate::acks::AckTracker;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::keystore::Keystore;

pub type Gateway = Arc<GatewayState>;

/// Bounced-back trace observations, keyed by tag in `trace_waiters`.
#[derive(Debug)]
pub struct TraceReply {
    pub path: Vec<u8>,
    pub snrs_q4: Vec<i8>,
}

/// A repeater's CLI answer, keyed by sender prefix in `cli_waiters`.
#[derive(Debug)]
pub struct CliReply {
    pub text: String,
    pub sender_timestamp: u32,
}

pub struct GatewayState {
    pub config: Config,
    db: tokio::sync::Mutex<Connection>,
    pub bus: EventBus,
    pub keystore: Keystore,
    pub acks: AckTracker,
    pub radio: RadioState,
    pub tasks: TaskRegistry,
    pub poll_pause: PollPause,
    pub(crate) contact_sync_last: std::sync::Mutex<Option<Instant>>,
    pub(crate) trace_waiters: std::sync::Mutex<HashMap<u32, oneshot::Sender<TraceReply>>>,
    pub(crate) cli_waiters: std::sync::Mutex<HashMap<String, oneshot::Sender<CliReply>>>,
}

impl GatewayState {
    pub fn new(config: Config, conn: Connection) -> Gateway {
        Arc::new(Self {
            config,
            db: tokio::sync::Mutex::new(conn),
            bus: EventBus::new(),
            keystore: Keystore::new(),
            acks: AckTracker::new(),
            radio: RadioState::new(),
            tasks: TaskRegistry::new(),
            poll_pause: PollPause::new(),
            contact_sync_last: std::sync::Mutex::new(None),
            trace_waiters: std::sync::Mutex::new(HashMap::new()),
            cli_waiters: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Run a closure against the shared connection. Writes commit before
    /// the lock is released (autocommit mode).
    pub async fn with_db<T>(
        &self,
        f: impl FnOnce(&Connection) -> meshgate_db::Result<T>,
    ) -> Result<T> {
        let conn = self.db.lock().await;
        Ok(f(&conn)?)
    }
}

/// Radio link slot and the locks that guard multi-command sequences.
pub struct RadioState {
    link: std::sync::Mutex<Option<Arc<RadioLink>>>,
    connection_info: std::sync::Mutex<Option<String>>,
    pub(crate) last_connected: AtomicBool,
    /// Serializes command sequences that must not interleave.
    pub(crate) operation_lock: Arc<tokio::sync::Mutex<()>>,
    /// Serializes post-connect setup runs.
    pub(crate) setup_lock: tokio::sync::Mutex<()>,
    /// Held while a reconnect attempt is in flight.
    pub(crate) reconnect_lock: Arc<tokio::sync::Mutex<()>>,
    auto_fetch: AtomicBool,
}

impl RadioState {
    fn new() -> Self {
        Self {
            link: std::sync::Mutex::new(None),
            connection_info: std::sync::Mutex::new(None),
            last_connected: AtomicBool::new(false),
            operation_lock: Arc::new(tokio::sync::Mutex::new(())),
            setup_lock: tokio::sync::Mutex::new(()),
            reconnect_lock: Arc::new(tokio::sync::Mutex::new(())),
            auto_fetch: AtomicBool::new(false),
        }
    }

    pub fn link(&self) -> Option<Arc<RadioLink>> {
        self.link.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn set_link(&self, link: Option<Arc<RadioLink>>) {
        if let Ok(mut slot) = self.link.lock() {
            *slot = link;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link().map(|l| l.is_connected()).unwrap_or(false)
    }

    pub fn connection_info(&self) -> Option<String> {
        self.connection_info.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn set_connection_info(&self, info: Option<String>) {
        if let Ok(mut slot) = self.connection_info.lock() {
            *slot = info;
        }
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnect_lock.try_lock().is_err()
    }

    /// Client-side auto-fetch: whether messages-waiting pushes trigger a
    /// drain.
    pub fn auto_fetch_enabled(&self) -> bool {
        self.auto_fetch.load(Ordering::SeqCst)
    }

    pub fn set_auto_fetch(&self, enabled: bool) {
        self.auto_fetch.store(enabled, Ordering::SeqCst);
    }
}

/// Nesting pause counter for the fallback message poll. Guards decrement
/// on drop, so an early return inside a paused scope still resumes.
pub struct PollPause {
    count: AtomicU32,
}

impl PollPause {
    fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    pub fn pause(&self) -> PollPauseGuard<'_> {
        self.count.fetch_add(1, Ordering::SeqCst);
        PollPauseGuard { count: &self.count }
    }

    pub fn is_paused(&self) -> bool {
        self.count.load(Ordering::SeqCst) > 0
    }
}

pub struct PollPauseGuard<'a> {
    count: &'a AtomicU32,
}

impl Drop for PollPauseGuard<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Named background tasks with idempotent starts.
pub struct TaskRegistry {
    inner: std::sync::Mutex<HashMap<&'static str, JoinHandle<()>>>,
}

impl TaskRegistry {
    fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Start a task unless one with this name is still running. Returns
    /// whether a new task was spawned.
    pub fn start(&self, name: &'static str, spawn: impl FnOnce() -> JoinHandle<()>) -> bool {
        let Ok(mut tasks) = self.inner.lock() else {
            return false;
        };
        if let Some(existing) = tasks.get(name) {
            if !existing.is_finished() {
                return false;
            }
        }
        tasks.insert(name, spawn());
        true
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.inner
            .lock()
            .map(|tasks| tasks.get(name).map(|t| !t.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Replace a task: abort any existing holder of the name first.
    pub fn replace(&self, name: &'static str, spawn: impl FnOnce() -> JoinHandle<()>) {
        let Ok(mut tasks) = self.inner.lock() else {
            return;
        };
        if let Some(existing) = tasks.remove(name) {
            existing.abort();
        }
        tasks.insert(name, spawn());
    }

    pub fn abort(&self, name: &str) {
        if let Ok(mut tasks) = self.inner.lock() {
            if let Some(task) = tasks.remove(name) {
                task.abort();
            }
        }
    }

    pub fn abort_all(&self) {
        if let Ok(mut tasks) = self.inner.lock() {
            for (_, task) in tasks.drain() {
                task.abort();
            }
        }
    }
}

/// Register a waiter for a trace tag. The dispatcher resolves it when the
/// matching trace push arrives.
pub fn register_trace_waiter(gw: &GatewayState, tag: u32) -> oneshot::Receiver<TraceReply> {
    let (tx, rx) = oneshot::channel();
    if let Ok(mut waiters) = gw.trace_waiters.lock() {
        waiters.insert(tag, tx);
    }
    rx
}

pub fn resolve_trace_waiter(gw: &GatewayState, tag: u32, reply: TraceReply) {
    let waiter = gw
        .trace_waiters
        .lock()
        .ok()
        .and_then(|mut waiters| waiters.remove(&tag));
    match waiter {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None => tracing::debug!("Trace push with unknown tag {tag:08x}"),
    }
}

/// Register a waiter for a repeater CLI reply from the given 12-char key
/// prefix.
pub fn register_cli_waiter(gw: &GatewayState, prefix_hex: &str) -> oneshot::Receiver<CliReply> {
    let (tx, rx) = oneshot::channel();
    if let Ok(mut waiters) = gw.cli_waiters.lock() {
        waiters.insert(prefix_hex.to_lowercase(), tx);
    }
    rx
}

/// Deliver a CLI reply to its waiter, if any. Returns whether a waiter
/// consumed it.
pub fn resolve_cli_waiter(gw: &GatewayState, prefix_hex: &str, reply: CliReply) -> bool {
    let waiter = gw
        .cli_waiters
        .lock()
        .ok()
        .and_then(|mut waiters| waiters.remove(&prefix_hex.to_lowercase()));
    match waiter {
        Some(tx) => tx.send(reply).is_ok(),
        None => false,
    }
}

/// Push streams handed to the dispatcher at connect time.
pub type PushReceiver = mpsc::Receiver<meshgate_radio::Push>;

#[cfg(test)]
pub(crate) fn test_gateway() -> Gateway {
    let conn = meshgate_db::open_memory().expect("open test db");
    GatewayState::new(Config::default(), conn)
}
