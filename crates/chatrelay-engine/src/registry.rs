use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use chatrelay_upstream::{UpstreamConnection, UpstreamEndpoint};

use crate::events::spawn_session_loop;
use crate::forwarder::Forwarder;

/// Close reason sent when the idle reaper evicts a session.
pub const IDLE_CLOSE_REASON: &str = "idle-timeout";

/// Per-session state owned by the registry.
pub struct SessionEntry {
    pub(crate) key: String,
    pub(crate) connection: UpstreamConnection,
    last_activity: AtomicI64,
    initialized: AtomicBool,
    // At most one scheduled eviction; the most recently scheduled one wins.
    idle_timer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionEntry {
    pub fn session_key(&self) -> &str {
        &self.key
    }

    pub fn connection(&self) -> &UpstreamConnection {
        &self.connection
    }

    /// Last send/receive/create activity, unix millis.
    pub fn last_activity_millis(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Claim the one-time init delivery. The winner must either send the
    /// payload or call `release_init` so a later attempt can retry.
    pub fn claim_init(&self) -> bool {
        self.initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_init(&self) {
        self.initialized.store(false, Ordering::Release);
    }
}

/// Listing row for the debug inspection surface.
#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(rename = "lastActivity")]
    pub last_activity: i64,
}

/// Single authority for session lifecycle: one live upstream connection per
/// session key, idle-based eviction, explicit shutdown. Explicitly owned and
/// injected; there is no process-wide singleton.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionEntry>>,
    idle_window: Duration,
    forwarder: Arc<Forwarder>,
    this: Weak<SessionRegistry>,
}

impl SessionRegistry {
    pub fn new(idle_window: Duration, forwarder: Arc<Forwarder>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            sessions: DashMap::new(),
            idle_window,
            forwarder,
            this: this.clone(),
        })
    }

    /// Return the live entry for this key, or connect a fresh one. Behaves
    /// atomically per key: a second caller racing on a new key observes the
    /// first caller's in-flight connection instead of creating its own.
    /// Entries whose connection reached a terminal state are replaced.
    pub fn get_or_create(&self, key: &str, endpoint: UpstreamEndpoint) -> Arc<SessionEntry> {
        match self.sessions.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().connection.state().is_terminal() {
                    return Arc::clone(occupied.get());
                }
                let entry = self.create_entry(key, endpoint);
                let _ = occupied.insert(Arc::clone(&entry));
                entry
            }
            Entry::Vacant(vacant) => {
                let entry = self.create_entry(key, endpoint);
                let _ = vacant.insert(Arc::clone(&entry));
                entry
            }
        }
    }

    fn create_entry(&self, key: &str, endpoint: UpstreamEndpoint) -> Arc<SessionEntry> {
        let (connection, events) = UpstreamConnection::connect(endpoint);
        let entry = Arc::new(SessionEntry {
            key: key.to_string(),
            connection,
            last_activity: AtomicI64::new(now_millis()),
            initialized: AtomicBool::new(false),
            idle_timer: Mutex::new(None),
        });
        // An entry that never sees traffic still gets reaped.
        self.schedule_eviction(&entry);
        let _ = spawn_session_loop(
            self.this.clone(),
            Arc::clone(&entry),
            events,
            Arc::clone(&self.forwarder),
        );
        tracing::info!(session_key = %key, "Session created");
        entry
    }

    /// Record activity and push the idle eviction out; no-op for unknown keys.
    pub fn touch(&self, key: &str) {
        let Some(entry) = self.sessions.get(key).map(|e| Arc::clone(e.value())) else {
            return;
        };
        entry.last_activity.store(now_millis(), Ordering::Relaxed);
        self.schedule_eviction(&entry);
    }

    /// Cancel-and-reschedule the eviction timer for this entry. O(1).
    fn schedule_eviction(&self, entry: &Arc<SessionEntry>) {
        let window = self.idle_window;
        let registry = self.this.clone();
        let task_entry = Arc::clone(entry);
        let task = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            tracing::info!(session_key = %task_entry.key, "Idle window elapsed, evicting session");
            task_entry.connection.close(IDLE_CLOSE_REASON);
            if let Some(registry) = registry.upgrade() {
                registry.remove_entry(&task_entry);
            }
        });

        let mut guard = entry.idle_timer.lock();
        if let Some(previous) = guard.replace(task) {
            previous.abort();
        }
    }

    /// Remove an entry by key, cancelling its timer. Idempotent.
    pub fn remove(&self, key: &str) {
        if let Some((_, entry)) = self.sessions.remove(key) {
            cancel_timer(&entry);
            tracing::debug!(session_key = %key, "Session removed");
        }
    }

    /// Remove only while `entry` is still the registered entry for its key,
    /// so a stale close handler cannot evict a replacement connection.
    pub(crate) fn remove_entry(&self, entry: &Arc<SessionEntry>) {
        let removed = self
            .sessions
            .remove_if(&entry.key, |_, current| Arc::ptr_eq(current, entry))
            .is_some();
        cancel_timer(entry);
        if removed {
            tracing::debug!(session_key = %entry.key, "Session removed");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Stable listing of live sessions for /debug/sessions.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut list: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                session_key: entry.key().clone(),
                last_activity: entry.value().last_activity_millis(),
            })
            .collect();
        list.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        list
    }

    /// Close every live connection and clear the registry. Called once at
    /// process shutdown.
    pub fn shutdown(&self) {
        for entry in self.sessions.iter() {
            entry.value().connection.close("shutdown");
            cancel_timer(entry.value());
        }
        self.sessions.clear();
        tracing::info!("Session registry shut down");
    }
}

fn cancel_timer(entry: &SessionEntry) {
    if let Some(timer) = entry.idle_timer.lock().take() {
        timer.abort();
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
