//! Session lifecycle: naming, retrying creation, and sharing by address.
//!
//! Two policies are offered:
//!
//! | Policy | Entry point | Behaviour |
//! |---|---|---|
//! | Shared by address | [`ConnectionManager::get_or_create`] | one live node per `(master, host)`, usage counted |
//! | Always fresh | [`connect_with_retry`] | a new node per call, retried with backoff until it succeeds |

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rsb_types::BridgeError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::log::LogRouter;
use crate::session::{LogCallback, Node, NodeConfig, Transport};

/// Process-wide; names are never reused, even after a node shuts down, so a
/// new session cannot collide with one the master still remembers.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique session name derived from `master_address`.
pub fn session_name(master_address: &str) -> String {
    let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let host_part = master_address
        .split_once("://")
        .map_or(master_address, |(_, rest)| rest);
    let sanitized: String = host_part
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("rsb_node_{}_{n}", sanitized.trim_matches('_'))
}

// ────────────────────────────────────────────────────────────────────────────
// Always-fresh policy
// ────────────────────────────────────────────────────────────────────────────

/// Backoff schedule for [`connect_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between failed attempts.
    pub backoff: Duration,
    /// Emit a warning on every `warn_every`-th consecutive failure.
    pub warn_every: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(1),
            warn_every: 10,
        }
    }
}

/// Create a fresh node, retrying forever.
///
/// Only returns on success.  Cancel by dropping the future, e.g. from a
/// `tokio::select!` arm racing a cancellation token.
pub async fn connect_with_retry(
    transport: &dyn Transport,
    master_address: &str,
    host: Option<&str>,
    log_sink: Option<LogCallback>,
    policy: RetryPolicy,
) -> Arc<dyn Node> {
    let warn_every = policy.warn_every.max(1);
    let mut failures: u32 = 0;
    loop {
        let config = NodeConfig {
            name: session_name(master_address),
            master_address: master_address.to_string(),
            host: host.map(str::to_string),
            log_sink: log_sink.clone(),
        };
        match transport.connect(config).await {
            Ok(node) => {
                if failures > 0 {
                    info!(master = %master_address, node = %node.name(), failures, "connected after retries");
                }
                return node;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                if failures % warn_every == 0 {
                    warn!(master = %master_address, failures, error = %e, "still unable to create node");
                } else {
                    debug!(master = %master_address, failures, error = %e, "node creation failed, retrying");
                }
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared-by-address policy
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    master_address: String,
    host: Option<String>,
}

struct SharedSession {
    node: Arc<dyn Node>,
    users: usize,
}

/// Table of shared nodes keyed by master address and optional host.
///
/// Every mutation happens under one async mutex, which is held across node
/// creation so concurrent callers for the same key wait for the first
/// instead of racing it.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    router: LogRouter,
    sessions: Mutex<HashMap<SessionKey, SharedSession>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, router: LogRouter) -> Self {
        Self {
            transport,
            router,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn router(&self) -> LogRouter {
        self.router
    }

    /// Return the live node for `(master_address, host)`, creating it on
    /// first use.  Each successful call counts as one user; pair it with
    /// [`ConnectionManager::release`].
    ///
    /// # Errors
    ///
    /// The transport's [`BridgeError::ConnectionFailure`].  Nothing is
    /// inserted on failure.
    pub async fn get_or_create(
        &self,
        master_address: &str,
        host: Option<&str>,
    ) -> Result<Arc<dyn Node>, BridgeError> {
        let key = SessionKey {
            master_address: master_address.to_string(),
            host: host.map(str::to_string),
        };
        let mut sessions = self.sessions.lock().await;

        if let Some(entry) = sessions.get_mut(&key) {
            if !entry.node.is_closed() {
                entry.users += 1;
                return Ok(Arc::clone(&entry.node));
            }
            debug!(master = %master_address, node = %entry.node.name(), "replacing closed shared node");
            sessions.remove(&key);
        }

        let name = session_name(master_address);
        let config = NodeConfig {
            log_sink: Some(self.router.callback(name.clone())),
            name,
            master_address: key.master_address.clone(),
            host: key.host.clone(),
        };
        let node = self.transport.connect(config).await?;
        info!(master = %master_address, node = %node.name(), "shared node created");
        sessions.insert(
            key,
            SharedSession {
                node: Arc::clone(&node),
                users: 1,
            },
        );
        Ok(node)
    }

    /// Drop one user of `node`; the last user shuts it down.  A node that
    /// is no longer in the table is ignored.
    pub async fn release(&self, node: &Arc<dyn Node>) {
        let mut sessions = self.sessions.lock().await;
        let Some(key) = Self::find(&sessions, node) else {
            return;
        };
        let remaining = match sessions.get_mut(&key) {
            Some(entry) => {
                entry.users = entry.users.saturating_sub(1);
                entry.users
            }
            None => return,
        };
        if remaining == 0
            && let Some(entry) = sessions.remove(&key)
        {
            debug!(node = %entry.node.name(), "last user released shared node");
            entry.node.shutdown().await;
        }
    }

    /// Evict and shut down `node` after a binding saw it fail, so the next
    /// [`ConnectionManager::get_or_create`] builds a replacement.
    pub async fn invalidate(&self, node: &Arc<dyn Node>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(key) = Self::find(&sessions, node)
            && let Some(entry) = sessions.remove(&key)
        {
            warn!(node = %entry.node.name(), users = entry.users, "shared node invalidated");
            entry.node.shutdown().await;
        }
    }

    /// Shut down every node and empty the table.
    pub async fn shutdown_all(&self) {
        let mut sessions = self.sessions.lock().await;
        let snapshot: Vec<SharedSession> = std::mem::take(&mut *sessions).into_values().collect();
        for entry in snapshot {
            entry.node.shutdown().await;
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn find(sessions: &HashMap<SessionKey, SharedSession>, node: &Arc<dyn Node>) -> Option<SessionKey> {
        sessions
            .iter()
            .find(|(_, entry)| std::ptr::addr_eq(Arc::as_ptr(&entry.node), Arc::as_ptr(node)))
            .map(|(key, _)| key.clone())
    }
}
