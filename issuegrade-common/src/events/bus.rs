//! Subscription-indexed event fan-out
//!
//! Every connection is a bounded mpsc sender registered under an owner and,
//! optionally, a single job. Publishing resolves the target set from the
//! indices, releases the index lock, then sends to each target with a
//! timeout. A connection whose send fails is removed from every index; the
//! remaining sends still happen.

use super::{AnalysisEvent, EventPayload};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default per-send timeout for a slow connection
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Opaque handle for one registered connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection counts reported by `/events/stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub owners_connected: usize,
    pub jobs_subscribed: usize,
}

struct Connection {
    owner_id: String,
    job_id: Option<String>,
    sender: mpsc::Sender<AnalysisEvent>,
}

#[derive(Default)]
struct Indices {
    connections: HashMap<ConnectionId, Connection>,
    /// job_id -> job-scoped connections
    by_job: HashMap<String, HashSet<ConnectionId>>,
    /// owner_id -> owner-wide connections (no job filter)
    by_owner: HashMap<String, HashSet<ConnectionId>>,
    /// job_id -> owning owner_id
    job_owner: HashMap<String, String>,
}

impl Indices {
    fn remove(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.remove(&id) else {
            return false;
        };
        match conn.job_id {
            Some(job_id) => remove_from_set(&mut self.by_job, &job_id, id),
            None => remove_from_set(&mut self.by_owner, &conn.owner_id, id),
        }
        true
    }

    fn senders(&self, ids: &HashSet<ConnectionId>) -> Vec<(ConnectionId, mpsc::Sender<AnalysisEvent>)> {
        ids.iter()
            .filter_map(|id| self.connections.get(id).map(|c| (*id, c.sender.clone())))
            .collect()
    }
}

fn remove_from_set(map: &mut HashMap<String, HashSet<ConnectionId>>, key: &str, id: ConnectionId) {
    if let Some(set) = map.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

struct Inner {
    indices: Mutex<Indices>,
    next_id: AtomicU64,
    channel_capacity: usize,
    send_timeout: Duration,
}

/// Fan-out of analysis events to subscribed connections
///
/// Cheap to clone; clones share the same indices. Constructed once in the
/// composition root and handed to the job runner and the HTTP layer.
///
/// # Examples
///
/// ```
/// use issuegrade_common::events::{EventBus, EventPayload};
///
/// # tokio_test_block(async {
/// let bus = EventBus::new(16);
/// let (_id, mut rx) = bus.connect("U1", None);
/// bus.publish_to_owner("U1", EventPayload::Activity {
///     kind: "note".into(),
///     message: "hello".into(),
///     level: issuegrade_common::events::ActivityLevel::Info,
///     item_key: None,
/// }).await;
/// assert_eq!(rx.recv().await.unwrap().event_type(), "activity");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f);
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a bus whose `connect` channels buffer `channel_capacity` events
    pub fn new(channel_capacity: usize) -> Self {
        Self::with_send_timeout(channel_capacity, DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_send_timeout(channel_capacity: usize, send_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                indices: Mutex::new(Indices::default()),
                next_id: AtomicU64::new(1),
                channel_capacity: channel_capacity.max(1),
                send_timeout,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Indices> {
        // A panic while holding the guard leaves the maps structurally valid.
        self.inner
            .indices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an existing sender as a connection
    ///
    /// With `job_id` the connection only receives that job's events; without
    /// it the connection receives everything published for the owner.
    pub fn subscribe(
        &self,
        sender: mpsc::Sender<AnalysisEvent>,
        owner_id: &str,
        job_id: Option<&str>,
    ) -> ConnectionId {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut idx = self.lock();

        match job_id {
            Some(job) => {
                idx.by_job.entry(job.to_string()).or_default().insert(id);
            }
            None => {
                idx.by_owner.entry(owner_id.to_string()).or_default().insert(id);
            }
        }
        idx.connections.insert(
            id,
            Connection {
                owner_id: owner_id.to_string(),
                job_id: job_id.map(str::to_string),
                sender,
            },
        );
        drop(idx);

        tracing::debug!(connection = %id, owner_id, job_id = ?job_id, "Connection registered");
        id
    }

    /// Create a channel, register it, and return the receiving half
    pub fn connect(
        &self,
        owner_id: &str,
        job_id: Option<&str>,
    ) -> (ConnectionId, mpsc::Receiver<AnalysisEvent>) {
        let (tx, rx) = mpsc::channel(self.inner.channel_capacity);
        let id = self.subscribe(tx, owner_id, job_id);
        (id, rx)
    }

    /// Remove a connection from every index (no-op for unknown ids)
    pub fn unsubscribe(&self, id: ConnectionId) {
        if self.lock().remove(id) {
            tracing::debug!(connection = %id, "Connection removed");
        }
    }

    /// Record which owner a job belongs to
    pub fn bind_job(&self, job_id: &str, owner_id: &str) {
        self.lock()
            .job_owner
            .insert(job_id.to_string(), owner_id.to_string());
    }

    /// Deliver to the job's subscribers and its owner's owner-wide connections
    ///
    /// Returns the number of connections the event reached.
    pub async fn publish_to_job(&self, job_id: &str, payload: EventPayload) -> usize {
        let targets = {
            let idx = self.lock();
            let mut ids: HashSet<ConnectionId> =
                idx.by_job.get(job_id).cloned().unwrap_or_default();
            if let Some(owner) = idx.job_owner.get(job_id) {
                if let Some(owner_ids) = idx.by_owner.get(owner) {
                    ids.extend(owner_ids.iter().copied());
                }
            }
            idx.senders(&ids)
        };
        self.deliver(targets, AnalysisEvent::now(payload)).await
    }

    /// Deliver to the owner's owner-wide connections only
    pub async fn publish_to_owner(&self, owner_id: &str, payload: EventPayload) -> usize {
        let targets = {
            let idx = self.lock();
            match idx.by_owner.get(owner_id) {
                Some(ids) => idx.senders(ids),
                None => Vec::new(),
            }
        };
        self.deliver(targets, AnalysisEvent::now(payload)).await
    }

    async fn deliver(
        &self,
        targets: Vec<(ConnectionId, mpsc::Sender<AnalysisEvent>)>,
        event: AnalysisEvent,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, sender) in targets {
            match sender.send_timeout(event.clone(), self.inner.send_timeout).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        connection = %id,
                        event = event.event_type(),
                        error = %e,
                        "Event delivery failed, dropping connection"
                    );
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut idx = self.lock();
            for id in dead {
                idx.remove(id);
            }
        }

        delivered
    }

    /// Detach a finished job
    ///
    /// Job-scoped connections stay open as owner-wide connections of their
    /// owner; the job→owner binding is forgotten.
    pub fn cleanup_job(&self, job_id: &str) {
        let mut idx = self.lock();
        idx.job_owner.remove(job_id);

        let Some(ids) = idx.by_job.remove(job_id) else {
            return;
        };
        let mut downgraded = 0usize;
        for id in ids {
            let owner = match idx.connections.get_mut(&id) {
                Some(conn) => {
                    conn.job_id = None;
                    conn.owner_id.clone()
                }
                None => continue,
            };
            idx.by_owner.entry(owner).or_default().insert(id);
            downgraded += 1;
        }
        drop(idx);

        tracing::debug!(job_id, downgraded, "Job subscriptions detached");
    }

    pub fn connection_count(&self) -> ConnectionStats {
        let idx = self.lock();
        let owners: HashSet<&str> = idx
            .connections
            .values()
            .map(|c| c.owner_id.as_str())
            .collect();
        ConnectionStats {
            total_connections: idx.connections.len(),
            owners_connected: owners.len(),
            jobs_subscribed: idx.by_job.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ActivityLevel;

    fn activity(message: &str) -> EventPayload {
        EventPayload::Activity {
            kind: "test".into(),
            message: message.into(),
            level: ActivityLevel::Info,
            item_key: None,
        }
    }

    fn job_failed(job_id: &str) -> EventPayload {
        EventPayload::JobFailed {
            job_id: job_id.into(),
            error: "x".into(),
        }
    }

    #[tokio::test]
    async fn test_publish_to_job_reaches_job_and_owner_wide_connections() {
        let bus = EventBus::new(8);
        bus.bind_job("J1", "U1");

        let (_a, mut rx_a) = bus.connect("U1", Some("J1"));
        let (_b, mut rx_b) = bus.connect("U2", Some("J1"));
        let (_c, mut rx_c) = bus.connect("U1", None);
        let (_d, mut rx_d) = bus.connect("U3", None);

        let delivered = bus.publish_to_job("J1", job_failed("J1")).await;
        assert_eq!(delivered, 3);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
        assert!(rx_d.try_recv().is_err(), "other owner must not receive");
    }

    #[tokio::test]
    async fn test_publish_to_owner_skips_job_scoped_connections() {
        let bus = EventBus::new(8);
        let (_a, mut rx_job) = bus.connect("U1", Some("J1"));
        let (_b, mut rx_owner) = bus.connect("U1", None);

        assert_eq!(bus.publish_to_owner("U1", activity("hi")).await, 1);
        assert!(rx_owner.try_recv().is_ok());
        assert!(rx_job.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_receiver_is_removed_without_aborting_others() {
        let bus = EventBus::new(8);
        bus.bind_job("J1", "U1");
        let (_a, rx_closed) = bus.connect("U1", Some("J1"));
        let (_b, mut rx_open) = bus.connect("U1", Some("J1"));
        drop(rx_closed);

        assert_eq!(bus.publish_to_job("J1", job_failed("J1")).await, 1);
        assert!(rx_open.try_recv().is_ok());
        assert_eq!(bus.connection_count().total_connections, 1);
    }

    #[tokio::test]
    async fn test_full_channel_times_out_and_is_dropped() {
        let bus = EventBus::with_send_timeout(1, Duration::from_millis(20));
        let (_slow, _rx_slow) = bus.connect("U1", None);

        assert_eq!(bus.publish_to_owner("U1", activity("one")).await, 1);
        // Buffer is full and nobody reads
        assert_eq!(bus.publish_to_owner("U1", activity("two")).await, 0);
        assert_eq!(bus.connection_count().total_connections, 0);
    }

    #[tokio::test]
    async fn test_cleanup_job_downgrades_to_owner_wide() {
        let bus = EventBus::new(8);
        bus.bind_job("J1", "U1");
        let (_a, mut rx) = bus.connect("U1", Some("J1"));

        bus.cleanup_job("J1");

        let stats = bus.connection_count();
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.jobs_subscribed, 0);

        assert_eq!(bus.publish_to_job("J1", job_failed("J1")).await, 0);
        assert_eq!(bus.publish_to_owner("U1", activity("after")).await, 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type(), "activity");
    }

    #[tokio::test]
    async fn test_unsubscribe_and_stats() {
        let bus = EventBus::new(8);
        let (a, _rx_a) = bus.connect("U1", Some("J1"));
        let (_b, _rx_b) = bus.connect("U1", None);
        let (_c, _rx_c) = bus.connect("U2", Some("J2"));

        assert_eq!(
            bus.connection_count(),
            ConnectionStats {
                total_connections: 3,
                owners_connected: 2,
                jobs_subscribed: 2,
            }
        );

        bus.unsubscribe(a);
        bus.unsubscribe(a);
        let stats = bus.connection_count();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.jobs_subscribed, 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_delivers_zero() {
        let bus = EventBus::new(8);
        assert_eq!(bus.publish_to_job("nobody", job_failed("nobody")).await, 0);
        assert_eq!(bus.publish_to_owner("nobody", activity("x")).await, 0);
    }
}
