use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use beam_types::events::RegistryEvent;

/// Delivery side of one connected client.
///
/// Handles compare by connection id, so a clone identifies the same
/// connection as the original.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<RegistryEvent>,
}

impl ConnectionHandle {
    /// Create a handle for a new connection. The receiver yields every event
    /// the registry pushes to it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RegistryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event for this connection. Returns false if the connection's
    /// receiving side is gone.
    pub fn send(&self, event: RegistryEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Process-wide presence registry. Cheap to clone.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// identifier -> connection. Held locked across each broadcast pass so a
    /// pass never observes a half-applied mutation.
    records: Mutex<BTreeMap<String, ConnectionHandle>>,

    /// Total broadcast passes since startup.
    broadcasts: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `identifier` (last writer wins), then
    /// broadcast the full set.
    pub async fn register(
        &self,
        identifier: impl Into<String>,
        handle: ConnectionHandle,
    ) -> BroadcastReport {
        let identifier = identifier.into();
        let mut records = self.inner.records.lock().await;

        let conn_id = handle.id();
        if let Some(previous) = records.insert(identifier.clone(), handle) {
            if previous.id() != conn_id {
                debug!(
                    "{} re-registered by {} (was {})",
                    identifier,
                    conn_id,
                    previous.id()
                );
            }
        }

        self.broadcast_locked(&records)
    }

    /// Remove every record held by `handle`, then broadcast. Unknown handles
    /// (e.g. a client that disconnected before registering) leave the set
    /// untouched but still trigger a broadcast of it.
    pub async fn deregister(&self, handle: &ConnectionHandle) -> BroadcastReport {
        let mut records = self.inner.records.lock().await;

        let before = records.len();
        records.retain(|_, stored| stored != handle);
        let removed = before - records.len();
        if removed == 0 {
            debug!("deregister for unregistered connection {}", handle.id());
        }

        self.broadcast_locked(&records)
    }

    /// The identifiers registered right now.
    pub async fn snapshot(&self) -> BTreeSet<String> {
        self.inner.records.lock().await.keys().cloned().collect()
    }

    /// Answer a query: push the current set to `handle` only.
    pub async fn send_snapshot(&self, handle: &ConnectionHandle) -> bool {
        let records = self.inner.records.lock().await;
        handle.send(presence_update(&records))
    }

    /// Number of registered identifiers.
    pub async fn len(&self) -> usize {
        self.inner.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Broadcast passes performed so far.
    pub fn broadcasts_sent(&self) -> u64 {
        self.inner.broadcasts.load(Ordering::Relaxed)
    }

    /// Push the current set to every registered connection. Each delivery is
    /// independent: a dead connection is logged and skipped, and is only
    /// removed once its own disconnect runs `deregister`.
    fn broadcast_locked(&self, records: &BTreeMap<String, ConnectionHandle>) -> BroadcastReport {
        self.inner.broadcasts.fetch_add(1, Ordering::Relaxed);

        let event = presence_update(records);
        let mut report = BroadcastReport::default();
        let mut seen = HashSet::with_capacity(records.len());

        for (identifier, handle) in records {
            // A connection holding several identifiers gets one copy.
            if !seen.insert(handle.id()) {
                continue;
            }
            if handle.send(event.clone()) {
                report.delivered += 1;
            } else {
                warn!(
                    "presence update to {} ({}) failed, skipping",
                    identifier,
                    handle.id()
                );
                report.failed += 1;
            }
        }

        debug!(
            "presence broadcast: {} peers, {} delivered, {} failed",
            records.len(),
            report.delivered,
            report.failed
        );
        report
    }
}

fn presence_update(records: &BTreeMap<String, ConnectionHandle>) -> RegistryEvent {
    RegistryEvent::PresenceUpdate {
        peers: records.keys().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<RegistryEvent>) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.peers().to_vec());
        }
        out
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn register_broadcasts_full_set_to_everyone() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = ConnectionHandle::new();
        let (bob, mut bob_rx) = ConnectionHandle::new();

        registry.register("alice", alice).await;
        let report = registry.register("bob", bob).await;
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });

        assert_eq!(
            drain(&mut alice_rx),
            vec![vec!["alice".to_string()], vec!["alice".into(), "bob".into()]]
        );
        // Includes bob's own identifier; the registry doesn't filter self.
        assert_eq!(drain(&mut bob_rx), vec![vec!["alice".to_string(), "bob".into()]]);
    }

    #[tokio::test]
    async fn reregistration_replaces_handle() {
        let registry = Registry::new();
        let (first, mut first_rx) = ConnectionHandle::new();
        let (second, mut second_rx) = ConnectionHandle::new();

        registry.register("alice", first.clone()).await;
        registry.register("alice", second).await;
        drain(&mut first_rx);
        drain(&mut second_rx);

        // The replaced connection no longer owns the record.
        registry.deregister(&first).await;
        assert_eq!(registry.snapshot().await, set(&["alice"]));
        assert!(drain(&mut first_rx).is_empty());
        assert_eq!(drain(&mut second_rx), vec![vec!["alice".to_string()]]);
    }

    #[tokio::test]
    async fn deregister_before_register_is_noop() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = ConnectionHandle::new();
        let (phantom, mut phantom_rx) = ConnectionHandle::new();

        registry.register("alice", alice).await;
        drain(&mut alice_rx);

        let report = registry.deregister(&phantom).await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 0 });
        assert_eq!(registry.snapshot().await, set(&["alice"]));

        // Only ever the real identifier, and nothing for the phantom.
        assert_eq!(drain(&mut alice_rx), vec![vec!["alice".to_string()]]);
        assert!(drain(&mut phantom_rx).is_empty());
    }

    #[tokio::test]
    async fn dead_connection_does_not_block_others() {
        let registry = Registry::new();
        let (alice, alice_rx) = ConnectionHandle::new();
        let (bob, mut bob_rx) = ConnectionHandle::new();

        registry.register("alice", alice).await;
        drop(alice_rx);

        let report = registry.register("bob", bob).await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(drain(&mut bob_rx), vec![vec!["alice".to_string(), "bob".into()]]);

        // Still listed until its own disconnect deregisters it.
        assert_eq!(registry.snapshot().await, set(&["alice", "bob"]));
    }

    #[tokio::test]
    async fn one_copy_per_connection() {
        let registry = Registry::new();
        let (conn, mut rx) = ConnectionHandle::new();

        registry.register("laptop", conn.clone()).await;
        let report = registry.register("desktop", conn.clone()).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx).len(), 2);

        registry.deregister(&conn).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn query_answers_caller_only() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = ConnectionHandle::new();
        let (bob, mut bob_rx) = ConnectionHandle::new();
        registry.register("alice", alice).await;
        drain(&mut alice_rx);

        assert!(registry.send_snapshot(&bob).await);
        assert_eq!(drain(&mut bob_rx), vec![vec!["alice".to_string()]]);
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(registry.broadcasts_sent(), 1);
    }

    #[tokio::test]
    async fn snapshot_and_broadcast_count_track_operation_sequence() {
        let registry = Registry::new();
        let handles: Vec<_> = (0..4).map(|_| ConnectionHandle::new()).collect();
        let names = ["a", "b", "c", "d"];

        // (register?, index) pairs, including repeats and unknown removals.
        let ops = [
            (true, 0),
            (true, 1),
            (false, 2),
            (true, 2),
            (true, 0),
            (false, 1),
            (true, 3),
            (false, 0),
            (false, 0),
            (true, 1),
        ];

        let mut model = BTreeSet::new();
        for (register, i) in ops {
            let (handle, _) = &handles[i];
            if register {
                registry.register(names[i], handle.clone()).await;
                model.insert(names[i].to_string());
            } else {
                registry.deregister(handle).await;
                model.remove(names[i]);
            }
            assert_eq!(registry.snapshot().await, model);
        }

        assert_eq!(registry.broadcasts_sent(), ops.len() as u64);
        assert_eq!(model, set(&["b", "c", "d"]));
    }
}
