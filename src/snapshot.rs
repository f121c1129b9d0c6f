use crate::contact::Contact;
use crate::ingest::ConnectionStatus;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Normalized contacts from one successful ingestion.
#[derive(Debug)]
pub struct Snapshot {
    pub contacts: Arc<Vec<Contact>>,
    pub fetched_at: Instant,
    /// Connection state reported by the load that produced it.
    pub status: ConnectionStatus,
}

impl Snapshot {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// In-memory snapshot with a time-to-live. Writers replace the whole
/// snapshot, so readers see either the previous one or the new one.
#[derive(Debug)]
pub struct SnapshotCache {
    ttl: Duration,
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Snapshot younger than the TTL.
    pub fn get(&self) -> Option<Arc<Snapshot>> {
        self.get_any().filter(|s| self.is_fresh(s))
    }

    /// Latest snapshot regardless of age.
    pub fn get_any(&self) -> Option<Arc<Snapshot>> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    pub fn is_fresh(&self, snapshot: &Snapshot) -> bool {
        snapshot.age() < self.ttl
    }

    pub fn set(&self, contacts: Vec<Contact>, status: ConnectionStatus) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot {
            contacts: Arc::new(contacts),
            fetched_at: Instant::now(),
            status,
        });
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(snapshot.clone());
        snapshot
    }

    pub fn invalidate(&self) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}
