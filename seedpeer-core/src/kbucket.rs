//! XOR-distance k-bucket routing table, fed from the host's live connections.
//!
//! Bucket `i` holds peers whose distance to the local ID has its highest set
//! bit at position `i`. Each bucket keeps at most [`K_VALUE`] entries, least
//! recently seen first. A full bucket only admits a new peer when its oldest
//! entry is no longer connected.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, info, trace};
use tokio_util::sync::CancellationToken;

use crate::address::TransportAddr;
use crate::host::{Connectedness, Direction, Host};
use crate::identity::PeerId;
use crate::routing::{Mode, RoutingError, RoutingParams, RoutingTable};

/// Maximum entries per bucket.
pub const K_VALUE: usize = 20;

const NUM_BUCKETS: usize = 256;
/// Peers named in the bootstrap log line.
const CLOSEST_LOGGED: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub peer_id: PeerId,
    pub addr: TransportAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Already present; moved to the most-recently-seen end.
    Updated,
    /// Oldest entry was disconnected and got replaced.
    Replaced(PeerId),
    /// Bucket full of live peers, or the local ID itself.
    Rejected,
}

/// Index of the bucket `other` falls into, `None` for the local ID.
pub fn bucket_index(local: &PeerId, other: &PeerId) -> Option<usize> {
    let distance = local.distance(other);
    let mut leading_zeros = 0usize;
    for byte in distance {
        if byte == 0 {
            leading_zeros += 8;
            continue;
        }
        leading_zeros += byte.leading_zeros() as usize;
        return Some(NUM_BUCKETS - 1 - leading_zeros);
    }
    None
}

struct Inner {
    host: Arc<dyn Host>,
    local: PeerId,
    params: RoutingParams,
    buckets: Mutex<Vec<VecDeque<Entry>>>,
}

impl Inner {
    fn buckets(&self) -> MutexGuard<'_, Vec<VecDeque<Entry>>> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, entry: Entry) -> InsertOutcome {
        let Some(idx) = bucket_index(&self.local, &entry.peer_id) else {
            return InsertOutcome::Rejected;
        };
        let mut buckets = self.buckets();
        let bucket = &mut buckets[idx];
        if let Some(pos) = bucket.iter().position(|e| e.peer_id == entry.peer_id) {
            bucket.remove(pos);
            bucket.push_back(entry);
            return InsertOutcome::Updated;
        }
        if bucket.len() < K_VALUE {
            bucket.push_back(entry);
            return InsertOutcome::Inserted;
        }
        let oldest = bucket[0].peer_id;
        if self.host.connectedness(&oldest) == Connectedness::Connected {
            return InsertOutcome::Rejected;
        }
        bucket.pop_front();
        bucket.push_back(entry);
        InsertOutcome::Replaced(oldest)
    }

    /// Pull live connections into the table and drop peers the host can no longer reach.
    fn refresh(&self) -> usize {
        for conn in self.host.connections() {
            if self.params.mode == Mode::Client && conn.direction == Direction::Inbound {
                continue;
            }
            let outcome = self.insert(Entry {
                peer_id: conn.peer_id,
                addr: conn.remote_addr,
            });
            trace!("routing table insert {}: {:?}", conn.peer_id, outcome);
        }
        let mut buckets = self.buckets();
        for bucket in buckets.iter_mut() {
            bucket.retain(|e| self.host.connectedness(&e.peer_id) != Connectedness::CannotConnect);
        }
        buckets.iter().map(VecDeque::len).sum()
    }
}

/// Routing table owned by the bootstrapper.
pub struct KBucketTable {
    inner: Arc<Inner>,
    shutdown: CancellationToken,
    refreshing: AtomicBool,
}

impl KBucketTable {
    /// Build an empty table. `shutdown` stops the refresh loop started by `bootstrap`.
    pub fn new(
        host: Arc<dyn Host>,
        params: &RoutingParams,
        shutdown: CancellationToken,
    ) -> Result<Self, RoutingError> {
        params.validate()?;
        let local = host.peer_id();
        Ok(Self {
            inner: Arc::new(Inner {
                host,
                local,
                params: params.clone(),
                buckets: Mutex::new(vec![VecDeque::new(); NUM_BUCKETS]),
            }),
            shutdown,
            refreshing: AtomicBool::new(false),
        })
    }

    pub fn protocol_id(&self) -> &str {
        &self.inner.params.protocol_id
    }

    pub fn insert(&self, entry: Entry) -> InsertOutcome {
        self.inner.insert(entry)
    }

    #[cfg(test)]
    pub(crate) fn remove(&self, peer: &PeerId) -> bool {
        let Some(idx) = bucket_index(&self.inner.local, peer) else {
            return false;
        };
        let mut buckets = self.inner.buckets();
        let bucket = &mut buckets[idx];
        match bucket.iter().position(|e| e.peer_id == *peer) {
            Some(pos) => {
                bucket.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        let Some(idx) = bucket_index(&self.inner.local, peer) else {
            return false;
        };
        self.inner.buckets()[idx].iter().any(|e| e.peer_id == *peer)
    }

    pub fn len(&self) -> usize {
        self.inner.buckets().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `count` known peers, closest to `target` first.
    pub fn closest_peers(&self, target: &PeerId, count: usize) -> Vec<Entry> {
        let mut all: Vec<Entry> = self
            .inner
            .buckets()
            .iter()
            .flat_map(|b| b.iter().cloned())
            .collect();
        all.sort_by_key(|e| e.peer_id.distance(target));
        all.truncate(count);
        all
    }

    fn spawn_refresh_loop(&self) {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let period = inner.params.refresh_period;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        let size = inner.refresh();
                        debug!("{} routing table refreshed: {} peers", inner.local, size);
                    }
                }
            }
            debug!("{} routing table refresh stopped", inner.local);
        });
    }
}

#[async_trait]
impl RoutingTable for KBucketTable {
    async fn bootstrap(&self) -> Result<(), RoutingError> {
        let size = self.inner.refresh();
        self.spawn_refresh_loop();
        if size == 0 {
            debug!("{} routing table bootstrapped empty", self.inner.local);
            return Ok(());
        }
        let closest: Vec<String> = self
            .closest_peers(&self.inner.local, CLOSEST_LOGGED)
            .iter()
            .map(|e| e.peer_id.to_string())
            .collect();
        info!(
            "{} routing table bootstrapped with {} peers ({}), closest: {}",
            self.inner.local,
            size,
            self.protocol_id(),
            closest.join(", ")
        );
        Ok(())
    }
}
