//! The placement table: the process-wide, authoritative key → header map
//! (spec §3, §4.1).
//!
//! Sharded by key hash (16 shards by default, matching the replacement
//! index's sharding in spec §5) so contention on unrelated keys never
//! serializes through one lock. Within a shard, mutation goes through a
//! per-entry optimistic CAS on a 64-bit version counter — contention on
//! the *same* key is resolved at the entry, not the shard.

use crate::header::{HeaderSnapshot, RecordHeader};
use crate::key::Key;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default shard count; same figure the spec gives for the replacement
/// index ("typically 16 shards").
pub const DEFAULT_SHARDS: usize = 16;

struct Entry {
    header: Mutex<RecordHeader>,
    version: AtomicU64,
}

/// Returned by [`PlacementTable::insert_or_update`] /
/// [`PlacementTable::remove`] when the caller's `expected_version` no
/// longer matches — another writer committed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasFailed {
    pub current_version: Option<u64>,
}

pub struct PlacementTable {
    shards: Vec<parking_lot::RwLock<HashMap<Key, Arc<Entry>>>>,
}

fn shard_index(key: &Key, shard_count: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % shard_count
}

impl PlacementTable {
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count)
            .map(|_| parking_lot::RwLock::new(HashMap::new()))
            .collect();
        PlacementTable { shards }
    }

    fn shard(&self, key: &Key) -> &parking_lot::RwLock<HashMap<Key, Arc<Entry>>> {
        &self.shards[shard_index(key, self.shards.len())]
    }

    /// O(1) expected lookup. Returns a copy so readers never hold the
    /// shard lock past the call (spec §4.1).
    pub fn lookup(&self, key: &Key) -> Option<HeaderSnapshot> {
        let shard = self.shard(key).read();
        shard.get(key).map(|entry| entry.header.lock().clone())
    }

    /// Return the current version of `key`, if known.
    pub fn current_version(&self, key: &Key) -> Option<u64> {
        let shard = self.shard(key).read();
        shard
            .get(key)
            .map(|entry| entry.version.load(Ordering::Acquire))
    }

    /// Insert a brand-new key or update an existing one, gated by an
    /// optimistic CAS on the version counter. `expected_version = None`
    /// means "key must not already exist"; `Some(v)` means the current
    /// version must equal `v`. On success the header's `version` field
    /// is set to the new, bumped version and the stored copy is updated
    /// to match. All state transitions (tier, state, pinned) flow
    /// through this call (spec §4.1).
    pub fn insert_or_update(
        &self,
        key: Key,
        mut header: RecordHeader,
        expected_version: Option<u64>,
    ) -> Result<u64, CasFailed> {
        let mut shard = self.shard(&key).write();
        match shard.get(&key) {
            Some(entry) => {
                let mut guard = entry.header.lock();
                let current = entry.version.load(Ordering::Acquire);
                if expected_version != Some(current) {
                    return Err(CasFailed {
                        current_version: Some(current),
                    });
                }
                let new_version = current + 1;
                header.version = new_version;
                entry.version.store(new_version, Ordering::Release);
                *guard = header;
                Ok(new_version)
            }
            None => {
                if expected_version.is_some() {
                    return Err(CasFailed {
                        current_version: None,
                    });
                }
                let new_version = 1;
                header.version = new_version;
                shard.insert(
                    key,
                    Arc::new(Entry {
                        header: Mutex::new(header),
                        version: AtomicU64::new(new_version),
                    }),
                );
                Ok(new_version)
            }
        }
    }

    /// Logical remove: sets the header's state to `Tombstone` if
    /// `expected_version` matches. Physical reclamation of the backend
    /// bytes is the caller's responsibility (spec §4.1, §3 lifecycle).
    /// Returns `Ok(None)` if the key did not exist (idempotent delete,
    /// spec §4.7).
    pub fn remove(
        &self,
        key: &Key,
        expected_version: Option<u64>,
    ) -> Result<Option<RecordHeader>, CasFailed> {
        use crate::header::RecordState;

        let shard = self.shard(key).read();
        let Some(entry) = shard.get(key) else {
            return Ok(None);
        };
        let mut guard = entry.header.lock();
        let current = entry.version.load(Ordering::Acquire);
        if let Some(expected) = expected_version {
            if expected != current {
                return Err(CasFailed {
                    current_version: Some(current),
                });
            }
        }
        let new_version = current + 1;
        guard.state = RecordState::Tombstone;
        guard.version = new_version;
        entry.version.store(new_version, Ordering::Release);
        Ok(Some(guard.clone()))
    }

    /// Drop a tombstoned key entirely from the table, e.g. once
    /// reconciliation has physically reclaimed its bytes.
    pub fn forget(&self, key: &Key) {
        self.shard(key).write().remove(key);
    }

    /// Number of entries across all shards, including tombstones not
    /// yet forgotten.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate a snapshot of all (key, header) pairs. Used by the policy
    /// evaluator's sampling pass and by manifest checkpointing.
    pub fn snapshot_all(&self) -> Vec<(Key, RecordHeader)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.read();
            out.extend(
                shard
                    .iter()
                    .map(|(k, v)| (k.clone(), v.header.lock().clone())),
            );
        }
        out
    }
}

impl Default for PlacementTable {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Handle, RecordState, Tier};
    use std::time::{Duration, SystemTime};

    fn header(tier: Tier) -> RecordHeader {
        RecordHeader {
            size: 10,
            checksum: 0,
            created_at: Duration::ZERO,
            last_access_at: Duration::ZERO,
            created_wall_clock: SystemTime::now(),
            access_count: 0,
            refcount: 0,
            tier,
            state: RecordState::Resident,
            pinned: false,
            user_tags: Default::default(),
            handle: Handle(0),
            dirty: false,
            version: 0,
        }
    }

    #[test]
    fn insert_then_lookup() {
        let table = PlacementTable::default();
        let key = Key::new(b"a".to_vec()).unwrap();
        table.insert_or_update(key.clone(), header(Tier::Hot), None).unwrap();
        let snap = table.lookup(&key).unwrap();
        assert_eq!(snap.tier, Tier::Hot);
        assert_eq!(snap.version, 1);
    }

    #[test]
    fn cas_fails_on_stale_version() {
        let table = PlacementTable::default();
        let key = Key::new(b"a".to_vec()).unwrap();
        table.insert_or_update(key.clone(), header(Tier::Hot), None).unwrap();
        let err = table
            .insert_or_update(key.clone(), header(Tier::Warm), Some(0))
            .unwrap_err();
        assert_eq!(err.current_version, Some(1));
    }

    #[test]
    fn double_insert_without_expectation_fails() {
        let table = PlacementTable::default();
        let key = Key::new(b"a".to_vec()).unwrap();
        table.insert_or_update(key.clone(), header(Tier::Hot), None).unwrap();
        let err = table.insert_or_update(key, header(Tier::Hot), None).unwrap_err();
        assert_eq!(err.current_version, Some(1));
    }

    #[test]
    fn remove_is_idempotent() {
        let table = PlacementTable::default();
        let key = Key::new(b"a".to_vec()).unwrap();
        table.insert_or_update(key.clone(), header(Tier::Hot), None).unwrap();
        assert!(table.remove(&key, None).unwrap().is_some());
        assert!(table.remove(&key, None).unwrap().is_some());
        assert_eq!(
            table.lookup(&key).unwrap().state,
            RecordState::Tombstone
        );
    }

    #[test]
    fn remove_missing_key_returns_none() {
        let table = PlacementTable::default();
        let key = Key::new(b"missing".to_vec()).unwrap();
        assert!(table.remove(&key, None).unwrap().is_none());
    }
}
