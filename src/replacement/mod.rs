//! Per-tier replacement index (spec §4.4).
//!
//! Each tier owns one [`ReplacementIndex`], sharded by key hash so
//! `touch` contention spreads across shards and victim selection holds
//! only one shard at a time (spec §5).

pub mod lfu;
pub mod lru;

use crate::key::Key;
use parking_lot::RwLock;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Default shard count, matching the placement table (spec §5).
pub const DEFAULT_SHARDS: usize = crate::placement::DEFAULT_SHARDS;

/// Replacement policy selectable per tier (spec §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReplacementPolicyKind {
    Lru,
    Lfu,
    Arc,
}

/// A single tier's resident-ranking structure. Implementors must not
/// block for longer than a shard-local operation (spec §4.4).
pub trait ReplacementIndex: Send + Sync {
    /// Record a read/write on `key`.
    fn touch(&mut self, key: &Key, now: Duration);

    /// Register that `key` has entered the tier.
    fn admit(&mut self, key: &Key, size: u64, now: Duration);

    /// Remove `key` from consideration (it left the tier).
    fn forget(&mut self, key: &Key);

    /// Return keys in eviction order, skipping any for which `skip`
    /// returns `true` (pinned, lease-held, or migrating — spec I3,
    /// §4.4), stopping once their cumulative size reaches
    /// `bytes_needed`. Tie-break: older `last_access_at`, then larger
    /// `size`, then lexicographic key (spec §4.4).
    fn victims(&self, bytes_needed: u64, skip: &dyn Fn(&Key) -> bool) -> Vec<Key>;
}

/// Sharded wrapper around a per-shard [`ReplacementIndex`] factory,
/// giving every tier the same sharding discipline regardless of which
/// concrete policy it uses.
pub struct ShardedIndex<I: ReplacementIndex> {
    shards: Vec<RwLock<I>>,
}

fn shard_index(key: &Key, shard_count: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % shard_count
}

impl<I: ReplacementIndex> ShardedIndex<I> {
    pub fn new(make_shard: impl Fn() -> I, shard_count: usize) -> Self {
        ShardedIndex {
            shards: (0..shard_count).map(|_| RwLock::new(make_shard())).collect(),
        }
    }

    pub fn touch(&self, key: &Key, now: Duration) {
        self.shards[shard_index(key, self.shards.len())]
            .write()
            .touch(key, now);
    }

    pub fn admit(&self, key: &Key, size: u64, now: Duration) {
        self.shards[shard_index(key, self.shards.len())]
            .write()
            .admit(key, size, now);
    }

    pub fn forget(&self, key: &Key) {
        self.shards[shard_index(key, self.shards.len())].write().forget(key);
    }

    /// Collect victims across all shards, round-robining until
    /// `bytes_needed` bytes are covered or every shard is exhausted.
    /// Holds one shard lock at a time (spec §5).
    pub fn victims(&self, bytes_needed: u64, skip: &dyn Fn(&Key) -> bool) -> Vec<Key> {
        let mut out = Vec::new();
        let mut remaining = bytes_needed;
        for shard in &self.shards {
            if remaining == 0 {
                break;
            }
            let picked = shard.read().victims(remaining, skip);
            remaining = remaining.saturating_sub(picked.len() as u64);
            out.extend(picked);
        }
        out
    }
}

/// Build the default replacement index for a tier (spec §6 config:
/// `replacement_policy: LRU|LFU|ARC`).
pub fn build_default(kind: ReplacementPolicyKind, shard_count: usize) -> Box<dyn IndexFor> {
    match kind {
        ReplacementPolicyKind::Lru => Box::new(ShardedIndex::new(
            || lru::SegmentedLru::new(u64::MAX, 0.8),
            shard_count,
        )),
        ReplacementPolicyKind::Arc => Box::new(ShardedIndex::new(
            || lru::SegmentedLru::new(u64::MAX, 0.5),
            shard_count,
        )),
        ReplacementPolicyKind::Lfu => Box::new(ShardedIndex::new(lfu::LfuIndex::new, shard_count)),
    }
}

/// Object-safe facade over [`ShardedIndex<I>`] so [`Tier`] can hold a
/// boxed index regardless of the concrete policy (spec §9: closed set
/// of tags, polymorphism through the contract).
pub trait IndexFor: Send + Sync {
    fn touch(&self, key: &Key, now: Duration);
    fn admit(&self, key: &Key, size: u64, now: Duration);
    fn forget(&self, key: &Key);
    fn victims(&self, bytes_needed: u64, skip: &dyn Fn(&Key) -> bool) -> Vec<Key>;
}

impl<I: ReplacementIndex> IndexFor for ShardedIndex<I> {
    fn touch(&self, key: &Key, now: Duration) {
        ShardedIndex::touch(self, key, now)
    }
    fn admit(&self, key: &Key, size: u64, now: Duration) {
        ShardedIndex::admit(self, key, size, now)
    }
    fn forget(&self, key: &Key) {
        ShardedIndex::forget(self, key)
    }
    fn victims(&self, bytes_needed: u64, skip: &dyn Fn(&Key) -> bool) -> Vec<Key> {
        ShardedIndex::victims(self, bytes_needed, skip)
    }
}
