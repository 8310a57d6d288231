//! Record header: the fixed-layout metadata tracked for every key.
//!
//! The header is the single piece of state the placement table owns and
//! the only thing statistics/policy are allowed to inspect (Design
//! Notes: "restrict statistics to the fixed header").

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Maximum number of entries in [`RecordHeader::user_tags`].
pub const MAX_USER_TAGS: usize = 16;

/// Ordered set Hot < Warm < Cold < Glacier (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
    Glacier,
}

impl Tier {
    /// All tiers in ascending (fastest-first) order.
    pub const ALL: [Tier; 4] = [Tier::Hot, Tier::Warm, Tier::Cold, Tier::Glacier];

    /// The tier directly above this one, if any.
    pub fn promote(self) -> Option<Tier> {
        match self {
            Tier::Hot => None,
            Tier::Warm => Some(Tier::Hot),
            Tier::Cold => Some(Tier::Warm),
            Tier::Glacier => Some(Tier::Cold),
        }
    }

    /// The tier directly below this one, if any.
    pub fn demote(self) -> Option<Tier> {
        match self {
            Tier::Hot => Some(Tier::Warm),
            Tier::Warm => Some(Tier::Cold),
            Tier::Cold => Some(Tier::Glacier),
            Tier::Glacier => None,
        }
    }

    /// Number of steps between `self` and `other`; positive if `other` is
    /// lower (colder) than `self`.
    pub fn steps_to(self, other: Tier) -> i8 {
        other as i8 - self as i8
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// State machine position of a key (spec §4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    Resident,
    Migrating { from: Tier, to: Tier },
    Tombstone,
    /// Checksum mismatch observed on a durable tier; reads are refused
    /// until the key is deleted and recreated (spec §4.5 "Promotion from
    /// durable tier").
    Corrupted,
}

/// An opaque backend-issued identifier for retrieving bytes (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle(pub u64);

/// Small map of caller-supplied tags used by policy rules (spec §3).
pub type UserTags = IndexMap<String, String>;

/// Fixed-layout metadata stored with every resident, and cached in the
/// placement table (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordHeader {
    pub size: u64,
    pub checksum: u64,
    pub created_at: Duration,
    pub last_access_at: Duration,
    pub created_wall_clock: SystemTime,
    pub access_count: u32,
    pub refcount: u32,
    pub tier: Tier,
    pub state: RecordState,
    pub pinned: bool,
    pub user_tags: UserTags,
    /// Handle into `tier`'s backend; `None` only while `state` is
    /// `Migrating` and the destination write has not yet committed.
    pub handle: Handle,
    /// Set when the record has been written to a volatile tier but not
    /// yet to a durable one (spec I4).
    pub dirty: bool,
    /// Bumped on every committed `insert_or_update` (spec §4.1).
    pub version: u64,
}

impl RecordHeader {
    /// `true` if eviction must refuse this key (spec I3).
    pub fn eviction_forbidden(&self) -> bool {
        self.pinned || self.refcount > 0
    }

    /// Record an access: bump `access_count` (saturating) and
    /// `last_access_at`.
    pub fn record_access(&mut self, now: Duration) {
        self.last_access_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    pub fn set_tags(&mut self, tags: UserTags) -> Result<(), TooManyTags> {
        if tags.len() > MAX_USER_TAGS {
            return Err(TooManyTags(tags.len()));
        }
        self.user_tags = tags;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("user_tags has {0} entries, exceeding the limit of {MAX_USER_TAGS}")]
pub struct TooManyTags(pub usize);

/// A point-in-time copy of a header, returned by read-only lookups so
/// callers never hold the placement table's lock (spec §4.1).
pub type HeaderSnapshot = RecordHeader;
