//! Startup reconciliation: repairs state left behind by a crash mid
//! migration or mid delete (spec §4.5, §6 "Startup").
//!
//! On a clean shutdown no key is ever left in `Migrating` state and no
//! backend holds a handle the placement table doesn't reference. A
//! crash can violate both. Reconciliation runs once at boot, before the
//! store accepts traffic.

use crate::checksum;
use crate::header::{Handle, RecordHeader, RecordState, Tier};
use crate::migration::MigrationContext;
use std::collections::HashSet;

/// How to resolve a key caught mid-migration at startup (spec §6
/// `startup.abort_interrupted_migrations`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AbortPreference {
    /// Always revert to the source tier; never trust a destination copy
    /// that was never committed.
    PreferSource,
    /// Best-effort: if an unreferenced handle on the destination backend
    /// verifies against the header's content checksum, commit to it
    /// instead of reverting. Falls back to `PreferSource` behavior when
    /// no such handle is found.
    PreferTarget,
}

/// What reconciliation did for one tier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Keys found `Migrating` and rolled back to `Resident` at their
    /// source tier (the destination write, if any, is presumed
    /// incomplete and is not trusted).
    pub aborted_migrations: u64,
    /// Backend handles with no referencing header, deleted.
    pub orphaned_handles: u64,
}

impl ReconcileReport {
    pub fn merge(self, other: ReconcileReport) -> ReconcileReport {
        ReconcileReport {
            aborted_migrations: self.aborted_migrations + other.aborted_migrations,
            orphaned_handles: self.orphaned_handles + other.orphaned_handles,
        }
    }
}

/// Run reconciliation across every tier (spec §6: "abort_interrupted_migrations").
pub fn reconcile_all(ctx: &dyn MigrationContext, preference: AbortPreference) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    // Pass 1: any key left mid-migration did not survive the crash.
    // `PreferSource` always reverts to the source tier, which we know is
    // intact (copy-before-delete guarantees the source was never deleted
    // before commit). `PreferTarget` first looks for an unreferenced
    // handle on the destination backend whose bytes still verify against
    // the header's recorded checksum, and commits to it instead — the
    // destination write may have completed before the crash even though
    // it was never committed to the header.
    let snapshot = ctx.placement().snapshot_all();
    let referenced_by_tier: HashSet<(Tier, u64)> = snapshot
        .iter()
        .filter(|(_, h)| !matches!(h.state, RecordState::Tombstone))
        .map(|(_, h)| (h.tier, h.handle.0))
        .collect();

    for (key, header) in snapshot.clone() {
        if let RecordState::Migrating { from, to } = header.state {
            let rescued = if preference == AbortPreference::PreferTarget {
                rescue_from_destination(ctx, &header, to, &referenced_by_tier)
            } else {
                None
            };

            let mut updated = header.clone();
            if let Some(handle) = rescued {
                updated.state = RecordState::Resident;
                updated.tier = to;
                updated.handle = handle;
            } else {
                updated.state = RecordState::Resident;
                updated.tier = from;
            }
            if ctx
                .placement()
                .insert_or_update(key, updated, Some(header.version))
                .is_ok()
            {
                report.aborted_migrations += 1;
            }
        }
    }

    // Pass 2: sweep each tier's backend for handles no header
    // references any more (an interrupted migration's half-written
    // destination copy, or a delete whose backend-side cleanup never
    // ran).
    let snapshot = ctx.placement().snapshot_all();
    for tier in Tier::ALL {
        let referenced: HashSet<u64> = snapshot
            .iter()
            .filter(|(_, h)| h.tier == tier && !matches!(h.state, RecordState::Tombstone))
            .map(|(_, h)| h.handle.0)
            .collect();
        for handle in ctx.backend(tier).list_handles() {
            if !referenced.contains(&handle.0) {
                if ctx.backend(tier).delete(&handle).is_ok() {
                    report.orphaned_handles += 1;
                }
            }
        }
    }

    report
}

/// Look for an unreferenced handle on `to`'s backend whose bytes verify
/// against `header.checksum`. Returns the first match; there should
/// never be more than one in practice since only one migration job can
/// hold the lease for a given key at a time.
fn rescue_from_destination(
    ctx: &dyn MigrationContext,
    header: &RecordHeader,
    to: Tier,
    referenced: &HashSet<(Tier, u64)>,
) -> Option<Handle> {
    ctx.backend(to)
        .list_handles()
        .into_iter()
        .filter(|h| !referenced.contains(&(to, h.0)))
        .find(|h| {
            ctx.backend(to)
                .get(h)
                .map(|bytes| checksum::verify(&bytes, header.checksum))
                .unwrap_or(false)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::{PutHints, TierBackend, TierBackendHandle};
    use crate::capacity::CapacityAccountant;
    use crate::header::{Handle, RecordHeader, UserTags};
    use crate::key::Key;
    use crate::placement::PlacementTable;
    use crate::replacement::IndexFor;
    use std::collections::HashMap;
    use std::time::{Duration, SystemTime};

    struct TestCtx {
        placement: PlacementTable,
        backends: HashMap<Tier, TierBackendHandle>,
        capacities: HashMap<Tier, CapacityAccountant>,
    }

    struct NullIndex;
    impl IndexFor for NullIndex {
        fn touch(&self, _key: &Key, _now: Duration) {}
        fn admit(&self, _key: &Key, _size: u64, _now: Duration) {}
        fn forget(&self, _key: &Key) {}
        fn victims(&self, _bytes_needed: u64, _skip: &dyn Fn(&Key) -> bool) -> Vec<Key> {
            Vec::new()
        }
    }

    impl MigrationContext for TestCtx {
        fn placement(&self) -> &PlacementTable {
            &self.placement
        }
        fn backend(&self, tier: Tier) -> &dyn TierBackend {
            self.backends.get(&tier).unwrap()
        }
        fn capacity(&self, tier: Tier) -> &CapacityAccountant {
            self.capacities.get(&tier).unwrap()
        }
        fn index(&self, _tier: Tier) -> &dyn IndexFor {
            static NULL: NullIndex = NullIndex;
            &NULL
        }
        fn retry_budget(&self) -> crate::backend::RetryBudget {
            crate::backend::RetryBudget::default()
        }
        fn monotonic_now(&self) -> Duration {
            Duration::from_secs(1)
        }
        fn wall_clock_now(&self) -> SystemTime {
            SystemTime::now()
        }
    }

    fn ctx() -> TestCtx {
        let mut backends = HashMap::new();
        backends.insert(Tier::Hot, TierBackendHandle::Memory(MemoryBackend::new(None)));
        backends.insert(Tier::Warm, TierBackendHandle::Memory(MemoryBackend::new(None)));
        let mut capacities = HashMap::new();
        capacities.insert(Tier::Hot, CapacityAccountant::new(None, 1, 2));
        capacities.insert(Tier::Warm, CapacityAccountant::new(None, 1, 2));
        TestCtx {
            placement: PlacementTable::default(),
            backends,
            capacities,
        }
    }

    fn header(tier: Tier, handle: Handle, state: RecordState) -> RecordHeader {
        RecordHeader {
            size: 1,
            checksum: 0,
            created_at: Duration::ZERO,
            last_access_at: Duration::ZERO,
            created_wall_clock: SystemTime::now(),
            access_count: 0,
            refcount: 0,
            tier,
            state,
            pinned: false,
            user_tags: UserTags::new(),
            handle,
            dirty: false,
            version: 0,
        }
    }

    #[test]
    fn aborts_interrupted_migration_back_to_source() {
        let ctx = ctx();
        let handle = ctx.backend(Tier::Hot).put(b"x", PutHints::default()).unwrap();
        let key = Key::new(b"a".to_vec()).unwrap();
        ctx.placement()
            .insert_or_update(
                key.clone(),
                header(
                    Tier::Hot,
                    handle,
                    RecordState::Migrating {
                        from: Tier::Hot,
                        to: Tier::Warm,
                    },
                ),
                None,
            )
            .unwrap();

        let report = reconcile_all(&ctx, AbortPreference::PreferSource);
        assert_eq!(report.aborted_migrations, 1);
        let snap = ctx.placement().lookup(&key).unwrap();
        assert_eq!(snap.tier, Tier::Hot);
        assert_eq!(snap.state, RecordState::Resident);
    }

    #[test]
    fn deletes_orphaned_backend_handles() {
        let ctx = ctx();
        // A handle with no placement table entry at all — simulates a
        // destination write that crashed before any header update.
        ctx.backend(Tier::Warm).put(b"orphan", PutHints::default()).unwrap();

        let report = reconcile_all(&ctx, AbortPreference::PreferSource);
        assert_eq!(report.orphaned_handles, 1);
        assert!(ctx.backend(Tier::Warm).list_handles().is_empty());
    }

    #[test]
    fn resident_handles_survive_reconciliation() {
        let ctx = ctx();
        let handle = ctx.backend(Tier::Hot).put(b"keep", PutHints::default()).unwrap();
        let key = Key::new(b"a".to_vec()).unwrap();
        ctx.placement()
            .insert_or_update(key, header(Tier::Hot, handle.clone(), RecordState::Resident), None)
            .unwrap();

        let report = reconcile_all(&ctx, AbortPreference::PreferSource);
        assert_eq!(report.orphaned_handles, 0);
        assert!(ctx.backend(Tier::Hot).get(&handle).is_ok());
    }

    #[test]
    fn prefer_target_rescues_verified_destination_copy() {
        let ctx = ctx();
        let src_handle = ctx.backend(Tier::Hot).put(b"payload", PutHints::default()).unwrap();
        let dst_handle = ctx.backend(Tier::Warm).put(b"payload", PutHints::default()).unwrap();
        let key = Key::new(b"a".to_vec()).unwrap();
        let mut h = header(
            Tier::Hot,
            src_handle,
            RecordState::Migrating {
                from: Tier::Hot,
                to: Tier::Warm,
            },
        );
        h.checksum = crate::checksum::checksum(b"payload");
        ctx.placement().insert_or_update(key.clone(), h, None).unwrap();

        let report = reconcile_all(&ctx, AbortPreference::PreferTarget);
        assert_eq!(report.aborted_migrations, 1);
        let snap = ctx.placement().lookup(&key).unwrap();
        assert_eq!(snap.tier, Tier::Warm);
        assert_eq!(snap.handle, dst_handle);
        assert_eq!(snap.state, RecordState::Resident);
    }

    #[test]
    fn prefer_target_falls_back_when_no_destination_copy_verifies() {
        let ctx = ctx();
        let src_handle = ctx.backend(Tier::Hot).put(b"payload", PutHints::default()).unwrap();
        let key = Key::new(b"a".to_vec()).unwrap();
        let mut h = header(
            Tier::Hot,
            src_handle,
            RecordState::Migrating {
                from: Tier::Hot,
                to: Tier::Warm,
            },
        );
        h.checksum = crate::checksum::checksum(b"payload");
        ctx.placement().insert_or_update(key.clone(), h, None).unwrap();

        let report = reconcile_all(&ctx, AbortPreference::PreferTarget);
        assert_eq!(report.aborted_migrations, 1);
        let snap = ctx.placement().lookup(&key).unwrap();
        assert_eq!(snap.tier, Tier::Hot);
    }
}
