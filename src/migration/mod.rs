//! The migration engine: executes tier-to-tier moves under a
//! single-writer-per-key discipline (spec §4.5).
//!
//! Migration jobs flow through a bounded MPMC queue and are executed by
//! a pool of plain threads doing blocking backend I/O — the direct
//! replacement for the async migration flows the Design Notes call out
//! for re-expression as message passing over plain threads.
//!
//! Grounded on the teacher's own `migration/mod.rs`: the tie-break loop
//! in its default `MigrationPolicy::migrate()` (promote where headroom
//! allows, demote highest tier first once over threshold) carries over
//! into [`crate::policy`]; this module covers the execution side — the
//! copy-before-delete protocol the teacher's `lfu.rs`/`placement.rs`
//! leave to the DML layer.

pub mod reconcile;

use crate::backend::{retry_transient, DurabilityClass, PutHints, RetryBudget, TierBackend};
use crate::capacity::CapacityAccountant;
use crate::error::BackendError;
use crate::header::{RecordHeader, RecordState, Tier};
use crate::key::Key;
use crate::placement::PlacementTable;
use crate::replacement::IndexFor;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Default capacity of the migration job queue (spec §4.5).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Why a migration job was enqueued; informational, used for tie-break
/// ordering and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationReason {
    PromoteOnAccess,
    PolicyAge,
    PolicyFrequency,
    AdminRequested,
    EvictionDemote,
}

/// `{key, from_tier, to_tier, reason, enqueued_at}` (spec §3).
#[derive(Debug, Clone)]
pub struct MigrationJob {
    pub key: Key,
    pub from: Tier,
    pub to: Tier,
    pub reason: MigrationReason,
    pub enqueued_at: Duration,
}

/// Bounded MPMC queue of migration jobs (spec §4.5, default capacity
/// 1024).
pub fn make_queue(capacity: usize) -> (Sender<MigrationJob>, Receiver<MigrationJob>) {
    crossbeam_channel::bounded(capacity)
}

/// What a migration engine needs from the surrounding [`crate::store::Store`],
/// exposed as a trait so this module does not depend on `store`'s
/// concrete type (mirrors the teacher's capability-trait split between
/// `DmlWithHandler`/`DmlWithSpl` in `data_management/mod.rs`).
pub trait MigrationContext: Send + Sync {
    fn placement(&self) -> &PlacementTable;
    fn backend(&self, tier: Tier) -> &dyn TierBackend;
    fn capacity(&self, tier: Tier) -> &CapacityAccountant;
    fn index(&self, tier: Tier) -> &dyn IndexFor;
    fn retry_budget(&self) -> RetryBudget;
    fn monotonic_now(&self) -> Duration;
    fn wall_clock_now(&self) -> SystemTime;

    /// Called once a migration has committed in the placement table, so
    /// a manifest can record it. No-op by default so test contexts that
    /// don't care about durability need not implement it.
    fn on_migration_committed(&self, _key: &Key, _header: &RecordHeader) {}
}

/// Spawn `count` worker threads draining `rx` against `ctx`, running
/// until `shutdown` is set.
pub fn spawn_workers(
    ctx: Arc<dyn MigrationContext>,
    rx: Receiver<MigrationJob>,
    count: usize,
    shutdown: Arc<AtomicBool>,
) -> Vec<std::thread::JoinHandle<()>> {
    (0..count.max(1))
        .map(|idx| {
            let ctx = ctx.clone();
            let rx = rx.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name(format!("migration-worker-{idx}"))
                .spawn(move || {
                    while !shutdown.load(Ordering::Relaxed) {
                        match rx.recv_timeout(Duration::from_millis(200)) {
                            Ok(job) => {
                                if let Err(e) = execute_job(ctx.as_ref(), job) {
                                    log::warn!("migration job abandoned: {e}");
                                }
                            }
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        }
                    }
                })
                .expect("failed to spawn migration worker")
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationJobError {
    #[error("source lease CAS lost, another writer is in flight")]
    LeaseLost,
    #[error("key vanished or moved before migration started")]
    KeyGone,
    #[error("key was deleted during migration")]
    CancelledByDelete,
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("checksum mismatch during promotion; key fenced")]
    Corrupted,
}

/// Execute a single migration job end to end: copy-before-delete with
/// cancellation support (spec §4.5).
pub fn execute_job(ctx: &dyn MigrationContext, job: MigrationJob) -> Result<(), MigrationJobError> {
    let table = ctx.placement();

    // The job weakly references a key: if it has moved on or vanished
    // since enqueue, drop it silently (spec §3 "Relationships").
    let Some(current) = table.lookup(&job.key) else {
        return Err(MigrationJobError::KeyGone);
    };
    if !matches!(current.state, RecordState::Resident) || current.tier != job.from {
        return Err(MigrationJobError::KeyGone);
    }

    // Single-writer-per-key: CAS the header into `Migrating` before
    // touching any backend. This is the lease.
    let mut migrating = current.clone();
    migrating.state = RecordState::Migrating {
        from: job.from,
        to: job.to,
    };
    let lease_version = table
        .insert_or_update(job.key.clone(), migrating, Some(current.version))
        .map_err(|_| MigrationJobError::LeaseLost)?;

    let from_backend = ctx.backend(job.from);
    let to_backend = ctx.backend(job.to);
    let budget = ctx.retry_budget();

    // 1. Read bytes from the source backend.
    let bytes = match retry_transient(&budget, || from_backend.get(&current.handle)) {
        Ok(bytes) => bytes,
        Err(BackendError::Corrupted) => {
            fence_corrupted(table, &job.key, lease_version, current.clone());
            return Err(MigrationJobError::Corrupted);
        }
        Err(e) => {
            abort_to_source(table, &job.key, lease_version, current.clone());
            return Err(e.into());
        }
    };

    // 2. Write bytes to the destination backend (copy before delete).
    let new_handle = match retry_transient(&budget, || {
        to_backend.put(
            &bytes,
            PutHints {
                expected_size: Some(bytes.len() as u64),
            },
        )
    }) {
        Ok(h) => h,
        Err(e) => {
            abort_to_source(table, &job.key, lease_version, current.clone());
            return Err(e.into());
        }
    };

    let Some((reservation, _newly_under_pressure)) = ctx.capacity(job.to).reserve(bytes.len() as u64)
    else {
        let _ = to_backend.delete(&new_handle);
        abort_to_source(table, &job.key, lease_version, current.clone());
        return Err(MigrationJobError::Backend(BackendError::Permanent(
            "destination tier out of capacity".into(),
        )));
    };

    // Cancellation: a concurrent `delete` flips the header to
    // `Tombstone` while we were copying. Abort and clean up the copy we
    // just wrote instead of committing it (spec §4.5 "Cancellation").
    let still_migrating = matches!(
        table.lookup(&job.key).map(|h| h.state),
        Some(RecordState::Migrating { .. })
    );
    if !still_migrating {
        ctx.capacity(job.to).release(reservation);
        let _ = to_backend.delete(&new_handle);
        return Err(MigrationJobError::CancelledByDelete);
    }

    // 3. Commit: CAS the header to Resident at `to`.
    let mut committed = current.clone();
    committed.tier = job.to;
    // A record only needs re-persisting if its one and only copy is now
    // on a volatile tier (spec I4), regardless of whether it was dirty
    // before the move: landing on Volatile always needs a durable copy,
    // landing on Durable always has one.
    committed.dirty = to_backend.durability_class() == DurabilityClass::Volatile;
    committed.handle = new_handle.clone();
    committed.state = RecordState::Resident;
    committed.last_access_at = ctx.monotonic_now();

    match table.insert_or_update(job.key.clone(), committed.clone(), Some(lease_version)) {
        Ok(version) => {
            ctx.capacity(job.to).commit(reservation);
            ctx.index(job.to).admit(&job.key, bytes.len() as u64, ctx.monotonic_now());
            ctx.index(job.from).forget(&job.key);

            // 4. Release the source lease by deleting the orphaned copy.
            // Deletion is idempotent, so a crash here is finished by
            // startup reconciliation (see `migration::reconcile`).
            let _ = from_backend.delete(&current.handle);
            ctx.capacity(job.from).account_freed(current.size);

            let mut recorded = committed;
            recorded.version = version;
            ctx.on_migration_committed(&job.key, &recorded);
            Ok(())
        }
        Err(_) => {
            // Someone raced us between the `still_migrating` check and
            // this CAS (e.g. a delete we didn't observe). Undo the
            // destination write, leave the source untouched.
            ctx.capacity(job.to).release(reservation);
            let _ = to_backend.delete(&new_handle);
            Err(MigrationJobError::CancelledByDelete)
        }
    }
}

fn abort_to_source(table: &PlacementTable, key: &Key, lease_version: u64, mut original: RecordHeader) {
    original.state = RecordState::Resident;
    let _ = table.insert_or_update(key.clone(), original, Some(lease_version));
}

fn fence_corrupted(table: &PlacementTable, key: &Key, lease_version: u64, mut original: RecordHeader) {
    original.state = RecordState::Corrupted;
    let _ = table.insert_or_update(key.clone(), original, Some(lease_version));
}
