//! The coordinator: the public API surface of the store (spec §4.7).
//!
//! `Store` is an explicit value a caller constructs and owns, replacing
//! the singleton "memory manager" the Design Notes call out for
//! redesign. Internally it is a thin handle around `Arc<Shared>`, the
//! type that actually implements [`MigrationContext`] so the migration
//! engine and policy evaluator can operate against it without knowing
//! about `Store` itself.

use crate::backend::file::FileBackend;
use crate::backend::memory::MemoryBackend;
use crate::backend::{retry_transient, DurabilityClass, PutHints, RetryBudget, TierBackend, TierBackendHandle, TierStat};
use crate::capacity::CapacityAccountant;
use crate::checksum;
use crate::config::{BackendKind, Config};
use crate::error::{BackendError as CoreBackendError, Error, Result};
use crate::header::{RecordHeader, RecordState, Tier, UserTags};
use crate::key::Key;
use crate::manifest::{self, ManifestOp, ManifestRecord, ManifestWriter};
use crate::migration::reconcile::{reconcile_all, ReconcileReport};
use crate::migration::{self, make_queue, spawn_workers, MigrationContext, MigrationJob, MigrationReason};
use crate::placement::PlacementTable;
use crate::policy::{PolicyEvaluator, Rule};
use crate::replacement::{build_default, IndexFor, DEFAULT_SHARDS};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct TierState {
    backend: TierBackendHandle,
    capacity: CapacityAccountant,
    index: Box<dyn IndexFor>,
}

/// Everything the migration engine, policy evaluator, and reconciler
/// need, behind `Arc` so background threads can outlive any single
/// `Store` call (spec §5: coordinator safe to call from any thread).
struct Shared {
    placement: PlacementTable,
    tiers: HashMap<Tier, TierState>,
    retry_budget: RetryBudget,
    baseline: Instant,
    manifest: Mutex<ManifestWriter>,
    migration_tx: Sender<MigrationJob>,
    policy: PolicyEvaluator,
    shutdown: Arc<AtomicBool>,
}

impl Shared {
    fn tier_state(&self, tier: Tier) -> &TierState {
        self.tiers.get(&tier).expect("every Tier is configured at open()")
    }

    fn translate_backend_error(e: CoreBackendError) -> Error {
        match e {
            CoreBackendError::Corrupted => Error::Corrupted,
            CoreBackendError::NotFound => Error::NotFound,
            CoreBackendError::Transient(m) | CoreBackendError::Permanent(m) => Error::BackendUnavailable(m),
        }
    }

    /// Free capacity in `tier` by demoting resident keys the
    /// replacement index picks, synchronously (spec §4.7 "triggers
    /// synchronous eviction demand and retries once").
    fn make_room(&self, tier: Tier, bytes_needed: u64) -> bool {
        let Some(demote_to) = tier.demote() else {
            return false;
        };
        let placement = &self.placement;
        let skip = move |key: &Key| -> bool {
            match placement.lookup(key) {
                Some(h) => h.tier != tier || !matches!(h.state, RecordState::Resident) || h.eviction_forbidden(),
                None => true,
            }
        };
        let victims = self.tier_state(tier).index.victims(bytes_needed, &skip);
        if victims.is_empty() {
            return false;
        }
        let mut freed_any = false;
        for key in victims {
            let job = MigrationJob {
                key,
                from: tier,
                to: demote_to,
                reason: MigrationReason::EvictionDemote,
                enqueued_at: self.monotonic_now(),
            };
            if migration::execute_job(self, job).is_ok() {
                freed_any = true;
            }
        }
        freed_any
    }

    /// Reserve `size` bytes on `tier`, evicting synchronously once and
    /// retrying if the first attempt fails (spec §4.7 `put`).
    fn reserve_with_eviction(&self, tier: Tier, size: u64) -> Result<crate::capacity::Reservation> {
        let accountant = &self.tier_state(tier).capacity;
        if let Some((reservation, _)) = accountant.reserve(size) {
            return Ok(reservation);
        }
        if !self.make_room(tier, size) {
            return Err(Error::NoCapacity);
        }
        accountant.reserve(size).map(|(r, _)| r).ok_or(Error::NoCapacity)
    }

    fn append_manifest(&self, record: ManifestRecord) {
        if let Err(e) = self.manifest.lock().append(&record) {
            log::warn!("manifest append failed: {e}");
        }
    }
}

impl MigrationContext for Shared {
    fn placement(&self) -> &PlacementTable {
        &self.placement
    }
    fn backend(&self, tier: Tier) -> &dyn TierBackend {
        &self.tier_state(tier).backend
    }
    fn capacity(&self, tier: Tier) -> &CapacityAccountant {
        &self.tier_state(tier).capacity
    }
    fn index(&self, tier: Tier) -> &dyn IndexFor {
        self.tier_state(tier).index.as_ref()
    }
    fn retry_budget(&self) -> RetryBudget {
        self.retry_budget
    }
    fn monotonic_now(&self) -> Duration {
        Instant::now().duration_since(self.baseline)
    }
    fn wall_clock_now(&self) -> SystemTime {
        SystemTime::now()
    }
    fn on_migration_committed(&self, key: &Key, header: &RecordHeader) {
        self.append_manifest(ManifestRecord {
            op: ManifestOp::Migrate,
            key: key.clone(),
            tier: header.tier,
            handle: header.handle.clone(),
            size: header.size,
            checksum: header.checksum,
            version: header.version,
            wall_clock: SystemTime::now(),
        });
    }
}

/// Options accepted by [`Store::put`] (spec §4.7).
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub target_tier: Tier,
    pub mode: WriteMode,
    pub overwrite: bool,
    pub pin: bool,
    pub tags: UserTags,
}

impl Default for PutOptions {
    fn default() -> Self {
        PutOptions {
            target_tier: Tier::Hot,
            mode: WriteMode::BestEffort,
            overwrite: true,
            pin: false,
            tags: UserTags::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    BestEffort,
    Durable,
}

/// Options accepted by [`Store::get`] (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    pub promote_on_hit: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        GetOptions { promote_on_hit: true }
    }
}

/// A read-only view of a record's bytes. Decrements the header's
/// `refcount` on drop (spec §4.7 `get`: "decrementing refcount on
/// drop").
pub struct ReadHandle {
    bytes: Vec<u8>,
    key: Key,
    shared: Arc<Shared>,
}

impl Deref for ReadHandle {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for ReadHandle {
    fn drop(&mut self) {
        for _ in 0..8 {
            let Some(current) = self.shared.placement.lookup(&self.key) else {
                return;
            };
            if current.refcount == 0 {
                return;
            }
            let mut updated = current.clone();
            updated.refcount -= 1;
            if self
                .shared
                .placement
                .insert_or_update(self.key.clone(), updated, Some(current.version))
                .is_ok()
            {
                return;
            }
        }
    }
}

/// Point-in-time statistics for one tier (spec §4.7 `stats`).
#[derive(Debug, Clone, Copy)]
pub struct TierStats {
    pub tier: Tier,
    pub stat: TierStat,
    pub under_pressure: bool,
}

/// The multi-tier memory store's public coordinator.
pub struct Store {
    shared: Arc<Shared>,
    migration_workers: Vec<std::thread::JoinHandle<()>>,
    reconciler: Option<std::thread::JoinHandle<()>>,
    policy_thread: Option<std::thread::JoinHandle<()>>,
}

impl Store {
    /// Open a store from `config`, recovering and reconciling manifest
    /// state under `manifest_dir` (spec §6 "Startup").
    pub fn open(config: Config, manifest_dir: &Path) -> std::result::Result<Store, OpenError> {
        config.validate()?;

        let recovered = manifest::recover(manifest_dir)?;
        let wall_now = SystemTime::now();

        // Shift the monotonic baseline back by the oldest recovered
        // record's real elapsed age, so every record's rebased
        // `created_at` is non-negative and every record's age is
        // preserved relative to the single shared baseline (see
        // DESIGN.md "Monotonic baseline across restart").
        let max_elapsed = recovered
            .headers
            .values()
            .map(|h| wall_now.duration_since(h.created_wall_clock).unwrap_or(Duration::ZERO))
            .max()
            .unwrap_or(Duration::ZERO);
        let baseline = Instant::now().checked_sub(max_elapsed).unwrap_or_else(Instant::now);
        let monotonic_now = Instant::now().duration_since(baseline);

        let mut tiers = HashMap::new();
        for tier_config in &config.tiers {
            let backend = match &tier_config.backend_kind {
                BackendKind::Memory => TierBackendHandle::Memory(MemoryBackend::new(tier_config.capacity_bytes)),
                BackendKind::File { path } => {
                    TierBackendHandle::File(FileBackend::open(path.clone(), tier_config.capacity_bytes)?)
                }
            };
            let capacity = CapacityAccountant::new(
                tier_config.capacity_bytes,
                tier_config.watermark_low,
                tier_config.watermark_high,
            );
            let index = build_default(tier_config.replacement_policy, DEFAULT_SHARDS);
            tiers.insert(tier_config.tier, TierState { backend, capacity, index });
        }

        let placement = PlacementTable::default();
        for (key, mut header) in recovered.headers {
            manifest::rebase_monotonic(&mut header, monotonic_now, wall_now);
            header.refcount = 0;
            if let Some(state) = tiers.get(&header.tier) {
                if let Some((reservation, _)) = state.capacity.reserve(header.size) {
                    state.capacity.commit(reservation);
                }
                state.index.admit(&key, header.size, header.created_at);
            }
            let _ = placement.insert_or_update(key, header, None);
        }

        let manifest_writer = ManifestWriter::open(manifest_dir)?;
        let (migration_tx, migration_rx) = make_queue(migration::DEFAULT_QUEUE_CAPACITY);

        let shared = Arc::new(Shared {
            placement,
            tiers,
            retry_budget: config.retries,
            baseline,
            manifest: Mutex::new(manifest_writer),
            migration_tx,
            policy: PolicyEvaluator::new(config.policy.rules.clone(), config.policy.eval_interval),
            shutdown: Arc::new(AtomicBool::new(false)),
        });

        if config.startup.reconcile_on_boot {
            let report = reconcile_all(shared.as_ref(), config.startup.abort_interrupted_migrations);
            log_reconcile(report);
        }

        let migration_workers = spawn_workers(
            shared.clone() as Arc<dyn MigrationContext>,
            migration_rx,
            config.workers.migration.max(1),
            shared.shutdown.clone(),
        );

        let reconciler = spawn_reconciler(shared.clone(), config.startup.abort_interrupted_migrations);
        let policy_thread = spawn_policy(shared.clone());

        Ok(Store {
            shared,
            migration_workers,
            reconciler: Some(reconciler),
            policy_thread: Some(policy_thread),
        })
    }

    /// Write `bytes` under `key` (spec §4.7 `put`).
    pub fn put(&self, key: Key, bytes: &[u8], opts: PutOptions) -> Result<()> {
        if let Some(existing) = self.shared.placement.lookup(&key) {
            if !matches!(existing.state, RecordState::Tombstone) && !opts.overwrite {
                return Err(Error::AlreadyExists);
            }
        }

        let write_tier = if opts.mode == WriteMode::Durable {
            self.nearest_durable_tier(opts.target_tier)?
        } else {
            opts.target_tier
        };

        // A record that can never fit `write_tier` even when empty is a
        // client error, not a capacity failure eviction could resolve
        // (spec §7/§8: oversized record for target tier → InvalidArgument).
        if let Some(cap) = self.shared.capacity(write_tier).info().capacity {
            if bytes.len() as u64 > cap {
                return Err(Error::InvalidArgument(format!(
                    "record size {} exceeds {write_tier:?}'s capacity of {cap} bytes",
                    bytes.len()
                )));
            }
        }

        let reservation = self.shared.reserve_with_eviction(write_tier, bytes.len() as u64)?;
        let backend = self.shared.backend(write_tier);
        let handle = match retry_transient(&self.shared.retry_budget, || backend.put(bytes, PutHints::default())) {
            Ok(h) => h,
            Err(e) => {
                self.shared.tier_state(write_tier).capacity.release(reservation);
                return Err(Shared::translate_backend_error(e));
            }
        };

        let now = self.shared.monotonic_now();
        let wall_now = self.shared.wall_clock_now();
        let content_checksum = checksum::checksum(bytes);
        let mut tags = opts.tags;
        if tags.len() > crate::header::MAX_USER_TAGS {
            self.shared.tier_state(write_tier).capacity.release(reservation);
            let _ = backend.delete(&handle);
            return Err(Error::InvalidArgument(format!(
                "user_tags has {} entries, exceeding the limit of {}",
                tags.len(),
                crate::header::MAX_USER_TAGS
            )));
        }
        tags.shrink_to_fit();

        let header = RecordHeader {
            size: bytes.len() as u64,
            checksum: content_checksum,
            created_at: now,
            last_access_at: now,
            created_wall_clock: wall_now,
            access_count: 0,
            refcount: 0,
            tier: write_tier,
            state: RecordState::Resident,
            pinned: opts.pin,
            user_tags: tags,
            handle: handle.clone(),
            dirty: backend.durability_class() == DurabilityClass::Volatile,
            version: 0,
        };

        let expected_version = self.shared.placement.current_version(&key);
        if self
            .shared
            .placement
            .insert_or_update(key.clone(), header, expected_version)
            .is_err()
        {
            self.shared.tier_state(write_tier).capacity.release(reservation);
            let _ = backend.delete(&handle);
            return Err(Error::InvalidArgument("concurrent write to the same key".into()));
        }
        self.shared.tier_state(write_tier).capacity.commit(reservation);
        self.shared.index(write_tier).admit(&key, bytes.len() as u64, now);

        self.shared.append_manifest(ManifestRecord {
            op: ManifestOp::Put,
            key: key.clone(),
            tier: write_tier,
            handle,
            size: bytes.len() as u64,
            checksum: content_checksum,
            version: self.shared.placement.current_version(&key).unwrap_or(1),
            wall_clock: wall_now,
        });

        // `Durable` mode with a volatile target tier: the caller's
        // intended tier is reached by an immediate follow-up promotion
        // rather than double-writing, since a header tracks a single
        // handle (see DESIGN.md "Durable put representation"). The
        // promotion lands on a volatile backend, so `execute_job` marks
        // the header dirty again on commit and a later `flush` restores
        // a durable copy — the record is never left with zero durable
        // homes.
        if opts.mode == WriteMode::Durable && write_tier != opts.target_tier {
            let _ = self.shared.migration_tx.send(MigrationJob {
                key,
                from: write_tier,
                to: opts.target_tier,
                reason: MigrationReason::AdminRequested,
                enqueued_at: now,
            });
        }

        Ok(())
    }

    fn nearest_durable_tier(&self, from: Tier) -> Result<Tier> {
        let mut candidate = Some(from);
        while let Some(tier) = candidate {
            if self.shared.backend(tier).durability_class() == DurabilityClass::Durable {
                return Ok(tier);
            }
            candidate = tier.demote();
        }
        Err(Error::InvalidArgument("no durable tier configured at or below target_tier".into()))
    }

    /// Read `key`'s bytes (spec §4.7 `get`).
    pub fn get(&self, key: &Key, opts: GetOptions) -> Result<ReadHandle> {
        let Some(current) = self.shared.placement.lookup(key) else {
            return Err(Error::NotFound);
        };
        if matches!(current.state, RecordState::Tombstone) {
            return Err(Error::NotFound);
        }
        if matches!(current.state, RecordState::Corrupted) {
            return Err(Error::Corrupted);
        }

        let now = self.shared.monotonic_now();
        let mut updated = current.clone();
        updated.refcount += 1;
        updated.record_access(now);
        let access_version = self
            .shared
            .placement
            .insert_or_update(key.clone(), updated.clone(), Some(current.version))
            .unwrap_or(current.version);

        let backend = self.shared.backend(current.tier);
        let bytes = match retry_transient(&self.shared.retry_budget, || backend.get(&current.handle)) {
            Ok(b) => b,
            Err(CoreBackendError::Corrupted) => {
                // Fence the key so every subsequent read is refused until
                // it is deleted and recreated (spec I5), same as a
                // corruption observed mid-migration (see
                // `migration::fence_corrupted`).
                let mut fenced = updated;
                fenced.state = RecordState::Corrupted;
                let _ = self
                    .shared
                    .placement
                    .insert_or_update(key.clone(), fenced, Some(access_version));
                return Err(Error::Corrupted);
            }
            Err(e) => return Err(Shared::translate_backend_error(e)),
        };

        self.shared.index(current.tier).touch(key, now);

        if opts.promote_on_hit && current.tier.index() > 1 {
            if let Some(to) = current.tier.promote() {
                let _ = self.shared.migration_tx.send(MigrationJob {
                    key: key.clone(),
                    from: current.tier,
                    to,
                    reason: MigrationReason::PromoteOnAccess,
                    enqueued_at: now,
                });
            }
        }

        Ok(ReadHandle {
            bytes,
            key: key.clone(),
            shared: self.shared.clone(),
        })
    }

    /// Idempotent delete; returns whether the key existed (spec §4.7
    /// `delete`).
    pub fn delete(&self, key: &Key) -> Result<bool> {
        let Some(existing) = self.shared.placement.lookup(key) else {
            return Ok(false);
        };
        // A lingering tombstone (reclaim failed or raced last time) is
        // already logically deleted; nothing further to do.
        if matches!(existing.state, RecordState::Tombstone) {
            return Ok(true);
        }

        let Some(removed) = self
            .shared
            .placement
            .remove(key, Some(existing.version))
            .map_err(|_| Error::InvalidArgument("concurrent delete".into()))?
        else {
            return Ok(false);
        };

        self.shared.append_manifest(ManifestRecord {
            op: ManifestOp::Delete,
            key: key.clone(),
            tier: removed.tier,
            handle: removed.handle.clone(),
            size: removed.size,
            checksum: removed.checksum,
            version: removed.version,
            wall_clock: self.shared.wall_clock_now(),
        });

        self.shared.index(removed.tier).forget(key);
        let backend = self.shared.backend(removed.tier);
        if backend.delete(&removed.handle).is_ok() {
            self.shared.tier_state(removed.tier).capacity.account_freed(removed.size);
        }
        self.shared.placement.forget(key);
        Ok(true)
    }

    /// Pin `key` so it is never chosen for eviction (spec §4.7 `pin`).
    pub fn pin(&self, key: &Key) -> Result<()> {
        self.toggle_pin(key, true, ManifestOp::Pin)
    }

    pub fn unpin(&self, key: &Key) -> Result<()> {
        self.toggle_pin(key, false, ManifestOp::Unpin)
    }

    fn toggle_pin(&self, key: &Key, pinned: bool, op: ManifestOp) -> Result<()> {
        for _ in 0..8 {
            let Some(current) = self.shared.placement.lookup(key) else {
                return Err(Error::NotFound);
            };
            if matches!(current.state, RecordState::Tombstone) {
                return Err(Error::NotFound);
            }
            let mut updated = current.clone();
            updated.pinned = pinned;
            match self.shared.placement.insert_or_update(key.clone(), updated, Some(current.version)) {
                Ok(version) => {
                    self.shared.append_manifest(ManifestRecord {
                        op,
                        key: key.clone(),
                        tier: current.tier,
                        handle: current.handle.clone(),
                        size: current.size,
                        checksum: current.checksum,
                        version,
                        wall_clock: self.shared.wall_clock_now(),
                    });
                    return Ok(());
                }
                Err(_) => continue,
            }
        }
        Err(Error::InvalidArgument("too much contention on pin/unpin".into()))
    }

    /// Block until every dirty key has a durable copy and the manifest
    /// is checkpointed (spec §4.7 `flush`).
    pub fn flush(&self) -> Result<()> {
        for tier in Tier::ALL {
            self.shared
                .backend(tier)
                .flush()
                .map_err(Shared::translate_backend_error)?;
        }

        for (key, header) in self.shared.placement.snapshot_all() {
            if !header.dirty || !matches!(header.state, RecordState::Resident) {
                continue;
            }
            let Ok(durable_tier) = self.nearest_durable_tier(header.tier) else {
                continue;
            };
            if durable_tier == header.tier {
                continue;
            }
            let job = MigrationJob {
                key,
                from: header.tier,
                to: durable_tier,
                reason: MigrationReason::AdminRequested,
                enqueued_at: self.shared.monotonic_now(),
            };
            let _ = migration::execute_job(self.shared.as_ref(), job);
        }

        let snapshot: Vec<_> = self
            .shared
            .placement
            .snapshot_all()
            .into_iter()
            .filter(|(_, h)| !matches!(h.state, RecordState::Tombstone))
            .collect();
        self.shared
            .manifest
            .lock()
            .checkpoint(&snapshot)
            .map_err(|e| Error::BackendUnavailable(e.to_string()))
    }

    /// Enqueue an administrator-directed migration, bypassing policy
    /// (spec §4.7 `admin_migrate`).
    pub fn admin_migrate(&self, key: &Key, to_tier: Tier) -> Result<()> {
        let Some(current) = self.shared.placement.lookup(key) else {
            return Err(Error::NotFound);
        };
        if !matches!(current.state, RecordState::Resident) {
            return Err(Error::InvalidArgument("key is not in a migratable state".into()));
        }
        if current.tier == to_tier {
            return Ok(());
        }

        let info = self.shared.capacity(to_tier).info();
        if let Some(cap) = info.capacity {
            if info.used + current.size > cap {
                return Err(Error::NoCapacity);
            }
        }

        self.shared
            .migration_tx
            .send(MigrationJob {
                key: key.clone(),
                from: current.tier,
                to: to_tier,
                reason: MigrationReason::AdminRequested,
                enqueued_at: self.shared.monotonic_now(),
            })
            .map_err(|_| Error::BackendUnavailable("migration queue closed".into()))
    }

    /// Per-tier point-in-time statistics (spec §4.7 `stats`).
    pub fn stats(&self) -> Vec<TierStats> {
        Tier::ALL
            .iter()
            .map(|&tier| TierStats {
                tier,
                stat: self.shared.backend(tier).stat(),
                under_pressure: self.shared.capacity(tier).is_under_pressure(),
            })
            .collect()
    }

    pub fn snapshot_policy(&self) -> Vec<Rule> {
        self.shared.policy.snapshot_policy()
    }

    pub fn update_policy(&self, rules: Vec<Rule>) {
        self.shared.policy.update_policy(rules)
    }

    /// Run one policy evaluation pass, enqueueing whatever migration
    /// jobs it decides on. Exposed so a caller can force an off-cycle
    /// evaluation; `Store::open` already starts a background thread that
    /// calls this on `eval_interval` (spec §5 "one policy thread").
    pub fn evaluate_policy_once(&self) {
        let now = self.shared.monotonic_now();
        for job in self.shared.policy.evaluate(self.shared.as_ref(), now) {
            let _ = self.shared.migration_tx.send(job);
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        for handle in self.migration_workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.reconciler.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.policy_thread.take() {
            let _ = handle.join();
        }
    }
}

fn log_reconcile(report: ReconcileReport) {
    if report.aborted_migrations > 0 || report.orphaned_handles > 0 {
        log::info!(
            "startup reconciliation: {} migrations aborted, {} orphaned handles removed",
            report.aborted_migrations,
            report.orphaned_handles
        );
    }
}

/// The dedicated policy thread (spec §5: "one policy thread"), running
/// one evaluation pass on `eval_interval` until shutdown.
fn spawn_policy(shared: Arc<Shared>) -> std::thread::JoinHandle<()> {
    const POLL_INTERVAL: Duration = Duration::from_millis(200);
    let interval = shared.policy.eval_interval();

    std::thread::Builder::new()
        .name("policy".into())
        .spawn(move || {
            while !shared.shutdown.load(Ordering::Relaxed) {
                let now = shared.monotonic_now();
                for job in shared.policy.evaluate(shared.as_ref(), now) {
                    let _ = shared.migration_tx.send(job);
                }

                let mut waited = Duration::ZERO;
                while waited < interval {
                    if shared.shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    let slice = POLL_INTERVAL.min(interval - waited);
                    std::thread::sleep(slice);
                    waited += slice;
                }
            }
        })
        .expect("failed to spawn policy thread")
}

/// One background reconciler thread (spec §5: "one reconciler"),
/// periodically re-running reconciliation as a defense-in-depth sweep
/// against bugs elsewhere rather than a startup-only concern.
fn spawn_reconciler(shared: Arc<Shared>, preference: crate::migration::reconcile::AbortPreference) -> std::thread::JoinHandle<()> {
    const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
    const POLL_INTERVAL: Duration = Duration::from_millis(200);

    std::thread::Builder::new()
        .name("reconciler".into())
        .spawn(move || {
            while !shared.shutdown.load(Ordering::Relaxed) {
                let mut waited = Duration::ZERO;
                while waited < SWEEP_INTERVAL {
                    if shared.shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                    waited += POLL_INTERVAL;
                }
                log_reconcile(reconcile_all(shared.as_ref(), preference));
            }
        })
        .expect("failed to spawn reconciler thread")
}
