//! Tier backend contract (spec §4.2).
//!
//! Concrete backends are an external collaborator per spec §1 — only
//! the contract is specified here. The core ships two backends
//! (`memory`, `file`) so the crate is runnable and testable end to end;
//! a real deployment may swap in a GPU buffer pool, a columnar file
//! format, or a remote object store behind the same trait.
//!
//! Polymorphism is through this trait, dispatched over a closed enum
//! via `enum_dispatch`, replacing the duck-typed tier classes called out
//! in spec §9's Design Notes.

pub mod file;
pub mod memory;

use crate::error::BackendError;
use crate::header::Handle;
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

/// Whether a backend's writes survive a process crash (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurabilityClass {
    Volatile,
    Durable,
}

/// Point-in-time capacity/inflight report for one tier (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierStat {
    pub used: u64,
    pub capacity: Option<u64>,
    pub inflight: u64,
}

/// Hints accompanying a backend write; currently unused by the shipped
/// backends but kept in the contract so future backends (e.g. a
/// compressing columnar file) can act on them without a trait change.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutHints {
    pub expected_size: Option<u64>,
}

/// The contract every tier backend satisfies (spec §4.2).
#[enum_dispatch]
pub trait TierBackend {
    /// Write bytes atomically: either wholly visible or absent after a
    /// crash. Returns an opaque handle for subsequent reads.
    fn put(&self, bytes: &[u8], hints: PutHints) -> Result<Handle, BackendError>;

    /// Return stored bytes. Durable backends verify checksums
    /// internally and return `Corrupted` on mismatch.
    fn get(&self, handle: &Handle) -> Result<Vec<u8>, BackendError>;

    /// Idempotent delete.
    fn delete(&self, handle: &Handle) -> Result<(), BackendError>;

    fn stat(&self) -> TierStat;

    /// Block until all prior writes are durable. No-op for volatile
    /// backends.
    fn flush(&self) -> Result<(), BackendError>;

    fn durability_class(&self) -> DurabilityClass;

    /// Enumerate every handle currently known to the backend, used by
    /// the reconciliation pass on startup (spec §4.5, §6).
    fn list_handles(&self) -> Vec<Handle>;
}

/// Closed set of concrete tier backends. Adding a new backend kind means
/// adding a variant here and implementing [`TierBackend`] for it; no
/// other dispatch site needs to change.
#[enum_dispatch(TierBackend)]
pub enum TierBackendHandle {
    Memory(memory::MemoryBackend),
    File(file::FileBackend),
}

/// Retry budget for `Transient` backend errors (spec §4.2, §7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub base_backoff: std::time::Duration,
    pub max_backoff: std::time::Duration,
}

impl Default for RetryBudget {
    fn default() -> Self {
        RetryBudget {
            max_attempts: 5,
            base_backoff: std::time::Duration::from_millis(10),
            max_backoff: std::time::Duration::from_secs(1),
        }
    }
}

/// Retry `op` up to `budget.max_attempts` times on `Transient` errors,
/// with jittered exponential backoff (spec §4.2). `Permanent` errors
/// propagate immediately.
pub fn retry_transient<T>(
    budget: &RetryBudget,
    mut op: impl FnMut() -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt + 1 < budget.max_attempts => {
                let exp = budget.base_backoff.saturating_mul(1 << attempt.min(16));
                let capped = exp.min(budget.max_backoff);
                let jitter_ms = rand::random::<u64>() % (capped.as_millis() as u64 + 1);
                std::thread::sleep(std::time::Duration::from_millis(jitter_ms));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn retry_transient_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let budget = RetryBudget {
            max_attempts: 3,
            base_backoff: std::time::Duration::from_millis(0),
            max_backoff: std::time::Duration::from_millis(0),
        };
        let result: Result<(), BackendError> = retry_transient(&budget, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Transient("nope".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_transient_stops_on_permanent() {
        let calls = AtomicU32::new(0);
        let budget = RetryBudget::default();
        let result: Result<(), BackendError> = retry_transient(&budget, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Permanent("nope".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
