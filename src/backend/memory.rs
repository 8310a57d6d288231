//! Volatile in-memory backend, used by default for Hot/Warm tiers.
//!
//! Grounded on the teacher's in-memory vdev leaf
//! (`storage_pool::LeafVdev::Memory`, referenced in the
//! `migration/mod.rs` doc example): a byte-vector store with no
//! durability guarantees, put/get at memcpy speed.

use super::{DurabilityClass, PutHints, TierBackend, TierStat};
use crate::error::BackendError;
use crate::header::Handle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct MemoryBackend {
    next_handle: AtomicU64,
    entries: RwLock<HashMap<u64, Vec<u8>>>,
    used: AtomicU64,
    capacity: Option<u64>,
}

impl MemoryBackend {
    pub fn new(capacity: Option<u64>) -> Self {
        MemoryBackend {
            next_handle: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
            used: AtomicU64::new(0),
            capacity,
        }
    }
}

impl TierBackend for MemoryBackend {
    fn put(&self, bytes: &[u8], _hints: PutHints) -> Result<Handle, BackendError> {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(id, bytes.to_vec());
        self.used.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(Handle(id))
    }

    fn get(&self, handle: &Handle) -> Result<Vec<u8>, BackendError> {
        self.entries
            .read()
            .get(&handle.0)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    fn delete(&self, handle: &Handle) -> Result<(), BackendError> {
        if let Some(bytes) = self.entries.write().remove(&handle.0) {
            self.used.fetch_sub(bytes.len() as u64, Ordering::Relaxed);
        }
        // Idempotent: removing an already-absent handle is not an error.
        Ok(())
    }

    fn stat(&self) -> TierStat {
        TierStat {
            used: self.used.load(Ordering::Relaxed),
            capacity: self.capacity,
            inflight: 0,
        }
    }

    fn flush(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn durability_class(&self) -> DurabilityClass {
        DurabilityClass::Volatile
    }

    fn list_handles(&self) -> Vec<Handle> {
        self.entries.read().keys().copied().map(Handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_roundtrip() {
        let backend = MemoryBackend::new(Some(1024));
        let handle = backend.put(b"hello", PutHints::default()).unwrap();
        assert_eq!(backend.get(&handle).unwrap(), b"hello");
        backend.delete(&handle).unwrap();
        assert!(matches!(backend.get(&handle), Err(BackendError::NotFound)));
    }

    #[test]
    fn delete_is_idempotent() {
        let backend = MemoryBackend::new(None);
        let handle = backend.put(b"x", PutHints::default()).unwrap();
        backend.delete(&handle).unwrap();
        backend.delete(&handle).unwrap();
    }

    #[test]
    fn stat_tracks_used_bytes() {
        let backend = MemoryBackend::new(None);
        let h1 = backend.put(b"abc", PutHints::default()).unwrap();
        assert_eq!(backend.stat().used, 3);
        backend.put(b"de", PutHints::default()).unwrap();
        assert_eq!(backend.stat().used, 5);
        backend.delete(&h1).unwrap();
        assert_eq!(backend.stat().used, 2);
    }
}
