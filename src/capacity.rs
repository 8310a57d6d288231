//! Per-tier capacity accounting (spec §4.3).
//!
//! One atomic byte counter per tier, updated on every successful
//! backend put/delete, plus high/low watermark pressure tracking.
//! Grounded on the teacher's `StorageInfo`/`percent_full` usage in
//! `migration/mod.rs`'s default `migrate()` tie-break.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A pending capacity debit that will commit or roll back.
#[derive(Debug)]
pub struct Reservation {
    size: u64,
    // Prevents accidental double-commit/release via a plain drop.
    resolved: bool,
}

impl Reservation {
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        debug_assert!(
            self.resolved,
            "Reservation dropped without commit() or release()"
        );
    }
}

/// A point-in-time view of one tier's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageInfo {
    pub used: u64,
    pub capacity: Option<u64>,
}

impl StorageInfo {
    /// Fraction of capacity in use, in `[0.0, 1.0]`. Unbounded tiers
    /// (`capacity = None`, e.g. Glacier) always report `0.0`.
    pub fn percent_full(&self) -> f32 {
        match self.capacity {
            Some(cap) if cap > 0 => self.used as f32 / cap as f32,
            _ => 0.0,
        }
    }

    pub fn free(&self) -> Option<u64> {
        self.capacity.map(|cap| cap.saturating_sub(self.used))
    }
}

/// Per-tier capacity accountant.
pub struct CapacityAccountant {
    used: AtomicU64,
    capacity: Option<u64>,
    watermark_low: u64,
    watermark_high: u64,
    pressure: AtomicBool,
}

impl CapacityAccountant {
    pub fn new(capacity: Option<u64>, watermark_low: u64, watermark_high: u64) -> Self {
        assert!(0 < watermark_low && watermark_low < watermark_high, "spec §3: 0 < low < high");
        if let Some(cap) = capacity {
            assert!(watermark_high <= cap, "spec §3: high <= capacity");
        }
        CapacityAccountant {
            used: AtomicU64::new(0),
            capacity,
            watermark_low,
            watermark_high,
            pressure: AtomicBool::new(false),
        }
    }

    pub fn info(&self) -> StorageInfo {
        StorageInfo {
            used: self.used.load(Ordering::Acquire),
            capacity: self.capacity,
        }
    }

    /// Attempt to debit `size` bytes. Fails without any state change if
    /// it would cross `capacity`. A reservation crossing the high
    /// watermark still succeeds, but flips the pressure flag and
    /// reports that a demand has newly arisen (spec §4.3).
    pub fn reserve(&self, size: u64) -> Option<(Reservation, bool)> {
        loop {
            let current = self.used.load(Ordering::Acquire);
            let proposed = current + size;
            if let Some(cap) = self.capacity {
                if proposed > cap {
                    return None;
                }
            }
            if self
                .used
                .compare_exchange(current, proposed, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let newly_under_pressure = proposed >= self.watermark_high
                    && !self.pressure.swap(true, Ordering::AcqRel);
                return Some((
                    Reservation {
                        size,
                        resolved: false,
                    },
                    newly_under_pressure,
                ));
            }
        }
    }

    /// Commit a reservation: the bytes are now permanently accounted.
    pub fn commit(&self, mut reservation: Reservation) {
        reservation.resolved = true;
    }

    /// Roll back a reservation that was never actually written.
    pub fn release(&self, mut reservation: Reservation) {
        self.used.fetch_sub(reservation.size, Ordering::AcqRel);
        reservation.resolved = true;
    }

    /// Account for bytes freed by an eviction/delete outside the
    /// reservation flow (e.g. a backend-side delete completing
    /// asynchronously).
    pub fn account_freed(&self, size: u64) {
        self.used.fetch_sub(size, Ordering::AcqRel);
        let used = self.used.load(Ordering::Acquire);
        if used <= self.watermark_low {
            self.pressure.store(false, Ordering::Release);
        }
    }

    /// Target number of bytes to free to return below the low
    /// watermark, if currently under pressure (spec §4.3).
    pub fn eviction_demand(&self) -> Option<u64> {
        if !self.pressure.load(Ordering::Acquire) {
            return None;
        }
        let used = self.used.load(Ordering::Acquire);
        Some(used.saturating_sub(self.watermark_low))
    }

    pub fn is_under_pressure(&self) -> bool {
        self.pressure.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_exactly_at_capacity_succeeds() {
        let acc = CapacityAccountant::new(Some(100), 40, 80);
        let (res, _) = acc.reserve(100).expect("exact fit should succeed");
        acc.commit(res);
        assert_eq!(acc.info().used, 100);
    }

    #[test]
    fn one_byte_more_fails() {
        let acc = CapacityAccountant::new(Some(100), 40, 80);
        assert!(acc.reserve(101).is_none());
    }

    #[test]
    fn crossing_high_watermark_flags_pressure_once() {
        let acc = CapacityAccountant::new(Some(100), 40, 80);
        let (r1, pressure1) = acc.reserve(30).unwrap();
        acc.commit(r1);
        assert!(!pressure1);
        let (r2, pressure2) = acc.reserve(60).unwrap();
        acc.commit(r2);
        assert!(pressure2);
        assert!(acc.is_under_pressure());
        assert_eq!(acc.eviction_demand(), Some(90 - 40));
    }

    #[test]
    fn release_rolls_back_accounting() {
        let acc = CapacityAccountant::new(Some(100), 40, 80);
        let (res, _) = acc.reserve(50).unwrap();
        acc.release(res);
        assert_eq!(acc.info().used, 0);
    }

    #[test]
    fn freeing_below_low_watermark_clears_pressure() {
        let acc = CapacityAccountant::new(Some(100), 40, 80);
        let (res, pressure) = acc.reserve(90).unwrap();
        acc.commit(res);
        assert!(pressure);
        acc.account_freed(60);
        assert!(!acc.is_under_pressure());
    }
}
