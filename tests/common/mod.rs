//! Shared config-building helpers for the integration suites.

use std::path::Path;
use std::time::Duration;
use stratum_store::backend::DurabilityClass;
use stratum_store::config::{BackendKind, Config, PolicyConfig, RetriesConfig, StartupConfig, TierConfig, WorkersConfig};
use stratum_store::replacement::ReplacementPolicyKind;
use stratum_store::Tier;

/// Four-tier layout matching the shipped backend pair: Hot/Warm volatile
/// in memory, Cold/Glacier durable on disk under `root`.
pub fn four_tier_config(root: &Path, hot_capacity: Option<u64>, warm_capacity: Option<u64>) -> Config {
    Config {
        tiers: vec![
            TierConfig {
                tier: Tier::Hot,
                backend_kind: BackendKind::Memory,
                capacity_bytes: hot_capacity,
                watermark_low: 40,
                watermark_high: 80,
                replacement_policy: ReplacementPolicyKind::Lru,
                durability: DurabilityClass::Volatile,
            },
            TierConfig {
                tier: Tier::Warm,
                backend_kind: BackendKind::Memory,
                capacity_bytes: warm_capacity,
                watermark_low: 40,
                watermark_high: 80,
                replacement_policy: ReplacementPolicyKind::Lru,
                durability: DurabilityClass::Volatile,
            },
            TierConfig {
                tier: Tier::Cold,
                backend_kind: BackendKind::File { path: root.join("cold") },
                capacity_bytes: None,
                watermark_low: 40,
                watermark_high: 80,
                replacement_policy: ReplacementPolicyKind::Lfu,
                durability: DurabilityClass::Durable,
            },
            TierConfig {
                tier: Tier::Glacier,
                backend_kind: BackendKind::File { path: root.join("glacier") },
                capacity_bytes: None,
                watermark_low: 40,
                watermark_high: 80,
                replacement_policy: ReplacementPolicyKind::Lfu,
                durability: DurabilityClass::Durable,
            },
        ],
        policy: PolicyConfig::default(),
        workers: WorkersConfig {
            migration: 2,
            ..WorkersConfig::default()
        },
        retries: RetriesConfig::default(),
        startup: StartupConfig::default(),
    }
}

pub fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= timeout {
            return condition();
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
