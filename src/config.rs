//! Store configuration: per-tier backends, policy rules, worker sizing,
//! retry budgets, and startup behavior (spec §6).
//!
//! Documents are parsed via `figment` from YAML or JSON, mirroring the
//! teacher's own `figment`+`serde_yaml` dependency pairing behind the
//! `figment_config` feature.

use crate::backend::{DurabilityClass, RetryBudget};
use crate::header::Tier;
use crate::migration::reconcile::AbortPreference;
use crate::policy::Rule;
use crate::replacement::ReplacementPolicyKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which concrete backend a tier is served by (spec §4.2 names
/// `memory`/`file` as the shipped contract implementations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "backend_kind")]
pub enum BackendKind {
    Memory,
    File { path: PathBuf },
}

/// One tier's configuration (spec §6: "`tiers[]`: each entry `{ name,
/// backend_kind, capacity_bytes, watermark_low, watermark_high,
/// replacement_policy, durability }`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub tier: Tier,
    #[serde(flatten)]
    pub backend_kind: BackendKind,
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    pub watermark_low: u64,
    pub watermark_high: u64,
    pub replacement_policy: ReplacementPolicyKind,
    pub durability: DurabilityClass,
}

impl BackendKind {
    /// The durability a backend of this kind actually provides, to
    /// cross-check against the config's separately declared
    /// `durability` field (spec §6 lists them as distinct keys even
    /// though today's two backends each imply one).
    pub fn natural_durability(&self) -> DurabilityClass {
        match self {
            BackendKind::Memory => DurabilityClass::Volatile,
            BackendKind::File { .. } => DurabilityClass::Durable,
        }
    }
}

/// Declarative policy section (spec §6: "`policy.rules[]`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default = "default_eval_interval")]
    pub eval_interval: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            rules: Vec::new(),
            eval_interval: default_eval_interval(),
        }
    }
}

fn default_eval_interval() -> Duration {
    crate::policy::DEFAULT_EVAL_INTERVAL
}

/// Worker pool sizing (spec §6: "`workers`: `{ migration, reconciler }`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub migration: usize,
    #[serde(default = "default_reconciler_workers")]
    pub reconciler: usize,
}

fn default_reconciler_workers() -> usize {
    1
}

impl Default for WorkersConfig {
    fn default() -> Self {
        WorkersConfig {
            migration: default_migration_workers(),
            reconciler: default_reconciler_workers(),
        }
    }
}

/// Default migration worker count: `min(4, cores)` (spec §5), via
/// `std::thread::available_parallelism` rather than a `num_cpus`
/// dependency.
pub fn default_migration_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(1)
}

/// Retry budget for transient backend failures (spec §6: "`retries`:
/// `{ max_attempts, base_backoff, max_backoff }`"). `RetryBudget`
/// already derives `Serialize`/`Deserialize` and `Default`, so the
/// config schema's shape falls out directly.
pub type RetriesConfig = RetryBudget;

/// Startup behavior (spec §6: "`startup`: `{ reconcile_on_boot: bool,
/// abort_interrupted_migrations: Prefer-Source\|Prefer-Target }`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(default = "default_true")]
    pub reconcile_on_boot: bool,
    #[serde(default = "default_abort_preference")]
    pub abort_interrupted_migrations: AbortPreference,
}

fn default_true() -> bool {
    true
}

fn default_abort_preference() -> AbortPreference {
    AbortPreference::PreferSource
}

impl Default for StartupConfig {
    fn default() -> Self {
        StartupConfig {
            reconcile_on_boot: default_true(),
            abort_interrupted_migrations: default_abort_preference(),
        }
    }
}

/// The full document a store is constructed from (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub tiers: Vec<TierConfig>,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub retries: RetriesConfig,
    #[serde(default)]
    pub startup: StartupConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("duplicate tier entry for {0:?}")]
    DuplicateTier(Tier),
    #[error("missing tier entry for {0:?}")]
    MissingTier(Tier),
    #[error("tier {tier:?}: watermark_low {low} must satisfy 0 < low < high {high}")]
    InvalidWatermarks { tier: Tier, low: u64, high: u64 },
    #[error("tier {0:?}: declared durability does not match backend_kind")]
    DurabilityMismatch(Tier),
}

impl Config {
    /// Validate cross-field invariants the schema alone can't express
    /// (spec §3: "`0 < low < high ≤ capacity`"; every tier must be
    /// configured exactly once).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for t in &self.tiers {
            if !seen.insert(t.tier) {
                return Err(ConfigError::DuplicateTier(t.tier));
            }
            if t.durability != t.backend_kind.natural_durability() {
                return Err(ConfigError::DurabilityMismatch(t.tier));
            }
            if !(0 < t.watermark_low && t.watermark_low < t.watermark_high) {
                return Err(ConfigError::InvalidWatermarks {
                    tier: t.tier,
                    low: t.watermark_low,
                    high: t.watermark_high,
                });
            }
            if let Some(cap) = t.capacity_bytes {
                if t.watermark_high > cap {
                    return Err(ConfigError::InvalidWatermarks {
                        tier: t.tier,
                        low: t.watermark_low,
                        high: t.watermark_high,
                    });
                }
            }
        }
        for tier in Tier::ALL {
            if !seen.contains(&tier) {
                return Err(ConfigError::MissingTier(tier));
            }
        }
        Ok(())
    }

    pub fn tier_config(&self, tier: Tier) -> Option<&TierConfig> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    /// Parse a document from its raw text, sniffing YAML vs JSON by the
    /// leading byte (`{` for JSON, anything else tried as YAML) — used
    /// when the `figment_config` feature is disabled.
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let trimmed = text.trim_start();
        let config: Config = if trimmed.starts_with('{') {
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "figment_config")]
mod figment_loader {
    use super::{Config, ConfigError};
    use figment::providers::{Format, Json, Yaml};
    use figment::Figment;
    use std::path::Path;

    impl Config {
        /// Load from a YAML or JSON file (by extension), allowing
        /// environment variable overrides under a `STRATUM_` prefix
        /// (spec §6: "loadable from YAML/JSON/env through `figment`").
        pub fn load(path: &Path) -> Result<Config, ConfigError> {
            let mut figment = Figment::new();
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Yaml::file(path)),
            };
            figment = figment.merge(figment::providers::Env::prefixed("STRATUM_"));
            let config: Config = figment
                .extract()
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            config.validate()?;
            Ok(config)
        }
    }
}
