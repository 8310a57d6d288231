//! The policy evaluator: turns declarative rules into migration jobs
//! (spec §4.6).
//!
//! Runs on a timer (default 1 s) and on explicit pressure events raised
//! by [`crate::capacity::CapacityAccountant::reserve`] crossing the
//! high watermark. Grounded on the teacher's `MigrationPolicy::migrate()`
//! default implementation: compute per-tier pressure, then walk tiers
//! pairwise deciding promote/demote — reworked from blocks/`StorageInfo`
//! into bytes/headers and from a fixed LFU/RL policy choice into a
//! declarative rule set evaluated uniformly.

use crate::header::{RecordHeader, RecordState, Tier};
use crate::key::Key;
use crate::migration::{MigrationContext, MigrationJob, MigrationReason};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::time::Duration;

/// Default evaluation period (spec §4.6: "a timer (default 1 s)").
pub const DEFAULT_EVAL_INTERVAL: Duration = Duration::from_secs(1);

/// A declarative policy rule (spec §4.6). The recognized set is closed;
/// adding a rule kind means adding a variant here.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Rule {
    /// Demote resident keys older than `threshold` and not accessed
    /// within it.
    AgeThreshold { threshold: Duration },
    /// Demote if `access_count / age_seconds < rate_per_sec`.
    AccessFrequencyBelow { rate_per_sec: f64 },
    /// Promote once `access_count` reaches `count` (counted since the
    /// key's current tier assignment, approximated here by lifetime
    /// access_count — see DESIGN.md).
    PromoteOnAccessCount { count: u32 },
    /// Keys carrying any of `tags` are immune to demotion past
    /// `floor_tier` (they may still be demoted down to, but not
    /// beyond, it).
    RetainTags { tags: HashSet<String>, floor_tier: Tier },
    /// Keys carrying user tag `tag` are pinned to the tier named by
    /// that tag's value and are excluded from all policy-driven moves.
    PinFixedTier { tag: String },
}

fn tier_from_tag_value(value: &str) -> Option<Tier> {
    match value {
        "Hot" => Some(Tier::Hot),
        "Warm" => Some(Tier::Warm),
        "Cold" => Some(Tier::Cold),
        "Glacier" => Some(Tier::Glacier),
        _ => None,
    }
}

fn is_pin_fixed(header: &RecordHeader, rules: &[Rule]) -> bool {
    rules.iter().any(|r| {
        if let Rule::PinFixedTier { tag } = r {
            header.user_tags.contains_key(tag)
        } else {
            false
        }
    })
}

/// `true` if demoting `header` past its current tier toward `target`
/// would violate a `RetainTags` rule.
fn retain_blocks_demotion(header: &RecordHeader, rules: &[Rule]) -> bool {
    rules.iter().any(|r| {
        if let Rule::RetainTags { tags, floor_tier } = r {
            let tagged = header.user_tags.keys().any(|k| tags.contains(k));
            tagged && header.tier.index() >= floor_tier.index()
        } else {
            false
        }
    })
}

fn movable(header: &RecordHeader, rules: &[Rule]) -> bool {
    matches!(header.state, RecordState::Resident)
        && !header.eviction_forbidden()
        && !is_pin_fixed(header, rules)
}

/// Holds the active rule set behind a lock so [`PolicyEvaluator::update_policy`]
/// can swap it atomically without stopping evaluation (spec §6 API:
/// `snapshot_policy`/`update_policy`).
pub struct PolicyEvaluator {
    rules: RwLock<Vec<Rule>>,
    eval_interval: Duration,
}

impl PolicyEvaluator {
    pub fn new(rules: Vec<Rule>, eval_interval: Duration) -> Self {
        PolicyEvaluator {
            rules: RwLock::new(rules),
            eval_interval,
        }
    }

    pub fn eval_interval(&self) -> Duration {
        self.eval_interval
    }

    pub fn snapshot_policy(&self) -> Vec<Rule> {
        self.rules.read().clone()
    }

    pub fn update_policy(&self, rules: Vec<Rule>) {
        *self.rules.write() = rules;
    }

    /// Evaluate the active rule set plus current pressure against
    /// `ctx`, returning the migration jobs this pass wants enqueued.
    /// Each key yields at most one job (spec's implicit single-writer
    /// lease means duplicate jobs for the same key are wasted work, not
    /// a correctness problem, but we still dedupe for efficiency).
    pub fn evaluate(&self, ctx: &dyn MigrationContext, now: Duration) -> Vec<MigrationJob> {
        let rules = self.rules.read().clone();
        let mut jobs = Vec::new();
        let mut queued: HashSet<Key> = HashSet::new();

        // 0. Pin-fixed-tier corrections: a key carrying the configured
        // tag is forced onto the tier named by its value, overriding
        // every other rule. Already-correct keys are simply excluded
        // below via `movable`.
        for rule in &rules {
            let Rule::PinFixedTier { tag } = rule else { continue };
            for (key, header) in ctx.placement().snapshot_all() {
                if !matches!(header.state, RecordState::Resident) || queued.contains(&key) {
                    continue;
                }
                let Some(target) = header.user_tags.get(tag).and_then(|v| tier_from_tag_value(v)) else {
                    continue;
                };
                if target != header.tier {
                    queued.insert(key.clone());
                    jobs.push(MigrationJob {
                        key,
                        from: header.tier,
                        to: target,
                        reason: MigrationReason::AdminRequested,
                        enqueued_at: now,
                    });
                }
            }
        }

        // 1. Eviction before demote, and among demotions, colder tiers
        // first (demote Warm->Cold before Hot->Warm) so the most
        // valuable cache space is preserved longest (spec §4.6 tie-break).
        for tier in Tier::ALL.iter().rev().copied() {
            let Some(bytes_needed) = ctx.capacity(tier).eviction_demand() else {
                continue;
            };
            let Some(target) = tier.demote() else {
                log::warn!("tier {tier:?} under pressure but has no demotion target");
                continue;
            };
            let skip = |key: &Key| -> bool {
                if queued.contains(key) {
                    return true;
                }
                match ctx.placement().lookup(key) {
                    Some(h) => h.tier != tier || !movable(&h, &rules) || retain_blocks_demotion(&h, &rules),
                    None => true,
                }
            };
            for key in ctx.index(tier).victims(bytes_needed, &skip) {
                queued.insert(key.clone());
                jobs.push(MigrationJob {
                    key,
                    from: tier,
                    to: target,
                    reason: MigrationReason::EvictionDemote,
                    enqueued_at: now,
                });
            }
        }

        // 2. Rule-triggered promotions/demotions over the full
        // population, independent of pressure.
        for (key, header) in ctx.placement().snapshot_all() {
            if queued.contains(&key) || !movable(&header, &rules) {
                continue;
            }
            if let Some(to) = header.tier.promote() {
                if rules.iter().any(|r| matches!(r, Rule::PromoteOnAccessCount { count } if header.access_count >= *count)) {
                    queued.insert(key.clone());
                    jobs.push(MigrationJob {
                        key,
                        from: header.tier,
                        to,
                        reason: MigrationReason::PromoteOnAccess,
                        enqueued_at: now,
                    });
                    continue;
                }
            }
            if let Some(to) = header.tier.demote() {
                if retain_blocks_demotion(&header, &rules) {
                    continue;
                }
                let age = now.saturating_sub(header.created_at);
                let idle = now.saturating_sub(header.last_access_at);
                let age_triggered = rules.iter().any(|r| {
                    matches!(r, Rule::AgeThreshold { threshold } if age >= *threshold && idle >= *threshold)
                });
                let freq_triggered = rules.iter().any(|r| {
                    if let Rule::AccessFrequencyBelow { rate_per_sec } = r {
                        let secs = age.as_secs_f64().max(1.0);
                        (header.access_count as f64 / secs) < *rate_per_sec
                    } else {
                        false
                    }
                });
                if age_triggered || freq_triggered {
                    queued.insert(key.clone());
                    jobs.push(MigrationJob {
                        key,
                        from: header.tier,
                        to,
                        reason: MigrationReason::PolicyAge,
                        enqueued_at: now,
                    });
                }
            }
        }

        jobs
    }
}
