//! Pure achievement evaluation

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::achievements::catalog::{AchievementCatalog, UnlockRule, Visibility};
use crate::identity::Handle;

/// Read-only projection of a reputation record
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    pub handle: Handle,
    pub points: u64,
    pub category_counts: BTreeMap<String, u64>,
    pub longest_streak: u32,
    pub combo_today: u32,
    pub evidence_total: f64,
}

/// An unlock committed by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockedAchievement {
    pub id: String,
    pub category: String,
    pub bonus_points: u64,
    pub visibility: Visibility,
}

fn qualifies(rule: &UnlockRule, snapshot: &LedgerSnapshot) -> bool {
    match rule {
        UnlockRule::PointsAtLeast { points } => snapshot.points >= *points,
        UnlockRule::CategoryCount { category, count } => {
            snapshot.category_counts.get(category).copied().unwrap_or(0) >= *count
        }
        UnlockRule::StreakAtLeast { days } => snapshot.longest_streak >= *days,
        UnlockRule::ComboAtLeast { distinct } => snapshot.combo_today >= *distinct,
        UnlockRule::EvidenceTotalAtLeast { quantity } => snapshot.evidence_total >= *quantity,
        UnlockRule::Manual => false,
    }
}

/// Ids that qualify against `snapshot` and are not in `unlocked`.
///
/// Idempotent: ids already present in `unlocked` are never returned, so
/// re-running against an unchanged snapshot yields nothing new.
pub fn evaluate(
    catalog: &AchievementCatalog,
    snapshot: &LedgerSnapshot,
    unlocked: &BTreeSet<String>,
) -> Vec<String> {
    catalog
        .definitions()
        .iter()
        .filter(|def| !unlocked.contains(&def.id))
        .filter(|def| qualifies(&def.rule, snapshot))
        .map(|def| def.id.clone())
        .collect()
}
