//! Reputation Ledger - per-handle transaction discipline
//!
//! Every mutation of a reputation record runs through [`ReputationLedger::transact`]:
//! an in-process lock serializes writers for one handle, and the store commit is a
//! version compare-and-swap so writers in other processes are also detected. A
//! conflicting commit reloads the record and re-applies the whole change, so
//! achievement unlocks and bonuses always land in the same commit as the delta
//! that caused them.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::achievements::{evaluate, AchievementCatalog, AchievementDefinition, UnlockedAchievement};
use crate::error::{EngineError, EngineResult};
use crate::identity::Handle;
use crate::reputation::{
    ComboUpdate, LedgerPolicy, Rank, RankTable, ReputationRecord, Statistics, StatisticsDelta,
    Streak, StreakUpdate, MAX_CATEGORY_LEN,
};
use crate::store::{CommitOutcome, LedgerStore};

/// Why a delta is applied
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DeltaReason {
    Action,
    /// Resolved evidence submission; `quantity` feeds the cumulative total
    Evidence { tier: String, quantity: Option<f64> },
}

/// Emitted when a delta moves a handle into a higher rank
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankCrossed {
    pub handle: Handle,
    pub rank_before: String,
    pub rank_after: String,
    pub points: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaOutcome {
    pub handle: Handle,
    pub category: String,
    pub amount: u64,
    pub points_before: u64,
    pub new_total: u64,
    pub rank_before: Rank,
    pub rank_after: Rank,
    pub streak_update: StreakUpdate,
    pub combo_update: ComboUpdate,
    pub unlocked: Vec<UnlockedAchievement>,
    pub rank_crossed: Option<RankCrossed>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrantOutcome {
    /// Empty when the achievement was already unlocked
    pub unlocked: Vec<UnlockedAchievement>,
    pub points_before: u64,
    pub new_total: u64,
    pub rank_crossed: Option<RankCrossed>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileAchievement {
    pub id: String,
    pub category: String,
    pub bonus_points: u64,
    pub unlocked_at: Option<DateTime<Utc>>,
}

/// Owner view of a record. Hidden achievements appear only once unlocked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub handle: Handle,
    pub points: u64,
    pub rank: Rank,
    /// 1-based; ties share a position
    pub position: u64,
    pub points_to_next: Option<u64>,
    pub streaks: BTreeMap<String, Streak>,
    pub achievements: Vec<ProfileAchievement>,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Public leaderboard row. Carries no handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub position: usize,
    pub points: u64,
    pub rank: String,
}

pub struct ReputationLedger {
    store: Arc<dyn LedgerStore>,
    policy: LedgerPolicy,
    catalog: Arc<AchievementCatalog>,

    /// Per-handle writer locks, dropped once no writer holds them
    locks: DashMap<Handle, Arc<Mutex<()>>>,
}

impl ReputationLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        policy: LedgerPolicy,
        catalog: Arc<AchievementCatalog>,
    ) -> Self {
        Self {
            store,
            policy,
            catalog,
            locks: DashMap::new(),
        }
    }

    pub fn ranks(&self) -> &RankTable {
        &self.policy.ranks
    }

    pub fn catalog(&self) -> &AchievementCatalog {
        &self.catalog
    }

    /// Apply a non-negative point delta now
    pub async fn apply_delta(
        &self,
        handle: &Handle,
        category: &str,
        amount: u64,
        reason: DeltaReason,
    ) -> EngineResult<DeltaOutcome> {
        self.apply_delta_at(handle, category, amount, reason, Utc::now()).await
    }

    /// Apply a delta as if it happened at `now`. Streak and combo days are
    /// the UTC date of `now`. An action inside its category's cooldown is
    /// rejected without touching the record.
    pub async fn apply_delta_at(
        &self,
        handle: &Handle,
        category: &str,
        amount: u64,
        reason: DeltaReason,
        now: DateTime<Utc>,
    ) -> EngineResult<DeltaOutcome> {
        if category.is_empty() || category.len() > MAX_CATEGORY_LEN {
            return Err(EngineError::InvalidCategory(category.to_string()));
        }
        let today = now.date_naive();
        let cooldown = match &reason {
            DeltaReason::Action => self.policy.cooldowns.get(category).copied(),
            DeltaReason::Evidence { .. } => None,
        };

        let (record, outcome) = self
            .transact(handle, now, |record| {
                if let Some(secs) = cooldown {
                    if let Some(retry_after_secs) = record.cooldown_remaining(category, secs, now) {
                        return Err(EngineError::CooldownActive {
                            category: category.to_string(),
                            retry_after_secs,
                        });
                    }
                    record.mark_action(category, now);
                }

                let points_before = record.points;
                let rank_before = record.rank(&self.policy.ranks).clone();

                record.add_points(amount);
                *record.category_counts.entry(category.to_string()).or_default() += 1;
                if let DeltaReason::Evidence { quantity: Some(q), .. } = &reason {
                    if q.is_finite() && *q > 0.0 {
                        record.evidence_total += q;
                    }
                }
                record.last_active = now;

                let streak_update =
                    record.touch_streak(category, today, &self.policy.streak_milestones);
                let combo_update =
                    record.touch_combo(category, today, &self.policy.combo_milestones);
                let unlocked = self.unlock_qualified(record, today, now);

                let rank_after = record.rank(&self.policy.ranks).clone();
                let rank_crossed = (rank_after.level > rank_before.level).then(|| RankCrossed {
                    handle: record.handle.clone(),
                    rank_before: rank_before.label.clone(),
                    rank_after: rank_after.label.clone(),
                    points: record.points,
                });

                Ok(DeltaOutcome {
                    handle: record.handle.clone(),
                    category: category.to_string(),
                    amount,
                    points_before,
                    new_total: record.points,
                    rank_before,
                    rank_after,
                    streak_update,
                    combo_update,
                    unlocked,
                    rank_crossed,
                })
            })
            .await?;

        debug!(
            handle = %handle.short(),
            category = %category,
            amount = amount,
            total = record.points,
            version = record.version,
            "Applied ledger delta"
        );
        self.count_delta(&outcome, &reason, record.version == 1).await;
        if let Some(crossed) = &outcome.rank_crossed {
            info!(
                handle = %handle.short(),
                from = %crossed.rank_before,
                to = %crossed.rank_after,
                points = crossed.points,
                "Rank crossed"
            );
        }

        Ok(outcome)
    }

    /// Operator grant of a catalog achievement, typically a `Manual` one.
    /// Granting an already unlocked id is a no-op.
    pub async fn grant_manual_achievement(
        &self,
        handle: &Handle,
        achievement_id: &str,
    ) -> EngineResult<GrantOutcome> {
        let definition = self
            .catalog
            .get(achievement_id)
            .ok_or_else(|| EngineError::UnknownAchievement(achievement_id.to_string()))?;
        let now = Utc::now();
        let today = now.date_naive();

        let (_, outcome) = self
            .transact(handle, now, |record| {
                let points_before = record.points;
                let rank_before = record.rank(&self.policy.ranks).level;
                let mut unlocked = Vec::new();

                if !record.unlocked.contains_key(&definition.id) {
                    record.unlocked.insert(definition.id.clone(), now);
                    record.add_points(definition.bonus_points);
                    unlocked.push(unlocked_view(definition));
                    unlocked.extend(self.unlock_qualified(record, today, now));
                }

                let rank_after = record.rank(&self.policy.ranks);
                let rank_crossed = (rank_after.level > rank_before).then(|| RankCrossed {
                    handle: record.handle.clone(),
                    rank_before: self.policy.ranks.ranks()[rank_before].label.clone(),
                    rank_after: rank_after.label.clone(),
                    points: record.points,
                });

                Ok(GrantOutcome {
                    unlocked,
                    points_before,
                    new_total: record.points,
                    rank_crossed,
                })
            })
            .await?;

        info!(
            handle = %handle.short(),
            achievement = %achievement_id,
            granted = !outcome.unlocked.is_empty(),
            "Manual achievement grant"
        );
        Ok(outcome)
    }

    /// Clear activity history for a handle that asked for it. Points, rank,
    /// unlocks and credentials are permanent. Returns false if the handle has
    /// no record.
    pub async fn purge_activity(&self, handle: &Handle) -> EngineResult<bool> {
        if self.store.load_record(handle).await?.is_none() {
            return Ok(false);
        }
        self.transact(handle, Utc::now(), |record| {
            record.purge_activity();
            Ok(())
        })
        .await?;

        info!(handle = %handle.short(), "Purged activity history");
        Ok(true)
    }

    pub async fn profile(&self, handle: &Handle) -> EngineResult<Option<Profile>> {
        let Some(record) = self.store.load_record(handle).await? else {
            return Ok(None);
        };

        let achievements = self
            .catalog
            .visible_catalog(&record.unlocked)
            .map(|def| ProfileAchievement {
                id: def.id.clone(),
                category: def.category.clone(),
                bonus_points: def.bonus_points,
                unlocked_at: record.unlocked.get(&def.id).copied(),
            })
            .collect();

        let position = self.store.count_above(record.points).await? + 1;

        Ok(Some(Profile {
            handle: record.handle.clone(),
            points: record.points,
            rank: record.rank(&self.policy.ranks).clone(),
            position,
            points_to_next: self.policy.ranks.points_to_next(record.points),
            streaks: record.streaks.clone(),
            achievements,
            joined_at: record.joined_at,
            last_active: record.last_active,
        }))
    }

    pub async fn leaderboard(&self, limit: usize) -> EngineResult<Vec<LeaderboardEntry>> {
        let rows = self.store.top_records(limit).await?;
        let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(rows.len());
        for (i, (_, points)) in rows.into_iter().enumerate() {
            // Ties share the position of the first row holding that total
            let position = match entries.last() {
                Some(prev) if prev.points == points => prev.position,
                _ => i + 1,
            };
            entries.push(LeaderboardEntry {
                position,
                points,
                rank: self.policy.ranks.rank(points).label.clone(),
            });
        }
        Ok(entries)
    }

    pub async fn statistics(&self) -> EngineResult<Statistics> {
        self.store.statistics().await
    }

    /// Counters trail the committed record; a failed bump is logged and the
    /// delta stands.
    async fn count_delta(&self, outcome: &DeltaOutcome, reason: &DeltaReason, new_member: bool) {
        let (evidence_tier, evidence_quantity) = match reason {
            DeltaReason::Action => (None, None),
            DeltaReason::Evidence { tier, quantity } => (Some(tier.clone()), *quantity),
        };
        let delta = StatisticsDelta {
            new_member,
            category: outcome.category.clone(),
            points: outcome.new_total.saturating_sub(outcome.points_before),
            evidence_tier,
            evidence_quantity,
        };
        if let Err(e) = self.store.bump_statistics(&delta).await {
            warn!(error = %e, category = %delta.category, "Failed to update statistics");
        }
    }

    /// Unlock everything the record now qualifies for, paying bonuses, until
    /// no further id qualifies. Bonuses can push point rules over their
    /// threshold, hence the loop. Terminates because the unlock set only grows.
    fn unlock_qualified(
        &self,
        record: &mut ReputationRecord,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Vec<UnlockedAchievement> {
        let mut unlocked = Vec::new();
        loop {
            let ids = evaluate(&self.catalog, &record.snapshot(today), &record.unlocked_ids());
            if ids.is_empty() {
                return unlocked;
            }
            for id in ids {
                let Some(def) = self.catalog.get(&id) else {
                    continue;
                };
                record.unlocked.insert(id, now);
                record.add_points(def.bonus_points);
                unlocked.push(unlocked_view(def));
            }
        }
    }

    /// Load, mutate, and commit one record under the handle's lock, retrying
    /// the whole mutation on a version conflict.
    async fn transact<T, F>(
        &self,
        handle: &Handle,
        now: DateTime<Utc>,
        mut apply: F,
    ) -> EngineResult<(ReputationRecord, T)>
    where
        F: FnMut(&mut ReputationRecord) -> EngineResult<T>,
    {
        let lock = self.locks.entry(handle.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.commit_loop(handle, now, &mut apply).await
        };
        drop(lock);
        self.locks.remove_if(handle, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn commit_loop<T, F>(
        &self,
        handle: &Handle,
        now: DateTime<Utc>,
        apply: &mut F,
    ) -> EngineResult<(ReputationRecord, T)>
    where
        F: FnMut(&mut ReputationRecord) -> EngineResult<T>,
    {
        let attempts = self.policy.max_retries.max(1);
        for attempt in 1..=attempts {
            let stored = self.store.load_record(handle).await?;
            let expected = stored.as_ref().map(|r| r.version).unwrap_or(0);
            let mut record = stored.unwrap_or_else(|| ReputationRecord::new(handle.clone(), now));

            let out = apply(&mut record)?;
            record.version = expected + 1;

            match self.store.commit_record(&record, expected).await? {
                CommitOutcome::Committed => return Ok((record, out)),
                CommitOutcome::Conflict => {
                    debug!(
                        handle = %handle.short(),
                        attempt = attempt,
                        "Ledger commit conflicted, retrying"
                    );
                }
            }
        }

        warn!(
            handle = %handle.short(),
            attempts = attempts,
            "Ledger commit retries exhausted"
        );
        Err(EngineError::Conflict { attempts })
    }
}

fn unlocked_view(def: &AchievementDefinition) -> UnlockedAchievement {
    UnlockedAchievement {
        id: def.id.clone(),
        category: def.category.clone(),
        bonus_points: def.bonus_points,
        visibility: def.visibility,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Anonymizer;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn ledger() -> (ReputationLedger, Handle) {
        let anonymizer = Anonymizer::new(b"pepper-pepper-pepper", b"salt-salt-salt-salt").unwrap();
        let ledger = ReputationLedger::new(
            Arc::new(MemoryStore::new()),
            LedgerPolicy::default(),
            Arc::new(AchievementCatalog::default()),
        );
        (ledger, anonymizer.anonymize("1001".to_string()))
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn ledger_with(policy: LedgerPolicy) -> (ReputationLedger, Handle) {
        let (_, handle) = ledger();
        let ledger = ReputationLedger::new(
            Arc::new(MemoryStore::new()),
            policy,
            Arc::new(AchievementCatalog::default()),
        );
        (ledger, handle)
    }

    #[tokio::test]
    async fn test_first_delta_creates_record() {
        let (ledger, handle) = ledger();
        let outcome = ledger
            .apply_delta_at(&handle, "email_sent", 20, DeltaReason::Action, at(1, 9))
            .await
            .unwrap();

        // 20 + first_step bonus
        assert!(outcome.new_total >= 20);
        assert_eq!(outcome.rank_before.label, "Recruit");
        assert_eq!(outcome.streak_update.current, 1);
        assert_eq!(outcome.combo_update.distinct_categories, 1);
        assert!(outcome.unlocked.iter().any(|a| a.id == "first_step"));
    }

    #[tokio::test]
    async fn test_unlocks_never_repeat() {
        let (ledger, handle) = ledger();
        let mut seen = std::collections::HashSet::new();
        for hour in 0..10 {
            let outcome = ledger
                .apply_delta_at(&handle, "email_sent", 20, DeltaReason::Action, at(2, hour))
                .await
                .unwrap();
            for a in outcome.unlocked {
                assert!(seen.insert(a.id.clone()), "{} unlocked twice", a.id);
            }
        }
    }

    #[tokio::test]
    async fn test_rank_crossed_reported() {
        let (ledger, handle) = ledger();
        let outcome = ledger
            .apply_delta_at(&handle, "video_testimonial", 150, DeltaReason::Action, at(3, 9))
            .await
            .unwrap();
        let crossed = outcome.rank_crossed.expect("crossed");
        assert_eq!(crossed.rank_before, "Recruit");
        assert_eq!(crossed.rank_after, outcome.rank_after.label);
        assert_eq!(crossed.points, outcome.new_total);
    }

    #[tokio::test]
    async fn test_purge_keeps_points() {
        let (ledger, handle) = ledger();
        assert!(!ledger.purge_activity(&handle).await.unwrap());

        let outcome = ledger
            .apply_delta_at(&handle, "tweet_shared", 12, DeltaReason::Action, at(4, 9))
            .await
            .unwrap();
        assert!(ledger.purge_activity(&handle).await.unwrap());

        let profile = ledger.profile(&handle).await.unwrap().unwrap();
        assert_eq!(profile.points, outcome.new_total);
        assert!(profile.streaks.is_empty());
    }

    #[tokio::test]
    async fn test_manual_grant_idempotent() {
        let (ledger, handle) = ledger();
        let first = ledger.grant_manual_achievement(&handle, "lion_heart").await.unwrap();
        assert!(first.unlocked.iter().any(|a| a.id == "lion_heart"));

        let second = ledger.grant_manual_achievement(&handle, "lion_heart").await.unwrap();
        assert!(second.unlocked.is_empty());
        assert_eq!(second.new_total, first.new_total);

        let err = ledger.grant_manual_achievement(&handle, "nope").await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownAchievement(_)));
    }

    #[tokio::test]
    async fn test_hidden_achievements_revealed_on_unlock() {
        let (ledger, handle) = ledger();
        ledger
            .apply_delta_at(&handle, "daily_login", 5, DeltaReason::Action, at(5, 9))
            .await
            .unwrap();
        let profile = ledger.profile(&handle).await.unwrap().unwrap();
        assert!(!profile.achievements.iter().any(|a| a.id == "sun_warrior"));

        ledger.grant_manual_achievement(&handle, "sun_warrior").await.unwrap();
        let profile = ledger.profile(&handle).await.unwrap().unwrap();
        assert!(profile.achievements.iter().any(|a| a.id == "sun_warrior" && a.unlocked_at.is_some()));
    }

    #[tokio::test]
    async fn test_lock_map_pruned() {
        let (ledger, handle) = ledger();
        ledger
            .apply_delta_at(&handle, "email_sent", 20, DeltaReason::Action, at(6, 9))
            .await
            .unwrap();
        assert!(ledger.locks.is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_rejects_inside_window() {
        let mut policy = LedgerPolicy::default();
        policy.cooldowns.insert("media_shared".to_string(), 600);
        let (ledger, handle) = ledger_with(policy);

        let first = ledger
            .apply_delta_at(&handle, "media_shared", 10, DeltaReason::Action, at(7, 9))
            .await
            .unwrap();

        let five_minutes = at(7, 9) + chrono::Duration::minutes(5);
        let err = ledger
            .apply_delta_at(&handle, "media_shared", 10, DeltaReason::Action, five_minutes)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::CooldownActive { retry_after_secs: 300, .. }
        ));
        let profile = ledger.profile(&handle).await.unwrap().unwrap();
        assert_eq!(profile.points, first.new_total);

        // Other categories and evidence are not throttled
        ledger
            .apply_delta_at(&handle, "email_sent", 5, DeltaReason::Action, five_minutes)
            .await
            .unwrap();
        let evidence = DeltaReason::Evidence { tier: "1-10".to_string(), quantity: Some(2.0) };
        ledger
            .apply_delta_at(&handle, "media_shared", 5, evidence, five_minutes)
            .await
            .unwrap();

        let after_window = at(7, 9) + chrono::Duration::minutes(10);
        ledger
            .apply_delta_at(&handle, "media_shared", 10, DeltaReason::Action, after_window)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_category_length_bounds() {
        let (ledger, handle) = ledger();
        for category in [String::new(), "x".repeat(MAX_CATEGORY_LEN + 1)] {
            let err = ledger
                .apply_delta_at(&handle, &category, 5, DeltaReason::Action, at(8, 9))
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidCategory(_)));
        }
        assert!(ledger.profile(&handle).await.unwrap().is_none());

        ledger
            .apply_delta_at(&handle, &"x".repeat(MAX_CATEGORY_LEN), 5, DeltaReason::Action, at(8, 9))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_statistics_and_position() {
        let (ledger, handle) = ledger();
        let anonymizer = Anonymizer::new(b"pepper-pepper-pepper", b"salt-salt-salt-salt").unwrap();
        let other = anonymizer.anonymize("2002".to_string());

        let mine = ledger
            .apply_delta_at(&handle, "email_sent", 20, DeltaReason::Action, at(9, 9))
            .await
            .unwrap();
        ledger
            .apply_delta_at(&handle, "email_sent", 20, DeltaReason::Action, at(9, 10))
            .await
            .unwrap();
        let evidence = DeltaReason::Evidence { tier: "100+".to_string(), quantity: Some(150.0) };
        let theirs = ledger
            .apply_delta_at(&other, "data_shared", 400, evidence, at(9, 11))
            .await
            .unwrap();

        let stats = ledger.statistics().await.unwrap();
        assert_eq!(stats.total_members, 2);
        assert_eq!(stats.total_actions, 3);
        assert_eq!(stats.actions_by_category["email_sent"], 2);
        assert_eq!(stats.evidence_by_tier["100+"], 1);
        assert_eq!(stats.evidence_quantity, 150.0);
        assert!(stats.total_points >= mine.new_total + theirs.new_total);

        assert_eq!(ledger.profile(&other).await.unwrap().unwrap().position, 1);
        assert_eq!(ledger.profile(&handle).await.unwrap().unwrap().position, 2);
    }
}
