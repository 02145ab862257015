//! Reputation record, streaks and daily combo
//!
//! A record is the whole per-handle state that one ledger transaction reads
//! and writes. Points only ever go up; rank is derived on demand.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::achievements::LedgerSnapshot;
use crate::identity::Handle;
use crate::reputation::rank::{Rank, RankTable};

/// A configured bonus step: reaching `threshold` pays `bonus_points` once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub threshold: u32,
    pub bonus_points: u64,
}

/// Ledger rules, loaded once from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerPolicy {
    pub ranks: RankTable,

    /// Consecutive-day milestones, per category
    pub streak_milestones: Vec<Milestone>,

    /// Distinct-categories-per-day milestones
    pub combo_milestones: Vec<Milestone>,

    /// Optimistic commit attempts before surfacing a retryable conflict
    pub max_retries: u32,

    /// Minimum seconds between two paid actions of the same category.
    /// Categories not listed have no cooldown.
    #[serde(default)]
    pub cooldowns: BTreeMap<String, u64>,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            ranks: RankTable::default(),
            streak_milestones: vec![
                Milestone { threshold: 7, bonus_points: 15 },
                Milestone { threshold: 14, bonus_points: 35 },
                Milestone { threshold: 30, bonus_points: 100 },
                Milestone { threshold: 100, bonus_points: 500 },
            ],
            combo_milestones: vec![
                Milestone { threshold: 3, bonus_points: 15 },
                Milestone { threshold: 4, bonus_points: 30 },
                Milestone { threshold: 5, bonus_points: 60 },
                Milestone { threshold: 7, bonus_points: 150 },
            ],
            max_retries: 8,
            cooldowns: BTreeMap::new(),
        }
    }
}

/// Consecutive UTC-day activity for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    pub current: u32,
    pub longest: u32,
    pub last_active_day: NaiveDate,
}

impl Streak {
    fn started(today: NaiveDate) -> Self {
        Self {
            current: 1,
            longest: 1,
            last_active_day: today,
        }
    }

    /// Advance for activity on `today`. Same-day calls change nothing.
    fn touch(&mut self, today: NaiveDate) -> bool {
        if today <= self.last_active_day {
            return false;
        }
        if self.last_active_day.succ_opt() == Some(today) {
            self.current += 1;
        } else {
            self.current = 1;
        }
        self.longest = self.longest.max(self.current);
        self.last_active_day = today;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreakUpdate {
    pub category: String,
    pub current: u32,
    pub longest: u32,
    /// Milestones paid out by this update
    pub awarded: Vec<Milestone>,
}

/// Distinct categories acted on during one UTC day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCombo {
    pub day: Option<NaiveDate>,
    pub categories: BTreeSet<String>,
    /// Milestones already paid for `day`
    pub awarded: BTreeSet<u32>,
}

impl DailyCombo {
    pub fn distinct_on(&self, today: NaiveDate) -> u32 {
        if self.day == Some(today) {
            self.categories.len() as u32
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComboUpdate {
    pub day: NaiveDate,
    pub distinct_categories: u32,
    pub awarded: Vec<Milestone>,
}

/// Per-handle reputation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub handle: Handle,

    /// Monotonic point total
    pub points: u64,

    pub streaks: BTreeMap<String, Streak>,

    /// Streak milestones already paid, per category. Never re-paid.
    pub streak_awards: BTreeMap<String, BTreeSet<u32>>,

    pub combo: DailyCombo,

    /// Lifetime action count per category
    pub category_counts: BTreeMap<String, u64>,

    /// Sum of resolved evidence quantities
    pub evidence_total: f64,

    /// Append-only achievement unlocks (id -> unlock time)
    pub unlocked: BTreeMap<String, DateTime<Utc>>,

    /// Time of the last paid action per category, for cooldowns
    pub last_action_at: BTreeMap<String, DateTime<Utc>>,

    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,

    /// Commit counter used for compare-and-swap; 0 means never stored
    pub version: u64,
}

impl ReputationRecord {
    pub fn new(handle: Handle, now: DateTime<Utc>) -> Self {
        Self {
            handle,
            points: 0,
            streaks: BTreeMap::new(),
            streak_awards: BTreeMap::new(),
            combo: DailyCombo::default(),
            category_counts: BTreeMap::new(),
            evidence_total: 0.0,
            unlocked: BTreeMap::new(),
            last_action_at: BTreeMap::new(),
            joined_at: now,
            last_active: now,
            version: 0,
        }
    }

    pub fn rank<'a>(&self, table: &'a RankTable) -> &'a Rank {
        table.rank(self.points)
    }

    pub fn add_points(&mut self, amount: u64) {
        self.points = self.points.saturating_add(amount);
    }

    pub fn unlocked_ids(&self) -> BTreeSet<String> {
        self.unlocked.keys().cloned().collect()
    }

    /// Record activity in `category` on `today` and pay any newly reached
    /// streak milestones. Bonus points are added to the total here.
    pub fn touch_streak(
        &mut self,
        category: &str,
        today: NaiveDate,
        milestones: &[Milestone],
    ) -> StreakUpdate {
        let streak = match self.streaks.get_mut(category) {
            Some(streak) => {
                streak.touch(today);
                streak.clone()
            }
            None => {
                let streak = Streak::started(today);
                self.streaks.insert(category.to_string(), streak.clone());
                streak
            }
        };

        let paid = self.streak_awards.entry(category.to_string()).or_default();
        let mut awarded = Vec::new();
        for milestone in milestones {
            if streak.current >= milestone.threshold && paid.insert(milestone.threshold) {
                awarded.push(*milestone);
            }
        }
        let bonus: u64 = awarded.iter().map(|m| m.bonus_points).sum();
        self.add_points(bonus);

        StreakUpdate {
            category: category.to_string(),
            current: streak.current,
            longest: streak.longest,
            awarded,
        }
    }

    /// Count `category` toward today's combo and pay any newly reached combo
    /// milestones. The combo resets at the UTC day boundary. Activity dated
    /// before the combo's day counts toward nothing and leaves it intact.
    pub fn touch_combo(
        &mut self,
        category: &str,
        today: NaiveDate,
        milestones: &[Milestone],
    ) -> ComboUpdate {
        match self.combo.day {
            Some(day) if today < day => {
                return ComboUpdate {
                    day: today,
                    distinct_categories: 0,
                    awarded: Vec::new(),
                };
            }
            Some(day) if day == today => {}
            _ => {
                self.combo = DailyCombo {
                    day: Some(today),
                    categories: BTreeSet::new(),
                    awarded: BTreeSet::new(),
                };
            }
        }
        self.combo.categories.insert(category.to_string());

        let distinct = self.combo.categories.len() as u32;
        let mut awarded = Vec::new();
        for milestone in milestones {
            if distinct >= milestone.threshold && self.combo.awarded.insert(milestone.threshold) {
                awarded.push(*milestone);
            }
        }
        let bonus: u64 = awarded.iter().map(|m| m.bonus_points).sum();
        self.add_points(bonus);

        ComboUpdate {
            day: today,
            distinct_categories: distinct,
            awarded,
        }
    }

    /// Seconds until `category` may pay again, or `None` when it is not
    /// cooling down.
    pub fn cooldown_remaining(
        &self,
        category: &str,
        cooldown_secs: u64,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        let last = self.last_action_at.get(category)?;
        let elapsed = now.signed_duration_since(*last).num_seconds().max(0) as u64;
        (elapsed < cooldown_secs).then(|| cooldown_secs - elapsed)
    }

    pub fn mark_action(&mut self, category: &str, now: DateTime<Utc>) {
        let last = self.last_action_at.entry(category.to_string()).or_insert(now);
        if now > *last {
            *last = now;
        }
    }

    /// Read-only view handed to the achievement evaluator
    pub fn snapshot(&self, today: NaiveDate) -> LedgerSnapshot {
        LedgerSnapshot {
            handle: self.handle.clone(),
            points: self.points,
            category_counts: self.category_counts.clone(),
            longest_streak: self.streaks.values().map(|s| s.longest).max().unwrap_or(0),
            combo_today: self.combo.distinct_on(today),
            evidence_total: self.evidence_total,
        }
    }

    /// Drop activity history. Points, unlocks, paid milestone keys and
    /// cooldown stamps stay, so nothing can be earned twice after a purge.
    pub fn purge_activity(&mut self) {
        self.streaks.clear();
        self.category_counts.clear();
        self.evidence_total = 0.0;
        self.combo.categories.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Anonymizer;

    fn record() -> ReputationRecord {
        let anonymizer = Anonymizer::new(b"pepper-pepper-pepper", b"salt-salt-salt-salt").unwrap();
        ReputationRecord::new(anonymizer.anonymize("1".to_string()), Utc::now())
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_streak_progression() {
        let mut record = record();
        let milestones = LedgerPolicy::default().streak_milestones;

        assert_eq!(record.touch_streak("email_sent", day(1), &milestones).current, 1);
        assert_eq!(record.touch_streak("email_sent", day(2), &milestones).current, 2);
        // Same day: unchanged
        assert_eq!(record.touch_streak("email_sent", day(2), &milestones).current, 2);
        // Gap: reset, longest kept
        let update = record.touch_streak("email_sent", day(5), &milestones);
        assert_eq!(update.current, 1);
        assert_eq!(update.longest, 2);
    }

    #[test]
    fn test_streak_milestone_paid_once() {
        let mut record = record();
        let milestones = LedgerPolicy::default().streak_milestones;

        for d in 1..=6 {
            assert!(record.touch_streak("tweet_shared", day(d), &milestones).awarded.is_empty());
        }
        let update = record.touch_streak("tweet_shared", day(7), &milestones);
        assert_eq!(update.awarded.len(), 1);
        assert_eq!(record.points, 15);

        for _ in 0..5 {
            assert!(record.touch_streak("tweet_shared", day(7), &milestones).awarded.is_empty());
        }
        assert_eq!(record.points, 15);
    }

    #[test]
    fn test_combo_resets_daily() {
        let mut record = record();
        let milestones = LedgerPolicy::default().combo_milestones;

        record.touch_combo("a", day(1), &milestones);
        record.touch_combo("b", day(1), &milestones);
        let update = record.touch_combo("c", day(1), &milestones);
        assert_eq!(update.distinct_categories, 3);
        assert_eq!(update.awarded.len(), 1);

        let update = record.touch_combo("a", day(2), &milestones);
        assert_eq!(update.distinct_categories, 1);
        assert_eq!(record.combo.distinct_on(day(1)), 0);
    }

    #[test]
    fn test_late_activity_keeps_todays_combo_paid() {
        let mut record = record();
        let milestones = LedgerPolicy::default().combo_milestones;

        for category in ["a", "b", "c"] {
            record.touch_combo(category, day(2), &milestones);
        }
        assert_eq!(record.points, 15);

        // Delayed delivery of yesterday's action
        let late = record.touch_combo("z", day(1), &milestones);
        assert_eq!(late.distinct_categories, 0);
        assert!(late.awarded.is_empty());
        assert_eq!(record.combo.day, Some(day(2)));
        assert_eq!(record.combo.distinct_on(day(2)), 3);

        for category in ["a", "b", "c"] {
            assert!(record.touch_combo(category, day(2), &milestones).awarded.is_empty());
        }
        assert_eq!(record.points, 15);
    }

    #[test]
    fn test_cooldown_window() {
        let mut record = record();
        let start = day(3).and_hms_opt(9, 0, 0).unwrap().and_utc();
        assert_eq!(record.cooldown_remaining("media_shared", 600, start), None);

        record.mark_action("media_shared", start);
        let later = start + chrono::Duration::seconds(240);
        assert_eq!(record.cooldown_remaining("media_shared", 600, later), Some(360));
        assert_eq!(record.cooldown_remaining("media_shared", 600, start + chrono::Duration::seconds(600)), None);

        // An out-of-order stamp never moves the window back
        record.mark_action("media_shared", start - chrono::Duration::hours(1));
        assert_eq!(record.last_action_at["media_shared"], start);
    }

    #[test]
    fn test_purge_keeps_points() {
        let mut record = record();
        record.add_points(120);
        record.category_counts.insert("email_sent".to_string(), 3);
        record.touch_streak("email_sent", day(1), &[]);
        record.unlocked.insert("first_step".to_string(), Utc::now());
        record.mark_action("email_sent", Utc::now());

        record.purge_activity();

        assert_eq!(record.points, 120);
        assert!(record.streaks.is_empty());
        assert!(record.category_counts.is_empty());
        assert!(record.unlocked.contains_key("first_step"));
        assert!(record.last_action_at.contains_key("email_sent"));
    }
}
