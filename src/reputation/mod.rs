//! Reputation Ledger
//!
//! Per-handle points, derived rank, streaks and daily combo.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ ReputationRecord │────►│ ReputationLedger │────►│ LedgerStore      │
//! │ (points, streaks │     │ (lock + CAS loop)│     │ (version CAS)    │
//! │  combo, unlocks) │     └──────────────────┘     └──────────────────┘
//! └──────────────────┘              │
//!                                   ▼
//!                          ┌──────────────────┐
//!                          │ Achievement      │
//!                          │ evaluate (pure)  │
//!                          └──────────────────┘
//! ```
//!
//! ## Point Model
//!
//! - Totals start at 0 and only go up; there are no deductions
//! - Rank is `RankTable::rank(points)`, recomputed on every read
//! - Streak milestones pay once per `(handle, category, milestone)`
//! - Combo milestones pay once per `(handle, day, milestone)`
//! - A category with a cooldown pays at most once per window

mod manager;
mod rank;
mod score;
mod statistics;

/// Longest category name a record or table will accept
pub const MAX_CATEGORY_LEN: usize = 64;

pub use manager::{
    DeltaOutcome, DeltaReason, GrantOutcome, LeaderboardEntry, Profile, ProfileAchievement,
    RankCrossed, ReputationLedger,
};
pub use rank::{Rank, RankTable};
pub use score::{
    ComboUpdate, DailyCombo, LedgerPolicy, Milestone, ReputationRecord, Streak, StreakUpdate,
};
pub use statistics::{Statistics, StatisticsDelta};
