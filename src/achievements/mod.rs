//! Achievement catalog and evaluator
//!
//! The catalog is immutable configuration. Evaluation is a pure function of a
//! ledger snapshot and the current unlock set; committing the result is the
//! ledger's job, inside the same transaction as the triggering delta.

mod catalog;
mod evaluator;

pub use catalog::{AchievementCatalog, AchievementDefinition, UnlockRule, Visibility};
pub use evaluator::{evaluate, LedgerSnapshot, UnlockedAchievement};
