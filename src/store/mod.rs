//! Storage seam
//!
//! The ledger and issuer only talk to [`LedgerStore`]. Both implementations
//! enforce the same constraints:
//!
//! - `reputation_records`: one row per handle, replaced only when the caller's
//!   expected version matches (compare-and-swap)
//! - `certificates`: serial unique, `(handle, rank)` unique
//! - `physical_rewards`: serial unique, handle unique, anonymous id unique,
//!   tier only raised
//! - `statistics`: counters only, never keyed by handle
//!
//! No table stores anything from which an external id can be rebuilt.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::credentials::{Certificate, PhysicalReward, RewardTier};
use crate::error::EngineResult;
use crate::identity::Handle;
use crate::reputation::{ReputationRecord, Statistics, StatisticsDelta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Someone else committed first; reload and retry
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateInsert {
    Inserted,
    /// Serial already used; generate another
    SerialTaken,
    /// A certificate for this `(handle, rank)` already exists
    AlreadyIssued(Certificate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardInsert {
    Inserted,
    SerialTaken,
    /// The handle already holds a registration
    HandleTaken(PhysicalReward),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_record(&self, handle: &Handle) -> EngineResult<Option<ReputationRecord>>;

    /// Store `record` if the stored version equals `expected_version`
    /// (0 = must not exist yet). `record.version` is the new version.
    async fn commit_record(
        &self,
        record: &ReputationRecord,
        expected_version: u64,
    ) -> EngineResult<CommitOutcome>;

    /// Highest point totals first
    async fn top_records(&self, limit: usize) -> EngineResult<Vec<(Handle, u64)>>;

    /// Number of records holding strictly more than `points`
    async fn count_above(&self, points: u64) -> EngineResult<u64>;

    async fn bump_statistics(&self, delta: &StatisticsDelta) -> EngineResult<()>;

    async fn statistics(&self) -> EngineResult<Statistics>;

    async fn insert_certificate(&self, cert: &Certificate) -> EngineResult<CertificateInsert>;

    async fn find_certificate(&self, serial: &str) -> EngineResult<Option<Certificate>>;

    async fn certificates_for(&self, handle: &Handle) -> EngineResult<Vec<Certificate>>;

    async fn insert_physical_reward(&self, reward: &PhysicalReward) -> EngineResult<RewardInsert>;

    async fn find_physical_reward(&self, serial: &str) -> EngineResult<Option<PhysicalReward>>;

    async fn physical_reward_for(&self, handle: &Handle) -> EngineResult<Option<PhysicalReward>>;

    /// Raise the tier of the handle's registration to `tier` if it is higher.
    /// Returns the row after the update, `None` if the handle has none.
    async fn raise_physical_tier(
        &self,
        handle: &Handle,
        tier: RewardTier,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<PhysicalReward>>;

    /// Move `Eligible -> Claimed`. Returns the row after the update.
    async fn mark_claimed(&self, serial: &str) -> EngineResult<Option<PhysicalReward>>;
}
