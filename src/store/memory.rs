//! In-memory store
//!
//! Used when PostgreSQL is disabled and by the test suites. Records live in a
//! sharded map so different handles never contend; credential tables sit
//! behind one lock each so their multi-index constraints are checked
//! atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::credentials::{Certificate, ClaimStatus, PhysicalReward, RewardTier};
use crate::error::{EngineError, EngineResult};
use crate::identity::Handle;
use crate::reputation::{ReputationRecord, Statistics, StatisticsDelta};
use crate::store::{CertificateInsert, CommitOutcome, LedgerStore, RewardInsert};

#[derive(Default)]
struct CertificateTable {
    by_serial: HashMap<String, Certificate>,
    by_transition: HashMap<(Handle, String), String>,
}

#[derive(Default)]
struct RewardTable {
    by_serial: HashMap<String, PhysicalReward>,
    by_handle: HashMap<Handle, String>,
    by_alias: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<Handle, ReputationRecord>,
    certificates: RwLock<CertificateTable>,
    rewards: RwLock<RewardTable>,
    statistics: RwLock<Statistics>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a certificate row without any checks. Test hook for
    /// simulating direct tampering with the store.
    pub async fn overwrite_certificate(&self, cert: Certificate) {
        let mut table = self.certificates.write().await;
        table.by_serial.insert(cert.serial.clone(), cert);
    }

    /// Overwrite a physical reward row without any checks.
    pub async fn overwrite_physical_reward(&self, reward: PhysicalReward) {
        let mut table = self.rewards.write().await;
        table.by_serial.insert(reward.serial.clone(), reward);
    }

    pub async fn physical_reward_count(&self) -> usize {
        self.rewards.read().await.by_serial.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load_record(&self, handle: &Handle) -> EngineResult<Option<ReputationRecord>> {
        Ok(self.records.get(handle).map(|r| r.value().clone()))
    }

    async fn commit_record(
        &self,
        record: &ReputationRecord,
        expected_version: u64,
    ) -> EngineResult<CommitOutcome> {
        match self.records.entry(record.handle.clone()) {
            Entry::Vacant(slot) => {
                if expected_version != 0 {
                    return Ok(CommitOutcome::Conflict);
                }
                slot.insert(record.clone());
                Ok(CommitOutcome::Committed)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().version != expected_version {
                    return Ok(CommitOutcome::Conflict);
                }
                slot.insert(record.clone());
                Ok(CommitOutcome::Committed)
            }
        }
    }

    async fn top_records(&self, limit: usize) -> EngineResult<Vec<(Handle, u64)>> {
        let mut rows: Vec<(Handle, u64)> = self
            .records
            .iter()
            .map(|r| (r.key().clone(), r.value().points))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count_above(&self, points: u64) -> EngineResult<u64> {
        Ok(self.records.iter().filter(|r| r.value().points > points).count() as u64)
    }

    async fn bump_statistics(&self, delta: &StatisticsDelta) -> EngineResult<()> {
        self.statistics.write().await.apply(delta);
        Ok(())
    }

    async fn statistics(&self) -> EngineResult<Statistics> {
        Ok(self.statistics.read().await.clone())
    }

    async fn insert_certificate(&self, cert: &Certificate) -> EngineResult<CertificateInsert> {
        let mut table = self.certificates.write().await;

        let transition = (cert.handle.clone(), cert.rank.clone());
        if let Some(serial) = table.by_transition.get(&transition) {
            if let Some(existing) = table.by_serial.get(serial) {
                return Ok(CertificateInsert::AlreadyIssued(existing.clone()));
            }
        }
        if table.by_serial.contains_key(&cert.serial) {
            return Ok(CertificateInsert::SerialTaken);
        }

        table.by_transition.insert(transition, cert.serial.clone());
        table.by_serial.insert(cert.serial.clone(), cert.clone());
        Ok(CertificateInsert::Inserted)
    }

    async fn find_certificate(&self, serial: &str) -> EngineResult<Option<Certificate>> {
        Ok(self.certificates.read().await.by_serial.get(serial).cloned())
    }

    async fn certificates_for(&self, handle: &Handle) -> EngineResult<Vec<Certificate>> {
        let table = self.certificates.read().await;
        let mut certs: Vec<Certificate> = table
            .by_serial
            .values()
            .filter(|c| &c.handle == handle)
            .cloned()
            .collect();
        certs.sort_by_key(|c| c.issued_at);
        Ok(certs)
    }

    async fn insert_physical_reward(&self, reward: &PhysicalReward) -> EngineResult<RewardInsert> {
        let mut table = self.rewards.write().await;

        if let Some(serial) = table.by_handle.get(&reward.handle) {
            if let Some(existing) = table.by_serial.get(serial) {
                return Ok(RewardInsert::HandleTaken(existing.clone()));
            }
        }
        if table.by_serial.contains_key(&reward.serial) {
            return Ok(RewardInsert::SerialTaken);
        }
        if table.by_alias.contains_key(&reward.anonymous_id) {
            return Err(EngineError::Store(
                "physical reward anonymous id already registered".to_string(),
            ));
        }

        table.by_handle.insert(reward.handle.clone(), reward.serial.clone());
        table.by_alias.insert(reward.anonymous_id.clone(), reward.serial.clone());
        table.by_serial.insert(reward.serial.clone(), reward.clone());
        Ok(RewardInsert::Inserted)
    }

    async fn find_physical_reward(&self, serial: &str) -> EngineResult<Option<PhysicalReward>> {
        Ok(self.rewards.read().await.by_serial.get(serial).cloned())
    }

    async fn physical_reward_for(&self, handle: &Handle) -> EngineResult<Option<PhysicalReward>> {
        let table = self.rewards.read().await;
        Ok(table
            .by_handle
            .get(handle)
            .and_then(|serial| table.by_serial.get(serial))
            .cloned())
    }

    async fn raise_physical_tier(
        &self,
        handle: &Handle,
        tier: RewardTier,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<PhysicalReward>> {
        let mut table = self.rewards.write().await;
        let Some(serial) = table.by_handle.get(handle).cloned() else {
            return Ok(None);
        };
        let Some(reward) = table.by_serial.get_mut(&serial) else {
            return Ok(None);
        };
        if tier > reward.tier {
            reward.tier = tier;
            reward.upgraded_at = Some(at);
        }
        Ok(Some(reward.clone()))
    }

    async fn mark_claimed(&self, serial: &str) -> EngineResult<Option<PhysicalReward>> {
        let mut table = self.rewards.write().await;
        Ok(table.by_serial.get_mut(serial).map(|reward| {
            reward.claim_status = ClaimStatus::Claimed;
            reward.clone()
        }))
    }
}
