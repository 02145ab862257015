//! Database Connection Pool using sqlx

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::credentials::{Certificate, PhysicalReward, RewardTier};
use crate::database::credentials::CredentialRepository;
use crate::database::records::RecordRepository;
use crate::database::statistics::StatisticsRepository;
use crate::error::{EngineError, EngineResult};
use crate::identity::Handle;
use crate::reputation::{ReputationRecord, Statistics, StatisticsDelta};
use crate::store::{CertificateInsert, CommitOutcome, LedgerStore, RewardInsert};

pub struct DatabasePool {
    pool: PgPool,
    records: RecordRepository,
    credentials: CredentialRepository,
    statistics: StatisticsRepository,
}

impl DatabasePool {
    pub async fn new(connection_string: &str, max_connections: u32) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| EngineError::Store(format!("Failed to connect to PostgreSQL: {}", e)))?;

        info!(max_connections, "Connected to PostgreSQL");

        let records = RecordRepository::new(pool.clone());
        let credentials = CredentialRepository::new(pool.clone());
        let statistics = StatisticsRepository::new(pool.clone());

        Ok(Self {
            pool,
            records,
            credentials,
            statistics,
        })
    }

    pub async fn init_schema(&self) -> EngineResult<()> {
        info!("Initializing database schema...");

        sqlx::query("CREATE SCHEMA IF NOT EXISTS honor")
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Store(format!("Failed to create honor schema: {}", e)))?;

        self.records.init_schema().await?;
        self.credentials.init_schema().await?;
        self.statistics.init_schema().await?;

        info!("Database schema initialized");
        Ok(())
    }

    pub fn records(&self) -> &RecordRepository {
        &self.records
    }

    pub fn credentials(&self) -> &CredentialRepository {
        &self.credentials
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for DatabasePool {
    async fn load_record(&self, handle: &Handle) -> EngineResult<Option<ReputationRecord>> {
        self.records.load(handle).await
    }

    async fn commit_record(
        &self,
        record: &ReputationRecord,
        expected_version: u64,
    ) -> EngineResult<CommitOutcome> {
        self.records.commit(record, expected_version).await
    }

    async fn top_records(&self, limit: usize) -> EngineResult<Vec<(Handle, u64)>> {
        self.records.top(limit).await
    }

    async fn count_above(&self, points: u64) -> EngineResult<u64> {
        self.records.count_above(points).await
    }

    async fn bump_statistics(&self, delta: &StatisticsDelta) -> EngineResult<()> {
        self.statistics.bump(delta).await
    }

    async fn statistics(&self) -> EngineResult<Statistics> {
        self.statistics.load().await
    }

    async fn insert_certificate(&self, cert: &Certificate) -> EngineResult<CertificateInsert> {
        self.credentials.insert_certificate(cert).await
    }

    async fn find_certificate(&self, serial: &str) -> EngineResult<Option<Certificate>> {
        self.credentials.find_certificate(serial).await
    }

    async fn certificates_for(&self, handle: &Handle) -> EngineResult<Vec<Certificate>> {
        self.credentials.certificates_for(handle).await
    }

    async fn insert_physical_reward(&self, reward: &PhysicalReward) -> EngineResult<RewardInsert> {
        self.credentials.insert_physical_reward(reward).await
    }

    async fn find_physical_reward(&self, serial: &str) -> EngineResult<Option<PhysicalReward>> {
        self.credentials.find_physical_reward(serial).await
    }

    async fn physical_reward_for(&self, handle: &Handle) -> EngineResult<Option<PhysicalReward>> {
        self.credentials.physical_reward_for(handle).await
    }

    async fn raise_physical_tier(
        &self,
        handle: &Handle,
        tier: RewardTier,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<PhysicalReward>> {
        self.credentials.raise_tier(handle, tier, at).await
    }

    async fn mark_claimed(&self, serial: &str) -> EngineResult<Option<PhysicalReward>> {
        self.credentials.mark_claimed(serial).await
    }
}
