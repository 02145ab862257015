//! Credential Repository - certificates and physical reward registrations
//!
//! Uniqueness lives in the schema. Inserts use `ON CONFLICT DO NOTHING` and
//! look up which constraint fired, so a race between two issuers resolves to
//! the row that won.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::credentials::{Certificate, ClaimStatus, PhysicalReward, RewardTier};
use crate::database::records::{parse_handle, stored_count, store_err};
use crate::error::{EngineError, EngineResult};
use crate::identity::Handle;
use crate::store::{CertificateInsert, RewardInsert};

fn tier_level(tier: RewardTier) -> i16 {
    match tier {
        RewardTier::Bronze => 1,
        RewardTier::Silver => 2,
        RewardTier::Gold => 3,
    }
}

pub struct CredentialRepository {
    pool: PgPool,
}

impl CredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize credential tables
    pub async fn init_schema(&self) -> EngineResult<()> {
        info!("Initializing credential tables...");

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS honor.certificates (
                serial VARCHAR(64) PRIMARY KEY,
                handle CHAR(64) NOT NULL,
                rank VARCHAR(64) NOT NULL,
                points BIGINT NOT NULL,
                issued_at TIMESTAMP WITH TIME ZONE NOT NULL,
                verification_hash CHAR(64) NOT NULL,
                UNIQUE (handle, rank)
            )
        "#)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to create certificates table"))?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS honor.physical_rewards (
                serial VARCHAR(64) PRIMARY KEY,
                handle CHAR(64) NOT NULL UNIQUE,
                anonymous_id VARCHAR(64) NOT NULL UNIQUE,
                initial_tier VARCHAR(16) NOT NULL,
                tier VARCHAR(16) NOT NULL,
                tier_level SMALLINT NOT NULL,
                hologram_code VARCHAR(32) NOT NULL,
                issued_at TIMESTAMP WITH TIME ZONE NOT NULL,
                upgraded_at TIMESTAMP WITH TIME ZONE,
                claim_status VARCHAR(16) NOT NULL DEFAULT 'eligible'
            )
        "#)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to create physical_rewards table"))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_certificates_handle ON honor.certificates(handle)")
            .execute(&self.pool)
            .await
            .map_err(store_err("Failed to create certificate index"))?;

        info!("Credential tables initialized");
        Ok(())
    }

    pub async fn insert_certificate(&self, cert: &Certificate) -> EngineResult<CertificateInsert> {
        if let Some(existing) = self.certificate_for_rank(&cert.handle, &cert.rank).await? {
            return Ok(CertificateInsert::AlreadyIssued(existing));
        }

        let result = sqlx::query(r#"
            INSERT INTO honor.certificates (serial, handle, rank, points, issued_at, verification_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
        "#)
        .bind(&cert.serial)
        .bind(cert.handle.as_str())
        .bind(&cert.rank)
        .bind(cert.points as i64)
        .bind(cert.issued_at)
        .bind(&cert.verification_hash)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to insert certificate"))?;

        if result.rows_affected() == 1 {
            return Ok(CertificateInsert::Inserted);
        }

        // Lost a race or collided on the serial
        match self.certificate_for_rank(&cert.handle, &cert.rank).await? {
            Some(existing) => Ok(CertificateInsert::AlreadyIssued(existing)),
            None => {
                debug!(serial = %cert.serial, "Certificate serial already in use");
                Ok(CertificateInsert::SerialTaken)
            }
        }
    }

    async fn certificate_for_rank(&self, handle: &Handle, rank: &str) -> EngineResult<Option<Certificate>> {
        let row = sqlx::query(r#"
            SELECT serial, handle, rank, points, issued_at, verification_hash
            FROM honor.certificates WHERE handle = $1 AND rank = $2
        "#)
        .bind(handle.as_str())
        .bind(rank)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("Failed to look up certificate"))?;

        row.as_ref().map(certificate_from_row).transpose()
    }

    pub async fn find_certificate(&self, serial: &str) -> EngineResult<Option<Certificate>> {
        let row = sqlx::query(r#"
            SELECT serial, handle, rank, points, issued_at, verification_hash
            FROM honor.certificates WHERE serial = $1
        "#)
        .bind(serial)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("Failed to find certificate"))?;

        row.as_ref().map(certificate_from_row).transpose()
    }

    pub async fn certificates_for(&self, handle: &Handle) -> EngineResult<Vec<Certificate>> {
        let rows = sqlx::query(r#"
            SELECT serial, handle, rank, points, issued_at, verification_hash
            FROM honor.certificates WHERE handle = $1
            ORDER BY issued_at ASC
        "#)
        .bind(handle.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("Failed to list certificates"))?;

        rows.iter().map(certificate_from_row).collect()
    }

    pub async fn insert_physical_reward(&self, reward: &PhysicalReward) -> EngineResult<RewardInsert> {
        if let Some(existing) = self.physical_reward_for(&reward.handle).await? {
            return Ok(RewardInsert::HandleTaken(existing));
        }

        let result = sqlx::query(r#"
            INSERT INTO honor.physical_rewards
                (serial, handle, anonymous_id, initial_tier, tier, tier_level, hologram_code,
                 issued_at, upgraded_at, claim_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT DO NOTHING
        "#)
        .bind(&reward.serial)
        .bind(reward.handle.as_str())
        .bind(&reward.anonymous_id)
        .bind(reward.initial_tier.as_str())
        .bind(reward.tier.as_str())
        .bind(tier_level(reward.tier))
        .bind(&reward.hologram_code)
        .bind(reward.issued_at)
        .bind(reward.upgraded_at)
        .bind(reward.claim_status.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to insert physical reward"))?;

        if result.rows_affected() == 1 {
            return Ok(RewardInsert::Inserted);
        }

        if let Some(existing) = self.physical_reward_for(&reward.handle).await? {
            return Ok(RewardInsert::HandleTaken(existing));
        }
        if self.find_physical_reward(&reward.serial).await?.is_some() {
            debug!(serial = %reward.serial, "Physical reward serial already in use");
            return Ok(RewardInsert::SerialTaken);
        }
        Err(EngineError::Store(
            "anonymous id already registered to another handle".to_string(),
        ))
    }

    pub async fn find_physical_reward(&self, serial: &str) -> EngineResult<Option<PhysicalReward>> {
        let row = sqlx::query(r#"
            SELECT serial, handle, anonymous_id, initial_tier, tier, hologram_code,
                   issued_at, upgraded_at, claim_status
            FROM honor.physical_rewards WHERE serial = $1
        "#)
        .bind(serial)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("Failed to find physical reward"))?;

        row.as_ref().map(reward_from_row).transpose()
    }

    pub async fn physical_reward_for(&self, handle: &Handle) -> EngineResult<Option<PhysicalReward>> {
        let row = sqlx::query(r#"
            SELECT serial, handle, anonymous_id, initial_tier, tier, hologram_code,
                   issued_at, upgraded_at, claim_status
            FROM honor.physical_rewards WHERE handle = $1
        "#)
        .bind(handle.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("Failed to look up physical reward"))?;

        row.as_ref().map(reward_from_row).transpose()
    }

    /// Raise only; a lower or equal tier leaves the row untouched
    pub async fn raise_tier(
        &self,
        handle: &Handle,
        tier: RewardTier,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<PhysicalReward>> {
        sqlx::query(r#"
            UPDATE honor.physical_rewards
            SET tier = $2, tier_level = $3, upgraded_at = $4
            WHERE handle = $1 AND tier_level < $3
        "#)
        .bind(handle.as_str())
        .bind(tier.as_str())
        .bind(tier_level(tier))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to raise physical reward tier"))?;

        self.physical_reward_for(handle).await
    }

    pub async fn mark_claimed(&self, serial: &str) -> EngineResult<Option<PhysicalReward>> {
        sqlx::query("UPDATE honor.physical_rewards SET claim_status = 'claimed' WHERE serial = $1")
            .bind(serial)
            .execute(&self.pool)
            .await
            .map_err(store_err("Failed to mark physical reward claimed"))?;

        self.find_physical_reward(serial).await
    }
}

fn certificate_from_row(row: &PgRow) -> EngineResult<Certificate> {
    let handle: String = row.try_get("handle")?;
    let points: i64 = row.try_get("points")?;
    Ok(Certificate {
        serial: row.try_get("serial")?,
        handle: parse_handle(&handle)?,
        rank: row.try_get("rank")?,
        points: stored_count("certificate points", points)?,
        issued_at: row.try_get("issued_at")?,
        verification_hash: row.try_get("verification_hash")?,
    })
}

fn reward_from_row(row: &PgRow) -> EngineResult<PhysicalReward> {
    let handle: String = row.try_get("handle")?;
    let initial_tier: String = row.try_get("initial_tier")?;
    let tier: String = row.try_get("tier")?;
    let claim_status: String = row.try_get("claim_status")?;

    let parse_tier = |value: &str| {
        RewardTier::parse(value)
            .ok_or_else(|| EngineError::CorruptRecord(format!("unknown reward tier {:?}", value)))
    };

    Ok(PhysicalReward {
        serial: row.try_get("serial")?,
        handle: parse_handle(&handle)?,
        anonymous_id: row.try_get("anonymous_id")?,
        initial_tier: parse_tier(&initial_tier)?,
        tier: parse_tier(&tier)?,
        hologram_code: row.try_get("hologram_code")?,
        issued_at: row.try_get("issued_at")?,
        upgraded_at: row.try_get("upgraded_at")?,
        claim_status: ClaimStatus::parse(&claim_status).ok_or_else(|| {
            EngineError::CorruptRecord(format!("unknown claim status {:?}", claim_status))
        })?,
    })
}
