//! Record Repository - reputation records and their child rows
//!
//! The record row carries the point total and a version column. A commit
//! replaces the record only when the stored version matches, and writes the
//! streak, milestone, count, cooldown and unlock rows inside the same
//! transaction.
//! No column here can be used to reconstruct an external id.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::identity::Handle;
use crate::reputation::{DailyCombo, ReputationRecord, Streak};
use crate::store::CommitOutcome;

pub(crate) fn store_err(context: &'static str) -> impl Fn(sqlx::Error) -> EngineError {
    move |e| EngineError::Store(format!("{}: {}", context, e))
}

/// Row content that cannot be decoded is corruption, not a transient fault
pub(crate) fn parse_handle(value: &str) -> EngineResult<Handle> {
    Handle::from_stored(value)
        .ok_or_else(|| EngineError::CorruptRecord("malformed handle".to_string()))
}

pub(crate) fn stored_count(column: &'static str, value: i64) -> EngineResult<u64> {
    u64::try_from(value)
        .map_err(|_| EngineError::CorruptRecord(format!("negative {}: {}", column, value)))
}

pub struct RecordRepository {
    pool: PgPool,
}

impl RecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize record tables
    pub async fn init_schema(&self) -> EngineResult<()> {
        info!("Initializing reputation record tables...");

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS honor.reputation_records (
                handle CHAR(64) PRIMARY KEY,
                points BIGINT NOT NULL DEFAULT 0 CHECK (points >= 0),
                evidence_total DOUBLE PRECISION NOT NULL DEFAULT 0.0,
                combo_day DATE,
                combo_categories TEXT[] NOT NULL DEFAULT '{}',
                combo_awarded INTEGER[] NOT NULL DEFAULT '{}',
                joined_at TIMESTAMP WITH TIME ZONE NOT NULL,
                last_active TIMESTAMP WITH TIME ZONE NOT NULL,
                version BIGINT NOT NULL
            )
        "#)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to create reputation_records table"))?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS honor.streaks (
                handle CHAR(64) NOT NULL REFERENCES honor.reputation_records(handle),
                category VARCHAR(64) NOT NULL,
                current_length INTEGER NOT NULL,
                longest_length INTEGER NOT NULL,
                last_active_day DATE NOT NULL,
                PRIMARY KEY (handle, category)
            )
        "#)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to create streaks table"))?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS honor.streak_awards (
                handle CHAR(64) NOT NULL REFERENCES honor.reputation_records(handle),
                category VARCHAR(64) NOT NULL,
                milestone INTEGER NOT NULL,
                PRIMARY KEY (handle, category, milestone)
            )
        "#)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to create streak_awards table"))?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS honor.category_counts (
                handle CHAR(64) NOT NULL REFERENCES honor.reputation_records(handle),
                category VARCHAR(64) NOT NULL,
                count BIGINT NOT NULL,
                PRIMARY KEY (handle, category)
            )
        "#)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to create category_counts table"))?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS honor.achievement_unlocks (
                handle CHAR(64) NOT NULL REFERENCES honor.reputation_records(handle),
                achievement_id VARCHAR(64) NOT NULL,
                unlocked_at TIMESTAMP WITH TIME ZONE NOT NULL,
                PRIMARY KEY (handle, achievement_id)
            )
        "#)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to create achievement_unlocks table"))?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS honor.action_cooldowns (
                handle CHAR(64) NOT NULL REFERENCES honor.reputation_records(handle),
                category VARCHAR(64) NOT NULL,
                last_action_at TIMESTAMP WITH TIME ZONE NOT NULL,
                PRIMARY KEY (handle, category)
            )
        "#)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to create action_cooldowns table"))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_points ON honor.reputation_records(points DESC)")
            .execute(&self.pool)
            .await
            .map_err(store_err("Failed to create points index"))?;

        info!("Reputation record tables initialized");
        Ok(())
    }

    pub async fn load(&self, handle: &Handle) -> EngineResult<Option<ReputationRecord>> {
        let row = sqlx::query(r#"
            SELECT handle, points, evidence_total, combo_day, combo_categories, combo_awarded,
                   joined_at, last_active, version
            FROM honor.reputation_records
            WHERE handle = $1
        "#)
        .bind(handle.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("Failed to load record"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut record = record_from_row(handle, &row)?;

        let streaks = sqlx::query(r#"
            SELECT category, current_length, longest_length, last_active_day
            FROM honor.streaks WHERE handle = $1
        "#)
        .bind(handle.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("Failed to load streaks"))?;
        for row in streaks {
            let category: String = row.try_get("category")?;
            let current: i32 = row.try_get("current_length")?;
            let longest: i32 = row.try_get("longest_length")?;
            let last_active_day: NaiveDate = row.try_get("last_active_day")?;
            record.streaks.insert(
                category,
                Streak {
                    current: current as u32,
                    longest: longest as u32,
                    last_active_day,
                },
            );
        }

        let awards = sqlx::query("SELECT category, milestone FROM honor.streak_awards WHERE handle = $1")
            .bind(handle.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err("Failed to load streak awards"))?;
        for row in awards {
            let category: String = row.try_get("category")?;
            let milestone: i32 = row.try_get("milestone")?;
            record
                .streak_awards
                .entry(category)
                .or_default()
                .insert(milestone as u32);
        }

        let counts = sqlx::query("SELECT category, count FROM honor.category_counts WHERE handle = $1")
            .bind(handle.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err("Failed to load category counts"))?;
        for row in counts {
            let category: String = row.try_get("category")?;
            let count: i64 = row.try_get("count")?;
            record.category_counts.insert(category, stored_count("category count", count)?);
        }

        let cooldowns = sqlx::query(
            "SELECT category, last_action_at FROM honor.action_cooldowns WHERE handle = $1",
        )
        .bind(handle.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("Failed to load action cooldowns"))?;
        for row in cooldowns {
            let category: String = row.try_get("category")?;
            let at: DateTime<Utc> = row.try_get("last_action_at")?;
            record.last_action_at.insert(category, at);
        }

        let unlocks = sqlx::query(
            "SELECT achievement_id, unlocked_at FROM honor.achievement_unlocks WHERE handle = $1",
        )
        .bind(handle.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("Failed to load achievement unlocks"))?;
        for row in unlocks {
            let id: String = row.try_get("achievement_id")?;
            let at: DateTime<Utc> = row.try_get("unlocked_at")?;
            record.unlocked.insert(id, at);
        }

        Ok(Some(record))
    }

    /// Compare-and-swap commit of the whole record
    pub async fn commit(
        &self,
        record: &ReputationRecord,
        expected_version: u64,
    ) -> EngineResult<CommitOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_err("Failed to begin transaction"))?;

        let combo_categories: Vec<String> = record.combo.categories.iter().cloned().collect();
        let combo_awarded: Vec<i32> = record.combo.awarded.iter().map(|m| *m as i32).collect();

        let result = if expected_version == 0 {
            sqlx::query(r#"
                INSERT INTO honor.reputation_records
                    (handle, points, evidence_total, combo_day, combo_categories, combo_awarded,
                     joined_at, last_active, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (handle) DO NOTHING
            "#)
            .bind(record.handle.as_str())
            .bind(record.points as i64)
            .bind(record.evidence_total)
            .bind(record.combo.day)
            .bind(&combo_categories)
            .bind(&combo_awarded)
            .bind(record.joined_at)
            .bind(record.last_active)
            .bind(record.version as i64)
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(r#"
                UPDATE honor.reputation_records
                SET points = $2, evidence_total = $3, combo_day = $4, combo_categories = $5,
                    combo_awarded = $6, last_active = $7, version = $8
                WHERE handle = $1 AND version = $9
            "#)
            .bind(record.handle.as_str())
            .bind(record.points as i64)
            .bind(record.evidence_total)
            .bind(record.combo.day)
            .bind(&combo_categories)
            .bind(&combo_awarded)
            .bind(record.last_active)
            .bind(record.version as i64)
            .bind(expected_version as i64)
            .execute(&mut *tx)
            .await
        }
        .map_err(store_err("Failed to write record"))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(store_err("Failed to roll back transaction"))?;
            debug!(handle = %record.handle.short(), expected = expected_version, "Record version conflict");
            return Ok(CommitOutcome::Conflict);
        }

        write_children(&mut tx, record).await?;

        tx.commit()
            .await
            .map_err(store_err("Failed to commit record"))?;
        Ok(CommitOutcome::Committed)
    }

    pub async fn top(&self, limit: usize) -> EngineResult<Vec<(Handle, u64)>> {
        let rows = sqlx::query(r#"
            SELECT handle, points FROM honor.reputation_records
            ORDER BY points DESC, handle ASC
            LIMIT $1
        "#)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("Failed to load leaderboard"))?;

        rows.iter()
            .map(|row| -> EngineResult<(Handle, u64)> {
                let handle: String = row.try_get("handle")?;
                let points: i64 = row.try_get("points")?;
                Ok((parse_handle(&handle)?, stored_count("points", points)?))
            })
            .collect()
    }

    pub async fn count_above(&self, points: u64) -> EngineResult<u64> {
        let above: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM honor.reputation_records WHERE points > $1",
        )
        .bind(i64::try_from(points).unwrap_or(i64::MAX))
        .fetch_one(&self.pool)
        .await
        .map_err(store_err("Failed to count records above points"))?;
        stored_count("record count", above)
    }
}

fn record_from_row(handle: &Handle, row: &PgRow) -> EngineResult<ReputationRecord> {
    let points: i64 = row.try_get("points")?;
    let version: i64 = row.try_get("version")?;
    let combo_categories: Vec<String> = row.try_get("combo_categories")?;
    let combo_awarded: Vec<i32> = row.try_get("combo_awarded")?;
    let joined_at: DateTime<Utc> = row.try_get("joined_at")?;

    let mut record = ReputationRecord::new(handle.clone(), joined_at);
    record.points = stored_count("points", points)?;
    record.evidence_total = row.try_get("evidence_total")?;
    record.combo = DailyCombo {
        day: row.try_get("combo_day")?,
        categories: combo_categories.into_iter().collect(),
        awarded: combo_awarded.into_iter().map(|m| m as u32).collect::<BTreeSet<u32>>(),
    };
    record.last_active = row.try_get("last_active")?;
    record.version = stored_count("version", version)?;
    Ok(record)
}

/// Child rows follow the record. Streaks and counts are replaced so a purge
/// sticks; milestone keys and unlocks are append-only; cooldown stamps are
/// upserted.
async fn write_children(
    tx: &mut Transaction<'_, Postgres>,
    record: &ReputationRecord,
) -> EngineResult<()> {
    let handle = record.handle.as_str();

    sqlx::query("DELETE FROM honor.streaks WHERE handle = $1")
        .bind(handle)
        .execute(&mut **tx)
        .await
        .map_err(store_err("Failed to clear streaks"))?;
    for (category, streak) in &record.streaks {
        sqlx::query(r#"
            INSERT INTO honor.streaks (handle, category, current_length, longest_length, last_active_day)
            VALUES ($1, $2, $3, $4, $5)
        "#)
        .bind(handle)
        .bind(category)
        .bind(streak.current as i32)
        .bind(streak.longest as i32)
        .bind(streak.last_active_day)
        .execute(&mut **tx)
        .await
        .map_err(store_err("Failed to write streak"))?;
    }

    sqlx::query("DELETE FROM honor.category_counts WHERE handle = $1")
        .bind(handle)
        .execute(&mut **tx)
        .await
        .map_err(store_err("Failed to clear category counts"))?;
    let counts: &BTreeMap<String, u64> = &record.category_counts;
    for (category, count) in counts {
        sqlx::query("INSERT INTO honor.category_counts (handle, category, count) VALUES ($1, $2, $3)")
            .bind(handle)
            .bind(category)
            .bind(*count as i64)
            .execute(&mut **tx)
            .await
            .map_err(store_err("Failed to write category count"))?;
    }

    for (category, milestones) in &record.streak_awards {
        for milestone in milestones {
            sqlx::query(r#"
                INSERT INTO honor.streak_awards (handle, category, milestone)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
            "#)
            .bind(handle)
            .bind(category)
            .bind(*milestone as i32)
            .execute(&mut **tx)
            .await
            .map_err(store_err("Failed to write streak award"))?;
        }
    }

    for (category, at) in &record.last_action_at {
        sqlx::query(r#"
            INSERT INTO honor.action_cooldowns (handle, category, last_action_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (handle, category) DO UPDATE
                SET last_action_at = GREATEST(honor.action_cooldowns.last_action_at, EXCLUDED.last_action_at)
        "#)
        .bind(handle)
        .bind(category)
        .bind(*at)
        .execute(&mut **tx)
        .await
        .map_err(store_err("Failed to write action cooldown"))?;
    }

    for (id, at) in &record.unlocked {
        sqlx::query(r#"
            INSERT INTO honor.achievement_unlocks (handle, achievement_id, unlocked_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (handle, achievement_id) DO NOTHING
        "#)
        .bind(handle)
        .bind(id)
        .bind(*at)
        .execute(&mut **tx)
        .await
        .map_err(store_err("Failed to write achievement unlock"))?;
    }

    Ok(())
}
