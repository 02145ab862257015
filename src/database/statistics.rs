//! Statistics Repository - aggregate counters
//!
//! One row per counter key. Increments are single upserts, so concurrent
//! writers never lose an update. Keys:
//! - `members`, `actions`, `points`
//! - `category:<name>` per action category
//! - `tier:<label>` per resolved evidence tier, with the quantity summed
//!   alongside in `evidence`

use sqlx::postgres::PgPool;
use sqlx::{Postgres, Row, Transaction};
use tracing::info;

use crate::database::records::{stored_count, store_err};
use crate::error::EngineResult;
use crate::reputation::{Statistics, StatisticsDelta};

pub struct StatisticsRepository {
    pool: PgPool,
}

impl StatisticsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> EngineResult<()> {
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS honor.statistics (
                stat_key VARCHAR(96) PRIMARY KEY,
                count BIGINT NOT NULL DEFAULT 0,
                quantity DOUBLE PRECISION NOT NULL DEFAULT 0.0
            )
        "#)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to create statistics table"))?;

        info!("Statistics table initialized");
        Ok(())
    }

    pub async fn bump(&self, delta: &StatisticsDelta) -> EngineResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_err("Failed to begin transaction"))?;

        if delta.new_member {
            increment(&mut tx, "members", 1, 0.0).await?;
        }
        increment(&mut tx, "actions", 1, 0.0).await?;
        increment(&mut tx, "points", i64::try_from(delta.points).unwrap_or(i64::MAX), 0.0).await?;
        increment(&mut tx, &format!("category:{}", delta.category), 1, 0.0).await?;
        if let Some(tier) = &delta.evidence_tier {
            increment(&mut tx, &format!("tier:{}", tier), 1, 0.0).await?;
        }
        if let Some(q) = delta.evidence_quantity.filter(|q| q.is_finite() && *q > 0.0) {
            increment(&mut tx, "evidence", 1, q).await?;
        }

        tx.commit()
            .await
            .map_err(store_err("Failed to commit statistics"))
    }

    pub async fn load(&self) -> EngineResult<Statistics> {
        let rows = sqlx::query("SELECT stat_key, count, quantity FROM honor.statistics")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err("Failed to load statistics"))?;

        let mut stats = Statistics::default();
        for row in rows {
            let key: String = row.try_get("stat_key")?;
            let count = stored_count("statistics count", row.try_get("count")?)?;
            let quantity: f64 = row.try_get("quantity")?;

            match key.as_str() {
                "members" => stats.total_members = count,
                "actions" => stats.total_actions = count,
                "points" => stats.total_points = count,
                "evidence" => stats.evidence_quantity = quantity,
                _ => {
                    if let Some(category) = key.strip_prefix("category:") {
                        stats.actions_by_category.insert(category.to_string(), count);
                    } else if let Some(tier) = key.strip_prefix("tier:") {
                        stats.evidence_by_tier.insert(tier.to_string(), count);
                    }
                }
            }
        }
        Ok(stats)
    }
}

async fn increment(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
    count: i64,
    quantity: f64,
) -> EngineResult<()> {
    sqlx::query(r#"
        INSERT INTO honor.statistics (stat_key, count, quantity)
        VALUES ($1, $2, $3)
        ON CONFLICT (stat_key) DO UPDATE
            SET count = honor.statistics.count + EXCLUDED.count,
                quantity = honor.statistics.quantity + EXCLUDED.quantity
    "#)
    .bind(key)
    .bind(count)
    .bind(quantity)
    .execute(&mut **tx)
    .await
    .map_err(store_err("Failed to bump statistic"))?;
    Ok(())
}
