//! PostgreSQL 奖励记录仓储
//!
//! 状态变更使用 `UPDATE ... WHERE status = $from`，多个对账实例并发推进同一条
//! 记录时只有一个会生效。

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::repository::{RewardRepository, ensure_transition};
use crate::error::{EngineError, Result};
use crate::models::{CandidateQuery, RewardRecord, StatusUpdate};

const COLUMNS: &str = "id, user_id, ref_id, reward_source, reward_kind, reward_name, amount, \
                       status, granted_at, last_error, attempts, payload, created_at, updated_at";

/// PostgreSQL 奖励记录仓储
pub struct PgRewardRepository {
    pool: PgPool,
}

impl PgRewardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RewardRepository for PgRewardRepository {
    #[instrument(skip(self, record), fields(reward_id = %record.id, user_id = %record.user_id))]
    async fn insert(&self, record: &RewardRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reward_records (id, user_id, ref_id, reward_source, reward_kind,
                                        reward_name, amount, status, granted_at, last_error,
                                        attempts, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(&record.ref_id)
        .bind(record.source)
        .bind(record.kind)
        .bind(&record.name)
        .bind(record.amount)
        .bind(record.status)
        .bind(record.granted_at)
        .bind(&record.last_error)
        .bind(record.attempts)
        .bind(&record.payload)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RewardRecord>> {
        let record = sqlx::query_as::<_, RewardRecord>(&format!(
            "SELECT {} FROM reward_records WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(
        skip(self, update),
        fields(reward_id = %update.id, from = ?update.from, to = ?update.to)
    )]
    async fn transition(&self, update: &StatusUpdate) -> Result<Option<RewardRecord>> {
        ensure_transition(update)?;

        let updated = sqlx::query_as::<_, RewardRecord>(&format!(
            r#"
            UPDATE reward_records
            SET status = $3,
                granted_at = CASE WHEN $3 = 'SUCCESS' THEN $4 ELSE NULL END,
                last_error = $5,
                attempts = attempts + 1,
                updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(update.id)
        .bind(update.from)
        .bind(update.to)
        .bind(update.at)
        .bind(&update.error)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_none() && self.get(update.id).await?.is_none() {
            return Err(EngineError::RewardNotFound(update.id));
        }
        Ok(updated)
    }

    async fn list_candidates(&self, query: &CandidateQuery) -> Result<Vec<RewardRecord>> {
        let statuses: Vec<String> = query.statuses.iter().map(|s| s.as_str().to_string()).collect();

        let records = sqlx::query_as::<_, RewardRecord>(&format!(
            r#"
            SELECT {}
            FROM reward_records
            WHERE status = ANY($1)
              AND ($2::varchar IS NULL OR user_id = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
            ORDER BY updated_at ASC, created_at ASC, id ASC
            LIMIT $5
            "#,
            COLUMNS
        ))
        .bind(&statuses)
        .bind(&query.user_id)
        .bind(query.created_after)
        .bind(query.created_before)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<RewardRecord>> {
        let records = sqlx::query_as::<_, RewardRecord>(&format!(
            r#"
            SELECT {}
            FROM reward_records
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            COLUMNS
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
