//! 数据库连接管理模块
//!
//! 提供 PostgreSQL 连接池管理与奖励记录表结构初始化。

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// 奖励记录表
///
/// 状态只允许 PENDING -> SUCCESS | FAILED、FAILED -> SUCCESS，
/// 由应用层的条件更新保证，表结构只负责存储。
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS reward_records (
    id            UUID PRIMARY KEY,
    user_id       VARCHAR(64)  NOT NULL,
    ref_id        VARCHAR(128) NOT NULL,
    reward_source VARCHAR(16)  NOT NULL,
    reward_kind   VARCHAR(16)  NOT NULL,
    reward_name   VARCHAR(128) NOT NULL,
    amount        BIGINT       NOT NULL,
    status        VARCHAR(16)  NOT NULL,
    granted_at    TIMESTAMPTZ,
    last_error    TEXT,
    attempts      INT          NOT NULL DEFAULT 0,
    payload       JSONB        NOT NULL DEFAULT '{}'::jsonb,
    created_at    TIMESTAMPTZ  NOT NULL,
    updated_at    TIMESTAMPTZ  NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reward_records_status_created
    ON reward_records (status, created_at);
CREATE INDEX IF NOT EXISTS idx_reward_records_status_updated
    ON reward_records (status, updated_at);
CREATE INDEX IF NOT EXISTS idx_reward_records_user
    ON reward_records (user_id, created_at);
"#;

/// 数据库连接池包装
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 创建数据库连接池
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!("Database connection pool created");

        Ok(Self { pool })
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// 建表（幂等）
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("reward_records schema ensured");
        Ok(())
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}
