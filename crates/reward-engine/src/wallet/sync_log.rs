//! 钱包同步尝试日志
//!
//! 有界存储：内存实现为环形缓冲区，Redis 实现为 LPUSH + LTRIM 的定长列表，
//! 多实例共享同一份日志时健康度统计才准确。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reward_shared::cache::Cache;
use std::collections::VecDeque;

use crate::error::{EngineError, Result};
use crate::models::{SyncAttempt, SyncStats};

/// 同步日志存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncLogStore: Send + Sync {
    async fn append(&self, attempt: SyncAttempt) -> Result<()>;

    /// 时间点之后的尝试（从旧到新）
    async fn since(&self, from: DateTime<Utc>) -> Result<Vec<SyncAttempt>>;

    async fn stats_since(&self, from: DateTime<Utc>) -> Result<SyncStats> {
        let attempts = self.since(from).await?;
        Ok(SyncStats::from_attempts(&attempts))
    }
}

/// 内存环形缓冲区
pub struct MemorySyncLog {
    entries: Mutex<VecDeque<SyncAttempt>>,
    capacity: usize,
}

impl MemorySyncLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl SyncLogStore for MemorySyncLog {
    async fn append(&self, attempt: SyncAttempt) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(attempt);
        Ok(())
    }

    async fn since(&self, from: DateTime<Utc>) -> Result<Vec<SyncAttempt>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|a| a.timestamp >= from)
            .cloned()
            .collect())
    }
}

const NAMESPACE: &str = "sync-log";

/// Redis 定长列表
pub struct RedisSyncLog {
    cache: Cache,
    key: String,
    capacity: usize,
}

impl RedisSyncLog {
    pub fn new(cache: Cache, capacity: usize) -> Self {
        let key = cache.key(NAMESPACE, "wallet");
        Self {
            cache,
            key,
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl SyncLogStore for RedisSyncLog {
    async fn append(&self, attempt: SyncAttempt) -> Result<()> {
        self.cache
            .push_capped(&self.key, &attempt, self.capacity)
            .await
            .map_err(EngineError::from)
    }

    async fn since(&self, from: DateTime<Utc>) -> Result<Vec<SyncAttempt>> {
        let mut attempts: Vec<SyncAttempt> = self.cache.list_json(&self.key).await?;
        // 列表头部是最新记录
        attempts.reverse();
        attempts.retain(|a| a.timestamp >= from);
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RewardSource;

    fn attempt(ref_id: &str, success: bool, timestamp: DateTime<Utc>) -> SyncAttempt {
        SyncAttempt {
            user_id: "u1".to_string(),
            amount: 5,
            source: RewardSource::Activity,
            ref_id: ref_id.to_string(),
            success,
            error_message: None,
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_ring_buffer_drops_oldest() {
        let log = MemorySyncLog::new(3);
        let now = Utc::now();
        for i in 0..5 {
            log.append(attempt(&format!("r{}", i), true, now)).await.unwrap();
        }

        assert_eq!(log.len(), 3);
        let refs: Vec<String> = log
            .since(now)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.ref_id)
            .collect();
        assert_eq!(refs, vec!["r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn test_stats_window() {
        let log = MemorySyncLog::new(100);
        let now = Utc::now();
        let old = now - chrono::Duration::hours(2);

        log.append(attempt("old", false, old)).await.unwrap();
        log.append(attempt("a", true, now)).await.unwrap();
        log.append(attempt("b", false, now)).await.unwrap();

        let stats = log
            .stats_since(now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.succeeded, 1);
        assert!((stats.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 连接
    async fn test_redis_sync_log_capped() {
        use reward_shared::config::RedisConfig;

        let cache = Cache::new(&RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            key_prefix: format!("reward-test-{}", uuid::Uuid::new_v4()),
        })
        .unwrap();
        let log = RedisSyncLog::new(cache.clone(), 2);
        let now = Utc::now();
        for i in 0..3 {
            log.append(attempt(&format!("r{}", i), true, now)).await.unwrap();
        }

        let refs: Vec<String> = log
            .since(now)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.ref_id)
            .collect();
        assert_eq!(refs, vec!["r1", "r2"]);
        cache.delete(&cache.key(NAMESPACE, "wallet")).await.unwrap();
    }
}
