//! Redis 幂等账本
//!
//! 记录以 JSON 存储，过期由 Redis PX 自动回收。

use async_trait::async_trait;
use reward_shared::cache::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::IdempotencyLedger;
use crate::clock::{Clock, SystemClock, add_ttl};
use crate::error::{EngineError, Result};
use crate::models::{IdempotencyRecord, LedgerCheck};

const NAMESPACE: &str = "idem";

/// 基于 Redis 的幂等账本
pub struct RedisLedger {
    cache: Cache,
    clock: Arc<dyn Clock>,
}

impl RedisLedger {
    pub fn new(cache: Cache) -> Self {
        Self::with_clock(cache, Arc::new(SystemClock))
    }

    pub fn with_clock(cache: Cache, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    async fn load(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.cache
            .get_json(&self.cache.key(NAMESPACE, key))
            .await
            .map_err(|e| EngineError::LedgerUnavailable(e.to_string()))
    }
}

#[async_trait]
impl IdempotencyLedger for RedisLedger {
    #[instrument(skip(self))]
    async fn check_and_reserve(&self, key: &str, expected_value: &str) -> Result<LedgerCheck> {
        let existing = self.load(key).await?;
        Ok(LedgerCheck::evaluate(existing, expected_value, self.clock.now()))
    }

    #[instrument(skip(self, outcome, ttl))]
    async fn commit(&self, key: &str, value: &str, outcome: Value, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let record = IdempotencyRecord {
            key: key.to_string(),
            expected_value: value.to_string(),
            stored_value: value.to_string(),
            outcome,
            created_at: now,
            expires_at: add_ttl(now, ttl),
        };
        let redis_key = self.cache.key(NAMESPACE, key);
        let serialized = serde_json::to_string(&record)?;

        let written = self
            .cache
            .set_nx_px(&redis_key, &serialized, ttl)
            .await
            .map_err(|e| EngineError::LedgerUnavailable(e.to_string()))?;
        if written {
            debug!("Idempotency record committed");
            return Ok(());
        }

        match self.load(key).await? {
            Some(existing) if existing.matches(value) => Ok(()),
            Some(existing) => Err(EngineError::AlreadyOperated {
                key: key.to_string(),
                stored_value: existing.stored_value,
            }),
            None => {
                // SET NX 失败后记录恰好过期
                warn!("Idempotency record expired during commit, rewriting");
                self.cache
                    .set_json_px(&redis_key, &record, ttl)
                    .await
                    .map_err(|e| EngineError::LedgerUnavailable(e.to_string()))
            }
        }
    }
}
