//! Redis 分布式锁
//!
//! SET NX PX 获取，Lua 脚本校验 owner 后删除。

use async_trait::async_trait;
use chrono::Utc;
use reward_shared::cache::Cache;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{DistributedLock, LockHandle, new_owner};
use crate::error::{EngineError, Result};

const NAMESPACE: &str = "lock";

/// 基于 Redis 的分布式锁
pub struct RedisLock {
    cache: Cache,
    /// 实例唯一标识，用于区分不同服务实例持有的锁
    instance_id: String,
}

impl RedisLock {
    pub fn new(cache: Cache) -> Self {
        Self {
            cache,
            instance_id: Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>> {
        let lock_key = self.cache.key(NAMESPACE, key);
        let owner = new_owner(&self.instance_id);

        let acquired = self
            .cache
            .set_nx_px(&lock_key, &owner, ttl)
            .await
            .map_err(|e| EngineError::LockUnavailable(e.to_string()))?;

        if !acquired {
            debug!(key = %key, "Redis lock not acquired, resource is locked");
            return Ok(None);
        }

        debug!(key = %key, owner = %owner, "Redis lock acquired");
        Ok(Some(LockHandle {
            key: key.to_string(),
            owner,
            acquired_at: Utc::now(),
            ttl,
        }))
    }

    #[instrument(skip(self, handle), fields(key = %handle.key))]
    async fn release(&self, handle: &LockHandle) -> Result<bool> {
        let lock_key = self.cache.key(NAMESPACE, &handle.key);
        let released = self
            .cache
            .compare_and_delete(&lock_key, &handle.owner)
            .await
            .map_err(|e| EngineError::LockUnavailable(e.to_string()))?;

        if released {
            debug!("Redis lock released");
        } else {
            warn!(
                owner = %handle.owner,
                "Lock was already expired or owned by another client"
            );
        }
        Ok(released)
    }
}
