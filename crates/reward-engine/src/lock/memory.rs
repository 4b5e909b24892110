//! 单进程内存锁
//!
//! 用于本地开发和测试。多实例部署必须使用 `RedisLock`。

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DistributedLock, LockHandle, new_owner};
use crate::clock::{Clock, SystemClock, add_ttl};
use crate::error::Result;

#[derive(Debug, Clone)]
struct LockEntry {
    owner: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// 基于 DashMap 的内存锁
pub struct MemoryLock {
    entries: DashMap<String, LockEntry>,
    clock: Arc<dyn Clock>,
    instance_id: String,
}

impl MemoryLock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// 当前持有的未过期锁数量
    pub fn held_count(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.expires_at > now).count()
    }

    /// 条目总数，含尚未清理的过期锁
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>> {
        let now = self.clock.now();
        let owner = new_owner(&self.instance_id);
        let fresh = LockEntry {
            owner: owner.clone(),
            expires_at: add_ttl(now, ttl),
        };

        // entry API 持有分片写锁，检查与写入是原子的
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    debug!(key = %key, "Memory lock held by another owner");
                    return Ok(None);
                }
                occupied.insert(fresh);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
            }
        }

        debug!(key = %key, owner = %owner, "Memory lock acquired");
        Ok(Some(LockHandle {
            key: key.to_string(),
            owner,
            acquired_at: now,
            ttl,
        }))
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool> {
        let now = self.clock.now();
        let removed = self
            .entries
            .remove_if(&handle.key, |_, e| e.owner == handle.owner && e.expires_at > now)
            .is_some();

        if !removed {
            warn!(
                key = %handle.key,
                owner = %handle.owner,
                "Lock was already expired or owned by another client"
            );
        }
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let purged = before.saturating_sub(self.entries.len()) as u64;
        if purged > 0 {
            debug!(purged, "Expired memory locks purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn lock_with_clock() -> (MemoryLock, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (MemoryLock::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let (lock, _) = lock_with_clock();
        let ttl = Duration::from_secs(10);

        let first = lock.acquire("like:p1:u1", ttl).await.unwrap();
        assert!(first.is_some());
        assert!(lock.acquire("like:p1:u1", ttl).await.unwrap().is_none());

        // 不同键互不影响
        assert!(lock.acquire("like:p2:u1", ttl).await.unwrap().is_some());
        assert_eq!(lock.held_count(), 2);
    }

    #[tokio::test]
    async fn test_release_then_reacquire() {
        let (lock, _) = lock_with_clock();
        let ttl = Duration::from_secs(10);

        let handle = lock.acquire("k", ttl).await.unwrap().unwrap();
        assert!(lock.release(&handle).await.unwrap());
        assert!(lock.acquire("k", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken_over() {
        let (lock, clock) = lock_with_clock();
        let ttl = Duration::from_secs(10);

        let stale = lock.acquire("k", ttl).await.unwrap().unwrap();
        clock.advance(Duration::from_secs(11));

        let fresh = lock.acquire("k", ttl).await.unwrap().unwrap();
        assert_ne!(stale.owner, fresh.owner);

        // 旧 handle 释放不会删除新 owner 的锁
        assert!(!lock.release(&stale).await.unwrap());
        assert!(lock.acquire("k", ttl).await.unwrap().is_none());
        assert!(lock.release(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_after_expiry_is_noop() {
        let (lock, clock) = lock_with_clock();
        let handle = lock.acquire("k", Duration::from_secs(1)).await.unwrap().unwrap();
        clock.advance(Duration::from_secs(2));

        assert!(!lock.release(&handle).await.unwrap());
        assert_eq!(lock.held_count(), 0);
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_entries() {
        let (lock, clock) = lock_with_clock();
        // 持有者崩溃，锁从未释放
        lock.acquire("like:p1:u1", Duration::from_secs(1)).await.unwrap();
        lock.acquire("like:p2:u1", Duration::from_secs(1)).await.unwrap();
        lock.acquire("checkin:u1", Duration::from_secs(60)).await.unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(lock.len(), 3);

        assert_eq!(lock.purge_expired().await.unwrap(), 2);
        assert_eq!(lock.len(), 1);
        assert_eq!(lock.held_count(), 1);
        assert_eq!(lock.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let lock = Arc::new(MemoryLock::default());
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let lock = lock.clone();
            tasks.push(tokio::spawn(async move {
                lock.acquire("hot", Duration::from_secs(30)).await.unwrap()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
