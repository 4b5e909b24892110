//! 分布式锁模块
//!
//! 锁只用于串行化同一动作键上的并发请求，不提供公平性，也不阻塞等待：
//! 获取失败立即返回 `None`，由调用方转成"处理中"响应。
//!
//! ## 使用示例
//!
//! ```ignore
//! let lock = RedisLock::new(cache);
//!
//! if let Some(handle) = lock.acquire("like:p1:u1", Duration::from_secs(10)).await? {
//!     do_critical_work().await?;
//!     lock.release(&handle).await?;
//! }
//! ```

mod memory;
mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

pub use self::redis::RedisLock;
pub use memory::MemoryLock;

/// 持有锁的凭证
///
/// owner 格式为 `instance_id:uuid`，释放时据此校验，避免误删他人的锁。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
}

/// 分布式锁接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 尝试获取锁，不重试
    ///
    /// 锁被占用时返回 `Ok(None)`；锁服务本身不可用时返回错误。
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>>;

    /// 释放锁
    ///
    /// 仅当锁仍由该 handle 持有时删除。返回 false 表示锁已过期或被他人接管，
    /// 此时不做任何修改。
    async fn release(&self, handle: &LockHandle) -> Result<bool>;

    /// 清理已过期的锁，返回清理数量
    ///
    /// 依赖存储自身 TTL 的实现无需清理。
    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }
}

/// 生成锁 owner
pub(crate) fn new_owner(instance_id: &str) -> String {
    format!("{}:{}", instance_id, Uuid::new_v4())
}
