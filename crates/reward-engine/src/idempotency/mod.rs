//! 幂等模块
//!
//! - `IdempotencyLedger`: 动作键 -> 首次成功执行的结果指纹与结果快照
//! - `IdempotentExecutor`: 锁 + 账本双重检查，保证同一动作键最多执行一次

mod executor;
mod memory;
mod redis;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::Result;

pub use self::redis::RedisLedger;
pub use crate::models::{IdempotencyRecord, LedgerCheck};
pub use executor::{IdempotentExecutor, IdempotentRequest};
pub use memory::MemoryLedger;

/// 幂等账本接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// 查询动作键的已有记录
    ///
    /// 只读，不写入占位记录；记录只在操作成功后由 `commit` 写入。
    async fn check_and_reserve(&self, key: &str, expected_value: &str) -> Result<LedgerCheck>;

    /// 写入执行结果
    ///
    /// 幂等：已有相同指纹的有效记录时直接成功；已有不同指纹的有效记录时返回
    /// `AlreadyOperated`，不覆盖。
    async fn commit(&self, key: &str, value: &str, outcome: Value, ttl: Duration) -> Result<()>;

    /// 清理过期记录，返回清理数量
    ///
    /// 依赖存储自身 TTL 的实现无需清理。
    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }
}
