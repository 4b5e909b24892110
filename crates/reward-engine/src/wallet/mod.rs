//! 钱包同步模块
//!
//! - `rpc`: 钱包服务 RPC 契约与 HTTP 实现
//! - `client`: 同步客户端（超时、钱包自动创建、可用性闸门、尝试日志）
//! - `sync_log`: 同步尝试日志存储

mod client;
mod gate;
mod rpc;
mod sync_log;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{RewardRecord, RewardSource};

pub use client::WalletSyncClient;
pub use gate::{AvailabilityGate, GateState};
pub use rpc::{CoinGrantResponse, HttpWalletRpc, WalletRpc, WalletRpcError};
pub use sync_log::{MemorySyncLog, RedisSyncLog, SyncLogStore};

/// 一次金币发放请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinGrant {
    pub user_id: String,
    pub amount: i64,
    pub source: RewardSource,
    /// 钱包侧幂等业务号
    pub business_id: String,
    /// 关联业务 ID，写入同步日志
    pub ref_id: String,
    pub description: String,
}

impl CoinGrant {
    pub fn for_record(record: &RewardRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            amount: record.amount,
            source: record.source,
            business_id: record.business_id(),
            ref_id: record.ref_id.clone(),
            description: record.description(),
        }
    }
}

/// 奖励发放器和对账器看到的钱包同步接口
///
/// 所有失败都被视为瞬时失败，返回 false，不抛错。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletSync: Send + Sync {
    async fn grant_coins(&self, grant: &CoinGrant) -> bool;

    /// 轻量健康探测，批量同步前调用以便在钱包已知不可用时短路
    async fn is_available(&self) -> bool;
}
