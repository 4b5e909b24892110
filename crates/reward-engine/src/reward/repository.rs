//! 奖励记录仓储接口

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{CandidateQuery, RewardRecord, StatusUpdate};

/// 奖励记录仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RewardRepository: Send + Sync {
    async fn insert(&self, record: &RewardRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<RewardRecord>>;

    /// 条件状态变更
    ///
    /// 状态机不允许的变更返回 `InvalidTransition`；记录当前状态不是
    /// `update.from`（被并发推进过）时返回 `Ok(None)`，不做修改。
    async fn transition(&self, update: &StatusUpdate) -> Result<Option<RewardRecord>>;

    /// 对账候选，最久未被处理的在前
    ///
    /// 按 `updated_at`、`created_at`、`id` 升序。每次重试都会刷新 `updated_at`，
    /// 持续失败的旧记录会轮到批次末尾，不会一直占满批次。
    async fn list_candidates(&self, query: &CandidateQuery) -> Result<Vec<RewardRecord>>;

    /// 用户最近的奖励记录，按创建时间从新到旧
    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<RewardRecord>>;
}

/// 校验状态机
pub(crate) fn ensure_transition(update: &StatusUpdate) -> Result<()> {
    if update.from.can_transition_to(update.to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            id: update.id,
            from: update.from,
            to: update.to,
        })
    }
}
