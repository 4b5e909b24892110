//! 奖励相关枚举
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 奖励来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardSource {
    /// 任务完成
    Task,
    /// 活动（签到、互动等）
    Activity,
    /// 系统补发
    System,
}

impl RewardSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "TASK",
            Self::Activity => "ACTIVITY",
            Self::System => "SYSTEM",
        }
    }
}

/// 奖励种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardKind {
    /// 金币 - 余额由钱包服务持有，必须同步
    Coin,
    /// 徽章 - 本地权威
    Badge,
    /// 积分 - 本地权威
    Point,
    /// 称号 - 本地权威
    Title,
}

impl RewardKind {
    /// 是否需要立即同步到钱包服务
    pub fn requires_ledger_sync(&self) -> bool {
        matches!(self, Self::Coin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coin => "COIN",
            Self::Badge => "BADGE",
            Self::Point => "POINT",
            Self::Title => "TITLE",
        }
    }
}

/// 奖励状态
///
/// PENDING -> SUCCESS | FAILED，FAILED -> SUCCESS（对账重试），
/// FAILED -> FAILED（对账再次失败）。SUCCESS 是终态。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl RewardStatus {
    pub fn can_transition_to(&self, next: RewardStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Success)
                | (Self::Pending, Self::Failed)
                | (Self::Failed, Self::Success)
                | (Self::Failed, Self::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}
