//! 引擎错误类型
//!
//! 区分三类错误：瞬时/基础设施错误（可重试）、业务错误（原样返回给调用方）、
//! 以及内部错误。奖励同步失败不在这里，它被记录为奖励的 FAILED 状态。

use reward_shared::error::InfraError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::RewardStatus;

/// 引擎错误类型
#[derive(Debug, Error)]
pub enum EngineError {
    // === 幂等执行 ===
    #[error("操作处理中，请稍后重试: key={key}")]
    OperationPending { key: String },

    #[error("已执行过不同结果的操作: key={key}, stored={stored_value}")]
    AlreadyOperated { key: String, stored_value: String },

    // === 业务错误 ===
    #[error("帖子不存在: {0}")]
    PostNotFound(String),

    #[error("不能举报自己的帖子")]
    CannotReportSelf,

    #[error("奖励记录不存在: {0}")]
    RewardNotFound(Uuid),

    #[error("奖励状态不允许变更: id={id}, {from:?} -> {to:?}")]
    InvalidTransition {
        id: Uuid,
        from: RewardStatus,
        to: RewardStatus,
    },

    // === 基础设施错误 ===
    #[error("分布式锁不可用: {0}")]
    LockUnavailable(String),

    #[error("幂等账本不可用: {0}")]
    LedgerUnavailable(String),

    #[error("钱包服务不可用: {0}")]
    WalletUnavailable(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Infra(#[from] InfraError),

    // === 通用 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// 是否为可重试的瞬时错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationPending { .. }
            | Self::LockUnavailable(_)
            | Self::LedgerUnavailable(_)
            | Self::WalletUnavailable(_)
            | Self::Database(_) => true,
            Self::Infra(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 是否为业务错误（重试不会改变结果）
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyOperated { .. }
                | Self::PostNotFound(_)
                | Self::CannotReportSelf
                | Self::RewardNotFound(_)
                | Self::Validation(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn code(&self) -> &'static str {
        match self {
            Self::OperationPending { .. } => "OPERATION_PENDING",
            Self::AlreadyOperated { .. } => "ALREADY_OPERATED",
            Self::PostNotFound(_) => "POST_NOT_FOUND",
            Self::CannotReportSelf => "CANNOT_REPORT_SELF",
            Self::RewardNotFound(_) => "REWARD_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::LockUnavailable(_) => "LOCK_UNAVAILABLE",
            Self::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            Self::WalletUnavailable(_) => "WALLET_UNAVAILABLE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Infra(e) => e.code(),
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
