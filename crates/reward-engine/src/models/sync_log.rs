//! 钱包同步尝试日志模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RewardSource;

/// 一次钱包同步尝试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAttempt {
    pub user_id: String,
    pub amount: i64,
    pub source: RewardSource,
    pub ref_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// 窗口内同步统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl SyncStats {
    pub fn from_attempts<'a>(attempts: impl IntoIterator<Item = &'a SyncAttempt>) -> Self {
        attempts.into_iter().fold(Self::default(), |mut acc, a| {
            acc.total += 1;
            if a.success {
                acc.succeeded += 1;
            } else {
                acc.failed += 1;
            }
            acc
        })
    }

    /// 成功率；窗口内没有尝试时视为 1.0
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }
}
