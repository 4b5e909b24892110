//! 幂等记录模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 幂等记录
///
/// 动作首次成功执行后写入，保存请求指纹与执行结果快照。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    /// 账本键（= 动作键）
    pub key: String,
    /// 本次请求期望的结果指纹
    pub expected_value: String,
    /// 首次成功执行时实际记录的指纹
    pub stored_value: String,
    /// 首次执行结果快照，重复请求直接回放
    pub outcome: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// 请求指纹是否与已记录的一致
    pub fn matches(&self, expected_value: &str) -> bool {
        self.stored_value == expected_value
    }
}

/// 幂等账本查询结果
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCheck {
    /// 无有效记录，可以执行
    Fresh,
    /// 相同指纹已执行过，回放结果
    Duplicate(IdempotencyRecord),
    /// 已执行过不同指纹的操作
    Conflict { stored_value: String },
}

impl LedgerCheck {
    /// 根据已有记录（可能不存在或已过期）得出结论
    pub fn evaluate(
        existing: Option<IdempotencyRecord>,
        expected_value: &str,
        now: DateTime<Utc>,
    ) -> Self {
        match existing {
            Some(record) if record.is_expired(now) => Self::Fresh,
            Some(record) if record.matches(expected_value) => Self::Duplicate(record),
            Some(record) => Self::Conflict {
                stored_value: record.stored_value,
            },
            None => Self::Fresh,
        }
    }
}
