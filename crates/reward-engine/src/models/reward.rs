//! 奖励记录相关实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::enums::{RewardKind, RewardSource, RewardStatus};

/// 奖励记录
///
/// 每次发放都会先落一条 PENDING 记录，再根据钱包同步结果推进到 SUCCESS / FAILED。
/// 记录 ID 同时作为钱包侧的幂等业务号（businessId）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RewardRecord {
    pub id: Uuid,
    pub user_id: String,
    /// 关联的业务 ID（任务 ID、签到日期等）
    pub ref_id: String,
    #[sqlx(rename = "reward_source")]
    pub source: RewardSource,
    #[sqlx(rename = "reward_kind")]
    pub kind: RewardKind,
    #[sqlx(rename = "reward_name")]
    pub name: String,
    /// 应用加成后的最终数量
    pub amount: i64,
    pub status: RewardStatus,
    /// 仅在 SUCCESS 时有值
    #[sqlx(default)]
    pub granted_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub last_error: Option<String>,
    /// 状态变更次数（含首次同步与对账重试）
    pub attempts: i32,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RewardRecord {
    /// 由发放请求创建一条 PENDING 记录
    pub fn pending(req: &GrantRewardRequest, amount: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: req.user_id.clone(),
            ref_id: req.ref_id.clone(),
            source: req.source,
            kind: req.kind,
            name: req.name.clone(),
            amount,
            status: RewardStatus::Pending,
            granted_at: None,
            last_error: None,
            attempts: 0,
            payload: req.metadata.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 钱包侧幂等业务号
    pub fn business_id(&self) -> String {
        self.id.to_string()
    }

    pub fn requires_ledger_sync(&self) -> bool {
        self.kind.requires_ledger_sync()
    }

    /// 钱包流水描述
    pub fn description(&self) -> String {
        format!("{}:{}:{}", self.source.as_str(), self.ref_id, self.name)
    }

    /// 在内存中应用一次状态变更（仓储实现共用）
    pub fn apply(&mut self, update: &StatusUpdate) {
        self.status = update.to;
        self.granted_at = (update.to == RewardStatus::Success).then_some(update.at);
        self.last_error = update.error.clone();
        self.attempts += 1;
        self.updated_at = update.at;
    }
}

/// 发放奖励请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRewardRequest {
    pub user_id: String,
    pub ref_id: String,
    pub source: RewardSource,
    pub kind: RewardKind,
    pub name: String,
    /// 基础数量，加成前
    pub amount: i64,
    #[serde(default)]
    pub metadata: Value,
    /// 当前连签天数，用于计算加成
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak_days: Option<u32>,
}

impl GrantRewardRequest {
    pub fn new(
        user_id: impl Into<String>,
        ref_id: impl Into<String>,
        source: RewardSource,
        kind: RewardKind,
        name: impl Into<String>,
        amount: i64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            ref_id: ref_id.into(),
            source,
            kind,
            name: name.into(),
            amount,
            metadata: Value::Object(Default::default()),
            streak_days: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_streak(mut self, streak_days: u32) -> Self {
        self.streak_days = Some(streak_days);
        self
    }
}

/// 条件状态变更
///
/// 仅当记录当前状态为 `from` 时才生效，用于防止并发对账重复推进。
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub id: Uuid,
    pub from: RewardStatus,
    pub to: RewardStatus,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn success(record: &RewardRecord, at: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            from: record.status,
            to: RewardStatus::Success,
            at,
            error: None,
        }
    }

    pub fn failed(record: &RewardRecord, at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            id: record.id,
            from: record.status,
            to: RewardStatus::Failed,
            at,
            error: Some(error.into()),
        }
    }
}

/// 对账候选查询
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub user_id: Option<String>,
    pub statuses: Vec<RewardStatus>,
    /// 创建时间下界（含）
    pub created_after: Option<DateTime<Utc>>,
    /// 创建时间上界（含）
    pub created_before: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl CandidateQuery {
    pub fn matches(&self, record: &RewardRecord) -> bool {
        self.statuses.contains(&record.status)
            && self.user_id.as_deref().is_none_or(|u| u == record.user_id)
            && self.created_after.is_none_or(|t| record.created_at >= t)
            && self.created_before.is_none_or(|t| record.created_at <= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coin_request() -> GrantRewardRequest {
        GrantRewardRequest::new("u1", "task-1", RewardSource::Task, RewardKind::Coin, "daily", 10)
            .with_metadata(json!({"taskType": "daily"}))
    }

    #[test]
    fn test_pending_record() {
        let now = Utc::now();
        let record = RewardRecord::pending(&coin_request(), 20, now);
        assert_eq!(record.status, RewardStatus::Pending);
        assert_eq!(record.amount, 20);
        assert_eq!(record.business_id(), record.id.to_string());
        assert!(record.granted_at.is_none());
        assert_eq!(record.description(), "TASK:task-1:daily");
    }

    #[test]
    fn test_apply_sets_granted_at_only_on_success() {
        let now = Utc::now();
        let mut record = RewardRecord::pending(&coin_request(), 10, now);

        record.apply(&StatusUpdate::failed(&record, now, "timeout"));
        assert_eq!(record.status, RewardStatus::Failed);
        assert!(record.granted_at.is_none());
        assert_eq!(record.last_error.as_deref(), Some("timeout"));

        let later = now + chrono::Duration::seconds(5);
        record.apply(&StatusUpdate::success(&record, later));
        assert_eq!(record.status, RewardStatus::Success);
        assert_eq!(record.granted_at, Some(later));
        assert!(record.last_error.is_none());
        assert_eq!(record.attempts, 2);
    }

    #[test]
    fn test_candidate_query_matches() {
        let now = Utc::now();
        let mut record = RewardRecord::pending(&coin_request(), 10, now);
        record.status = RewardStatus::Failed;

        let query = CandidateQuery {
            user_id: Some("u1".to_string()),
            statuses: vec![RewardStatus::Failed],
            created_after: Some(now - chrono::Duration::hours(1)),
            created_before: Some(now),
            limit: 10,
        };
        assert!(query.matches(&record));

        let other_user = CandidateQuery {
            user_id: Some("u2".to_string()),
            ..query.clone()
        };
        assert!(!other_user.matches(&record));

        let too_recent = CandidateQuery {
            created_before: Some(now - chrono::Duration::seconds(1)),
            ..query
        };
        assert!(!too_recent.matches(&record));
    }
}
