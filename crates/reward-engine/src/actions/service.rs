//! 动作服务

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::post_repo::PostRepository;
use crate::error::{EngineError, Result};
use crate::idempotency::{IdempotentExecutor, IdempotentRequest};
use crate::models::{GrantRewardRequest, RewardKind, RewardRecord, RewardSource, RewardStatus};
use crate::reward::RewardIssuer;

/// 点赞结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub post_id: String,
    pub user_id: String,
    pub liked: bool,
    pub like_count: i64,
}

/// 举报结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutcome {
    pub post_id: String,
    pub reporter_id: String,
    pub reason: String,
    pub report_count: u64,
}

/// 奖励发放结果
///
/// 重复请求回放的是首次执行时的快照，状态以奖励记录为准。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardOutcome {
    pub reward_id: Uuid,
    pub kind: RewardKind,
    pub amount: i64,
    pub status: RewardStatus,
}

impl From<RewardRecord> for RewardOutcome {
    fn from(record: RewardRecord) -> Self {
        Self {
            reward_id: record.id,
            kind: record.kind,
            amount: record.amount,
            status: record.status,
        }
    }
}

/// 签到奖励配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInReward {
    pub name: String,
    /// 基础金币数，连签加成前
    pub amount: i64,
}

impl Default for CheckInReward {
    fn default() -> Self {
        Self {
            name: "daily_check_in".to_string(),
            amount: 10,
        }
    }
}

/// 任务奖励
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReward {
    pub kind: RewardKind,
    pub name: String,
    pub amount: i64,
    pub metadata: serde_json::Value,
}

impl TaskReward {
    pub fn coins(name: impl Into<String>, amount: i64) -> Self {
        Self {
            kind: RewardKind::Coin,
            name: name.into(),
            amount,
            metadata: json!({}),
        }
    }
}

/// 动作服务
pub struct ActionService {
    executor: Arc<IdempotentExecutor>,
    posts: Arc<dyn PostRepository>,
    issuer: Arc<RewardIssuer>,
    check_in_reward: CheckInReward,
}

impl ActionService {
    pub fn new(
        executor: Arc<IdempotentExecutor>,
        posts: Arc<dyn PostRepository>,
        issuer: Arc<RewardIssuer>,
        check_in_reward: CheckInReward,
    ) -> Self {
        Self {
            executor,
            posts,
            issuer,
            check_in_reward,
        }
    }

    /// 点赞 / 取消点赞
    ///
    /// 同一用户对同一帖子，点赞数只变化一次；账本有效期内反向操作返回
    /// `AlreadyOperated`。
    #[instrument(skip(self))]
    pub async fn like_post(
        &self,
        user_id: &str,
        post_id: &str,
        liked: bool,
    ) -> Result<LikeOutcome> {
        let request =
            IdempotentRequest::new(format!("like:{}:{}", post_id, user_id), liked.to_string());
        let posts = &self.posts;

        self.executor
            .execute(&request, || async move {
                if !posts.exists(post_id).await? {
                    return Err(EngineError::PostNotFound(post_id.to_string()));
                }
                let delta = if liked { 1 } else { -1 };
                let like_count = posts.increment_like_count(post_id, delta).await?;
                Ok(LikeOutcome {
                    post_id: post_id.to_string(),
                    user_id: user_id.to_string(),
                    liked,
                    like_count,
                })
            })
            .await
    }

    /// 举报帖子，指纹为举报理由
    #[instrument(skip(self))]
    pub async fn report_post(
        &self,
        reporter_id: &str,
        post_id: &str,
        reason: &str,
    ) -> Result<ReportOutcome> {
        if reason.trim().is_empty() {
            return Err(EngineError::Validation("举报理由不能为空".to_string()));
        }
        let request = IdempotentRequest::new(format!("report:{}:{}", post_id, reporter_id), reason);
        let posts = &self.posts;

        self.executor
            .execute(&request, || async move {
                let author = posts
                    .author_of(post_id)
                    .await?
                    .ok_or_else(|| EngineError::PostNotFound(post_id.to_string()))?;
                if author == reporter_id {
                    return Err(EngineError::CannotReportSelf);
                }
                let report_count = posts.record_report(post_id, reporter_id, reason).await?;
                Ok(ReportOutcome {
                    post_id: post_id.to_string(),
                    reporter_id: reporter_id.to_string(),
                    reason: reason.to_string(),
                    report_count,
                })
            })
            .await
    }

    /// 每日签到，发放金币（经连签加成）
    #[instrument(skip(self))]
    pub async fn check_in(
        &self,
        user_id: &str,
        day: NaiveDate,
        streak_days: u32,
    ) -> Result<RewardOutcome> {
        let request = IdempotentRequest::new(format!("checkin:{}:{}", user_id, day), "checked_in");
        let grant = GrantRewardRequest::new(
            user_id,
            day.to_string(),
            RewardSource::Activity,
            RewardKind::Coin,
            self.check_in_reward.name.clone(),
            self.check_in_reward.amount,
        )
        .with_streak(streak_days)
        .with_metadata(json!({ "streakDays": streak_days }));

        let issuer = &self.issuer;
        self.executor
            .execute(&request, || async move {
                issuer.grant_reward(grant).await.map(RewardOutcome::from)
            })
            .await
    }

    /// 完成任务，发放任务配置的奖励
    #[instrument(skip(self, reward))]
    pub async fn complete_task(
        &self,
        user_id: &str,
        task_id: &str,
        reward: &TaskReward,
    ) -> Result<RewardOutcome> {
        let request = IdempotentRequest::new(format!("task:{}:{}", task_id, user_id), "completed");
        let grant = GrantRewardRequest::new(
            user_id,
            task_id,
            RewardSource::Task,
            reward.kind,
            reward.name.clone(),
            reward.amount,
        )
        .with_metadata(reward.metadata.clone());

        let issuer = &self.issuer;
        self.executor
            .execute(&request, || async move {
                issuer.grant_reward(grant).await.map(RewardOutcome::from)
            })
            .await
    }
}
