//! 奖励发放器
//!
//! 先落 PENDING 记录，再对需要记账的奖励（金币）同步调用钱包服务：
//! 同步成功推进到 SUCCESS，失败推进到 FAILED 交给对账器。同步失败不会
//! 以错误返回，触发奖励的业务动作不因下游失败回滚。

use std::sync::Arc;

use reward_shared::observability::metrics;
use tracing::{error, info, instrument, warn};

use super::bonus::BonusPolicy;
use super::repository::RewardRepository;
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::models::{GrantRewardRequest, RewardRecord, StatusUpdate};
use crate::wallet::{CoinGrant, WalletSync};

const SYNC_FAILED: &str = "wallet sync failed";
const WALLET_DOWN: &str = "wallet unavailable";

/// 奖励发放器
pub struct RewardIssuer {
    repo: Arc<dyn RewardRepository>,
    wallet: Arc<dyn WalletSync>,
    bonus: Arc<dyn BonusPolicy>,
    clock: Arc<dyn Clock>,
}

impl RewardIssuer {
    pub fn new(
        repo: Arc<dyn RewardRepository>,
        wallet: Arc<dyn WalletSync>,
        bonus: Arc<dyn BonusPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            wallet,
            bonus,
            clock,
        }
    }

    /// 发放单个奖励
    ///
    /// 只有参数校验和记录写入失败会返回错误；钱包同步结果体现在记录状态里。
    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, ref_id = %request.ref_id, kind = ?request.kind)
    )]
    pub async fn grant_reward(&self, request: GrantRewardRequest) -> Result<RewardRecord> {
        let record = self.create_pending(&request).await?;

        if !record.requires_ledger_sync() {
            return Ok(self.finish(record, None).await);
        }

        let synced = self.wallet.grant_coins(&CoinGrant::for_record(&record)).await;
        let error = (!synced).then_some(SYNC_FAILED);
        Ok(self.finish(record, error).await)
    }

    /// 批量发放
    ///
    /// 返回创建的奖励记录数（不是同步成功数）。需要记账的奖励在一次可用性
    /// 检查之后逐条同步，每条都以自己的记录 ID 作为 businessId，对账重试
    /// 与首次同步落在同一个幂等键上；钱包已知不可用时不发起调用，直接标记 FAILED。
    #[instrument(skip(self, requests), fields(batch_size = requests.len()))]
    pub async fn batch_grant(&self, requests: Vec<GrantRewardRequest>) -> Result<usize> {
        let mut created = 0usize;
        let mut coin_records: Vec<RewardRecord> = Vec::new();

        for request in &requests {
            let record = match self.create_pending(request).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        user_id = %request.user_id,
                        ref_id = %request.ref_id,
                        error = %e,
                        "批量发放跳过一条记录"
                    );
                    continue;
                }
            };
            created += 1;

            if record.requires_ledger_sync() {
                coin_records.push(record);
            } else {
                self.finish(record, None).await;
            }
        }

        if !coin_records.is_empty() {
            let available = self.wallet.is_available().await;
            if !available {
                warn!(records = coin_records.len(), "钱包不可用，批量金币奖励直接标记失败");
            }

            for record in coin_records {
                let error = if !available {
                    Some(WALLET_DOWN)
                } else if self.wallet.grant_coins(&CoinGrant::for_record(&record)).await {
                    None
                } else {
                    Some(SYNC_FAILED)
                };
                self.finish(record, error).await;
            }
        }

        info!(requested = requests.len(), created, "批量发放完成");
        Ok(created)
    }

    async fn create_pending(&self, request: &GrantRewardRequest) -> Result<RewardRecord> {
        validate(request)?;
        let amount = self.bonus.apply(request.amount, request.streak_days);
        let record = RewardRecord::pending(request, amount, self.clock.now());
        self.repo.insert(&record).await?;
        Ok(record)
    }

    /// 推进记录状态；`error` 为空表示成功
    ///
    /// 状态写入失败只记录日志并返回 PENDING 记录，之后由对账器按陈旧 PENDING 处理。
    async fn finish(&self, record: RewardRecord, error: Option<&str>) -> RewardRecord {
        let now = self.clock.now();
        let update = match error {
            None => StatusUpdate::success(&record, now),
            Some(reason) => StatusUpdate::failed(&record, now, reason),
        };

        match self.repo.transition(&update).await {
            Ok(Some(updated)) => {
                metrics::record_reward_grant(updated.kind.as_str(), updated.status.as_str());
                if error.is_some() {
                    warn!(reward_id = %updated.id, "奖励同步失败，等待对账");
                }
                updated
            }
            Ok(None) => {
                warn!(reward_id = %record.id, "奖励状态已被并发修改");
                record
            }
            Err(e) => {
                error!(reward_id = %record.id, error = %e, "奖励状态写入失败");
                record
            }
        }
    }
}

fn validate(request: &GrantRewardRequest) -> Result<()> {
    if request.user_id.is_empty() {
        return Err(EngineError::Validation("user_id 不能为空".to_string()));
    }
    if request.amount <= 0 {
        return Err(EngineError::Validation("奖励数量必须大于0".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::{RewardKind, RewardSource, RewardStatus};
    use crate::reward::{MemoryRewardRepository, MockRewardRepository, NoBonus, StreakMultiplier};
    use crate::wallet::MockWalletSync;

    fn issuer(
        wallet: MockWalletSync,
        bonus: Arc<dyn BonusPolicy>,
    ) -> (RewardIssuer, Arc<MemoryRewardRepository>) {
        let repo = Arc::new(MemoryRewardRepository::new());
        let issuer =
            RewardIssuer::new(repo.clone(), Arc::new(wallet), bonus, Arc::new(SystemClock));
        (issuer, repo)
    }

    fn coin(user: &str, ref_id: &str, amount: i64) -> GrantRewardRequest {
        GrantRewardRequest::new(user, ref_id, RewardSource::Task, RewardKind::Coin, "task", amount)
    }

    fn badge(user: &str, ref_id: &str) -> GrantRewardRequest {
        GrantRewardRequest::new(user, ref_id, RewardSource::Activity, RewardKind::Badge, "b", 1)
    }

    #[tokio::test]
    async fn test_coin_sync_success() {
        let mut wallet = MockWalletSync::new();
        wallet
            .expect_grant_coins()
            .withf(|g| g.user_id == "u1" && g.amount == 10)
            .times(1)
            .returning(|_| true);

        let (issuer, _) = issuer(wallet, Arc::new(NoBonus));
        let record = issuer.grant_reward(coin("u1", "t1", 10)).await.unwrap();
        assert_eq!(record.status, RewardStatus::Success);
        assert!(record.granted_at.is_some());
    }

    #[tokio::test]
    async fn test_coin_sync_failure_is_recorded_not_thrown() {
        let mut wallet = MockWalletSync::new();
        wallet.expect_grant_coins().times(1).returning(|_| false);

        let (issuer, repo) = issuer(wallet, Arc::new(NoBonus));
        let record = issuer.grant_reward(coin("u1", "t1", 10)).await.unwrap();
        assert_eq!(record.status, RewardStatus::Failed);
        assert!(record.granted_at.is_none());
        assert_eq!(record.last_error.as_deref(), Some(SYNC_FAILED));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_business_id_is_record_id() {
        let mut wallet = MockWalletSync::new();
        wallet.expect_grant_coins().returning(|g| {
            uuid::Uuid::parse_str(&g.business_id).is_ok()
        });

        let (issuer, _) = issuer(wallet, Arc::new(NoBonus));
        let record = issuer.grant_reward(coin("u1", "t1", 10)).await.unwrap();
        assert_eq!(record.status, RewardStatus::Success);
    }

    #[tokio::test]
    async fn test_non_coin_never_calls_wallet() {
        let mut wallet = MockWalletSync::new();
        wallet.expect_grant_coins().never();
        wallet.expect_is_available().never();

        let (issuer, _) = issuer(wallet, Arc::new(NoBonus));
        let record = issuer.grant_reward(badge("u1", "a1")).await.unwrap();
        assert_eq!(record.status, RewardStatus::Success);
    }

    #[tokio::test]
    async fn test_bonus_applied() {
        let mut wallet = MockWalletSync::new();
        wallet
            .expect_grant_coins()
            .withf(|g| g.amount == 20)
            .times(1)
            .returning(|_| true);

        let (issuer, _) = issuer(wallet, Arc::new(StreakMultiplier::weekly_double()));
        let record = issuer
            .grant_reward(coin("u1", "checkin", 10).with_streak(7))
            .await
            .unwrap();
        assert_eq!(record.amount, 20);
    }

    #[tokio::test]
    async fn test_invalid_amount_rejected() {
        let (issuer, repo) = issuer(MockWalletSync::new(), Arc::new(NoBonus));
        let err = issuer.grant_reward(coin("u1", "t1", 0)).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_batch_syncs_each_record_under_its_own_id() {
        let mut wallet = MockWalletSync::new();
        wallet.expect_is_available().times(1).returning(|| true);
        wallet
            .expect_grant_coins()
            .withf(|g| g.user_id == "u1" && uuid::Uuid::parse_str(&g.business_id).is_ok())
            .times(2)
            .returning(|_| true);
        wallet
            .expect_grant_coins()
            .withf(|g| g.user_id == "u2" && g.amount == 5)
            .times(1)
            .returning(|_| false);

        let (issuer, repo) = issuer(wallet, Arc::new(NoBonus));
        let created = issuer
            .batch_grant(vec![
                coin("u1", "t1", 10),
                coin("u1", "t2", 20),
                coin("u2", "t3", 5),
                badge("u2", "a1"),
            ])
            .await
            .unwrap();
        assert_eq!(created, 4);

        let all = repo.snapshot();
        let status_of = |ref_id: &str| all.iter().find(|r| r.ref_id == ref_id).unwrap().status;
        assert_eq!(status_of("t1"), RewardStatus::Success);
        assert_eq!(status_of("t2"), RewardStatus::Success);
        assert_eq!(status_of("t3"), RewardStatus::Failed);
        assert_eq!(status_of("a1"), RewardStatus::Success);
    }

    #[tokio::test]
    async fn test_batch_short_circuits_when_wallet_down() {
        let mut wallet = MockWalletSync::new();
        wallet.expect_is_available().times(1).returning(|| false);
        wallet.expect_grant_coins().never();

        let (issuer, repo) = issuer(wallet, Arc::new(NoBonus));
        let created = issuer
            .batch_grant(vec![coin("u1", "t1", 10), coin("u2", "t2", 10), coin("u1", "bad", -1)])
            .await
            .unwrap();
        assert_eq!(created, 2);
        assert!(repo.snapshot().iter().all(|r| r.status == RewardStatus::Failed));
    }

    #[tokio::test]
    async fn test_transition_error_returns_pending_record() {
        let mut repo = MockRewardRepository::new();
        repo.expect_insert().times(1).returning(|_| Ok(()));
        repo.expect_transition()
            .times(1)
            .returning(|_| Err(EngineError::Internal("db down".to_string())));
        let mut wallet = MockWalletSync::new();
        wallet.expect_grant_coins().returning(|_| true);

        let issuer = RewardIssuer::new(
            Arc::new(repo),
            Arc::new(wallet),
            Arc::new(NoBonus),
            Arc::new(SystemClock),
        );
        let record = issuer.grant_reward(coin("u1", "t1", 10)).await.unwrap();
        assert_eq!(record.status, RewardStatus::Pending);
    }
}
