//! 对账器
//!
//! 扫描 FAILED 记录与超过宽限期仍为 PENDING 的记录，逐条重试钱包同步。
//! 同一记录先抢 `reconcile:{id}` 短锁，再重新读取状态，已 SUCCESS 的跳过；
//! 状态推进使用条件更新，多个对账实例并发运行也不会重复推进。

use chrono::{DateTime, Utc};
use reward_shared::config::{ReconcileConfig, SyncLogConfig};
use reward_shared::observability::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::health::{HealthReport, HealthStatus};
use crate::clock::{Clock, sub_ttl};
use crate::error::Result;
use crate::lock::DistributedLock;
use crate::models::{CandidateQuery, RewardRecord, RewardStatus, StatusUpdate};
use crate::reward::RewardRepository;
use crate::wallet::{CoinGrant, SyncLogStore, WalletSync};

/// 对账参数
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// 记录创建后至少经过多久才参与对账
    pub grace_period: Duration,
    /// 超过该时长的记录不再自动重试
    pub max_age: Duration,
    pub batch_size: usize,
    pub health_window: Duration,
    /// 单条记录认领锁的 TTL
    pub claim_ttl: Duration,
}

impl ReconcileSettings {
    pub fn from_config(
        reconcile: &ReconcileConfig,
        sync_log: &SyncLogConfig,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            grace_period: Duration::from_secs(reconcile.grace_period_secs),
            max_age: Duration::from_secs(reconcile.max_age_hours.saturating_mul(3600)),
            batch_size: reconcile.batch_size,
            health_window: Duration::from_secs(sync_log.health_window_secs),
            claim_ttl,
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self::from_config(
            &ReconcileConfig::default(),
            &SyncLogConfig::default(),
            Duration::from_secs(10),
        )
    }
}

/// 对账范围
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileFilter {
    pub user_id: Option<String>,
    /// 只处理该时间之后创建的记录（仍受最大时长约束）
    pub since: Option<DateTime<Utc>>,
    /// 为空时使用配置的批量大小
    pub max_batch: Option<usize>,
}

impl ReconcileFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }
}

/// 一轮对账结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub candidates: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 被其他实例认领、已被推进或读取失败而跳过的记录
    pub skipped: usize,
    /// 钱包不可用，本轮未处理任何记录
    pub short_circuited: bool,
}

impl ReconcileReport {
    /// 实际重试的记录数
    pub fn retried(&self) -> usize {
        self.succeeded + self.failed
    }
}

enum Outcome {
    Succeeded,
    Failed,
    Skipped,
}

/// 对账器
pub struct Reconciler {
    repo: Arc<dyn RewardRepository>,
    wallet: Arc<dyn WalletSync>,
    lock: Arc<dyn DistributedLock>,
    sync_log: Arc<dyn SyncLogStore>,
    clock: Arc<dyn Clock>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn RewardRepository>,
        wallet: Arc<dyn WalletSync>,
        lock: Arc<dyn DistributedLock>,
        sync_log: Arc<dyn SyncLogStore>,
        clock: Arc<dyn Clock>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            repo,
            wallet,
            lock,
            sync_log,
            clock,
            settings,
        }
    }

    /// 重试失败的奖励同步，返回实际重试的记录数
    ///
    /// 不向调用方返回错误，只更新记录状态与指标。
    pub async fn reconcile_failed(&self, filter: &ReconcileFilter) -> usize {
        self.reconcile(filter).await.retried()
    }

    /// 执行一轮对账并返回明细
    #[instrument(skip(self), fields(user_id = ?filter.user_id))]
    pub async fn reconcile(&self, filter: &ReconcileFilter) -> ReconcileReport {
        if !self.wallet.is_available().await {
            warn!("钱包不可用，跳过本轮对账");
            return ReconcileReport {
                short_circuited: true,
                ..Default::default()
            };
        }

        let candidates = match self.repo.list_candidates(&self.candidate_query(filter)).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "查询对账候选失败");
                return ReconcileReport::default();
            }
        };

        let mut report = ReconcileReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        for record in &candidates {
            match self.process(record).await {
                Outcome::Succeeded => report.succeeded += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Skipped => report.skipped += 1,
            }
        }

        metrics::record_reconcile_pass(
            report.candidates as u64,
            report.succeeded as u64,
            report.failed as u64,
        );
        if report.candidates > 0 {
            info!(
                candidates = report.candidates,
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                "对账完成"
            );
        }
        report
    }

    /// 窗口内的同步健康度
    pub async fn get_health_status(&self) -> HealthReport {
        let window_secs = self.settings.health_window.as_secs();
        let from = sub_ttl(self.clock.now(), self.settings.health_window);

        match self.sync_log.stats_since(from).await {
            Ok(stats) => {
                let rate = stats.success_rate();
                HealthReport {
                    status: HealthStatus::from_success_rate(rate),
                    success_rate: rate,
                    total: stats.total,
                    failed: stats.failed,
                    window_secs,
                }
            }
            Err(e) => {
                error!(error = %e, "读取同步日志失败");
                HealthReport {
                    status: HealthStatus::Error,
                    success_rate: 0.0,
                    total: 0,
                    failed: 0,
                    window_secs,
                }
            }
        }
    }

    fn candidate_query(&self, filter: &ReconcileFilter) -> CandidateQuery {
        let now = self.clock.now();
        let oldest = sub_ttl(now, self.settings.max_age);
        let created_after = match filter.since {
            Some(since) if since > oldest => since,
            _ => oldest,
        };

        CandidateQuery {
            user_id: filter.user_id.clone(),
            statuses: vec![RewardStatus::Failed, RewardStatus::Pending],
            created_after: Some(created_after),
            created_before: Some(sub_ttl(now, self.settings.grace_period)),
            limit: filter.max_batch.unwrap_or(self.settings.batch_size),
        }
    }

    async fn process(&self, candidate: &RewardRecord) -> Outcome {
        let claim_key = format!("reconcile:{}", candidate.id);
        let handle = match self.lock.acquire(&claim_key, self.settings.claim_ttl).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                debug!(reward_id = %candidate.id, "记录已被其他对账实例认领");
                return Outcome::Skipped;
            }
            Err(e) => {
                warn!(reward_id = %candidate.id, error = %e, "认领锁不可用");
                return Outcome::Skipped;
            }
        };

        let outcome = match self.retry(candidate).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(reward_id = %candidate.id, error = %e, "对账重试失败");
                Outcome::Skipped
            }
        };

        if let Err(e) = self.lock.release(&handle).await {
            warn!(reward_id = %candidate.id, error = %e, "认领锁释放失败");
        }
        outcome
    }

    #[instrument(skip(self, candidate), fields(reward_id = %candidate.id))]
    async fn retry(&self, candidate: &RewardRecord) -> Result<Outcome> {
        // 同步前重新读取，避免重复发放已完成的记录
        let Some(current) = self.repo.get(candidate.id).await? else {
            return Ok(Outcome::Skipped);
        };
        if current.status == RewardStatus::Success {
            return Ok(Outcome::Skipped);
        }

        let synced = if current.requires_ledger_sync() {
            self.wallet.grant_coins(&CoinGrant::for_record(&current)).await
        } else {
            true
        };

        let now = self.clock.now();
        let update = if synced {
            StatusUpdate::success(&current, now)
        } else {
            StatusUpdate::failed(&current, now, "reconcile sync failed")
        };

        Ok(match self.repo.transition(&update).await? {
            Some(updated) => {
                metrics::record_reward_grant(updated.kind.as_str(), updated.status.as_str());
                if synced { Outcome::Succeeded } else { Outcome::Failed }
            }
            None => Outcome::Skipped,
        })
    }
}
