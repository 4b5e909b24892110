//! 对账 Worker
//!
//! 以固定间隔运行对账，钱包不可用时指数退避（有上限）。每轮结束后上报
//! 健康度指标，并清理过期的幂等记录与锁。

use reward_shared::config::ReconcileConfig;
use reward_shared::observability::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::reconciler::{ReconcileFilter, ReconcileReport, Reconciler};
use crate::idempotency::IdempotencyLedger;
use crate::lock::DistributedLock;

const WORKER_NAME: &str = "reconcile_worker";

/// 对账 Worker
pub struct ReconcileWorker {
    reconciler: Arc<Reconciler>,
    lock: Arc<dyn DistributedLock>,
    ledger: Arc<dyn IdempotencyLedger>,
    interval: Duration,
    max_backoff: Duration,
}

impl ReconcileWorker {
    pub fn new(
        reconciler: Arc<Reconciler>,
        lock: Arc<dyn DistributedLock>,
        ledger: Arc<dyn IdempotencyLedger>,
        config: &ReconcileConfig,
    ) -> Self {
        let interval = Duration::from_secs(config.interval_secs.max(1));
        Self {
            reconciler,
            lock,
            ledger,
            interval,
            max_backoff: Duration::from_secs(config.max_backoff_secs).max(interval),
        }
    }

    /// 第 n 次连续短路后的等待时间：interval * 2^n，不超过 max_backoff
    pub fn delay_for(&self, consecutive_short_circuits: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive_short_circuits.min(16));
        self.interval
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// 执行一轮：对账、上报健康度、清理过期状态
    pub async fn run_once(&self) -> ReconcileReport {
        let report = self.reconciler.reconcile(&ReconcileFilter::default()).await;

        let health = self.reconciler.get_health_status().await;
        metrics::set_wallet_success_rate(health.success_rate);
        if health.status != super::HealthStatus::Healthy {
            warn!(
                status = health.status.as_str(),
                success_rate = health.success_rate,
                total = health.total,
                "钱包同步健康度下降"
            );
        }

        match self.ledger.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "过期幂等记录已清理"),
            Err(e) => warn!(error = %e, "清理过期幂等记录失败"),
        }
        match self.lock.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "过期锁已清理"),
            Err(e) => warn!(error = %e, "清理过期锁失败"),
        }

        metrics::set_worker_last_run(WORKER_NAME);
        report
    }

    /// 主循环：直到 shutdown 信号变为 true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = ?self.interval,
            max_backoff = ?self.max_backoff,
            "ReconcileWorker 已启动"
        );

        let mut short_circuits = 0u32;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_once().await;
            short_circuits = if report.short_circuited {
                short_circuits.saturating_add(1)
            } else {
                0
            };

            let delay = if short_circuits == 0 {
                self.interval
            } else {
                self.delay_for(short_circuits)
            };
            if short_circuits > 0 {
                debug!(delay = ?delay, short_circuits, "钱包不可用，对账退避");
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    // 发送端被丢弃同样视为停止
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("ReconcileWorker 已停止");
    }
}
