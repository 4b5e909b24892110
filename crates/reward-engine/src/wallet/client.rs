//! 钱包同步客户端

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reward_shared::config::WalletConfig;
use reward_shared::observability::metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::gate::AvailabilityGate;
use super::rpc::{CoinGrantResponse, WalletRpc, WalletRpcError};
use super::sync_log::SyncLogStore;
use super::{CoinGrant, WalletSync};
use crate::clock::Clock;
use crate::models::SyncAttempt;

/// 钱包同步客户端
///
/// - 一次发放（含钱包不存在时的创建与重试）整体受 `request_timeout` 约束，
///   该超时短于幂等锁 TTL
/// - 钱包不存在时创建一次钱包并重试一次
/// - 每次尝试（成功或失败）都写入同步日志
pub struct WalletSyncClient {
    rpc: Arc<dyn WalletRpc>,
    sync_log: Arc<dyn SyncLogStore>,
    gate: AvailabilityGate,
    request_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl WalletSyncClient {
    pub fn new(
        rpc: Arc<dyn WalletRpc>,
        sync_log: Arc<dyn SyncLogStore>,
        config: &WalletConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rpc,
            sync_log,
            gate: AvailabilityGate::new(config.failure_threshold, config.cooldown()),
            request_timeout: config.request_timeout(),
            clock,
        }
    }

    pub fn gate(&self) -> &AvailabilityGate {
        &self.gate
    }

    async fn timed<T>(
        &self,
        call: impl Future<Output = Result<T, WalletRpcError>>,
    ) -> Result<T, WalletRpcError> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| WalletRpcError::Timeout)?
    }

    /// 整条调用链共用一个截止时间，由调用方通过 `timed` 施加
    async fn call_grant(&self, grant: &CoinGrant) -> Result<CoinGrantResponse, WalletRpcError> {
        match self.send_grant(grant).await {
            Err(WalletRpcError::WalletNotFound(_)) => {
                info!(user_id = %grant.user_id, "钱包不存在，尝试创建后重试");
                self.ensure_wallet(&grant.user_id).await?;
                self.send_grant(grant).await
            }
            other => other,
        }
    }

    async fn send_grant(&self, grant: &CoinGrant) -> Result<CoinGrantResponse, WalletRpcError> {
        let resp = self
            .rpc
            .grant_coin_reward(
                &grant.user_id,
                grant.amount,
                &grant.business_id,
                &grant.description,
            )
            .await?;

        if resp.success {
            Ok(resp)
        } else {
            Err(WalletRpcError::Rejected {
                code: "GRANT_FAILED".to_string(),
                message: "wallet returned success=false".to_string(),
            })
        }
    }

    /// 创建钱包；并发创建导致的"已存在"按成功处理
    async fn ensure_wallet(&self, user_id: &str) -> Result<(), WalletRpcError> {
        match self.rpc.create_wallet(user_id).await {
            Ok(wallet_id) => {
                info!(user_id = %user_id, wallet_id = %wallet_id, "钱包已创建");
                Ok(())
            }
            Err(e) if !e.is_transient() => {
                if self.rpc.check_wallet_exists(user_id).await? {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn record_attempt(&self, grant: &CoinGrant, error: Option<String>, at: DateTime<Utc>) {
        let attempt = SyncAttempt {
            user_id: grant.user_id.clone(),
            amount: grant.amount,
            source: grant.source,
            ref_id: grant.ref_id.clone(),
            success: error.is_none(),
            error_message: error,
            timestamp: at,
        };
        if let Err(e) = self.sync_log.append(attempt).await {
            warn!(error = %e, "同步日志写入失败");
        }
    }
}

#[async_trait]
impl WalletSync for WalletSyncClient {
    #[instrument(
        skip(self, grant),
        fields(user_id = %grant.user_id, amount = grant.amount, business_id = %grant.business_id)
    )]
    async fn grant_coins(&self, grant: &CoinGrant) -> bool {
        let now = self.clock.now();
        if !self.gate.allow_request(now) {
            debug!("钱包已判定不可用，跳过同步");
            metrics::record_wallet_sync(false, 0.0);
            self.record_attempt(grant, Some("wallet marked unavailable".to_string()), now)
                .await;
            return false;
        }

        let started = Instant::now();
        let result = self.timed(self.call_grant(grant)).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(resp) => {
                self.gate.record_success();
                metrics::record_wallet_sync(true, elapsed);
                debug!(new_balance = resp.new_balance, "金币同步成功");
                self.record_attempt(grant, None, self.clock.now()).await;
                true
            }
            Err(e) => {
                if e.is_transient() {
                    self.gate.record_failure(self.clock.now());
                } else {
                    self.gate.record_success();
                }
                metrics::record_wallet_sync(false, elapsed);
                warn!(error = %e, code = e.code(), "金币同步失败");
                self.record_attempt(grant, Some(e.to_string()), self.clock.now())
                    .await;
                false
            }
        }
    }

    async fn is_available(&self) -> bool {
        if !self.gate.allow_request(self.clock.now()) {
            return false;
        }
        match self.timed(self.rpc.health_check()).await {
            Ok(()) => {
                self.gate.record_success();
                true
            }
            Err(e) => {
                warn!(error = %e, "钱包健康检查失败");
                if e.is_transient() {
                    self.gate.record_failure(self.clock.now());
                }
                false
            }
        }
    }
}
