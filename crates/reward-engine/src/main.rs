//! 奖励引擎服务
//!
//! 装配幂等执行器、奖励发放与钱包同步，并运行后台对账 Worker。

use anyhow::Result;
use reward_shared::{
    cache::Cache,
    config::{AppConfig, StorageBackend},
    database::Database,
    observability,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use reward_engine::{
    ActionService, CheckInReward, Clock, DistributedLock, HttpWalletRpc, IdempotencyLedger,
    IdempotentExecutor, MemoryLedger, MemoryLock, MemoryPostRepository, MemoryRewardRepository,
    MemorySyncLog, PgRewardRepository, PostRepository, ReconcileSettings, ReconcileWorker,
    Reconciler, RedisLedger, RedisLock, RedisSyncLog, RewardIssuer, RewardRepository,
    StreakMultiplier, SyncLogStore, SystemClock, WalletSyncClient,
};

/// 存储相关组件，按后端选择实现
struct Storage {
    lock: Arc<dyn DistributedLock>,
    ledger: Arc<dyn IdempotencyLedger>,
    rewards: Arc<dyn RewardRepository>,
    sync_log: Arc<dyn SyncLogStore>,
    posts: Arc<dyn PostRepository>,
    database: Option<Database>,
}

async fn build_storage(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Storage> {
    match config.backend {
        StorageBackend::Distributed => {
            let db = Database::connect(&config.database).await?;
            db.ensure_schema().await?;
            info!("Database connection established");

            let cache = Cache::new(&config.redis)?;
            cache.health_check().await?;
            info!("Redis connection established");

            Ok(Storage {
                lock: Arc::new(RedisLock::new(cache.clone())),
                ledger: Arc::new(RedisLedger::with_clock(cache.clone(), clock)),
                rewards: Arc::new(PgRewardRepository::new(db.pool().clone())),
                sync_log: Arc::new(RedisSyncLog::new(cache, config.sync_log.capacity)),
                // 帖子存储属于业务侧，由接入层替换
                posts: Arc::new(MemoryPostRepository::new()),
                database: Some(db),
            })
        }
        StorageBackend::Memory => {
            warn!("Using in-memory backend, not safe for multi-instance deployment");
            Ok(Storage {
                lock: Arc::new(MemoryLock::new(clock.clone())),
                ledger: Arc::new(MemoryLedger::new(clock)),
                rewards: Arc::new(MemoryRewardRepository::new()),
                sync_log: Arc::new(MemorySyncLog::new(config.sync_log.capacity)),
                posts: Arc::new(MemoryPostRepository::new()),
                database: None,
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置，跨段约束不满足时直接退出
    let config = AppConfig::load("reward-engine")?;

    // 2. 日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!("Starting reward-engine...");
    info!(
        environment = %config.environment,
        backend = ?config.backend,
        "Configuration loaded"
    );

    // 3. 存储
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage = build_storage(&config, clock.clone()).await?;

    // 4. 钱包同步
    let rpc = Arc::new(HttpWalletRpc::new(&config.wallet)?);
    let wallet = Arc::new(WalletSyncClient::new(
        rpc,
        storage.sync_log.clone(),
        &config.wallet,
        clock.clone(),
    ));
    info!(base_url = %config.wallet.base_url, "Wallet sync client initialized");

    // 5. 幂等执行与业务动作
    let executor = Arc::new(IdempotentExecutor::new(
        storage.lock.clone(),
        storage.ledger.clone(),
        config.idempotency.lock_ttl(),
        config.idempotency.ledger_ttl(),
    ));
    let issuer = Arc::new(RewardIssuer::new(
        storage.rewards.clone(),
        wallet.clone(),
        Arc::new(StreakMultiplier::weekly_double()),
        clock.clone(),
    ));
    // 由接入层持有，本进程不暴露请求入口
    let _actions = ActionService::new(
        executor,
        storage.posts.clone(),
        issuer,
        CheckInReward::default(),
    );
    info!("Services initialized");

    // 6. 对账
    let reconciler = Arc::new(Reconciler::new(
        storage.rewards.clone(),
        wallet,
        storage.lock.clone(),
        storage.sync_log.clone(),
        clock,
        ReconcileSettings::from_config(
            &config.reconcile,
            &config.sync_log,
            config.idempotency.lock_ttl(),
        ),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = if config.reconcile.enabled {
        let worker = ReconcileWorker::new(
            reconciler,
            storage.lock.clone(),
            storage.ledger.clone(),
            &config.reconcile,
        );
        Some(tokio::spawn(worker.run(shutdown_rx)))
    } else {
        info!("Reconcile worker disabled");
        None
    };

    shutdown_signal().await;

    // 7. 优雅关闭：先停 Worker，再关连接池
    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle
        && let Err(e) = handle.await
    {
        warn!("Reconcile worker terminated abnormally: {}", e);
    }
    if let Some(db) = storage.database {
        db.close().await;
    }

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
