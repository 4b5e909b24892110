//! 幂等动作与奖励对账引擎
//!
//! 保证用户动作（点赞、举报、签到、完成任务）对调用方恰好生效一次，
//! 为动作发放奖励，把需要记账的奖励同步到外部钱包服务，并通过后台对账
//! 修复同步失败。
//!
//! ## 模块结构
//!
//! - `lock`: 分布式锁（内存 / Redis）
//! - `idempotency`: 幂等账本与幂等执行器
//! - `reward`: 奖励记录、仓储、发放器与连签加成策略
//! - `wallet`: 钱包 RPC 契约、同步客户端与同步日志
//! - `reconcile`: 对账器、健康度与后台 Worker
//! - `actions`: 基于幂等执行器的业务动作
//! - `clock`: 可注入的时钟

pub mod actions;
pub mod clock;
pub mod error;
pub mod idempotency;
pub mod lock;
pub mod models;
pub mod reconcile;
pub mod reward;
pub mod wallet;

pub use actions::{
    ActionService, CheckInReward, LikeOutcome, MemoryPostRepository, PostRepository, ReportOutcome,
    RewardOutcome, TaskReward,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, Result};
pub use idempotency::{
    IdempotencyLedger, IdempotentExecutor, IdempotentRequest, LedgerCheck, MemoryLedger,
    RedisLedger,
};
pub use lock::{DistributedLock, LockHandle, MemoryLock, RedisLock};
pub use models::*;
pub use reconcile::{
    HealthReport, HealthStatus, ReconcileFilter, ReconcileReport, ReconcileSettings,
    ReconcileWorker, Reconciler,
};
pub use reward::{
    BonusPolicy, MemoryRewardRepository, NoBonus, PgRewardRepository, RewardIssuer,
    RewardRepository, StreakMultiplier,
};
pub use wallet::{
    CoinGrant, HttpWalletRpc, MemorySyncLog, RedisSyncLog, SyncLogStore, WalletRpc,
    WalletRpcError, WalletSync, WalletSyncClient,
};
