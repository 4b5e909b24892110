//! 幂等执行集成测试
//!
//! 使用内存锁与内存账本验证并发、重复、冲突与过期场景。

use async_trait::async_trait;
use reward_engine::{
    ActionService, CheckInReward, Clock, CoinGrant, EngineError, IdempotentExecutor,
    IdempotentRequest, ManualClock, MemoryLedger, MemoryLock, MemoryPostRepository,
    MemoryRewardRepository, NoBonus, RewardIssuer, WalletSync,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const LOCK_TTL: Duration = Duration::from_secs(10);
const LEDGER_TTL: Duration = Duration::from_secs(3600);

/// 不应被调用的钱包
struct NoWallet;

#[async_trait]
impl WalletSync for NoWallet {
    async fn grant_coins(&self, _grant: &CoinGrant) -> bool {
        panic!("点赞与举报不应触发钱包同步");
    }

    async fn is_available(&self) -> bool {
        true
    }
}

fn executor_with(clock: Arc<dyn Clock>) -> Arc<IdempotentExecutor> {
    Arc::new(IdempotentExecutor::new(
        Arc::new(MemoryLock::new(clock.clone())),
        Arc::new(MemoryLedger::new(clock)),
        LOCK_TTL,
        LEDGER_TTL,
    ))
}

fn action_service(clock: Arc<dyn Clock>, posts: Arc<MemoryPostRepository>) -> ActionService {
    let issuer = Arc::new(RewardIssuer::new(
        Arc::new(MemoryRewardRepository::new()),
        Arc::new(NoWallet),
        Arc::new(NoBonus),
        clock.clone(),
    ));
    ActionService::new(executor_with(clock), posts, issuer, CheckInReward::default())
}

// ==================== 执行器 ====================

#[tokio::test]
async fn test_concurrent_calls_execute_once() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let executor = executor_with(clock);
    let counter = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let executor = executor.clone();
        let counter = counter.clone();
        handles.push(tokio::spawn(async move {
            let request = IdempotentRequest::new("like:P1:U1", "true");
            executor
                .execute(&request, || async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await
        }));
    }

    let mut succeeded = 0;
    let mut pending = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(value) => {
                assert_eq!(value, 1, "所有成功的调用方都应看到同一结果");
                succeeded += 1;
            }
            Err(EngineError::OperationPending { .. }) => pending += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(succeeded >= 1);
    assert_eq!(succeeded + pending, 50);
}

#[tokio::test]
async fn test_sequential_duplicate_returns_stored_outcome() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let executor = executor_with(clock);
    let calls = AtomicUsize::new(0);
    let request = IdempotentRequest::new("task:T1:U1", "completed");

    let first: String = executor
        .execute(&request, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("first-outcome".to_string())
        })
        .await
        .unwrap();
    let second: String = executor
        .execute(&request, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("second-outcome".to_string())
        })
        .await
        .unwrap();

    assert_eq!(first, "first-outcome");
    assert_eq!(second, "first-outcome");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_conflicting_value_reports_stored_value() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let executor = executor_with(clock);

    let _: bool = executor
        .execute(&IdempotentRequest::new("like:P1:U1", "true"), || async { Ok(true) })
        .await
        .unwrap();

    let err = executor
        .execute(&IdempotentRequest::new("like:P1:U1", "false"), || async {
            Ok::<bool, EngineError>(false)
        })
        .await
        .unwrap_err();

    match err {
        EngineError::AlreadyOperated { key, stored_value } => {
            assert_eq!(key, "like:P1:U1");
            assert_eq!(stored_value, "true");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_ledger_expiry_allows_new_execution() {
    let clock = Arc::new(ManualClock::starting_now());
    let executor = executor_with(clock.clone());
    let calls = AtomicUsize::new(0);

    let _: bool = executor
        .execute(&IdempotentRequest::new("like:P1:U1", "true"), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
        .await
        .unwrap();

    clock.advance(LEDGER_TTL + Duration::from_secs(1));

    let value: bool = executor
        .execute(&IdempotentRequest::new("like:P1:U1", "false"), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        })
        .await
        .unwrap();

    assert!(!value);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_operation_is_not_recorded() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let executor = executor_with(clock);
    let request = IdempotentRequest::new("report:P1:U1", "spam");

    let err = executor
        .execute(&request, || async {
            Err::<u64, _>(EngineError::PostNotFound("P1".to_string()))
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "POST_NOT_FOUND");

    // 失败不写账本，锁已释放，同一键可以立即重试
    let count: u64 = executor.execute(&request, || async { Ok(1) }).await.unwrap();
    assert_eq!(count, 1);
}

// ==================== 业务动作 ====================

#[tokio::test]
async fn test_like_twice_changes_counter_once() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let posts = Arc::new(MemoryPostRepository::new());
    posts.add_post("P1", "author");
    let service = action_service(clock, posts.clone());

    let first = service.like_post("U1", "P1", true).await.unwrap();
    let second = service.like_post("U1", "P1", true).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(posts.like_count("P1"), Some(1));
}

#[tokio::test]
async fn test_concurrent_likes_from_many_users() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let posts = Arc::new(MemoryPostRepository::new());
    posts.add_post("P1", "author");
    let service = Arc::new(action_service(clock, posts.clone()));

    let mut handles = Vec::new();
    for i in 0..20 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.like_post(&format!("U{i}"), "P1", true).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(posts.like_count("P1"), Some(20));
}

#[tokio::test]
async fn test_action_errors() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let posts = Arc::new(MemoryPostRepository::new());
    posts.add_post("P1", "U1");
    let service = action_service(clock, posts.clone());

    let missing = service.like_post("U2", "P404", true).await.unwrap_err();
    assert_eq!(missing.code(), "POST_NOT_FOUND");

    let own = service.report_post("U1", "P1", "spam").await.unwrap_err();
    assert_eq!(own.code(), "CANNOT_REPORT_SELF");
    assert_eq!(posts.report_count("P1"), Some(0));

    let empty = service.report_post("U2", "P1", "  ").await.unwrap_err();
    assert_eq!(empty.code(), "VALIDATION_ERROR");
}
