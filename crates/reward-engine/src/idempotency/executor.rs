//! 幂等执行器
//!
//! 执行流程：
//! 1. 查账本：重复请求直接回放结果（不加锁的快速路径）
//! 2. 指纹冲突：返回 `AlreadyOperated`
//! 3. 获取锁：被占用返回 `OperationPending`
//! 4. 持锁再查一次账本，关闭第 1 步的竞态窗口
//! 5. 执行操作：失败原样返回且不写账本，调用方可以按新请求重试
//! 6. 成功后写账本、释放锁、返回结果；结果无法落账时保留锁直到 TTL 到期
//!
//! 执行器自身不重试，重试策略属于调用方。

use reward_shared::observability::metrics;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::IdempotencyLedger;
use crate::error::{EngineError, Result};
use crate::lock::{DistributedLock, LockHandle};
use crate::models::{IdempotencyRecord, LedgerCheck};

/// 幂等执行请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotentRequest {
    pub lock_key: String,
    pub ledger_key: String,
    /// 本次请求期望的结果指纹
    pub expected_value: String,
    /// 为空时使用执行器默认值
    pub lock_ttl: Option<Duration>,
    pub ledger_ttl: Option<Duration>,
}

impl IdempotentRequest {
    /// 锁键与账本键相同的常见情形
    pub fn new(action_key: impl Into<String>, expected_value: impl Into<String>) -> Self {
        let key = action_key.into();
        Self {
            lock_key: key.clone(),
            ledger_key: key,
            expected_value: expected_value.into(),
            lock_ttl: None,
            ledger_ttl: None,
        }
    }

    pub fn with_lock_key(mut self, lock_key: impl Into<String>) -> Self {
        self.lock_key = lock_key.into();
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    pub fn with_ledger_ttl(mut self, ttl: Duration) -> Self {
        self.ledger_ttl = Some(ttl);
        self
    }
}

/// 幂等执行器
pub struct IdempotentExecutor {
    lock: Arc<dyn DistributedLock>,
    ledger: Arc<dyn IdempotencyLedger>,
    lock_ttl: Duration,
    ledger_ttl: Duration,
}

impl IdempotentExecutor {
    pub fn new(
        lock: Arc<dyn DistributedLock>,
        ledger: Arc<dyn IdempotencyLedger>,
        lock_ttl: Duration,
        ledger_ttl: Duration,
    ) -> Self {
        Self {
            lock,
            ledger,
            lock_ttl,
            ledger_ttl,
        }
    }

    /// 幂等执行 `operation`
    ///
    /// 同一动作键上并发或重复的调用，`operation` 最多执行一次；其他调用方
    /// 得到同一结果（从账本回放）、`OperationPending` 或 `AlreadyOperated`。
    #[instrument(
        skip(self, request, operation),
        fields(key = %request.ledger_key, expected = %request.expected_value)
    )]
    pub async fn execute<T, F, Fut>(&self, request: &IdempotentRequest, operation: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = self.execute_inner(request, operation).await;

        let outcome = match &result {
            Ok((_, Executed::Fresh)) => "executed",
            Ok((_, Executed::Replayed)) => "duplicate",
            Err(EngineError::AlreadyOperated { .. }) => "conflict",
            Err(EngineError::OperationPending { .. }) => "pending",
            Err(_) => "failed",
        };
        metrics::record_idempotent_execution(outcome, started.elapsed().as_secs_f64());

        result.map(|(value, _)| value)
    }

    async fn execute_inner<T, F, Fut>(
        &self,
        request: &IdempotentRequest,
        operation: F,
    ) -> Result<(T, Executed)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // 1-2. 快速路径
        if let Some(value) = self.check_ledger(request).await? {
            debug!("Duplicate request served from ledger");
            return Ok((value, Executed::Replayed));
        }

        // 3. 加锁
        let lock_ttl = request.lock_ttl.unwrap_or(self.lock_ttl);
        let Some(handle) = self.lock.acquire(&request.lock_key, lock_ttl).await? else {
            return Err(EngineError::OperationPending {
                key: request.lock_key.clone(),
            });
        };

        // 4. 持锁双重检查
        match self.check_ledger(request).await {
            Ok(Some(value)) => {
                self.release(&handle).await;
                debug!("Duplicate request detected under lock");
                return Ok((value, Executed::Replayed));
            }
            Ok(None) => {}
            Err(e) => {
                self.release(&handle).await;
                return Err(e);
            }
        }

        // 5. 执行操作
        let value = match operation().await {
            Ok(value) => value,
            Err(e) => {
                self.release(&handle).await;
                return Err(e);
            }
        };

        // 6. 写账本后释放锁
        let ledger_ttl = request.ledger_ttl.unwrap_or(self.ledger_ttl);
        let committed = match serde_json::to_value(&value) {
            Ok(outcome) => {
                self.ledger
                    .commit(&request.ledger_key, &request.expected_value, outcome, ledger_ttl)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        match committed {
            Ok(()) => self.release(&handle).await,
            Err(e) => {
                // 操作已生效，不能再报错让调用方重做；锁保留到 TTL 到期
                error!(
                    error = %e,
                    lock_ttl_ms = lock_ttl.as_millis() as u64,
                    "Operation succeeded but outcome was not recorded, holding lock until TTL"
                );
            }
        }

        info!("Idempotent operation executed");
        Ok((value, Executed::Fresh))
    }

    /// 查询账本，重复请求返回回放结果，冲突返回错误
    async fn check_ledger<T: DeserializeOwned>(
        &self,
        request: &IdempotentRequest,
    ) -> Result<Option<T>> {
        match self
            .ledger
            .check_and_reserve(&request.ledger_key, &request.expected_value)
            .await?
        {
            LedgerCheck::Fresh => Ok(None),
            LedgerCheck::Duplicate(record) => replay(record).map(Some),
            LedgerCheck::Conflict { stored_value } => Err(EngineError::AlreadyOperated {
                key: request.ledger_key.clone(),
                stored_value,
            }),
        }
    }

    /// 释放失败只记录日志，锁最终会通过 TTL 过期
    async fn release(&self, handle: &LockHandle) {
        if let Err(e) = self.lock.release(handle).await {
            warn!(key = %handle.key, error = %e, "Lock release failed, will expire via TTL");
        }
    }
}

enum Executed {
    Fresh,
    Replayed,
}

fn replay<T: DeserializeOwned>(record: IdempotencyRecord) -> Result<T> {
    serde_json::from_value(record.outcome).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::{MemoryLedger, MockIdempotencyLedger};
    use crate::lock::{MemoryLock, MockDistributedLock};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_secs(10);

    fn memory_executor() -> IdempotentExecutor {
        IdempotentExecutor::new(
            Arc::new(MemoryLock::default()),
            Arc::new(MemoryLedger::default()),
            TTL,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_duplicate_replays_stored_outcome() {
        let executor = memory_executor();
        let calls = AtomicU32::new(0);
        let request = IdempotentRequest::new("like:p1:u1", "true");

        for _ in 0..3 {
            let value: u32 = executor
                .execute(&request, || async {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await
                .unwrap();
            assert_eq!(value, 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operation_error_is_not_committed() {
        let executor = memory_executor();
        let request = IdempotentRequest::new("report:p1:u1", "spam");

        let err = executor
            .execute::<(), _, _>(&request, || async {
                Err(EngineError::PostNotFound("p1".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "POST_NOT_FOUND");

        // 失败后同一请求可以作为新请求重试，且锁已释放
        let value: String = executor
            .execute(&request, || async { Ok("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "ok");
    }

    #[tokio::test]
    async fn test_conflict_returns_already_operated() {
        let executor = memory_executor();
        executor
            .execute(&IdempotentRequest::new("like:p1:u1", "true"), || async { Ok(true) })
            .await
            .unwrap();

        let err = executor
            .execute(&IdempotentRequest::new("like:p1:u1", "false"), || async {
                Ok(false)
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::AlreadyOperated { ref stored_value, .. } if stored_value == "true"
        ));
    }

    #[tokio::test]
    async fn test_busy_lock_returns_operation_pending() {
        let lock = Arc::new(MemoryLock::default());
        let executor = IdempotentExecutor::new(
            lock.clone(),
            Arc::new(MemoryLedger::default()),
            TTL,
            TTL,
        );
        let held = lock.acquire("like:p1:u1", TTL).await.unwrap().unwrap();

        let err = executor
            .execute(&IdempotentRequest::new("like:p1:u1", "true"), || async {
                Ok(true)
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "OPERATION_PENDING");
        assert!(err.is_retryable());

        lock.release(&held).await.unwrap();
    }

    #[tokio::test]
    async fn test_ledger_unavailable_skips_operation() {
        let mut ledger = MockIdempotencyLedger::new();
        ledger
            .expect_check_and_reserve()
            .returning(|_, _| Err(EngineError::LedgerUnavailable("down".to_string())));
        let mut lock = MockDistributedLock::new();
        lock.expect_acquire().never();

        let executor = IdempotentExecutor::new(Arc::new(lock), Arc::new(ledger), TTL, TTL);
        let calls = AtomicU32::new(0);

        let err = executor
            .execute(&IdempotentRequest::new("k", "v"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LEDGER_UNAVAILABLE");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_double_check_under_lock_replays() {
        // 第一次查询看到 Fresh，持锁后发现其他实例已提交
        let mut ledger = MockIdempotencyLedger::new();
        let mut seq = mockall::Sequence::new();
        ledger
            .expect_check_and_reserve()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(LedgerCheck::Fresh));
        ledger
            .expect_check_and_reserve()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|key, value| {
                let now = Utc::now();
                Ok(LedgerCheck::Duplicate(IdempotencyRecord {
                    key: key.to_string(),
                    expected_value: value.to_string(),
                    stored_value: value.to_string(),
                    outcome: json!(7),
                    created_at: now,
                    expires_at: now,
                }))
            });
        ledger.expect_commit().never();

        let mut lock = MockDistributedLock::new();
        lock.expect_acquire().times(1).returning(|key, ttl| {
            Ok(Some(LockHandle {
                key: key.to_string(),
                owner: "i:1".to_string(),
                acquired_at: Utc::now(),
                ttl,
            }))
        });
        lock.expect_release().times(1).returning(|_| Ok(true));

        let executor = IdempotentExecutor::new(Arc::new(lock), Arc::new(ledger), TTL, TTL);
        let value: i32 = executor
            .execute(&IdempotentRequest::new("k", "v"), || async {
                Err(EngineError::Internal("operation must not run".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_lock_and_returns_value() {
        let mut ledger = MockIdempotencyLedger::new();
        ledger
            .expect_check_and_reserve()
            .returning(|_, _| Ok(LedgerCheck::Fresh));
        ledger
            .expect_commit()
            .times(1)
            .returning(|_, _, _, _| Err(EngineError::LedgerUnavailable("down".to_string())));

        let mut lock = MockDistributedLock::new();
        lock.expect_acquire().returning(|key, ttl| {
            Ok(Some(LockHandle {
                key: key.to_string(),
                owner: "i:1".to_string(),
                acquired_at: Utc::now(),
                ttl,
            }))
        });
        lock.expect_release().never();

        let executor = IdempotentExecutor::new(Arc::new(lock), Arc::new(ledger), TTL, TTL);
        let value: bool = executor
            .execute(&IdempotentRequest::new("k", "v"), || async { Ok(true) })
            .await
            .unwrap();
        assert!(value);
    }

    #[tokio::test]
    async fn test_unserializable_outcome_keeps_lock_and_returns_value() {
        #[derive(Debug, serde::Deserialize)]
        struct Opaque(u32);

        impl Serialize for Opaque {
            fn serialize<S: serde::Serializer>(
                &self,
                _serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("opaque outcome"))
            }
        }

        let mut ledger = MockIdempotencyLedger::new();
        ledger
            .expect_check_and_reserve()
            .times(2)
            .returning(|_, _| Ok(LedgerCheck::Fresh));
        ledger.expect_commit().never();

        let mut lock = MockDistributedLock::new();
        lock.expect_acquire().times(1).returning(|key, ttl| {
            Ok(Some(LockHandle {
                key: key.to_string(),
                owner: "i:1".to_string(),
                acquired_at: Utc::now(),
                ttl,
            }))
        });
        lock.expect_release().never();

        let executor = IdempotentExecutor::new(Arc::new(lock), Arc::new(ledger), TTL, TTL);
        let value = executor
            .execute(&IdempotentRequest::new("k", "v"), || async { Ok(Opaque(3)) })
            .await
            .unwrap();
        assert_eq!(value.0, 3);
    }

    #[test]
    fn test_request_builder() {
        let request = IdempotentRequest::new("checkin:u1:2026-01-01", "checked")
            .with_lock_key("lock:checkin:u1")
            .with_lock_ttl(Duration::from_secs(5))
            .with_ledger_ttl(Duration::from_secs(86_400));
        assert_eq!(request.ledger_key, "checkin:u1:2026-01-01");
        assert_eq!(request.lock_key, "lock:checkin:u1");
        assert_eq!(request.lock_ttl, Some(Duration::from_secs(5)));
    }
}
