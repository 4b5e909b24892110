//! 钱包可用性闸门
//!
//! 连续失败达到阈值后判定钱包不可用，冷却期内直接拒绝调用；冷却到期后放行
//! 一个探测请求，成功则恢复，失败则重新进入冷却。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{info, warn};

use crate::clock::add_ttl;

/// 闸门状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// 正常放行
    Up,
    /// 判定不可用，拒绝调用
    Down,
    /// 冷却到期，已放行一个探测请求
    Probing,
}

struct Inner {
    state: GateState,
    consecutive_failures: u32,
    /// Down 的计时起点；Probing 时为探测发出时间
    since: Option<DateTime<Utc>>,
}

/// 钱包可用性闸门
pub struct AvailabilityGate {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl AvailabilityGate {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: GateState::Up,
                consecutive_failures: 0,
                since: None,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> GateState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// 判断是否允许发起调用
    ///
    /// Down 状态冷却到期时转为 Probing 并放行本次调用；探测请求迟迟没有结果
    /// （调用方被取消）时，再过一个冷却期会放行新的探测。
    pub fn allow_request(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            GateState::Up => true,
            GateState::Down | GateState::Probing => {
                let cooled = inner
                    .since
                    .is_none_or(|since| now >= add_ttl(since, self.cooldown));
                if cooled {
                    inner.state = GateState::Probing;
                    inner.since = Some(now);
                    info!("钱包冷却期结束，放行探测请求");
                }
                cooled
            }
        }
    }

    /// 记录一次钱包可达（包括业务拒绝）
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != GateState::Up {
            info!(
                previous_failures = inner.consecutive_failures,
                "钱包服务已恢复"
            );
        }
        inner.state = GateState::Up;
        inner.consecutive_failures = 0;
        inner.since = None;
    }

    /// 记录一次不可达（传输错误、超时）
    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            GateState::Probing => {
                inner.state = GateState::Down;
                inner.since = Some(now);
                warn!("钱包探测请求失败，重新进入冷却");
            }
            GateState::Up if inner.consecutive_failures >= self.failure_threshold => {
                inner.state = GateState::Down;
                inner.since = Some(now);
                warn!(
                    consecutive_failures = inner.consecutive_failures,
                    cooldown_secs = self.cooldown.as_secs(),
                    "钱包连续失败达到阈值，判定不可用"
                );
            }
            _ => {}
        }
    }
}
