//! 对账模块
//!
//! - `reconciler`: 重试 FAILED 与陈旧 PENDING 奖励的钱包同步
//! - `health`: 基于同步日志的健康度
//! - `worker`: 周期运行对账的后台任务

mod health;
mod reconciler;
mod worker;

pub use health::{HealthReport, HealthStatus};
pub use reconciler::{ReconcileFilter, ReconcileReport, ReconcileSettings, Reconciler};
pub use worker::ReconcileWorker;
