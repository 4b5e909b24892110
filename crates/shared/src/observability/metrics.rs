//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止指标 HTTP 服务
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "idempotent_executions_total",
        "Idempotent action executions by outcome"
    );
    metrics::describe_histogram!(
        "idempotent_execution_duration_seconds",
        "Idempotent action execution duration in seconds"
    );
    metrics::describe_counter!("reward_grants_total", "Reward records created by kind and status");
    metrics::describe_counter!("wallet_sync_total", "Wallet sync attempts by result");
    metrics::describe_histogram!(
        "wallet_sync_duration_seconds",
        "Wallet sync call duration in seconds"
    );
    metrics::describe_counter!("reconcile_passes_total", "Reconcile passes");
    metrics::describe_counter!(
        "reconcile_records_total",
        "Reward records processed by reconciliation, by result"
    );
    metrics::describe_gauge!(
        "wallet_sync_success_rate",
        "Wallet sync success rate over the health window"
    );
    metrics::describe_gauge!("worker_last_run_timestamp", "Unix timestamp of the last worker run");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一次幂等执行
///
/// outcome: executed / duplicate / conflict / pending / failed
#[inline]
pub fn record_idempotent_execution(outcome: &str, duration_secs: f64) {
    metrics::counter!("idempotent_executions_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!(
        "idempotent_execution_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// 记录奖励创建
#[inline]
pub fn record_reward_grant(kind: &str, status: &str) {
    metrics::counter!(
        "reward_grants_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录钱包同步调用
#[inline]
pub fn record_wallet_sync(success: bool, duration_secs: f64) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!("wallet_sync_total", "result" => result).increment(1);
    metrics::histogram!("wallet_sync_duration_seconds", "result" => result).record(duration_secs);
}

/// 记录一轮对账
#[inline]
pub fn record_reconcile_pass(candidates: u64, succeeded: u64, failed: u64) {
    metrics::counter!("reconcile_passes_total").increment(1);
    metrics::counter!("reconcile_records_total", "result" => "candidate").increment(candidates);
    metrics::counter!("reconcile_records_total", "result" => "success").increment(succeeded);
    metrics::counter!("reconcile_records_total", "result" => "failure").increment(failed);
}

/// 更新钱包同步成功率
#[inline]
pub fn set_wallet_success_rate(rate: f64) {
    metrics::gauge!("wallet_sync_success_rate").set(rate);
}

/// 记录 Worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}
