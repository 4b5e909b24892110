//! 钱包同步健康度

use serde::Serialize;

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// 成功率 >= 95%
    Healthy,
    /// 成功率 >= 80%
    Warning,
    Error,
}

impl HealthStatus {
    pub fn from_success_rate(rate: f64) -> Self {
        if rate >= 0.95 {
            Self::Healthy
        } else if rate >= 0.80 {
            Self::Warning
        } else {
            Self::Error
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// 健康报告
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub success_rate: f64,
    pub total: u64,
    pub failed: u64,
    pub window_secs: u64,
}
