//! 钱包服务 RPC 契约
//!
//! 钱包余额由外部钱包服务独占，这里只发起变更请求并记录结果。

use async_trait::async_trait;
use reqwest::StatusCode;
use reward_shared::config::WalletConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

/// 钱包 RPC 错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletRpcError {
    #[error("钱包不存在: {0}")]
    WalletNotFound(String),

    #[error("钱包拒绝请求: code={code}, {message}")]
    Rejected { code: String, message: String },

    #[error("钱包服务传输错误: {0}")]
    Transport(String),

    #[error("钱包服务调用超时")]
    Timeout,
}

impl WalletRpcError {
    /// 是否为连接层面的故障（计入可用性闸门）
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::WalletNotFound(_) => "WALLET_NOT_FOUND",
            Self::Rejected { .. } => "WALLET_REJECTED",
            Self::Transport(_) => "WALLET_UNAVAILABLE",
            Self::Timeout => "WALLET_TIMEOUT",
        }
    }
}

impl From<reqwest::Error> for WalletRpcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// 发放金币响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinGrantResponse {
    pub success: bool,
    pub new_balance: i64,
}

/// 钱包服务 RPC 接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletRpc: Send + Sync {
    /// 发放金币，`business_id` 供钱包侧去重
    async fn grant_coin_reward(
        &self,
        user_id: &str,
        amount: i64,
        business_id: &str,
        description: &str,
    ) -> Result<CoinGrantResponse, WalletRpcError>;

    async fn check_wallet_exists(&self, user_id: &str) -> Result<bool, WalletRpcError>;

    /// 创建钱包，返回钱包 ID
    async fn create_wallet(&self, user_id: &str) -> Result<String, WalletRpcError>;

    async fn health_check(&self) -> Result<(), WalletRpcError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GrantBody<'a> {
    amount: i64,
    business_id: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateWalletBody<'a> {
    user_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWalletResponse {
    wallet_id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// 基于 JSON/HTTP 的钱包客户端
///
/// - `POST {base}/wallets/{user_id}/rewards`
/// - `GET  {base}/wallets/{user_id}`
/// - `POST {base}/wallets`
/// - `GET  {base}/health`
#[derive(Clone)]
pub struct HttpWalletRpc {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWalletRpc {
    pub fn new(config: &WalletConfig) -> Result<Self, WalletRpcError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| WalletRpcError::Transport(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// 把非 2xx 响应转换为错误
async fn error_from_response(user_id: &str, resp: reqwest::Response) -> WalletRpcError {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return WalletRpcError::WalletNotFound(user_id.to_string());
    }
    if status.is_server_error() {
        return WalletRpcError::Transport(format!("HTTP {}", status));
    }

    let body: ErrorBody = resp.json().await.unwrap_or_default();
    WalletRpcError::Rejected {
        code: body.code.unwrap_or_else(|| status.as_u16().to_string()),
        message: body.message.unwrap_or_else(|| status.to_string()),
    }
}

#[async_trait]
impl WalletRpc for HttpWalletRpc {
    #[instrument(skip(self, description))]
    async fn grant_coin_reward(
        &self,
        user_id: &str,
        amount: i64,
        business_id: &str,
        description: &str,
    ) -> Result<CoinGrantResponse, WalletRpcError> {
        let resp = self
            .client
            .post(self.url(&format!("/wallets/{}/rewards", user_id)))
            .json(&GrantBody {
                amount,
                business_id,
                description,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(user_id, resp).await);
        }

        let body: CoinGrantResponse = resp.json().await?;
        debug!(new_balance = body.new_balance, "Wallet grant response");
        Ok(body)
    }

    async fn check_wallet_exists(&self, user_id: &str) -> Result<bool, WalletRpcError> {
        let resp = self
            .client
            .get(self.url(&format!("/wallets/{}", user_id)))
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_from_response(user_id, resp).await),
        }
    }

    #[instrument(skip(self))]
    async fn create_wallet(&self, user_id: &str) -> Result<String, WalletRpcError> {
        let resp = self
            .client
            .post(self.url("/wallets"))
            .json(&CreateWalletBody { user_id })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(user_id, resp).await);
        }
        let body: CreateWalletResponse = resp.json().await?;
        Ok(body.wallet_id)
    }

    async fn health_check(&self) -> Result<(), WalletRpcError> {
        let resp = self.client.get(self.url("/health")).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(WalletRpcError::Transport(format!("HTTP {}", resp.status())))
        }
    }
}
