//! Redis 连接管理模块
//!
//! 封装 Redis 客户端与幂等/锁场景需要的原子操作。

use crate::config::RedisConfig;
use crate::error::Result;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{info, instrument};

/// 仅当值与期望 owner 一致时删除，避免误删他人持有的键
const COMPARE_AND_DELETE: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// Redis 客户端
#[derive(Clone)]
pub struct Cache {
    client: Client,
    key_prefix: String,
}

impl Cache {
    /// 创建 Redis 客户端（惰性连接，首次操作时才建立连接）
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!(prefix = %config.key_prefix, "Redis client created");
        Ok(Self {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// 拼接带前缀的完整键
    pub fn key(&self, namespace: &str, key: &str) -> String {
        if self.key_prefix.is_empty() {
            format!("{}:{}", namespace, key)
        } else {
            format!("{}:{}:{}", self.key_prefix, namespace, key)
        }
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// 读取 JSON 值
    #[instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    /// 写入 JSON 值并设置过期时间（毫秒精度）
    #[instrument(skip(self, value))]
    pub async fn set_json_px<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)?;

        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(serialized)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// 原子性地仅在 key 不存在时写入，并指定毫秒 TTL
    ///
    /// 返回 true 表示写入成功（key 原本不存在）。
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_conn().await?;

        // SET NX 成功时返回 "OK"，失败时返回 nil
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    /// 原子比较并删除
    ///
    /// 返回 true 表示删除成功；false 表示 key 已不存在或值不匹配。
    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let deleted: i32 = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    /// 头部插入并裁剪列表，只保留最新的 `capacity` 个元素
    pub async fn push_capped<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        capacity: usize,
    ) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)?;
        let stop = capacity.saturating_sub(1) as isize;

        let _: () = redis::pipe()
            .atomic()
            .lpush(key, serialized)
            .ignore()
            .ltrim(key, 0, stop)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// 读取列表全部元素（从新到旧）
    pub async fn list_json<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let mut conn = self.get_conn().await?;
        let raw: Vec<String> = conn.lrange(key, 0, -1).await?;

        raw.iter()
            .map(|v| serde_json::from_str(v).map_err(Into::into))
            .collect()
    }

    /// 删除值
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// Redis PX 不接受 0，最短按 1ms 处理
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
