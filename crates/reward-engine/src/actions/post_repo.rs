//! 帖子仓储
//!
//! 计数器的读改写由存储层原子完成。

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{EngineError, Result};

/// 帖子仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// 帖子作者，帖子不存在时返回 None
    async fn author_of(&self, post_id: &str) -> Result<Option<String>>;

    async fn exists(&self, post_id: &str) -> Result<bool> {
        Ok(self.author_of(post_id).await?.is_some())
    }

    /// 原子增减点赞数，返回新值（不小于 0）
    async fn increment_like_count(&self, post_id: &str, delta: i64) -> Result<i64>;

    /// 记录举报，返回该帖子的举报总数
    async fn record_report(&self, post_id: &str, reporter_id: &str, reason: &str) -> Result<u64>;
}

#[derive(Debug, Clone)]
struct Post {
    author_id: String,
    like_count: i64,
    reports: Vec<(String, String)>,
}

/// 内存帖子仓储
#[derive(Default)]
pub struct MemoryPostRepository {
    posts: DashMap<String, Post>,
}

impl MemoryPostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_post(&self, post_id: impl Into<String>, author_id: impl Into<String>) {
        self.posts.insert(
            post_id.into(),
            Post {
                author_id: author_id.into(),
                like_count: 0,
                reports: Vec::new(),
            },
        );
    }

    pub fn like_count(&self, post_id: &str) -> Option<i64> {
        self.posts.get(post_id).map(|p| p.like_count)
    }

    pub fn report_count(&self, post_id: &str) -> Option<usize> {
        self.posts.get(post_id).map(|p| p.reports.len())
    }
}

#[async_trait]
impl PostRepository for MemoryPostRepository {
    async fn author_of(&self, post_id: &str) -> Result<Option<String>> {
        Ok(self.posts.get(post_id).map(|p| p.author_id.clone()))
    }

    async fn increment_like_count(&self, post_id: &str, delta: i64) -> Result<i64> {
        let mut post = self
            .posts
            .get_mut(post_id)
            .ok_or_else(|| EngineError::PostNotFound(post_id.to_string()))?;
        post.like_count = post.like_count.saturating_add(delta).max(0);
        Ok(post.like_count)
    }

    async fn record_report(&self, post_id: &str, reporter_id: &str, reason: &str) -> Result<u64> {
        let mut post = self
            .posts
            .get_mut(post_id)
            .ok_or_else(|| EngineError::PostNotFound(post_id.to_string()))?;
        post.reports.push((reporter_id.to_string(), reason.to_string()));
        Ok(post.reports.len() as u64)
    }
}
