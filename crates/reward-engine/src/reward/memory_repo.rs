//! 内存奖励记录仓储

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::repository::{RewardRepository, ensure_transition};
use crate::error::{EngineError, Result};
use crate::models::{CandidateQuery, RewardRecord, StatusUpdate};

/// 基于 DashMap 的奖励记录仓储
#[derive(Default)]
pub struct MemoryRewardRepository {
    records: DashMap<Uuid, RewardRecord>,
}

impl MemoryRewardRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 全部记录快照（按创建时间排序）
    pub fn snapshot(&self) -> Vec<RewardRecord> {
        let mut all: Vec<RewardRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| (r.created_at, r.id));
        all
    }
}

#[async_trait]
impl RewardRepository for MemoryRewardRepository {
    async fn insert(&self, record: &RewardRecord) -> Result<()> {
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(EngineError::Internal(format!(
                "reward record {} already exists",
                record.id
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<RewardRecord>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn transition(&self, update: &StatusUpdate) -> Result<Option<RewardRecord>> {
        ensure_transition(update)?;

        let mut record = self
            .records
            .get_mut(&update.id)
            .ok_or(EngineError::RewardNotFound(update.id))?;
        if record.status != update.from {
            return Ok(None);
        }
        record.apply(update);
        Ok(Some(record.clone()))
    }

    async fn list_candidates(&self, query: &CandidateQuery) -> Result<Vec<RewardRecord>> {
        let mut matched: Vec<RewardRecord> = self
            .records
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        matched.sort_by_key(|r| (r.updated_at, r.created_at, r.id));
        matched.truncate(query.limit);
        Ok(matched)
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<RewardRecord>> {
        let mut matched: Vec<RewardRecord> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matched.truncate(limit);
        Ok(matched)
    }
}
