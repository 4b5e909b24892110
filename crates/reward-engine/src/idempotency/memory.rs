//! 单进程内存幂等账本

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::IdempotencyLedger;
use crate::clock::{Clock, SystemClock, add_ttl};
use crate::error::{EngineError, Result};
use crate::models::{IdempotencyRecord, LedgerCheck};

/// 基于 DashMap 的幂等账本
///
/// 过期记录在读取时视为不存在，由 `purge_expired` 定期回收内存。
pub struct MemoryLedger {
    records: DashMap<String, IdempotencyRecord>,
    clock: Arc<dyn Clock>,
}

impl MemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl IdempotencyLedger for MemoryLedger {
    async fn check_and_reserve(&self, key: &str, expected_value: &str) -> Result<LedgerCheck> {
        let existing = self.records.get(key).map(|r| r.value().clone());
        Ok(LedgerCheck::evaluate(existing, expected_value, self.clock.now()))
    }

    async fn commit(&self, key: &str, value: &str, outcome: Value, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let record = IdempotencyRecord {
            key: key.to_string(),
            expected_value: value.to_string(),
            stored_value: value.to_string(),
            outcome,
            created_at: now,
            expires_at: add_ttl(now, ttl),
        };

        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(record);
                } else if !occupied.get().matches(value) {
                    return Err(EngineError::AlreadyOperated {
                        key: key.to_string(),
                        stored_value: occupied.get().stored_value.clone(),
                    });
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
            }
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired(now));
        let purged = before.saturating_sub(self.records.len()) as u64;
        if purged > 0 {
            debug!(purged, "Expired idempotency records purged");
        }
        Ok(purged)
    }
}
