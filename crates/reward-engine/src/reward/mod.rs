//! 奖励模块
//!
//! - `repository`: 奖励记录仓储（内存 / PostgreSQL）
//! - `bonus`: 连签加成策略
//! - `issuer`: 奖励发放器

mod bonus;
mod issuer;
mod memory_repo;
mod pg_repo;
mod repository;

pub use bonus::{BonusPolicy, NoBonus, StreakMultiplier};
pub use issuer::RewardIssuer;
pub use memory_repo::MemoryRewardRepository;
pub use pg_repo::PgRewardRepository;
pub use repository::RewardRepository;

#[cfg(test)]
pub use repository::MockRewardRepository;
