//! 业务动作
//!
//! 点赞、举报、签到、完成任务都通过幂等执行器执行，重复请求回放首次结果。

mod post_repo;
mod service;

pub use post_repo::{MemoryPostRepository, PostRepository};
pub use service::{
    ActionService, CheckInReward, LikeOutcome, ReportOutcome, RewardOutcome, TaskReward,
};

#[cfg(test)]
pub use post_repo::MockPostRepository;
