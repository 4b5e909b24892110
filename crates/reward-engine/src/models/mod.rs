//! 领域模型定义

mod enums;
mod idempotency;
mod reward;
mod sync_log;

pub use enums::*;
pub use idempotency::*;
pub use reward::*;
pub use sync_log::*;
