//! 共享库
//!
//! 奖励引擎各组件共用的配置、错误类型、数据库连接、Redis 连接与可观测性基础设施。

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod observability;
