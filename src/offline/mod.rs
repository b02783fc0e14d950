//! 离线消息存储
//!
//! 收件人不在附近或直连投递失败时，消息按收件人写入持久化队列，
//! 收件人拉取时再按当前距离重新过滤。
//!
//! - `broker`: 消息代理抽象（交换机、队列、拉取/确认/拒绝）
//! - `RedisBroker`: 基于 Redis 列表的持久化实现
//! - `MemoryBroker`: 进程内实现，开发模式和测试使用

pub mod broker;
pub mod keys;
pub mod memory_broker;
pub mod models;
pub mod redis_broker;
pub mod retry;
mod store;

pub use broker::{Broker, BrokerError, Channel, Delivery, connect_broker};
pub use memory_broker::MemoryBroker;
pub use models::PendingMessage;
pub use redis_broker::RedisBroker;
pub use retry::{RetryOutcome, RetryPolicy};
pub use store::{ConnectionStatus, OfflineMessageStore, StoreError, StoreSettings};
