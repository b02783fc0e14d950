use std::sync::Arc;

use async_trait::async_trait;

use super::{MemoryBroker, RedisBroker};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("channel closed")]
    ChannelClosed,
    #[error("exchange {0} does not exist")]
    UnknownExchange(String),
    #[error("exchange {0} already declared with a different kind")]
    ExchangeMismatch(String),
    #[error("no queue bound to {exchange} for routing key {routing_key}")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// 拉取到但尚未确认的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub payload: String,
}

/// 消息代理连接，每次建立返回一个新的通道
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Channel>, BrokerError>;
}

/// 通道上可执行的操作，交换机和队列都是持久化的
#[async_trait]
pub trait Channel: Send + Sync {
    /// 连接和通道是否仍然可用
    async fn is_open(&self) -> bool;

    /// 声明 topic 交换机，已存在且类型一致时不做任何事
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError>;

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError>;

    /// 声明队列，已存在时不做任何事
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// 把所有队列中未确认的消息按原顺序放回队首，返回放回的条数。
    ///
    /// 只应在重建连接后调用：此时旧通道上拉取中的消息已无人确认。
    async fn recover_unacked(&self) -> Result<usize, BrokerError>;

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str)
    -> Result<(), BrokerError>;

    /// 投递到所有匹配的队列；没有任何匹配时返回 `Unroutable`
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &str)
    -> Result<(), BrokerError>;

    /// 拉取队首消息，队列为空时返回 None
    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// 拒绝消息；`requeue` 为 true 时放回队首
    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError>;
}

/// 按 URL 选择实现：`memory://` 使用进程内代理，其余按 Redis 地址处理
pub fn connect_broker(url: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    if url.starts_with("memory://") {
        tracing::warn!("Using in-memory broker, offline messages will not survive a restart");
        return Ok(Arc::new(MemoryBroker::new()));
    }
    Ok(Arc::new(RedisBroker::open(url)?))
}

/// topic 路由匹配：以 `.` 分词，`*` 匹配一个词，`#` 匹配零个或多个词
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&first, key_rest)) if word == "*" || word == first => {
                match_words(rest, key_rest)
            }
            _ => false,
        },
    }
}
