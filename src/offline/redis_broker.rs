use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient, Script, aio::MultiplexedConnection};

use super::broker::{Broker, BrokerError, Channel, Delivery, topic_matches};

/// 交换机类型
const EXCHANGE_KIND: &str = "topic";

/// 所有已声明队列的集合
const QUEUE_SET_KEY: &str = "broker:queues";

fn exchange_meta_key(name: &str) -> String {
    format!("broker:exchange:{}:meta", name)
}

fn exchange_bindings_key(name: &str) -> String {
    format!("broker:exchange:{}:bindings", name)
}

fn queue_key(name: &str) -> String {
    format!("broker:queue:{}", name)
}

fn unacked_key(name: &str) -> String {
    format!("broker:unacked:{}", name)
}

// 从未确认列表中移除一条，需要时放回队首；两步在脚本里原子完成
const REJECT_SCRIPT: &str = r#"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 and ARGV[2] == '1' then
    redis.call('LPUSH', KEYS[2], ARGV[1])
end
return removed
"#;

/// 基于 Redis 的消息代理
///
/// 队列是 Redis 列表，持久性由 Redis 的 AOF/RDB 保证。
/// 拉取时用 `LMOVE` 把队首移到未确认列表，确认后删除，拒绝时放回队首。
pub struct RedisBroker {
    client: RedisClient,
}

impl RedisBroker {
    pub fn open(url: &str) -> Result<Self, BrokerError> {
        let client = RedisClient::open(url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn connect(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(Arc::new(RedisChannel { conn }))
    }
}

struct RedisChannel {
    conn: MultiplexedConnection,
}

impl RedisChannel {
    async fn ensure_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(exchange_meta_key(name)).await?;
        if exists {
            Ok(())
        } else {
            Err(BrokerError::UnknownExchange(name.to_string()))
        }
    }
}

#[async_trait]
impl Channel for RedisChannel {
    async fn is_open(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }

    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let key = exchange_meta_key(name);
        let kind: Option<String> = conn.hget(&key, "kind").await?;
        match kind.as_deref() {
            Some(EXCHANGE_KIND) => Ok(()),
            Some(_) => Err(BrokerError::ExchangeMismatch(name.to_string())),
            None => {
                let _: () = conn
                    .hset_multiple(&key, &[("kind", EXCHANGE_KIND), ("durable", "1")])
                    .await?;
                Ok(())
            }
        }
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(&[exchange_meta_key(name), exchange_bindings_key(name)])
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(QUEUE_SET_KEY, name).await?;
        Ok(())
    }

    async fn recover_unacked(&self) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();
        let queues: Vec<String> = conn.smembers(QUEUE_SET_KEY).await?;

        let mut recovered = 0;
        for name in queues {
            // 从未确认列表尾部逐条移回队首，保持原顺序
            let queue = queue_key(&name);
            let unacked = unacked_key(&name);
            loop {
                let moved: Option<String> = redis::cmd("LMOVE")
                    .arg(&unacked)
                    .arg(&queue)
                    .arg("RIGHT")
                    .arg("LEFT")
                    .query_async(&mut conn)
                    .await?;
                if moved.is_none() {
                    break;
                }
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!("Recovered {} unacknowledged messages", recovered);
        }
        Ok(recovered)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_exchange(exchange).await?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(exchange_bindings_key(exchange), queue, pattern)
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_exchange(exchange).await?;
        let mut conn = self.conn.clone();
        let bindings: HashMap<String, String> =
            conn.hgetall(exchange_bindings_key(exchange)).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        let mut routed = 0;
        for (queue, pattern) in &bindings {
            if topic_matches(pattern, routing_key) {
                pipe.rpush(queue_key(queue), payload).ignore();
                routed += 1;
            }
        }
        if routed == 0 {
            return Err(BrokerError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("LMOVE")
            .arg(queue_key(queue))
            .arg(unacked_key(queue))
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(&mut conn)
            .await?;
        Ok(payload.map(|payload| Delivery {
            queue: queue.to_string(),
            payload,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .lrem(unacked_key(&delivery.queue), 1, &delivery.payload)
            .await?;
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let script = Script::new(REJECT_SCRIPT);
        let mut invocation = script.key(unacked_key(&delivery.queue));
        invocation
            .key(queue_key(&delivery.queue))
            .arg(&delivery.payload)
            .arg(if requeue { "1" } else { "0" });
        let _: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(())
    }
}
