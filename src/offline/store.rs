use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use super::broker::{Broker, BrokerError, Channel, Delivery};
use super::keys;
use super::models::PendingMessage;
use super::retry::{RetryOutcome, RetryPolicy};
use crate::proximity::{ProximityEngine, Reach};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("broker unavailable after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: BrokerError },
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub exchange: String,
    pub base_queue: String,
    pub retry: RetryPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            exchange: "offline_exchange".to_string(),
            base_queue: "offline_messages".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

enum ConnectionState {
    Disconnected,
    Connecting,
    Ready(Arc<dyn Channel>),
}

/// 对外暴露的连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Ready,
}

/// 拉取过程中对单条消息的处理结果
#[derive(Debug, Clone, Copy)]
enum Verdict {
    Deliver,
    Drop,
    Hold,
}

pub struct OfflineMessageStore {
    broker: Arc<dyn Broker>,
    // 同一时间只有一个调用方能重建连接
    state: Mutex<ConnectionState>,
    // 当前连接上已声明并绑定过的收件人队列
    declared: parking_lot::Mutex<HashSet<String>>,
    settings: StoreSettings,
    proximity: ProximityEngine,
}

impl OfflineMessageStore {
    /// 建立首个连接并声明交换机和基础队列，失败时服务不应启动
    pub async fn connect(
        broker: Arc<dyn Broker>,
        settings: StoreSettings,
        proximity: ProximityEngine,
    ) -> Result<Self, StoreError> {
        let store = Self {
            broker,
            state: Mutex::new(ConnectionState::Disconnected),
            declared: parking_lot::Mutex::new(HashSet::new()),
            settings,
            proximity,
        };
        let outcome = store.settings.retry.run(|_| store.channel()).await;
        match outcome {
            RetryOutcome::Success { .. } => Ok(store),
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => Err(StoreError::Exhausted {
                attempts,
                source: last_error,
            }),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        // 锁被占用说明正在探活或重连
        match self.state.try_lock() {
            Ok(state) => match &*state {
                ConnectionState::Disconnected => ConnectionStatus::Disconnected,
                ConnectionState::Connecting => ConnectionStatus::Connecting,
                ConnectionState::Ready(_) => ConnectionStatus::Ready,
            },
            Err(_) => ConnectionStatus::Connecting,
        }
    }

    /// 返回可用的通道，连接断开时先完整重连
    async fn channel(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        let mut state = self.state.lock().await;
        if let ConnectionState::Ready(channel) = &*state {
            if channel.is_open().await {
                return Ok(Arc::clone(channel));
            }
            tracing::warn!("Broker channel closed, reconnecting");
        }

        *state = ConnectionState::Connecting;
        match self.reconnect().await {
            Ok(channel) => {
                self.declared.lock().clear();
                *state = ConnectionState::Ready(Arc::clone(&channel));
                tracing::info!(
                    "Broker connected, exchange {} ready",
                    self.settings.exchange
                );
                Ok(channel)
            }
            Err(e) => {
                *state = ConnectionState::Disconnected;
                tracing::error!("Broker reconnect failed: {}", e);
                Err(e)
            }
        }
    }

    async fn reconnect(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        let channel = self.broker.connect().await?;
        let exchange = &self.settings.exchange;

        match channel.declare_exchange(exchange).await {
            Ok(()) => {}
            Err(BrokerError::ExchangeMismatch(_)) => {
                // 同名交换机类型不符，删掉后按持久化 topic 重新声明
                tracing::warn!("Exchange {} has the wrong kind, recreating", exchange);
                channel.delete_exchange(exchange).await?;
                channel.declare_exchange(exchange).await?;
            }
            Err(e) => return Err(e),
        }
        channel.declare_queue(&self.settings.base_queue).await?;

        // 旧连接上拉取了但没确认的消息放回队首
        let recovered = channel.recover_unacked().await?;
        if recovered > 0 {
            tracing::warn!("Requeued {} unacknowledged offline messages", recovered);
        }
        Ok(channel)
    }

    /// 每个连接上只声明并绑定一次收件人队列
    async fn ensure_queue(
        &self,
        channel: &Arc<dyn Channel>,
        queue: &str,
    ) -> Result<(), BrokerError> {
        if self.declared.lock().contains(queue) {
            return Ok(());
        }
        channel.declare_queue(queue).await?;
        channel
            .bind_queue(queue, &self.settings.exchange, &keys::routing_key(queue))
            .await?;
        self.declared.lock().insert(queue.to_string());
        Ok(())
    }

    /// 标记连接失效，下次操作会重连
    async fn invalidate(&self) {
        *self.state.lock().await = ConnectionState::Disconnected;
        self.declared.lock().clear();
    }

    async fn invalidate_on_error<T>(
        &self,
        result: Result<T, BrokerError>,
    ) -> Result<T, BrokerError> {
        if result.is_err() {
            self.invalidate().await;
        }
        result
    }

    async fn publish_once(&self, queue: &str, payload: &str) -> Result<(), BrokerError> {
        let result = self.try_publish(queue, payload).await;
        self.invalidate_on_error(result).await
    }

    async fn try_publish(&self, queue: &str, payload: &str) -> Result<(), BrokerError> {
        let channel = self.channel().await?;
        self.ensure_queue(&channel, queue).await?;
        channel
            .publish(&self.settings.exchange, &keys::routing_key(queue), payload)
            .await
    }

    /// 把消息写入收件人的队列，瞬时故障按重试策略重连重试
    pub async fn store(
        &self,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> Result<PendingMessage, StoreError> {
        let message = PendingMessage::new(sender, recipient, body);
        let payload = serde_json::to_string(&message)?;
        let queue = keys::recipient_queue(recipient);

        match self
            .settings
            .retry
            .run(|_| self.publish_once(&queue, &payload))
            .await
        {
            RetryOutcome::Success { attempts, .. } => {
                tracing::info!(
                    "Message from {} to {} stored in queue {} (attempt {})",
                    sender,
                    recipient,
                    queue,
                    attempts
                );
                Ok(message)
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::error!(
                    "Failed to store message from {} to {} after {} attempts: {}",
                    sender,
                    recipient,
                    attempts,
                    last_error
                );
                Err(StoreError::Exhausted {
                    attempts,
                    source: last_error,
                })
            }
        }
    }

    async fn prepare_queue(&self, queue: &str) -> Result<Arc<dyn Channel>, BrokerError> {
        let result = self.try_prepare_queue(queue).await;
        self.invalidate_on_error(result).await
    }

    async fn try_prepare_queue(&self, queue: &str) -> Result<Arc<dyn Channel>, BrokerError> {
        let channel = self.channel().await?;
        self.ensure_queue(&channel, queue).await?;
        Ok(channel)
    }

    fn judge(&self, message: &PendingMessage, username: &str) -> Verdict {
        match self
            .proximity
            .reach(&message.sender, username, self.proximity.default_radius())
        {
            Reach::UnknownFrom => Verdict::Drop,
            Reach::Within(_) => Verdict::Deliver,
            Reach::Beyond(_) | Reach::UnknownTo => Verdict::Hold,
        }
    }

    /// 取出收件人队列中当前可以投递的消息。
    ///
    /// - 发送方已不在线：确认并丢弃
    /// - 发送方在半径内：确认并返回
    /// - 发送方在半径外：放回队首并停止，后面的消息保持原顺序等待下次拉取
    ///
    /// 最后一条规则意味着一条够不着的消息会挡住它后面的所有消息。
    /// 只有确认成功的消息才会返回；确认失败的那条在重连后放回队首。
    pub async fn fetch_all(&self, username: &str) -> Result<Vec<PendingMessage>, StoreError> {
        if self.proximity.registry().lookup(username).is_none() {
            tracing::debug!("Offline fetch for unknown user {}", username);
            return Ok(Vec::new());
        }

        let queue = keys::recipient_queue(username);
        let channel = match self
            .settings
            .retry
            .run(|_| self.prepare_queue(&queue))
            .await
        {
            RetryOutcome::Success { value, .. } => value,
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::error!(
                    "Failed to open queue {} after {} attempts: {}",
                    queue,
                    attempts,
                    last_error
                );
                return Err(StoreError::Exhausted {
                    attempts,
                    source: last_error,
                });
            }
        };

        let mut messages = Vec::new();
        loop {
            let delivery = match channel.get(&queue).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) => {
                    // 已确认的消息必须交给调用方，未确认的那条在重连后放回队首
                    tracing::warn!("Drain of {} interrupted: {}", queue, e);
                    self.invalidate().await;
                    break;
                }
            };

            let message = match serde_json::from_str::<PendingMessage>(&delivery.payload) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Dropping malformed message in {}: {}", queue, e);
                    if !self.settle(&channel, &delivery, Verdict::Drop).await {
                        break;
                    }
                    continue;
                }
            };

            let verdict = self.judge(&message, username);
            match verdict {
                Verdict::Deliver => {}
                Verdict::Drop => tracing::info!(
                    "Dropping message from departed sender {} to {}",
                    message.sender,
                    username
                ),
                Verdict::Hold => tracing::debug!(
                    "Sender {} out of range of {}, message held",
                    message.sender,
                    username
                ),
            }
            if !self.settle(&channel, &delivery, verdict).await {
                break;
            }
            match verdict {
                Verdict::Deliver => messages.push(message),
                Verdict::Drop => {}
                Verdict::Hold => break,
            }
        }

        Ok(messages)
    }

    /// 确认或拒绝一条消息，返回通道是否仍可继续使用
    async fn settle(
        &self,
        channel: &Arc<dyn Channel>,
        delivery: &Delivery,
        verdict: Verdict,
    ) -> bool {
        let result = match verdict {
            Verdict::Deliver | Verdict::Drop => channel.ack(delivery).await,
            Verdict::Hold => channel.reject(delivery, true).await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to settle message in {}: {}", delivery.queue, e);
                self.invalidate().await;
                false
            }
        }
    }
}
