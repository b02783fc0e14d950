use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::broker::{Broker, BrokerError, Channel, Delivery, topic_matches};

#[derive(Default)]
struct MemoryState {
    // 交换机名 -> (绑定模式, 队列名)
    exchanges: HashMap<String, Vec<(String, String)>>,
    queues: HashMap<String, VecDeque<String>>,
    unacked: HashMap<String, Vec<String>>,
}

/// 进程内消息代理，语义与 Redis 实现一致
///
/// 可以模拟代理宕机（`set_available(false)`）和连接断开（`drop_connections`）。
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
    available: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    connects: Arc<AtomicU64>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            available: Arc::new(AtomicBool::new(true)),
            generation: Arc::new(AtomicU64::new(0)),
            connects: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// 让所有已建立的通道失效，下次操作必须重连
    pub fn drop_connections(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// 成功建立连接的次数
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn queued_payloads(&self, queue: &str) -> Vec<String> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn unacked_len(&self, queue: &str) -> usize {
        self.state.lock().unacked.get(queue).map_or(0, Vec::len)
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state.lock().exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state.lock().queues.contains_key(name)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("memory broker is down".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryChannel {
            broker: self.clone(),
            generation: self.generation.load(Ordering::SeqCst),
        }))
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    generation: u64,
}

impl MemoryChannel {
    fn open(&self) -> bool {
        self.broker.available.load(Ordering::SeqCst)
            && self.broker.generation.load(Ordering::SeqCst) == self.generation
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.open() {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }
}

fn remove_first(list: &mut Vec<String>, payload: &str) -> bool {
    match list.iter().position(|p| p == payload) {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn is_open(&self) -> bool {
        self.open()
    }

    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker
            .state
            .lock()
            .exchanges
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.state.lock().exchanges.remove(name);
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker
            .state
            .lock()
            .queues
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn recover_unacked(&self) -> Result<usize, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let stranded: Vec<(String, Vec<String>)> = state.unacked.drain().collect();
        let mut recovered = 0;
        for (name, payloads) in stranded {
            let queue = state.queues.entry(name).or_default();
            recovered += payloads.len();
            for payload in payloads.into_iter().rev() {
                queue.push_front(payload);
            }
        }
        Ok(recovered)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let bindings = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;
        let binding = (pattern.to_string(), queue.to_string());
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let targets: Vec<String> = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?
            .iter()
            .filter(|(pattern, _)| topic_matches(pattern, routing_key))
            .map(|(_, queue)| queue.clone())
            .collect();
        if targets.is_empty() {
            return Err(BrokerError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        for queue in targets {
            state
                .queues
                .entry(queue)
                .or_default()
                .push_back(payload.to_string());
        }
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let Some(payload) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        state
            .unacked
            .entry(queue.to_string())
            .or_default()
            .push(payload.clone());
        Ok(Some(Delivery {
            queue: queue.to_string(),
            payload,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        if let Some(unacked) = state.unacked.get_mut(&delivery.queue) {
            remove_first(unacked, &delivery.payload);
        }
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let removed = state
            .unacked
            .get_mut(&delivery.queue)
            .is_some_and(|unacked| remove_first(unacked, &delivery.payload));
        if removed && requeue {
            state
                .queues
                .entry(delivery.queue.clone())
                .or_default()
                .push_front(delivery.payload.clone());
        }
        Ok(())
    }
}
