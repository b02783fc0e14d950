//! 消息投递路由
//!
//! 收件人在附近时尝试直连投递，直连失败或不在附近时转存离线队列。

mod courier;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use courier::{Courier, DeliveryError, HttpCourier, ReceiveMessageRequest, receive_url};

use crate::offline::OfflineMessageStore;
use crate::proximity::{ProximityEngine, Reach};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    DeliveredDirect,
    Queued,
    RecipientUnknown,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub ok: bool,
    pub status: SendStatus,
}

impl SendOutcome {
    fn new(status: SendStatus) -> Self {
        let ok = matches!(status, SendStatus::DeliveredDirect | SendStatus::Queued);
        Self { ok, status }
    }
}

pub struct DeliveryRouter {
    proximity: ProximityEngine,
    store: Arc<OfflineMessageStore>,
    courier: Arc<dyn Courier>,
}

impl DeliveryRouter {
    pub fn new(
        proximity: ProximityEngine,
        store: Arc<OfflineMessageStore>,
        courier: Arc<dyn Courier>,
    ) -> Self {
        Self {
            proximity,
            store,
            courier,
        }
    }

    pub async fn send(&self, sender: &str, recipient: &str, body: &str) -> SendOutcome {
        let Some(target) = self.proximity.registry().lookup(recipient) else {
            tracing::debug!("Message from {} to unknown recipient {}", sender, recipient);
            return SendOutcome::new(SendStatus::RecipientUnknown);
        };

        // 发送方未注册时无法计算距离，直接入队
        match self
            .proximity
            .reach(sender, recipient, self.proximity.default_radius())
        {
            Reach::Within(distance) => {
                tracing::debug!(
                    "{} is {:.2}m from {}, trying direct delivery",
                    recipient,
                    distance,
                    sender
                );
                match self
                    .courier
                    .receive_message(&target.endpoint, sender, body)
                    .await
                {
                    Ok(true) => {
                        tracing::info!("Message from {} delivered to {}", sender, recipient);
                        return SendOutcome::new(SendStatus::DeliveredDirect);
                    }
                    Ok(false) => {
                        tracing::warn!("{} rejected message from {}, queueing", recipient, sender);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Direct delivery to {} at {} failed: {}, queueing",
                            recipient,
                            target.endpoint,
                            e
                        );
                    }
                }
            }
            Reach::Beyond(distance) => {
                tracing::debug!(
                    "{} is {:.2}m from {}, out of range",
                    recipient,
                    distance,
                    sender
                );
            }
            Reach::UnknownFrom | Reach::UnknownTo => {
                tracing::debug!("Cannot locate {} or {}, queueing", sender, recipient);
            }
        }

        self.queue(sender, recipient, body).await
    }

    async fn queue(&self, sender: &str, recipient: &str, body: &str) -> SendOutcome {
        match self.store.store(sender, recipient, body).await {
            Ok(_) => SendOutcome::new(SendStatus::Queued),
            Err(e) => {
                tracing::error!(
                    "Message from {} to {} could not be queued: {}",
                    sender,
                    recipient,
                    e
                );
                SendOutcome::new(SendStatus::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Location;
    use crate::offline::{MemoryBroker, StoreSettings};
    use crate::presence::{Endpoint, PresenceRegistry};
    use crate::proximity::DEFAULT_RADIUS;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// 记录所有直连调用，按预设结果应答
    struct RecordingCourier {
        reply: Option<bool>,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingCourier {
        fn replying(reply: Option<bool>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Courier for RecordingCourier {
        async fn receive_message(
            &self,
            endpoint: &Endpoint,
            sender: &str,
            body: &str,
        ) -> Result<bool, DeliveryError> {
            self.calls
                .lock()
                .push((endpoint.to_string(), sender.to_string(), body.to_string()));
            match self.reply {
                Some(accepted) => Ok(accepted),
                None => Err(DeliveryError::InvalidEndpoint(endpoint.to_string())),
            }
        }
    }

    struct Fixture {
        broker: MemoryBroker,
        proximity: ProximityEngine,
        store: Arc<OfflineMessageStore>,
        courier: Arc<RecordingCourier>,
        router: DeliveryRouter,
    }

    async fn fixture(reply: Option<bool>) -> Fixture {
        let broker = MemoryBroker::new();
        let proximity = ProximityEngine::new(Arc::new(PresenceRegistry::new()), DEFAULT_RADIUS);
        let store = Arc::new(
            OfflineMessageStore::connect(
                Arc::new(broker.clone()),
                StoreSettings::default(),
                proximity.clone(),
            )
            .await
            .unwrap(),
        );
        let courier = RecordingCourier::replying(reply);
        let router = DeliveryRouter::new(proximity.clone(), store.clone(), courier.clone());
        Fixture {
            broker,
            proximity,
            store,
            courier,
            router,
        }
    }

    fn register(f: &Fixture, name: &str, lat: f64, lon: f64) {
        f.proximity.registry().register(
            name,
            Location::new(lat, lon),
            Endpoint::new(format!("http://{name}.local")),
        );
    }

    #[tokio::test]
    async fn unknown_recipient_is_reported() {
        let f = fixture(Some(true)).await;
        register(&f, "alice", 0.0, 0.0);
        let outcome = f.router.send("alice", "ghost", "hi").await;
        assert_eq!(
            outcome,
            SendOutcome {
                ok: false,
                status: SendStatus::RecipientUnknown
            }
        );
        assert!(f.courier.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn nearby_recipient_gets_direct_delivery() {
        let f = fixture(Some(true)).await;
        register(&f, "alice", 0.0, 0.0);
        register(&f, "bob", 0.0, 0.0001);

        let outcome = f.router.send("alice", "bob", "hello").await;
        assert_eq!(outcome.status, SendStatus::DeliveredDirect);
        assert!(outcome.ok);
        assert_eq!(
            f.courier.calls.lock().clone(),
            vec![(
                "http://bob.local".to_string(),
                "alice".to_string(),
                "hello".to_string()
            )]
        );
        assert_eq!(f.broker.queue_len("offline_messages.bob"), 0);
        assert!(f.store.fetch_all("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn far_recipient_is_queued_without_direct_attempt() {
        let f = fixture(Some(true)).await;
        register(&f, "alice", 0.0, 0.0);
        register(&f, "bob", 0.0, 0.01);

        let outcome = f.router.send("alice", "bob", "later").await;
        assert_eq!(
            outcome,
            SendOutcome {
                ok: true,
                status: SendStatus::Queued
            }
        );
        assert!(f.courier.calls.lock().is_empty());
        assert_eq!(f.broker.queue_len("offline_messages.bob"), 1);

        // 仍在范围外时拉取不到，靠近后恰好拿到一条
        assert!(f.store.fetch_all("bob").await.unwrap().is_empty());
        assert_eq!(f.broker.queue_len("offline_messages.bob"), 1);
        f.proximity
            .registry()
            .update_location("bob", Location::new(0.0, 0.0));
        let messages = f.store.fetch_all("bob").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "alice");
        assert_eq!(messages[0].body, "later");
    }

    #[tokio::test]
    async fn failed_direct_delivery_falls_back_to_queue() {
        for reply in [None, Some(false)] {
            let f = fixture(reply).await;
            register(&f, "alice", 0.0, 0.0);
            register(&f, "bob", 0.0, 0.0);

            let outcome = f.router.send("alice", "bob", "fallback").await;
            assert_eq!(outcome.status, SendStatus::Queued);
            assert!(outcome.ok);
            assert_eq!(f.courier.calls.lock().len(), 1);
            assert_eq!(f.broker.queue_len("offline_messages.bob"), 1);
        }
    }

    #[tokio::test]
    async fn unregistered_sender_is_queued() {
        let f = fixture(Some(true)).await;
        register(&f, "bob", 0.0, 0.0);
        let outcome = f.router.send("stranger", "bob", "hey").await;
        assert_eq!(outcome.status, SendStatus::Queued);
        assert!(f.courier.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn broker_outage_reports_failure() {
        let f = fixture(None).await;
        register(&f, "alice", 0.0, 0.0);
        register(&f, "bob", 0.0, 0.0);
        register(&f, "carol", 0.0, 0.01);
        f.broker.set_available(false);

        let direct_failed = f.router.send("alice", "bob", "x").await;
        assert_eq!(
            direct_failed,
            SendOutcome {
                ok: false,
                status: SendStatus::Failed
            }
        );
        let far = f.router.send("alice", "carol", "y").await;
        assert_eq!(far.status, SendStatus::Failed);
        assert!(!far.ok);
    }

    #[test]
    fn status_serializes_in_upper_snake_case() {
        let json = serde_json::to_string(&SendOutcome::new(SendStatus::DeliveredDirect)).unwrap();
        assert_eq!(json, r#"{"ok":true,"status":"DELIVERED_DIRECT"}"#);
    }
}
