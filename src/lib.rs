use std::sync::Arc;

use config::Config;
use delivery::{Courier, DeliveryRouter};
use offline::{Broker, OfflineMessageStore, StoreError};
use presence::PresenceRegistry;
use proximity::ProximityEngine;

pub mod common;
pub mod config;
pub mod delivery;
pub mod error;
pub mod middleware;
pub mod monitor;
pub mod offline;
pub mod presence;
pub mod proximity;
pub mod result;
pub mod utils;

pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<PresenceRegistry>,
    pub proximity: ProximityEngine,
    pub store: Arc<OfflineMessageStore>,
    pub delivery: Arc<DeliveryRouter>,
}

impl AppState {
    /// 组装各组件，离线存储连不上时返回错误
    pub async fn build(
        config: Config,
        broker: Arc<dyn Broker>,
        courier: Arc<dyn Courier>,
    ) -> Result<Self, StoreError> {
        let registry = Arc::new(PresenceRegistry::new());
        let proximity = ProximityEngine::new(registry.clone(), config.proximity_radius);
        let store = Arc::new(
            OfflineMessageStore::connect(broker, config.store_settings(), proximity.clone())
                .await?,
        );
        let delivery = Arc::new(DeliveryRouter::new(
            proximity.clone(),
            store.clone(),
            courier,
        ));

        Ok(Self {
            config,
            registry,
            proximity,
            store,
            delivery,
        })
    }
}
