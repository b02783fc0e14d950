use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::Location;
use crate::presence::{Endpoint, PresenceRegistry};
use crate::utils::geo;

/// 默认的邻近半径（米）
pub const DEFAULT_RADIUS: f64 = 200.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyUser {
    pub username: String,
    pub location: Location,
    pub distance: f64,
    pub endpoint: Endpoint,
}

/// 两个用户之间的可达情况
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reach {
    UnknownFrom,
    UnknownTo,
    Within(f64),
    Beyond(f64),
}

#[derive(Debug, Clone)]
pub struct ProximityEngine {
    registry: Arc<PresenceRegistry>,
    radius: f64,
}

impl ProximityEngine {
    pub fn new(registry: Arc<PresenceRegistry>, radius: f64) -> Self {
        Self { registry, radius }
    }

    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    pub fn default_radius(&self) -> f64 {
        self.radius
    }

    /// 查询附近用户，按注册顺序返回。
    ///
    /// 查询本身也算一次活跃；用户不存在时返回空列表。
    pub fn nearby(&self, username: &str, radius: f64) -> Vec<NearbyUser> {
        let Some(me) = self.registry.lookup(username) else {
            tracing::debug!("Nearby query from unknown user {}", username);
            return Vec::new();
        };

        let nearby: Vec<NearbyUser> = self
            .registry
            .all_users()
            .into_iter()
            .filter(|(name, _)| name != username)
            .filter_map(|(name, other)| {
                let distance = geo::distance(&me.location, &other.location);
                (distance <= radius).then(|| NearbyUser {
                    username: name,
                    location: other.location,
                    distance,
                    endpoint: other.endpoint,
                })
            })
            .collect();

        self.registry.heartbeat(username);
        nearby
    }

    /// 计算 `from` 到 `to` 的距离并与半径比较
    pub fn reach(&self, from: &str, to: &str, radius: f64) -> Reach {
        let Some(from_user) = self.registry.lookup(from) else {
            return Reach::UnknownFrom;
        };
        let Some(to_user) = self.registry.lookup(to) else {
            return Reach::UnknownTo;
        };

        let distance = geo::distance(&from_user.location, &to_user.location);
        if distance <= radius {
            Reach::Within(distance)
        } else {
            Reach::Beyond(distance)
        }
    }

    /// 任意一方未注册都视为不在附近
    pub fn is_near(&self, a: &str, b: &str, radius: f64) -> bool {
        matches!(self.reach(a, b, radius), Reach::Within(_))
    }
}
