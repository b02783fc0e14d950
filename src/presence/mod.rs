//! 在线用户登记表
//!
//! 保存每个在线用户的位置、最后活跃时间和直连投递地址。
//! 所有读写都经过同一把读写锁，遍历时返回快照，调用方拿不到内部引用。

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::common::Location;

/// 用户的直连投递地址（客户端注册时提供的基础 URL）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub location: Location,
    pub last_active: DateTime<Utc>,
    pub endpoint: Endpoint,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    // 保留插入顺序，附近用户按注册顺序返回
    users: RwLock<IndexMap<String, User>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册或覆盖用户，同名用户只保留一条
    pub fn register(&self, username: &str, location: Location, endpoint: Endpoint) {
        let user = User {
            username: username.to_string(),
            location,
            last_active: Utc::now(),
            endpoint,
        };
        self.users.write().insert(username.to_string(), user);
        tracing::info!("User {} registered at {:?}", username, location);
    }

    /// 更新位置，用户不存在时返回 false
    pub fn update_location(&self, username: &str, location: Location) -> bool {
        let mut users = self.users.write();
        match users.get_mut(username) {
            Some(user) => {
                user.location = location;
                user.last_active = Utc::now();
                tracing::debug!("Location of {} updated to {:?}", username, location);
                true
            }
            None => false,
        }
    }

    /// 只刷新最后活跃时间
    pub fn heartbeat(&self, username: &str) -> bool {
        let mut users = self.users.write();
        match users.get_mut(username) {
            Some(user) => {
                user.last_active = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, username: &str) -> Option<User> {
        self.users.read().get(username).cloned()
    }

    /// 当前时刻的快照，遍历期间其他调用方可以继续写入
    pub fn all_users(&self) -> Vec<(String, User)> {
        self.users
            .read()
            .iter()
            .map(|(name, user)| (name.clone(), user.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    /// 无条件移除
    pub fn evict(&self, username: &str) -> Option<User> {
        self.users.write().shift_remove(username)
    }

    /// 仅当用户在 `cutoff` 之前就不再活跃时才移除。
    ///
    /// 检查和删除在同一把写锁内完成，快照之后到达的心跳会让这次清理失效。
    pub fn evict_if_idle_since(&self, username: &str, cutoff: DateTime<Utc>) -> Option<User> {
        let mut users = self.users.write();
        let stale = users
            .get(username)
            .is_some_and(|user| user.last_active < cutoff);
        if stale {
            users.shift_remove(username)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_active(&self, username: &str, at: DateTime<Utc>) {
        if let Some(user) = self.users.write().get_mut(username) {
            user.last_active = at;
        }
    }
}
