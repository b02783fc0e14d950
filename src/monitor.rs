use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::presence::PresenceRegistry;

/// 定期清理长时间不活跃的用户
///
/// 清理不可撤销，被清理的客户端需要重新注册；持有其投递地址的对端不会收到通知。
pub struct InactivityMonitor {
    registry: Arc<PresenceRegistry>,
    timeout: Duration,
    interval: Duration,
}

impl InactivityMonitor {
    pub fn new(registry: Arc<PresenceRegistry>, timeout: Duration, interval: Duration) -> Self {
        Self {
            registry,
            timeout,
            interval,
        }
    }

    /// 以 `now` 为当前时间执行一轮清理，返回被移除的用户名
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(timeout).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut evicted = Vec::new();
        for (username, user) in self.registry.all_users() {
            if user.last_active >= cutoff {
                continue;
            }
            // 快照之后可能又收到心跳，删除前在锁内再确认一次
            if self.registry.evict_if_idle_since(&username, cutoff).is_some() {
                tracing::info!("Removing inactive user: {}", username);
                evicted.push(username);
            }
        }
        evicted
    }

    pub fn sweep(&self) -> Vec<String> {
        self.sweep_at(Utc::now())
    }

    /// 在后台按固定周期运行
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 第一次 tick 立即返回，跳过它
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = self.sweep();
                if !evicted.is_empty() {
                    tracing::debug!("Inactivity sweep removed {} users", evicted.len());
                }
            }
        })
    }
}
