use std::env;
use std::time::Duration;

use crate::offline::{RetryPolicy, StoreSettings};
use crate::proximity::DEFAULT_RADIUS;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub broker_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub proximity_radius: f64,
    pub inactivity_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub store_retry_attempts: u32,
    pub store_retry_delay_secs: u64,
    pub delivery_timeout_secs: u64,
    pub offline_exchange: String,
    pub offline_base_queue: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: "redis://127.0.0.1:6379".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            api_base_uri: "/api".to_string(),
            proximity_radius: DEFAULT_RADIUS,
            inactivity_timeout_secs: 300,
            sweep_interval_secs: 60,
            store_retry_attempts: 3,
            store_retry_delay_secs: 2,
            delivery_timeout_secs: 5,
            offline_exchange: "offline_exchange".to_string(),
            offline_base_queue: "offline_messages".to_string(),
        }
    }
}

// 可选配置，缺失或无法解析时使用默认值
fn optional<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        Ok(Config {
            broker_url: env::var("BROKER_URL")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(defaults.server_port),
            api_base_uri: optional("API_BASE_URI", defaults.api_base_uri),
            proximity_radius: optional("PROXIMITY_RADIUS", defaults.proximity_radius),
            inactivity_timeout_secs: optional(
                "INACTIVITY_TIMEOUT",
                defaults.inactivity_timeout_secs,
            ),
            sweep_interval_secs: optional("SWEEP_INTERVAL", defaults.sweep_interval_secs),
            store_retry_attempts: optional("STORE_RETRY_ATTEMPTS", defaults.store_retry_attempts),
            store_retry_delay_secs: optional("STORE_RETRY_DELAY", defaults.store_retry_delay_secs),
            delivery_timeout_secs: optional("DELIVERY_TIMEOUT", defaults.delivery_timeout_secs),
            offline_exchange: optional("OFFLINE_EXCHANGE", defaults.offline_exchange),
            offline_base_queue: optional("OFFLINE_BASE_QUEUE", defaults.offline_base_queue),
        })
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            exchange: self.offline_exchange.clone(),
            base_queue: self.offline_base_queue.clone(),
            retry: RetryPolicy::new(
                self.store_retry_attempts,
                Duration::from_secs(self.store_retry_delay_secs),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_policy() {
        let config = Config::default();
        assert_eq!(config.proximity_radius, 200.0);
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(300));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));

        let settings = config.store_settings();
        assert_eq!(settings.retry.attempts, 3);
        assert_eq!(settings.retry.delay, Duration::from_secs(2));
        assert_eq!(settings.exchange, "offline_exchange");
        assert_eq!(settings.base_queue, "offline_messages");
    }

    #[test]
    fn optional_falls_back_when_unset() {
        assert_eq!(optional("PROXIMITY_CHAT_TEST_UNSET_KEY", 42u64), 42);
    }
}
