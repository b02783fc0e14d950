use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::presence::Endpoint;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("endpoint {0} is not a valid url")]
    InvalidEndpoint(String),
}

/// 客户端 `receive_message` 的请求体
#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiveMessageRequest {
    pub sender: String,
    pub message: String,
}

/// 调用对端的 `receive_message(sender, body) -> bool`
#[async_trait]
pub trait Courier: Send + Sync {
    async fn receive_message(
        &self,
        endpoint: &Endpoint,
        sender: &str,
        body: &str,
    ) -> Result<bool, DeliveryError>;
}

/// 通过 HTTP POST `{endpoint}/receive_message` 直连投递，超时即视为失败
pub struct HttpCourier {
    client: reqwest::Client,
}

impl HttpCourier {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

pub fn receive_url(endpoint: &Endpoint) -> Result<reqwest::Url, DeliveryError> {
    let base = endpoint.as_str().trim_end_matches('/');
    reqwest::Url::parse(&format!("{}/receive_message", base))
        .map_err(|_| DeliveryError::InvalidEndpoint(endpoint.to_string()))
}

#[async_trait]
impl Courier for HttpCourier {
    async fn receive_message(
        &self,
        endpoint: &Endpoint,
        sender: &str,
        body: &str,
    ) -> Result<bool, DeliveryError> {
        let url = receive_url(endpoint)?;
        let accepted = self
            .client
            .post(url)
            .json(&ReceiveMessageRequest {
                sender: sender.to_string(),
                message: body.to_string(),
            })
            .send()
            .await?
            .error_for_status()?
            .json::<bool>()
            .await?;
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_url_appends_path() {
        let url = receive_url(&Endpoint::new("http://10.0.0.5:9000/")).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5:9000/receive_message");
        let url = receive_url(&Endpoint::new("http://host/client")).unwrap();
        assert_eq!(url.as_str(), "http://host/client/receive_message");
        assert!(receive_url(&Endpoint::new("not a url")).is_err());
    }

    #[tokio::test]
    async fn silent_endpoint_times_out() {
        // 只监听不应答，请求必然超时
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let courier = HttpCourier::new(Duration::from_millis(200)).unwrap();

        let result = courier
            .receive_message(&Endpoint::new(format!("http://{addr}")), "alice", "hi")
            .await;
        assert!(result.is_err());
        drop(listener);
    }
}
