use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 持久化到队列里的离线消息
///
/// 线上格式固定为 `{sender, recipient, message, timestamp}`，
/// 解析时忽略多余字段；`id` 供客户端对重复投递去重，缺失时为空。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender: String,
    pub recipient: String,
    #[serde(rename = "message")]
    pub body: String,
    /// ISO-8601 时间
    pub timestamp: String,
}

impl PendingMessage {
    pub fn new(sender: &str, recipient: &str, body: &str) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            body: body.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}
