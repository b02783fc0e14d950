use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender: String,
    pub recipient: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OfflineMessagesRequest {
    pub username: String,
}
