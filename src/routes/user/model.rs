use serde::{Deserialize, Serialize};

use crate::common::Location;

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub location: Location,
    /// 客户端接收直连消息的基础地址
    pub endpoint: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateLocationRequest {
    pub username: String,
    pub location: Location,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub username: String,
    pub radius: Option<f64>,
}
