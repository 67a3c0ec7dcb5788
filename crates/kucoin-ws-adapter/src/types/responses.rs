/*
[INPUT]:  KuCoin REST response schema
[OUTPUT]: Typed bullet (bootstrap token) response
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When API schema changes or new types added
*/

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletResponse {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub data: Option<BulletData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletData {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceServer {
    pub endpoint: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub encrypt: bool,
    /// Milliseconds.
    pub ping_interval: u64,
    /// Milliseconds.
    #[serde(default)]
    pub ping_timeout: u64,
}
