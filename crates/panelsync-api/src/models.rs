// Wire models for the panel and audit endpoints
//
// These mirror the JSON exactly as the remote sends it. Domain types live
// in `panelsync-core`, which converts from these.

use serde::{Deserialize, Serialize};

/// Panel response envelope: `{ "ret": 1, "msg": "...", "data": ... }`.
///
/// `ret == 1` means success; anything else carries an error in `msg`.
#[derive(Debug, Deserialize)]
pub struct PanelResponse<T> {
    pub ret: i32,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

/// Node description from `GET /api/v1/server/node`.
///
/// Protocol-specific fields are flat on the wire; which of them matter
/// depends on `node_type`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfoResponse {
    pub node_type: String,
    pub node_id: u32,
    pub port: u16,
    /// Node-wide speed cap in Mbps (0 = unlimited).
    #[serde(default)]
    pub speed_limit: u64,
    /// Node-wide concurrent device cap per user (0 = unlimited).
    #[serde(default)]
    pub device_limit: u32,
    #[serde(default)]
    pub enable_tls: bool,

    // V2ray
    #[serde(default)]
    pub enable_vless: bool,
    #[serde(default)]
    pub alter_id: u16,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,

    // Shadowsocks
    #[serde(default)]
    pub cipher: Option<String>,
    #[serde(default)]
    pub server_key: Option<String>,
}

/// One user from `GET /api/v1/server/users`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(rename = "id")]
    pub uid: u32,
    pub email: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub alter_id: Option<i64>,
    /// Per-user speed cap in Mbps (0 = node default).
    #[serde(default)]
    pub speed_limit: u64,
    /// Per-user device cap (0 = node default).
    #[serde(default)]
    pub device_limit: u32,
}

/// One detection rule from `GET /api/v1/server/rules`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub id: i64,
    pub pattern: String,
}

/// Rule payload: destination patterns plus forbidden protocol names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResponse {
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    #[serde(default)]
    pub protocols: Vec<String>,
}

/// One element of the `POST /api/v1/server/traffic` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficEntry {
    #[serde(rename = "user_id")]
    pub uid: u32,
    #[serde(rename = "u")]
    pub upload: u64,
    #[serde(rename = "d")]
    pub download: u64,
}

/// One element of the `POST /api/v1/server/illegal` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IllegalEntry {
    #[serde(rename = "user_id")]
    pub uid: u32,
    #[serde(rename = "list_id")]
    pub rule_id: i64,
}

/// Online IPs of one user, the body and response element of
/// `POST /api/v1/SyncOnlineIp`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineIpEntry {
    pub uid: u32,
    #[serde(default)]
    pub ips: Vec<String>,
}
