// ── Users, traffic and online IPs ──

use serde::{Deserialize, Serialize};

use super::node::Tag;

/// One user allowed on a node.
///
/// Identity is `{email}|{uid}`; two records with the same identity are the
/// same user even when their credentials or limits differ.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: u32,
    pub email: String,
    pub uuid: Option<String>,
    pub password: Option<String>,
    pub alter_id: Option<i64>,
    /// Bytes per second, `0` = node default.
    pub speed_limit: u64,
    /// Concurrent devices, `0` = node default.
    pub device_limit: u32,
}

impl UserInfo {
    /// Stable identity key of this user within a node.
    pub fn identity(&self) -> String {
        format!("{}|{}", self.email, self.uid)
    }

    /// Name the engine knows this user by: `{tag}|{email}|{uid}`.
    pub fn engine_tag(&self, tag: &Tag) -> String {
        format!("{tag}|{}|{}", self.email, self.uid)
    }
}

/// Traffic accumulated by one user since the last report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTraffic {
    pub uid: u32,
    pub upload: u64,
    pub download: u64,
}

impl UserTraffic {
    pub fn is_zero(&self) -> bool {
        self.upload == 0 && self.download == 0
    }
}

/// Client IPs currently observed for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIp {
    pub uid: u32,
    pub ips: Vec<String>,
}
