// ── Node identity and protocol settings ──

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Protocol family a node serves.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum NodeType {
    V2ray,
    Trojan,
    Shadowsocks,
}

/// V2ray (VMess / VLESS) transport settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V2raySettings {
    pub enable_vless: bool,
    pub alter_id: u16,
    /// Transport network: `tcp`, `ws`, `grpc`, ...
    pub network: String,
    pub path: Option<String>,
    pub host: Option<String>,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrojanSettings {
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowsocksSettings {
    pub cipher: String,
    /// Server-side key for 2022-style ciphers.
    pub server_key: Option<String>,
}

/// Protocol-specific part of a node's description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolSettings {
    V2ray(V2raySettings),
    Trojan(TrojanSettings),
    Shadowsocks(ShadowsocksSettings),
}

impl ProtocolSettings {
    /// The node type these settings belong to.
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::V2ray(_) => NodeType::V2ray,
            Self::Trojan(_) => NodeType::Trojan,
            Self::Shadowsocks(_) => NodeType::Shadowsocks,
        }
    }
}

/// Immutable snapshot of one node as the panel describes it.
///
/// Limits are already normalized: speeds in bytes per second, `0` meaning
/// unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: u32,
    pub port: u16,
    pub speed_limit: u64,
    pub device_limit: u32,
    pub enable_tls: bool,
    pub protocol: ProtocolSettings,
}

impl NodeInfo {
    pub fn node_type(&self) -> NodeType {
        self.protocol.node_type()
    }

    /// Whether moving from `self` to `next` requires tearing down and
    /// re-registering the inbound, outbound and limiter.
    ///
    /// The whole description is compared, not just the protocol settings.
    /// The listening port, the speed and device caps and the TLS flag are
    /// baked into the inbound and the limiter at registration, so a change
    /// to any of them needs a fresh registration too.
    pub fn needs_rebuild(&self, next: &NodeInfo) -> bool {
        self != next
    }
}

// ── Tag ─────────────────────────────────────────────────────────────

/// Identity of one node's inbound, outbound, limiter and rule entry.
///
/// Format: `{node_type}_{listen_ip}_{node_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag(String);

impl Tag {
    pub fn new(node_type: NodeType, listen_ip: &str, node_id: u32) -> Self {
        Self(format!("{node_type}_{listen_ip}_{node_id}"))
    }

    /// Tag for a node as seen from `listen_ip`.
    pub fn for_node(info: &NodeInfo, listen_ip: &str) -> Self {
        Self::new(info.node_type(), listen_ip, info.node_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
