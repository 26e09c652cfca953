// ── API-to-domain type conversions ──
//
// Bridges raw `panelsync_api::models` wire types into the domain model and
// back for the upstream reports. Speeds arrive in Mbps and leave here in
// bytes per second.

use regex::Regex;

use panelsync_api::models::{
    IllegalEntry, NodeInfoResponse, OnlineIpEntry, RuleEntry, TrafficEntry, UserEntry,
};

use crate::error::CoreError;
use crate::model::{
    DetectResult, DetectRule, NodeInfo, NodeType, ProtocolSettings, ShadowsocksSettings,
    TrojanSettings, UserInfo, UserIp, UserTraffic, V2raySettings,
};

// ── Helpers ────────────────────────────────────────────────────────

/// Mbps as sent by the panel to bytes per second.
pub fn mbps_to_bytes(mbps: u64) -> u64 {
    mbps.saturating_mul(1_000_000) / 8
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.is_empty())
}

// ── Node ───────────────────────────────────────────────────────────

impl TryFrom<NodeInfoResponse> for NodeInfo {
    type Error = CoreError;

    fn try_from(raw: NodeInfoResponse) -> Result<Self, Self::Error> {
        let node_type: NodeType =
            raw.node_type
                .parse()
                .map_err(|_| CoreError::UnsupportedNodeType {
                    node_type: raw.node_type.clone(),
                })?;

        let protocol = match node_type {
            NodeType::V2ray => ProtocolSettings::V2ray(V2raySettings {
                enable_vless: raw.enable_vless,
                alter_id: raw.alter_id,
                network: non_empty(raw.network).unwrap_or_else(|| "tcp".into()),
                path: non_empty(raw.path),
                host: non_empty(raw.host),
                service_name: non_empty(raw.service_name),
            }),
            NodeType::Trojan => ProtocolSettings::Trojan(TrojanSettings {
                host: non_empty(raw.host),
            }),
            NodeType::Shadowsocks => {
                let cipher =
                    non_empty(raw.cipher).ok_or_else(|| CoreError::InvalidNodeInfo {
                        message: format!("node {} has no cipher", raw.node_id),
                    })?;
                ProtocolSettings::Shadowsocks(ShadowsocksSettings {
                    cipher,
                    server_key: non_empty(raw.server_key),
                })
            }
        };

        if raw.port == 0 {
            return Err(CoreError::InvalidNodeInfo {
                message: format!("node {} has no port", raw.node_id),
            });
        }

        Ok(NodeInfo {
            node_id: raw.node_id,
            port: raw.port,
            speed_limit: mbps_to_bytes(raw.speed_limit),
            device_limit: raw.device_limit,
            enable_tls: raw.enable_tls,
            protocol,
        })
    }
}

// ── Users ──────────────────────────────────────────────────────────

impl From<UserEntry> for UserInfo {
    fn from(raw: UserEntry) -> Self {
        Self {
            uid: raw.uid,
            email: raw.email,
            uuid: non_empty(raw.uuid),
            password: non_empty(raw.password),
            alter_id: raw.alter_id,
            speed_limit: mbps_to_bytes(raw.speed_limit),
            device_limit: raw.device_limit,
        }
    }
}

// ── Rules ──────────────────────────────────────────────────────────

impl TryFrom<RuleEntry> for DetectRule {
    type Error = CoreError;

    fn try_from(raw: RuleEntry) -> Result<Self, Self::Error> {
        let pattern = Regex::new(&raw.pattern).map_err(|e| CoreError::InvalidRule {
            id: raw.id,
            message: e.to_string(),
        })?;
        Ok(DetectRule::new(raw.id, pattern))
    }
}

// ── Reports ────────────────────────────────────────────────────────

impl From<&UserTraffic> for TrafficEntry {
    fn from(t: &UserTraffic) -> Self {
        Self {
            uid: t.uid,
            upload: t.upload,
            download: t.download,
        }
    }
}

impl From<&DetectResult> for IllegalEntry {
    fn from(r: &DetectResult) -> Self {
        Self {
            uid: r.uid,
            rule_id: r.rule_id,
        }
    }
}

impl From<&UserIp> for OnlineIpEntry {
    fn from(ip: &UserIp) -> Self {
        Self {
            uid: ip.uid,
            ips: ip.ips.clone(),
        }
    }
}

impl From<OnlineIpEntry> for UserIp {
    fn from(raw: OnlineIpEntry) -> Self {
        Self {
            uid: raw.uid,
            ips: raw.ips,
        }
    }
}
