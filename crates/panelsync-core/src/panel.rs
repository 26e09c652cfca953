// ── Panel boundary ──
//
// `PanelApi` is what a node controller consumes. `HttpPanel` implements it
// on top of `panelsync_api::PanelClient`, converting wire types and
// layering on the operator's local overrides and rule list.

use std::future::Future;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use panelsync_api::PanelClient;
use panelsync_api::models::{IllegalEntry, TrafficEntry};

use crate::convert::mbps_to_bytes;
use crate::error::CoreError;
use crate::model::{DetectResult, DetectRule, NodeInfo, ProtocolSettings, UserInfo, UserTraffic};

/// Detection rules and forbidden protocols for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRules {
    pub detect: Vec<DetectRule>,
    pub protocols: Vec<String>,
}

/// The panel as seen by one node controller.
pub trait PanelApi: Send + Sync + 'static {
    fn get_node_info(&self) -> impl Future<Output = Result<NodeInfo, CoreError>> + Send;

    fn get_user_list(&self) -> impl Future<Output = Result<Vec<UserInfo>, CoreError>> + Send;

    fn get_node_rule(&self) -> impl Future<Output = Result<NodeRules, CoreError>> + Send;

    fn report_user_traffic(
        &self,
        traffic: &[UserTraffic],
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    fn report_illegal(
        &self,
        results: &[DetectResult],
    ) -> impl Future<Output = Result<(), CoreError>> + Send;
}

// ── Overrides ──────────────────────────────────────────────────────

/// Operator-side values that win over what the panel reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeOverrides {
    /// Mbps, `0` = keep the panel's value.
    pub speed_limit: u64,
    /// `0` = keep the panel's value.
    pub device_limit: u32,
    /// Force VLESS on V2ray nodes.
    pub enable_vless: bool,
}

impl NodeOverrides {
    fn apply(self, info: &mut NodeInfo) {
        if self.speed_limit > 0 {
            info.speed_limit = mbps_to_bytes(self.speed_limit);
        }
        if self.device_limit > 0 {
            info.device_limit = self.device_limit;
        }
        if self.enable_vless {
            if let ProtocolSettings::V2ray(v) = &mut info.protocol {
                v.enable_vless = true;
            }
        }
    }
}

// ── HttpPanel ──────────────────────────────────────────────────────

/// `PanelApi` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPanel {
    client: PanelClient,
    overrides: NodeOverrides,
    local_rules: Vec<DetectRule>,
}

impl HttpPanel {
    pub fn new(client: PanelClient) -> Self {
        Self {
            client,
            overrides: NodeOverrides::default(),
            local_rules: Vec::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: NodeOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Append the patterns in `path` after the panel's rules on every
    /// fetch. An unreadable file is logged and treated as empty.
    pub fn with_rule_list(mut self, path: &Path) -> Self {
        self.local_rules = match load_rule_list(path) {
            Ok(rules) => {
                debug!(path = %path.display(), count = rules.len(), "loaded local rule list");
                rules
            }
            Err(e) => {
                warn!(error = %e, "local rule list ignored");
                Vec::new()
            }
        };
        self
    }

    pub fn client(&self) -> &PanelClient {
        &self.client
    }
}

impl PanelApi for HttpPanel {
    async fn get_node_info(&self) -> Result<NodeInfo, CoreError> {
        let raw = self.client.get_node_info().await?;
        let mut info = NodeInfo::try_from(raw)?;
        self.overrides.apply(&mut info);
        Ok(info)
    }

    async fn get_user_list(&self) -> Result<Vec<UserInfo>, CoreError> {
        let raw = self.client.get_user_list().await?;
        Ok(raw.into_iter().map(UserInfo::from).collect())
    }

    async fn get_node_rule(&self) -> Result<NodeRules, CoreError> {
        let raw = self.client.get_node_rule().await?;

        let mut detect = Vec::with_capacity(raw.rules.len() + self.local_rules.len());
        for entry in raw.rules {
            match DetectRule::try_from(entry) {
                Ok(rule) => detect.push(rule),
                Err(e) => warn!(error = %e, "skipping panel rule"),
            }
        }
        detect.extend(self.local_rules.iter().cloned());

        Ok(NodeRules {
            detect,
            protocols: raw.protocols,
        })
    }

    async fn report_user_traffic(&self, traffic: &[UserTraffic]) -> Result<(), CoreError> {
        let entries: Vec<TrafficEntry> = traffic.iter().map(TrafficEntry::from).collect();
        self.client.report_user_traffic(&entries).await?;
        Ok(())
    }

    async fn report_illegal(&self, results: &[DetectResult]) -> Result<(), CoreError> {
        let entries: Vec<IllegalEntry> = results.iter().map(IllegalEntry::from).collect();
        self.client.report_illegal(&entries).await?;
        Ok(())
    }
}

// ── Local rule list ────────────────────────────────────────────────

/// Read one regex per line, skipping blanks and `#` comments.
///
/// Local rules get IDs `-1, -2, ...` in file order so they never collide
/// with panel IDs. Lines that fail to compile are skipped with a warning.
pub fn load_rule_list(path: &Path) -> Result<Vec<DetectRule>, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
        path: PathBuf::from(path),
        source,
    })?;
    Ok(parse_rule_list(&text))
}

fn parse_rule_list(text: &str) -> Vec<DetectRule> {
    let mut rules = Vec::new();
    let mut next_id: i64 = -1;
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Regex::new(line) {
            Ok(pattern) => {
                rules.push(DetectRule::new(next_id, pattern));
                next_id -= 1;
            }
            Err(e) => warn!(pattern = line, error = %e, "skipping local rule"),
        }
    }
    rules
}
