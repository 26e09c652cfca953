// Shared fakes for node controller tests: a scripted panel and an engine
// that records every call while delegating state to `LocalEngine`.

#![allow(clippy::unwrap_used, dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;

use panelsync_core::engine::{InboundSpec, OutboundSpec};
use panelsync_core::model::{ShadowsocksSettings, V2raySettings};
use panelsync_core::{
    CertRenewer, CoreError, DetectResult, DetectRule, EngineUser, Limiter, LocalEngine,
    NodeConfig, NodeContext, NodeController, NodeInfo, NodeRules, NoopRenewer, PanelApi,
    ProtocolSettings, ProxyEngine, RuleStore, Tag, UserInfo, UserTraffic,
};

// ── Scripted panel ──────────────────────────────────────────────────

#[derive(Default)]
pub struct PanelState {
    pub node_info: Mutex<Option<NodeInfo>>,
    pub users: Mutex<Option<Vec<UserInfo>>>,
    /// When set, each user fetch pops the front list instead of `users`.
    pub user_script: Mutex<Vec<Vec<UserInfo>>>,
    pub rules: Mutex<Option<NodeRules>>,
    pub traffic_reports: Mutex<Vec<Vec<UserTraffic>>>,
    pub illegal_reports: Mutex<Vec<Vec<DetectResult>>>,
    pub fail_reports: Mutex<bool>,
    pub node_info_calls: AtomicUsize,
    pub user_list_calls: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct ScriptedPanel {
    pub state: Arc<PanelState>,
}

fn offline() -> CoreError {
    CoreError::PanelUnreachable {
        url: "http://panel.test".into(),
        reason: "connection refused".into(),
    }
}

impl ScriptedPanel {
    pub fn new(info: NodeInfo, users: Vec<UserInfo>) -> Self {
        let panel = Self::default();
        panel.set_node_info(Some(info));
        panel.set_users(Some(users));
        panel.set_rules(Some(NodeRules::default()));
        panel
    }

    pub fn set_node_info(&self, info: Option<NodeInfo>) {
        *self.state.node_info.lock().unwrap() = info;
    }

    pub fn set_users(&self, users: Option<Vec<UserInfo>>) {
        *self.state.users.lock().unwrap() = users;
    }

    pub fn script_users(&self, script: Vec<Vec<UserInfo>>) {
        *self.state.user_script.lock().unwrap() = script;
    }

    pub fn set_rules(&self, rules: Option<NodeRules>) {
        *self.state.rules.lock().unwrap() = rules;
    }

    pub fn fail_reports(&self, fail: bool) {
        *self.state.fail_reports.lock().unwrap() = fail;
    }

    pub fn traffic_reports(&self) -> Vec<Vec<UserTraffic>> {
        self.state.traffic_reports.lock().unwrap().clone()
    }

    pub fn illegal_reports(&self) -> Vec<Vec<DetectResult>> {
        self.state.illegal_reports.lock().unwrap().clone()
    }

    pub fn node_info_calls(&self) -> usize {
        self.state.node_info_calls.load(Ordering::SeqCst)
    }
}

impl PanelApi for ScriptedPanel {
    async fn get_node_info(&self) -> Result<NodeInfo, CoreError> {
        self.state.node_info_calls.fetch_add(1, Ordering::SeqCst);
        self.state.node_info.lock().unwrap().clone().ok_or_else(offline)
    }

    async fn get_user_list(&self) -> Result<Vec<UserInfo>, CoreError> {
        self.state.user_list_calls.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent ticks interleave.
        tokio::task::yield_now().await;
        {
            let mut script = self.state.user_script.lock().unwrap();
            if !script.is_empty() {
                return Ok(script.remove(0));
            }
        }
        self.state.users.lock().unwrap().clone().ok_or_else(offline)
    }

    async fn get_node_rule(&self) -> Result<NodeRules, CoreError> {
        self.state.rules.lock().unwrap().clone().ok_or_else(offline)
    }

    async fn report_user_traffic(&self, traffic: &[UserTraffic]) -> Result<(), CoreError> {
        if *self.state.fail_reports.lock().unwrap() {
            return Err(offline());
        }
        self.state.traffic_reports.lock().unwrap().push(traffic.to_vec());
        Ok(())
    }

    async fn report_illegal(&self, results: &[DetectResult]) -> Result<(), CoreError> {
        if *self.state.fail_reports.lock().unwrap() {
            return Err(offline());
        }
        self.state.illegal_reports.lock().unwrap().push(results.to_vec());
        Ok(())
    }
}

// ── Recording engine ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    AddInbound(String),
    RemoveInbound(String),
    AddOutbound(String),
    RemoveOutbound(String),
    AddUsers(String, Vec<String>),
    RemoveUsers(String, Vec<String>),
}

pub struct RecordingEngine {
    pub local: LocalEngine,
    pub calls: Mutex<Vec<EngineCall>>,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ProxyEngine for RecordingEngine {
    fn add_inbound(&self, spec: &InboundSpec) -> Result<(), CoreError> {
        self.record(EngineCall::AddInbound(spec.tag.to_string()));
        self.local.add_inbound(spec)
    }

    fn remove_inbound(&self, tag: &Tag) -> Result<(), CoreError> {
        self.record(EngineCall::RemoveInbound(tag.to_string()));
        self.local.remove_inbound(tag)
    }

    fn add_outbound(&self, spec: &OutboundSpec) -> Result<(), CoreError> {
        self.record(EngineCall::AddOutbound(spec.tag.to_string()));
        self.local.add_outbound(spec)
    }

    fn remove_outbound(&self, tag: &Tag) -> Result<(), CoreError> {
        self.record(EngineCall::RemoveOutbound(tag.to_string()));
        self.local.remove_outbound(tag)
    }

    fn add_users(&self, users: &[EngineUser], tag: &Tag) -> Result<(), CoreError> {
        let mut tags: Vec<String> = users.iter().map(|u| u.tag.clone()).collect();
        tags.sort();
        self.record(EngineCall::AddUsers(tag.to_string(), tags));
        self.local.add_users(users, tag)
    }

    fn remove_users(&self, user_tags: &[String], tag: &Tag) -> Result<(), CoreError> {
        let mut tags = user_tags.to_vec();
        tags.sort();
        self.record(EngineCall::RemoveUsers(tag.to_string(), tags));
        self.local.remove_users(user_tags, tag)
    }

    fn user_traffic(&self, user_tag: &str, reset: bool) -> (u64, u64) {
        self.local.user_traffic(user_tag, reset)
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn ss_node(cipher: &str) -> NodeInfo {
    NodeInfo {
        node_id: 1,
        port: 8388,
        speed_limit: 0,
        device_limit: 0,
        enable_tls: false,
        protocol: ProtocolSettings::Shadowsocks(ShadowsocksSettings {
            cipher: cipher.into(),
            server_key: None,
        }),
    }
}

pub fn vmess_node() -> NodeInfo {
    NodeInfo {
        node_id: 1,
        port: 10086,
        speed_limit: 0,
        device_limit: 0,
        enable_tls: false,
        protocol: ProtocolSettings::V2ray(V2raySettings {
            network: "tcp".into(),
            ..V2raySettings::default()
        }),
    }
}

pub fn vmess_user(email: &str, uid: u32, uuid: &str) -> UserInfo {
    UserInfo {
        uid,
        email: email.into(),
        uuid: Some(uuid.into()),
        ..UserInfo::default()
    }
}

pub fn user(email: &str, uid: u32) -> UserInfo {
    UserInfo {
        uid,
        email: email.into(),
        password: Some(format!("pw-{uid}")),
        ..UserInfo::default()
    }
}

pub fn rule(id: i64, pattern: &str) -> DetectRule {
    DetectRule::new(id, Regex::new(pattern).unwrap())
}

pub fn quiet_config() -> NodeConfig {
    NodeConfig {
        update_periodic: Duration::from_secs(3600),
        ..NodeConfig::default()
    }
}

pub struct Harness {
    pub controller: NodeController<ScriptedPanel>,
    pub panel: ScriptedPanel,
    pub engine: Arc<RecordingEngine>,
    pub limiter: Arc<Limiter>,
    pub rules: Arc<RuleStore>,
}

impl Harness {
    pub fn new(config: NodeConfig, panel: ScriptedPanel) -> Self {
        Self::with_renewer(config, panel, Arc::new(NoopRenewer))
    }

    pub fn with_renewer(
        config: NodeConfig,
        panel: ScriptedPanel,
        renewer: Arc<dyn CertRenewer>,
    ) -> Self {
        let limiter = Arc::new(Limiter::new());
        let rules = Arc::new(RuleStore::new());
        let engine = Arc::new(RecordingEngine {
            local: LocalEngine::new(Arc::clone(&limiter), Arc::clone(&rules)),
            calls: Mutex::new(Vec::new()),
        });
        let ctx = NodeContext::new(
            Arc::clone(&engine) as Arc<dyn ProxyEngine>,
            Arc::clone(&limiter),
            Arc::clone(&rules),
        )
        .with_renewer(renewer);
        let controller = NodeController::new(config, panel.clone(), ctx).unwrap();
        Self {
            controller,
            panel,
            engine,
            limiter,
            rules,
        }
    }

    pub fn tag(&self) -> Tag {
        self.controller.tag().unwrap()
    }
}
