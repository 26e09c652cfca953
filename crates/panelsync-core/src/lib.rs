// panelsync-core: Reconciliation engine between the panel and the proxy engine.

pub mod cert;
pub mod config;
pub mod controller;
pub mod convert;
pub mod diff;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod model;
pub mod panel;
pub mod rule;
pub mod task;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cert::{CertRenewer, NoopRenewer};
pub use config::{CertConfig, CertMode, IpRecorderConfig, NodeConfig};
pub use controller::{ControllerState, NodeContext, NodeController, NodeSnapshot};
pub use diff::{UserDiff, diff_users};
pub use engine::{Connection, EngineUser, LocalEngine, ProxyEngine, Verdict};
pub use error::CoreError;
pub use limiter::Limiter;
pub use panel::{HttpPanel, NodeOverrides, NodeRules, PanelApi};
pub use rule::RuleStore;
pub use task::Periodic;

pub use model::{
    DetectResult, DetectRule, NodeInfo, NodeType, ProtocolSettings, Tag, UserInfo, UserIp,
    UserTraffic,
};
