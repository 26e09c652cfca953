// ── Domain model ──
//
// Canonical node, user and rule types the reconciliation engine works
// with. Wire types from `panelsync-api` are converted into these in
// `convert.rs`.

pub mod node;
pub mod rule;
pub mod user;

// ── Re-exports ──────────────────────────────────────────────────────

pub use node::{
    NodeInfo, NodeType, ProtocolSettings, ShadowsocksSettings, Tag, TrojanSettings,
    V2raySettings,
};
pub use rule::{DetectResult, DetectRule};
pub use user::{UserInfo, UserIp, UserTraffic};
