// ── Proxy engine boundary ──
//
// The node controller drives the dataplane only through `ProxyEngine`.
// `builder` maps domain records into the specs handed across it and
// `LocalEngine` is the in-process registry implementation.

pub mod builder;
pub mod local;

use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{ProtocolSettings, Tag};

pub use local::{Connection, LocalEngine, Verdict};

/// Inbound handler description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSpec {
    pub tag: Tag,
    pub listen_ip: String,
    pub port: u16,
    pub enable_tls: bool,
    pub protocol: ProtocolSettings,
}

/// Outbound handler description. Every node gets one direct outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSpec {
    pub tag: Tag,
    /// Source address for outgoing connections, when not the wildcard.
    pub send_through: Option<String>,
}

/// Protocol credential of one engine user.
#[derive(Clone, PartialEq, Eq)]
pub enum Account {
    Vmess { id: Uuid, alter_id: u16 },
    Vless { id: Uuid },
    Trojan { password: String },
    Shadowsocks { cipher: String, password: String },
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vmess { alter_id, .. } => f
                .debug_struct("Vmess")
                .field("alter_id", alter_id)
                .finish_non_exhaustive(),
            Self::Vless { .. } => f.debug_struct("Vless").finish_non_exhaustive(),
            Self::Trojan { .. } => f.debug_struct("Trojan").finish_non_exhaustive(),
            Self::Shadowsocks { cipher, .. } => f
                .debug_struct("Shadowsocks")
                .field("cipher", cipher)
                .finish_non_exhaustive(),
        }
    }
}

/// A user as registered in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineUser {
    /// `{tag}|{email}|{uid}`
    pub tag: String,
    pub uid: u32,
    pub email: String,
    pub account: Account,
}

/// Operations the node controller needs from the dataplane.
///
/// Implementations must be safe to call from several node controllers at
/// once; every call names the tag it applies to.
pub trait ProxyEngine: Send + Sync {
    fn add_inbound(&self, spec: &InboundSpec) -> Result<(), CoreError>;

    fn remove_inbound(&self, tag: &Tag) -> Result<(), CoreError>;

    fn add_outbound(&self, spec: &OutboundSpec) -> Result<(), CoreError>;

    fn remove_outbound(&self, tag: &Tag) -> Result<(), CoreError>;

    fn add_users(&self, users: &[EngineUser], tag: &Tag) -> Result<(), CoreError>;

    /// Remove users by engine user tag.
    fn remove_users(&self, user_tags: &[String], tag: &Tag) -> Result<(), CoreError>;

    /// Traffic counters of one user as `(upload, download)`, zeroing them
    /// when `reset` is set.
    fn user_traffic(&self, user_tag: &str, reset: bool) -> (u64, u64);
}
