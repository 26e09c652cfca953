// ── Runtime node configuration ──
//
// These types describe how one node controller behaves. They never touch
// disk: `panelsync-config` builds them from the on-disk file and hands
// them in.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

/// Default reconciliation interval.
pub const DEFAULT_UPDATE_PERIODIC: Duration = Duration::from_secs(60);

/// Default bound on one certificate renewal.
pub const DEFAULT_RENEW_TIMEOUT: Duration = Duration::from_secs(300);

/// How the node's TLS certificate is obtained.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CertMode {
    /// No TLS material is managed here.
    #[default]
    None,
    /// Certificate files are provisioned externally.
    File,
    /// ACME HTTP-01 challenge.
    Http,
    /// ACME DNS-01 challenge.
    Dns,
}

impl CertMode {
    /// Whether the periodic node-info tick should ask for a renewal.
    pub fn renews(self) -> bool {
        matches!(self, Self::Http | Self::Dns)
    }
}

/// Certificate settings for one node.
#[derive(Debug, Clone)]
pub struct CertConfig {
    pub mode: CertMode,
    pub domain: Option<String>,
    pub email: Option<String>,
    /// DNS provider name for `dns` mode.
    pub provider: Option<String>,
    /// Extra environment for the DNS provider.
    pub dns_env: BTreeMap<String, String>,
    /// A renewal still running after this long is abandoned.
    pub timeout: Duration,
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            mode: CertMode::None,
            domain: None,
            email: None,
            provider: None,
            dns_env: BTreeMap::new(),
            timeout: DEFAULT_RENEW_TIMEOUT,
        }
    }
}

/// Online-IP auditing endpoint settings.
#[derive(Debug, Clone)]
pub struct IpRecorderConfig {
    pub url: Url,
    pub token: SecretString,
    pub periodic: Duration,
    pub timeout: Duration,
}

/// Everything one `NodeController` needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen address; part of the node's tag.
    pub listen_ip: String,
    pub update_periodic: Duration,
    pub disable_get_rule: bool,
    pub disable_upload_traffic: bool,
    /// `Some` when online-IP recording is enabled.
    pub ip_recorder: Option<IpRecorderConfig>,
    pub cert: CertConfig,
    /// Re-register users whose credentials or limits changed in place.
    pub resync_changed_users: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".into(),
            update_periodic: DEFAULT_UPDATE_PERIODIC,
            disable_get_rule: false,
            disable_upload_traffic: false,
            ip_recorder: None,
            cert: CertConfig::default(),
            resync_changed_users: false,
        }
    }
}

impl NodeConfig {
    pub fn ip_recorder_enabled(&self) -> bool {
        self.ip_recorder.is_some()
    }
}
