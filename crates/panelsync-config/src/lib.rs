//! On-disk configuration for the panelsync daemon.
//!
//! One file (TOML, or YAML by extension) describes logging and any number
//! of nodes. `PANELSYNC_`-prefixed environment variables are merged on
//! top. Each node entry translates into a `panelsync_core::NodeConfig`
//! plus the `HttpPanel` it talks to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Toml, Yaml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use url::Url;

use panelsync_api::{PanelClient, TransportConfig};
use panelsync_core::{
    CertConfig, CertMode, HttpPanel, IpRecorderConfig, NodeConfig, NodeOverrides,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("panel client setup failed: {0}")]
    Client(#[from] panelsync_api::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── Config structs ──────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

fn default_level() -> String {
    "info".into()
}

/// One node: how to reach its panel and how its controller behaves.
#[derive(Debug, Deserialize)]
pub struct NodeEntry {
    pub api: ApiSection,

    #[serde(default)]
    pub controller: ControllerSection,
}

#[derive(Debug, Deserialize)]
pub struct ApiSection {
    /// Panel base URL (e.g. "https://panel.example.com").
    pub api_host: String,

    pub node_id: u32,

    #[serde(deserialize_with = "secret")]
    pub key: SecretString,

    /// Sent as `node_type` on every request when set.
    pub node_type: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Attempts per request on transient failures.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Local detection rules, one regex per line.
    pub rule_list_path: Option<PathBuf>,

    /// Mbps; overrides the panel when non-zero.
    #[serde(default)]
    pub speed_limit: u64,

    /// Overrides the panel when non-zero.
    #[serde(default)]
    pub device_limit: u32,

    #[serde(default)]
    pub enable_vless: bool,
}

fn default_timeout() -> u64 {
    5
}
fn default_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
pub struct ControllerSection {
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Seconds between node-info and user-info ticks.
    #[serde(default = "default_periodic")]
    pub update_periodic: u64,

    #[serde(default)]
    pub disable_get_rule: bool,

    #[serde(default)]
    pub disable_upload_traffic: bool,

    #[serde(default)]
    pub enable_ip_recorder: bool,

    #[serde(default)]
    pub ip_recorder: IpRecorderSection,

    #[serde(default)]
    pub cert: CertSection,

    #[serde(default)]
    pub resync_changed_users: bool,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            update_periodic: default_periodic(),
            disable_get_rule: false,
            disable_upload_traffic: false,
            enable_ip_recorder: false,
            ip_recorder: IpRecorderSection::default(),
            cert: CertSection::default(),
            resync_changed_users: false,
        }
    }
}

fn default_listen_ip() -> String {
    "0.0.0.0".into()
}
fn default_periodic() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
pub struct IpRecorderSection {
    pub url: Option<String>,

    #[serde(default, deserialize_with = "optional_secret")]
    pub token: Option<SecretString>,

    /// Seconds between online-IP reports.
    #[serde(default = "default_periodic")]
    pub periodic: u64,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for IpRecorderSection {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            periodic: default_periodic(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CertSection {
    /// One of `none`, `file`, `http`, `dns`.
    #[serde(default = "default_cert_mode")]
    pub cert_mode: String,

    pub cert_domain: Option<String>,

    pub email: Option<String>,

    pub provider: Option<String>,

    #[serde(default)]
    pub dns_env: BTreeMap<String, String>,

    /// Program and arguments run to renew the certificate.
    #[serde(default)]
    pub renew_command: Vec<String>,

    /// Seconds a renewal may run before it is abandoned.
    #[serde(default = "default_renew_timeout")]
    pub renew_timeout: u64,
}

impl Default for CertSection {
    fn default() -> Self {
        Self {
            cert_mode: default_cert_mode(),
            cert_domain: None,
            email: None,
            provider: None,
            dns_env: BTreeMap::new(),
            renew_command: Vec::new(),
            renew_timeout: default_renew_timeout(),
        }
    }
}

fn default_cert_mode() -> String {
    "none".into()
}

fn default_renew_timeout() -> u64 {
    300
}

fn secret<'de, D: Deserializer<'de>>(de: D) -> Result<SecretString, D::Error> {
    String::deserialize(de).map(SecretString::from)
}

fn optional_secret<'de, D: Deserializer<'de>>(de: D) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(de)?.map(SecretString::from))
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the default config file path via platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "panelsync", "panelsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("panelsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load, merge environment overrides and validate.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));

    let figment = if is_yaml {
        Figment::new().merge(Yaml::file(path))
    } else {
        Figment::new().merge(Toml::file(path))
    };
    let figment = figment.merge(Env::prefixed("PANELSYNC_").ignore(&["CONFIG"]).split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    tracing::debug!(path = %path.display(), nodes = config.nodes.len(), "configuration loaded");
    Ok(config)
}

// ── Validation ──────────────────────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::invalid("nodes", "at least one node is required"));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            node.validate(i)?;
        }
        Ok(())
    }
}

impl NodeEntry {
    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let field = |name: &str| format!("nodes[{index}].{name}");

        self.panel_url().map_err(|reason| ConfigError::invalid(field("api.api_host"), reason))?;

        let ctl = &self.controller;
        if ctl.update_periodic == 0 {
            return Err(ConfigError::invalid(
                field("controller.update_periodic"),
                "must be greater than zero",
            ));
        }
        if ctl.enable_ip_recorder {
            let url = ctl.ip_recorder.url.as_deref().unwrap_or_default();
            if url.trim().is_empty() {
                return Err(ConfigError::invalid(
                    field("controller.ip_recorder.url"),
                    "required when enable_ip_recorder is set",
                ));
            }
            Url::parse(url).map_err(|e| {
                ConfigError::invalid(field("controller.ip_recorder.url"), e.to_string())
            })?;
            if ctl.ip_recorder.periodic == 0 {
                return Err(ConfigError::invalid(
                    field("controller.ip_recorder.periodic"),
                    "must be greater than zero",
                ));
            }
        }
        CertMode::from_str(&ctl.cert.cert_mode).map_err(|_| {
            ConfigError::invalid(
                field("controller.cert.cert_mode"),
                format!(
                    "expected 'none', 'file', 'http', or 'dns', got '{}'",
                    ctl.cert.cert_mode
                ),
            )
        })?;
        Ok(())
    }

    fn panel_url(&self) -> Result<Url, String> {
        let host = self.api.api_host.trim();
        if host.is_empty() {
            return Err("must not be empty".into());
        }
        Url::parse(host).map_err(|e| format!("{host}: {e}"))
    }
}

// ── Translation ─────────────────────────────────────────────────────

impl NodeEntry {
    /// Transport settings for the panel client.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            attempts: self.api.retries.max(1),
            ..TransportConfig::with_timeout(Duration::from_secs(self.api.timeout))
        }
    }

    /// Runtime controller settings.
    pub fn node_config(&self) -> Result<NodeConfig, ConfigError> {
        let ctl = &self.controller;

        let ip_recorder = if ctl.enable_ip_recorder {
            let raw = ctl.ip_recorder.url.as_deref().unwrap_or_default();
            let url = Url::parse(raw)
                .map_err(|e| ConfigError::invalid("controller.ip_recorder.url", e.to_string()))?;
            Some(IpRecorderConfig {
                url,
                token: ctl
                    .ip_recorder
                    .token
                    .clone()
                    .unwrap_or_else(|| SecretString::from(String::new())),
                periodic: Duration::from_secs(ctl.ip_recorder.periodic),
                timeout: Duration::from_secs(ctl.ip_recorder.timeout),
            })
        } else {
            None
        };

        let mode = CertMode::from_str(&ctl.cert.cert_mode).map_err(|_| {
            ConfigError::invalid("controller.cert.cert_mode", ctl.cert.cert_mode.clone())
        })?;

        Ok(NodeConfig {
            listen_ip: ctl.listen_ip.clone(),
            update_periodic: Duration::from_secs(ctl.update_periodic),
            disable_get_rule: ctl.disable_get_rule,
            disable_upload_traffic: ctl.disable_upload_traffic,
            ip_recorder,
            cert: CertConfig {
                mode,
                domain: ctl.cert.cert_domain.clone(),
                email: ctl.cert.email.clone(),
                provider: ctl.cert.provider.clone(),
                dns_env: ctl.cert.dns_env.clone(),
                timeout: Duration::from_secs(ctl.cert.renew_timeout),
            },
            resync_changed_users: ctl.resync_changed_users,
        })
    }

    /// Operator overrides layered over panel values.
    pub fn overrides(&self) -> NodeOverrides {
        NodeOverrides {
            speed_limit: self.api.speed_limit,
            device_limit: self.api.device_limit,
            enable_vless: self.api.enable_vless,
        }
    }

    /// Build the panel this node talks to.
    pub fn panel(&self) -> Result<HttpPanel, ConfigError> {
        let url = self
            .panel_url()
            .map_err(|reason| ConfigError::invalid("api.api_host", reason))?;
        let key = SecretString::from(self.api.key.expose_secret().to_owned());

        let mut client = PanelClient::new(url, self.api.node_id, key, &self.transport())?;
        if let Some(node_type) = self.api.node_type.as_deref().filter(|t| !t.is_empty()) {
            client = client.with_node_type(node_type);
        }

        let mut panel = HttpPanel::new(client).with_overrides(self.overrides());
        if let Some(path) = &self.api.rule_list_path {
            panel = panel.with_rule_list(path);
        }
        Ok(panel)
    }

    /// The certificate renewal command, when one is configured.
    pub fn renew_command(&self) -> Option<&[String]> {
        let cmd = self.controller.cert.renew_command.as_slice();
        (!cmd.is_empty()).then_some(cmd)
    }

    /// Short `host#node_id` label for logs and summaries.
    pub fn label(&self) -> String {
        format!("{}#{}", self.api.api_host.trim_end_matches('/'), self.api.node_id)
    }
}
