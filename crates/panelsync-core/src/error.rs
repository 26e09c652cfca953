// ── Core error types ──
//
// Errors surfaced by the reconciliation engine. Consumers never see raw
// HTTP failures; the `From<panelsync_api::Error>` impl folds them into
// domain variants.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Panel errors ─────────────────────────────────────────────────
    #[error("Cannot reach panel at {url}: {reason}")]
    PanelUnreachable { url: String, reason: String },

    #[error("Panel request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Panel rejected request: {message}")]
    PanelRejected { message: String },

    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Unsupported node type: {node_type}")]
    UnsupportedNodeType { node_type: String },

    #[error("Invalid node info: {message}")]
    InvalidNodeInfo { message: String },

    #[error("Invalid credentials for user {uid}: {message}")]
    InvalidUser { uid: u32, message: String },

    #[error("Invalid detection rule {id}: {message}")]
    InvalidRule { id: i64, message: String },

    // ── Engine errors ────────────────────────────────────────────────
    #[error("Engine error on {tag}: {message}")]
    Engine { tag: String, message: String },

    #[error("Limiter for {tag} already exists")]
    LimiterExists { tag: String },

    #[error("No limiter registered for {tag}")]
    LimiterMissing { tag: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Node controller is {state}, expected {expected}")]
    InvalidState {
        state: String,
        expected: &'static str,
    },

    #[error("Task {name} is already running")]
    TaskAlreadyRunning { name: String },

    #[error("Task {name} is not running")]
    TaskNotRunning { name: String },

    #[error("Task {name} panicked")]
    TaskPanicked { name: String },

    #[error("Shutdown reported {} error(s): {}", .errors.len(), summarize(.errors))]
    Shutdown { errors: Vec<CoreError> },

    #[error("Certificate renewal failed: {message}")]
    CertRenewal { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn summarize(errors: &[CoreError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    /// Shorthand for an engine failure on `tag`.
    pub fn engine(tag: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::Engine {
            tag: tag.to_string(),
            message: message.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<panelsync_api::Error> for CoreError {
    fn from(err: panelsync_api::Error) -> Self {
        match err {
            panelsync_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::PanelUnreachable {
                        url: e
                            .url()
                            .map(|u| format!("{}://{}", u.scheme(), u.authority()))
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            panelsync_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            panelsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            panelsync_api::Error::Status {
                endpoint,
                status,
                body,
            } => CoreError::Api {
                message: format!("HTTP {status} from {endpoint}: {body}"),
                status: Some(status),
            },
            panelsync_api::Error::Panel { message } => CoreError::PanelRejected { message },
            panelsync_api::Error::Deserialization { message, .. } => CoreError::Api {
                message: format!("malformed response: {message}"),
                status: None,
            },
        }
    }
}
