//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use panelsync_config::ConfigError;
use panelsync_core::CoreError;

/// Process exit codes. Usage errors exit with 2 from clap itself.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(panelsync::no_config),
        help(
            "Pass one with --config or set PANELSYNC_CONFIG.\n\
             Default location: {default}"
        )
    )]
    NoConfig { path: String, default: String },

    #[error(transparent)]
    #[diagnostic(
        code(panelsync::config),
        help("Run: panelsync check-config --config <FILE>")
    )]
    Config(ConfigError),

    // ── Node lifecycle ───────────────────────────────────────────────
    #[error("Node {node} failed to start")]
    #[diagnostic(
        code(panelsync::startup),
        help("Check that the panel is reachable and the node ID and key are correct.")
    )]
    Startup {
        node: String,
        #[source]
        source: CoreError,
    },

    #[error("{failed} node(s) did not shut down cleanly")]
    #[diagnostic(code(panelsync::shutdown))]
    Shutdown { failed: usize },

    // ── Process ──────────────────────────────────────────────────────
    #[error("Logging setup failed: {message}")]
    #[diagnostic(code(panelsync::logging), help("Check log.file and log.level."))]
    Logging { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
                default: panelsync_config::config_path().display().to_string(),
            },
            other => Self::Config(other),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::Config(_) | Self::Logging { .. } => exit_code::CONFIG,
            Self::Startup { .. } => exit_code::CONNECTION,
            Self::Shutdown { .. } | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn exit_codes() {
        let missing = CliError::from(ConfigError::NotFound {
            path: PathBuf::from("/etc/panelsync.toml"),
        });
        assert_eq!(missing.exit_code(), exit_code::CONFIG);

        let startup = CliError::Startup {
            node: "https://panel#1".into(),
            source: CoreError::PanelRejected {
                message: "bad key".into(),
            },
        };
        assert_eq!(startup.exit_code(), exit_code::CONNECTION);
        assert_eq!(CliError::Shutdown { failed: 1 }.exit_code(), exit_code::GENERAL);
    }
}
