//! Clap derive structures for the `panelsync` daemon.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// panelsync -- keep a proxy engine in sync with its panel
#[derive(Debug, Parser)]
#[command(
    name = "panelsync",
    version,
    about = "Keep a proxy node's users, rules and limits in sync with its panel",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Defaults to `run`
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (TOML, or YAML by extension)
    #[arg(long, short = 'c', env = "PANELSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start every configured node and run until interrupted
    Run,

    /// Load and validate the configuration, then print a node summary
    CheckConfig,
}
