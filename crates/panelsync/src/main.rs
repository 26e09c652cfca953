mod cli;
mod daemon;
mod error;
mod logging;
mod renew;

use clap::Parser;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = dispatch(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let path = cli
        .global
        .config
        .unwrap_or_else(panelsync_config::config_path);
    let config = panelsync_config::load(&path)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => daemon::check_config(&path, &config),
        Command::Run => {
            let _guard = logging::init(&config.log, cli.global.verbose)?;
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                config = %path.display(),
                "starting panelsync"
            );
            daemon::run(&config).await
        }
    }
}
