//! `run` and `check-config`.

use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{error, info};

use panelsync_config::{Config, NodeEntry};
use panelsync_core::{
    HttpPanel, Limiter, LocalEngine, NodeContext, NodeController, ProxyEngine, RuleStore,
};

use crate::error::CliError;
use crate::renew::CommandRenewer;

type Node = (String, NodeController<HttpPanel>);

/// Start every node, wait for Ctrl-C or SIGTERM, then close them all.
///
/// A node that fails to start aborts the run after the already-started
/// nodes are closed.
pub async fn run(config: &Config) -> Result<(), CliError> {
    let limiter = Arc::new(Limiter::new());
    let rules = Arc::new(RuleStore::new());
    let engine: Arc<dyn ProxyEngine> =
        Arc::new(LocalEngine::new(Arc::clone(&limiter), Arc::clone(&rules)));
    let base = NodeContext::new(engine, limiter, rules);

    let mut nodes: Vec<Node> = Vec::with_capacity(config.nodes.len());
    for entry in &config.nodes {
        match start_node(entry, base.clone()).await {
            Ok(controller) => nodes.push((entry.label(), controller)),
            Err(e) => {
                close_all(&nodes).await;
                return Err(e);
            }
        }
    }

    info!(nodes = nodes.len(), "panelsync running");
    shutdown_signal().await?;
    info!("shutdown requested");

    let failed = close_all(&nodes).await;
    if failed > 0 {
        return Err(CliError::Shutdown { failed });
    }
    info!("all nodes stopped");
    Ok(())
}

async fn start_node(
    entry: &NodeEntry,
    mut ctx: NodeContext,
) -> Result<NodeController<HttpPanel>, CliError> {
    if let Some(renewer) = entry.renew_command().and_then(CommandRenewer::from_argv) {
        ctx = ctx.with_renewer(Arc::new(renewer));
    }
    let startup = |source| CliError::Startup {
        node: entry.label(),
        source,
    };

    let controller =
        NodeController::new(entry.node_config()?, entry.panel()?, ctx).map_err(startup)?;
    controller.start().await.map_err(startup)?;
    Ok(controller)
}

async fn close_all(nodes: &[Node]) -> usize {
    let results = join_all(nodes.iter().map(|(_, ctrl)| ctrl.close())).await;
    let mut failed = 0;
    for ((label, _), result) in nodes.iter().zip(results) {
        if let Err(e) = result {
            error!(node = %label, error = %e, "node did not shut down cleanly");
            failed += 1;
        }
    }
    failed
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Print what `run` would start.
pub fn check_config(path: &Path, config: &Config) -> Result<(), CliError> {
    println!("Configuration OK: {}", path.display());
    println!("{} node(s)", config.nodes.len());
    for entry in &config.nodes {
        let node = entry.node_config()?;
        println!(
            "  {}  listen={} every={}s rules={} traffic={} ip_recorder={} cert={}",
            entry.label(),
            node.listen_ip,
            node.update_periodic.as_secs(),
            on_off(!node.disable_get_rule),
            on_off(!node.disable_upload_traffic),
            on_off(node.ip_recorder_enabled()),
            node.cert.mode,
        );
    }
    Ok(())
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
