// ── Node controller ──
//
// Owns one node's lifecycle: bring-up against the panel, three periodic
// monitors (node info, user traffic, online IPs) and shutdown. Cached
// NodeInfo / Tag / user list live in one snapshot swapped atomically;
// the node-info monitor is the only writer and holds the reconcile lock
// while it works.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use strum::{Display, IntoStaticStr};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use panelsync_api::AuditClient;
use panelsync_api::models::OnlineIpEntry;

use crate::cert::{CertRenewer, NoopRenewer};
use crate::config::NodeConfig;
use crate::diff::diff_users;
use crate::engine::ProxyEngine;
use crate::engine::builder::{BuiltUsers, build_inbound, build_outbound, build_users};
use crate::error::CoreError;
use crate::limiter::Limiter;
use crate::model::{NodeInfo, Tag, UserInfo, UserIp, UserTraffic};
use crate::panel::PanelApi;
use crate::rule::RuleStore;
use crate::task::Periodic;

// ── ControllerState ──────────────────────────────────────────────

/// Lifecycle of a node controller. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ControllerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

// ── Shared collaborators ─────────────────────────────────────────

/// Engine-side collaborators shared by every node controller of a process.
#[derive(Clone)]
pub struct NodeContext {
    pub engine: Arc<dyn ProxyEngine>,
    pub limiter: Arc<Limiter>,
    pub rules: Arc<RuleStore>,
    pub renewer: Arc<dyn CertRenewer>,
}

impl NodeContext {
    pub fn new(engine: Arc<dyn ProxyEngine>, limiter: Arc<Limiter>, rules: Arc<RuleStore>) -> Self {
        Self {
            engine,
            limiter,
            rules,
            renewer: Arc::new(NoopRenewer),
        }
    }

    pub fn with_renewer(mut self, renewer: Arc<dyn CertRenewer>) -> Self {
        self.renewer = renewer;
        self
    }
}

/// What the controller currently believes is registered in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub info: NodeInfo,
    pub tag: Tag,
    pub users: Vec<UserInfo>,
}

// ── NodeController ───────────────────────────────────────────────

/// Keeps one node's engine state aligned with the panel.
///
/// Cheaply cloneable; clones share the same node.
pub struct NodeController<P: PanelApi> {
    inner: Arc<ControllerInner<P>>,
}

impl<P: PanelApi> Clone for NodeController<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ControllerInner<P> {
    config: NodeConfig,
    panel: P,
    ctx: NodeContext,
    audit: Option<AuditClient>,
    state: watch::Sender<ControllerState>,
    snapshot: ArcSwapOption<NodeSnapshot>,
    /// Serializes every writer of `snapshot` and of this node's engine state.
    reconcile: Mutex<()>,
    node_info_task: Periodic,
    user_info_task: Periodic,
    online_ip_task: Option<Periodic>,
}

impl<P: PanelApi> NodeController<P> {
    /// Create a controller. Does NOT touch the panel or engine; call
    /// [`start()`](Self::start).
    pub fn new(config: NodeConfig, panel: P, ctx: NodeContext) -> Result<Self, CoreError> {
        let audit = match &config.ip_recorder {
            Some(rec) => Some(AuditClient::new(
                rec.url.clone(),
                rec.token.clone(),
                rec.timeout,
            )?),
            None => None,
        };
        Ok(Self::with_audit_client(config, panel, ctx, audit))
    }

    /// Create a controller with a pre-built auditing client.
    pub fn with_audit_client(
        config: NodeConfig,
        panel: P,
        ctx: NodeContext,
        audit: Option<AuditClient>,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::Created);
        let node_info_task = Periodic::new("node_info_monitor", config.update_periodic);
        let user_info_task = Periodic::new("user_info_monitor", config.update_periodic);
        let online_ip_task = config
            .ip_recorder
            .as_ref()
            .map(|rec| Periodic::new("online_ip_report", rec.periodic));

        Self {
            inner: Arc::new(ControllerInner {
                config,
                panel,
                ctx,
                audit,
                state,
                snapshot: ArcSwapOption::empty(),
                reconcile: Mutex::new(()),
                node_info_task,
                user_info_task,
                online_ip_task,
            }),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ControllerState {
        *self.inner.state.borrow()
    }

    /// Subscribe to lifecycle changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.inner.state.subscribe()
    }

    /// Current cached node view, once started.
    pub fn snapshot(&self) -> Option<Arc<NodeSnapshot>> {
        self.inner.snapshot.load_full()
    }

    pub fn tag(&self) -> Option<Tag> {
        self.snapshot().map(|s| s.tag.clone())
    }

    fn transition(&self, from: ControllerState, to: ControllerState) -> Result<(), CoreError> {
        let mut actual = from;
        let moved = self.inner.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                actual = *state;
                false
            }
        });
        if moved {
            Ok(())
        } else {
            Err(CoreError::InvalidState {
                state: actual.to_string(),
                expected: from.into(),
            })
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Bring the node up and schedule its monitors.
    ///
    /// Failing to fetch node info or users, or to register the inbound,
    /// outbound or limiter, aborts start-up and leaves the controller
    /// `Stopped`. Rule fetching is best-effort.
    pub async fn start(&self) -> Result<(), CoreError> {
        self.transition(ControllerState::Created, ControllerState::Starting)?;

        let result = match self.bring_up().await {
            Ok(()) => self.schedule().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(error = %e, "node start-up failed");
            if let Some(snap) = self.inner.snapshot.swap(None) {
                self.teardown(&snap.tag);
            }
            self.inner.state.send_replace(ControllerState::Stopped);
            return Err(e);
        }

        self.inner.state.send_replace(ControllerState::Running);
        if let Some(snap) = self.snapshot() {
            info!(tag = %snap.tag, users = snap.users.len(), "node started");
        }
        Ok(())
    }

    async fn bring_up(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let _guard = inner.reconcile.lock().await;

        let info = inner.panel.get_node_info().await?;
        let tag = Tag::for_node(&info, &inner.config.listen_ip);
        self.register_node(&info, &tag)?;

        let registered = self.register_users(&info, &tag).await;
        let users = match registered {
            Ok(users) => users,
            Err(e) => {
                self.teardown(&tag);
                return Err(e);
            }
        };

        inner.snapshot.store(Some(Arc::new(NodeSnapshot {
            info,
            tag: tag.clone(),
            users,
        })));

        if !inner.config.disable_get_rule {
            if let Err(e) = self.refresh_rules(&tag).await {
                warn!(%tag, error = %e, "initial rule fetch failed");
            }
        }
        Ok(())
    }

    /// Fetch the user list and register it with the limiter and engine.
    async fn register_users(&self, info: &NodeInfo, tag: &Tag) -> Result<Vec<UserInfo>, CoreError> {
        let users = self.inner.panel.get_user_list().await?;
        let built = build_users(info, tag, &users);
        self.inner
            .ctx
            .limiter
            .add_inbound_limiter(tag, info, &built.accepted)?;
        self.inner.ctx.engine.add_users(&built.engine, tag)?;
        Ok(built.accepted)
    }

    async fn schedule(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let delay = inner.config.update_periodic;

        let ctrl = self.clone();
        inner
            .node_info_task
            .start(delay, move || {
                let ctrl = ctrl.clone();
                async move { ctrl.node_info_monitor().await }
            })
            .await?;

        let ctrl = self.clone();
        inner
            .user_info_task
            .start(delay, move || {
                let ctrl = ctrl.clone();
                async move { ctrl.user_info_monitor().await }
            })
            .await?;

        if let Some(task) = &inner.online_ip_task {
            let ctrl = self.clone();
            task.start(delay, move || {
                let ctrl = ctrl.clone();
                async move { ctrl.online_ip_report().await }
            })
            .await?;
        }
        Ok(())
    }

    /// Stop every monitor, wait for in-flight ticks and deregister the
    /// node from the engine.
    ///
    /// Every stop failure is collected into one [`CoreError::Shutdown`]
    /// instead of aborting on the first. Closing a stopped controller is
    /// a no-op.
    pub async fn close(&self) -> Result<(), CoreError> {
        match self.state() {
            ControllerState::Stopped => return Ok(()),
            ControllerState::Created => {
                self.transition(ControllerState::Created, ControllerState::Stopped)?;
                return Ok(());
            }
            _ => self.transition(ControllerState::Running, ControllerState::Stopping)?,
        }

        let inner = &self.inner;
        let mut tasks = vec![&inner.node_info_task, &inner.user_info_task];
        tasks.extend(inner.online_ip_task.as_ref());

        let results = futures_util::future::join_all(tasks.iter().map(|t| t.stop())).await;
        let errors: Vec<CoreError> = results.into_iter().filter_map(Result::err).collect();

        {
            let _guard = inner.reconcile.lock().await;
            if let Some(snap) = inner.snapshot.swap(None) {
                self.teardown(&snap.tag);
            }
        }

        inner.state.send_replace(ControllerState::Stopped);

        if errors.is_empty() {
            info!("node stopped");
            Ok(())
        } else {
            let err = CoreError::Shutdown { errors };
            error!(error = %err, "node stopped with errors");
            Err(err)
        }
    }

    // ── Engine registration helpers ──────────────────────────────

    fn register_node(&self, info: &NodeInfo, tag: &Tag) -> Result<(), CoreError> {
        let engine = &self.inner.ctx.engine;
        let listen_ip = &self.inner.config.listen_ip;
        engine.add_inbound(&build_inbound(info, tag, listen_ip))?;
        if let Err(e) = engine.add_outbound(&build_outbound(tag, listen_ip)) {
            if let Err(cleanup) = engine.remove_inbound(tag) {
                debug!(%tag, error = %cleanup, "inbound cleanup failed");
            }
            return Err(e);
        }
        debug!(%tag, port = info.port, "inbound and outbound registered");
        Ok(())
    }

    /// Best-effort removal of everything registered under `tag`.
    fn teardown(&self, tag: &Tag) {
        let ctx = &self.inner.ctx;
        ctx.limiter.delete_inbound_limiter(tag);
        if let Err(e) = ctx.engine.remove_outbound(tag) {
            debug!(%tag, error = %e, "outbound removal failed");
        }
        if let Err(e) = ctx.engine.remove_inbound(tag) {
            debug!(%tag, error = %e, "inbound removal failed");
        }
    }

    async fn refresh_rules(&self, tag: &Tag) -> Result<(), CoreError> {
        let rules = self.inner.panel.get_node_rule().await?;
        let detect = rules.detect.len();
        let detect_changed = self.inner.ctx.rules.update_detect_rules(tag, rules.detect);
        let protocols_changed = self
            .inner
            .ctx
            .rules
            .update_protocol_rules(tag, rules.protocols);
        if detect_changed || protocols_changed {
            info!(%tag, detect, "rules updated");
        }
        Ok(())
    }

    async fn renew_cert(&self, info: &NodeInfo) {
        let cert = &self.inner.config.cert;
        if !info.enable_tls || !cert.mode.renews() {
            return;
        }
        let renewer = Arc::clone(&self.inner.ctx.renewer);
        let limit = cert.timeout;
        let cert = cert.clone();
        let renewal = tokio::task::spawn_blocking(move || renewer.renew(&cert));
        match tokio::time::timeout(limit, renewal).await {
            Ok(Ok(Ok(()))) => debug!("certificate renewal checked"),
            Ok(Ok(Err(e))) => warn!(error = %e, "certificate renewal failed"),
            Ok(Err(e)) => warn!(error = %e, "certificate renewal task failed"),
            Err(_) => warn!(timeout_secs = limit.as_secs(), "certificate renewal timed out"),
        }
    }

    // ── Monitors ─────────────────────────────────────────────────

    /// One node-info tick: rebuild on node change, refresh rules, renew
    /// the certificate and reconcile users.
    pub async fn node_info_monitor(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let _guard = inner.reconcile.lock().await;
        let Some(current) = inner.snapshot.load_full() else {
            return Ok(());
        };

        let info = inner.panel.get_node_info().await?;
        if current.info.needs_rebuild(&info) {
            return self.rebuild(&current, info).await;
        }

        let tag = &current.tag;
        if !inner.config.disable_get_rule {
            if let Err(e) = self.refresh_rules(tag).await {
                warn!(%tag, error = %e, "rule refresh failed");
            }
        }
        self.renew_cert(&info).await;

        let users = inner.panel.get_user_list().await?;
        self.apply_user_diff(&current, users)
    }

    /// Replace the node's registration after its description changed,
    /// then register the freshly fetched user list under the new tag.
    async fn rebuild(&self, current: &NodeSnapshot, info: NodeInfo) -> Result<(), CoreError> {
        let inner = &self.inner;
        let old_tag = &current.tag;
        let tag = Tag::for_node(&info, &inner.config.listen_ip);
        info!(old = %old_tag, new = %tag, "node info changed, rebuilding");

        self.teardown(old_tag);
        self.register_node(&info, &tag)?;

        if !inner.config.disable_get_rule {
            if let Err(e) = self.refresh_rules(&tag).await {
                warn!(%tag, error = %e, "rule refresh failed");
            }
        }
        inner.ctx.rules.retire_tag(old_tag, &tag);
        self.renew_cert(&info).await;

        let users = match inner.panel.get_user_list().await {
            Ok(users) => users,
            Err(e) => {
                warn!(%tag, error = %e, "user fetch failed after rebuild, re-adding cached users");
                current.users.clone()
            }
        };

        let BuiltUsers { engine: built, accepted: users } = build_users(&info, &tag, &users);
        let registered = inner
            .ctx
            .limiter
            .add_inbound_limiter(&tag, &info, &users)
            .and_then(|()| inner.ctx.engine.add_users(&built, &tag));
        if let Err(e) = registered {
            self.teardown(&tag);
            return Err(e);
        }

        info!(%tag, users = users.len(), "node rebuilt");
        inner
            .snapshot
            .store(Some(Arc::new(NodeSnapshot { info, tag, users })));
        Ok(())
    }

    /// Apply the difference between the cached and fetched user lists, then
    /// cache the fetched list minus the users the engine could not take.
    fn apply_user_diff(&self, current: &NodeSnapshot, mut users: Vec<UserInfo>) -> Result<(), CoreError> {
        let inner = &self.inner;
        let ctx = &inner.ctx;
        let (info, tag) = (&current.info, &current.tag);
        let diff = diff_users(&current.users, &users);
        let mut skipped: HashSet<String> = HashSet::new();

        if !diff.removed.is_empty() {
            let user_tags: Vec<String> = diff.removed.iter().map(|u| u.engine_tag(tag)).collect();
            ctx.engine.remove_users(&user_tags, tag)?;
            ctx.limiter.remove_users(&user_tags, tag);
        }

        if !diff.changed.is_empty() {
            if inner.config.resync_changed_users {
                let user_tags: Vec<String> = diff.changed.iter().map(|u| u.engine_tag(tag)).collect();
                ctx.engine.remove_users(&user_tags, tag)?;
                ctx.limiter.remove_users(&user_tags, tag);
                let built = build_users(info, tag, &diff.changed);
                skipped.extend(rejected(&diff.changed, &built.accepted));
                ctx.engine.add_users(&built.engine, tag)?;
                ctx.limiter.update_inbound_limiter(tag, info, &built.accepted)?;
            } else {
                debug!(%tag, changed = diff.changed.len(), "users changed in place, not resynced");
            }
        }

        if !diff.added.is_empty() {
            let built = build_users(info, tag, &diff.added);
            skipped.extend(rejected(&diff.added, &built.accepted));
            ctx.engine.add_users(&built.engine, tag)?;
            ctx.limiter.update_inbound_limiter(tag, info, &built.accepted)?;
        }

        if diff.is_empty() {
            debug!(%tag, "users unchanged");
        } else {
            info!(
                %tag,
                added = diff.added.len(),
                removed = diff.removed.len(),
                changed = diff.changed.len(),
                "users reconciled"
            );
        }

        if !skipped.is_empty() {
            users.retain(|u| !skipped.contains(&u.identity()));
        }
        inner.snapshot.store(Some(Arc::new(NodeSnapshot {
            info: current.info.clone(),
            tag: current.tag.clone(),
            users,
        })));
        Ok(())
    }

    /// One user tick: report traffic and rule violations, and bound the
    /// online-IP table when nothing consumes it.
    pub async fn user_info_monitor(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let Some(snap) = inner.snapshot.load_full() else {
            return Ok(());
        };
        let tag = &snap.tag;

        let traffic: Vec<UserTraffic> = snap
            .users
            .iter()
            .map(|user| {
                let (upload, download) = inner.ctx.engine.user_traffic(&user.engine_tag(tag), true);
                UserTraffic {
                    uid: user.uid,
                    upload,
                    download,
                }
            })
            .filter(|t| !t.is_zero())
            .collect();

        if !inner.config.disable_upload_traffic && !traffic.is_empty() {
            match inner.panel.report_user_traffic(&traffic).await {
                Ok(()) => debug!(%tag, users = traffic.len(), "traffic reported"),
                Err(e) => warn!(%tag, error = %e, "traffic report failed"),
            }
        }

        let violations = inner.ctx.rules.drain_detect_results(tag);
        if !violations.is_empty() {
            match inner.panel.report_illegal(&violations).await {
                Ok(()) => info!(%tag, count = violations.len(), "rule violations reported"),
                Err(e) => warn!(%tag, error = %e, count = violations.len(), "violation report failed, dropped"),
            }
        }

        if !inner.config.ip_recorder_enabled() {
            inner.ctx.limiter.clear_online_ips(tag);
        }
        Ok(())
    }

    /// One online-IP tick: push the local table to the auditing endpoint
    /// and adopt its answer. Any failure clears the local table.
    pub async fn online_ip_report(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let Some(audit) = &inner.audit else {
            return Ok(());
        };
        let Some(snap) = inner.snapshot.load_full() else {
            return Ok(());
        };
        let tag = &snap.tag;

        let online = inner.ctx.limiter.online_ips(tag);
        let entries: Vec<OnlineIpEntry> = online.iter().map(OnlineIpEntry::from).collect();

        match audit.sync_online_ips(&entries).await {
            Ok(reconciled) => {
                debug!(%tag, sent = entries.len(), kept = reconciled.len(), "online IPs synced");
                let ips: Vec<UserIp> = reconciled.into_iter().map(UserIp::from).collect();
                inner.ctx.limiter.update_online_ips(tag, ips);
                Ok(())
            }
            Err(e) => {
                inner.ctx.limiter.clear_online_ips(tag);
                Err(e.into())
            }
        }
    }
}

/// Identities of `offered` users missing from `accepted`.
fn rejected(offered: &[UserInfo], accepted: &[UserInfo]) -> impl Iterator<Item = String> {
    let kept: HashSet<String> = accepted.iter().map(UserInfo::identity).collect();
    offered
        .iter()
        .map(UserInfo::identity)
        .filter(move |id| !kept.contains(id))
}
