// ── In-process engine registry ──
//
// Tracks inbounds, outbounds, users and per-user traffic counters in
// memory. Connection admission consults the shared limiter and rule store
// the same way a dataplane dispatcher would.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::{EngineUser, InboundSpec, OutboundSpec, ProxyEngine};
use crate::error::CoreError;
use crate::limiter::Limiter;
use crate::model::Tag;
use crate::rule::RuleStore;

#[derive(Debug, Default)]
struct Counters {
    upload: AtomicU64,
    download: AtomicU64,
}

#[derive(Debug)]
struct Inbound {
    spec: InboundSpec,
    users: HashMap<String, EngineUser>,
}

/// A connection attempt as the dispatcher sees it.
#[derive(Debug, Clone, Copy)]
pub struct Connection<'a> {
    pub user_tag: &'a str,
    pub source_ip: &'a str,
    pub destination: &'a str,
    /// Sniffed application protocol, if any.
    pub protocol: Option<&'a str>,
}

/// Outcome of [`LocalEngine::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    UnknownUser,
    DeviceLimit,
    ForbiddenProtocol,
    ForbiddenDestination,
}

/// [`ProxyEngine`] backed by in-memory maps.
#[derive(Debug)]
pub struct LocalEngine {
    inbounds: DashMap<Tag, Inbound>,
    outbounds: DashMap<Tag, OutboundSpec>,
    traffic: DashMap<String, Counters>,
    limiter: Arc<Limiter>,
    rules: Arc<RuleStore>,
}

impl LocalEngine {
    pub fn new(limiter: Arc<Limiter>, rules: Arc<RuleStore>) -> Self {
        Self {
            inbounds: DashMap::new(),
            outbounds: DashMap::new(),
            traffic: DashMap::new(),
            limiter,
            rules,
        }
    }

    pub fn inbound(&self, tag: &Tag) -> Option<InboundSpec> {
        self.inbounds.get(tag).map(|ib| ib.spec.clone())
    }

    pub fn has_outbound(&self, tag: &Tag) -> bool {
        self.outbounds.contains_key(tag)
    }

    /// Engine user tags registered on `tag`, sorted.
    pub fn user_tags(&self, tag: &Tag) -> Vec<String> {
        let mut tags: Vec<String> = self
            .inbounds
            .get(tag)
            .map(|ib| ib.users.keys().cloned().collect())
            .unwrap_or_default();
        tags.sort();
        tags
    }

    /// Add bytes to a user's counters. Unknown users are ignored.
    pub fn record_traffic(&self, user_tag: &str, upload: u64, download: u64) {
        if let Some(c) = self.traffic.get(user_tag) {
            c.upload.fetch_add(upload, Ordering::Relaxed);
            c.download.fetch_add(download, Ordering::Relaxed);
        }
    }

    /// Decide whether a connection on `tag` may proceed.
    ///
    /// Order: user registered, device limit, forbidden protocol, forbidden
    /// destination. A destination rejection records a violation.
    pub fn admit(&self, tag: &Tag, conn: Connection<'_>) -> Verdict {
        let uid = self
            .inbounds
            .get(tag)
            .and_then(|ib| ib.users.get(conn.user_tag).map(|u| u.uid));
        let Some(uid) = uid else {
            return Verdict::UnknownUser;
        };
        if !self
            .limiter
            .check_device(tag, conn.user_tag, uid, conn.source_ip)
        {
            return Verdict::DeviceLimit;
        }
        if conn
            .protocol
            .is_some_and(|p| self.rules.detect_protocol(tag, p))
        {
            return Verdict::ForbiddenProtocol;
        }
        if self.rules.detect(tag, conn.destination, conn.user_tag) {
            return Verdict::ForbiddenDestination;
        }
        Verdict::Accepted
    }
}

impl ProxyEngine for LocalEngine {
    fn add_inbound(&self, spec: &InboundSpec) -> Result<(), CoreError> {
        match self.inbounds.entry(spec.tag.clone()) {
            Entry::Occupied(_) => Err(CoreError::engine(&spec.tag, "inbound already exists")),
            Entry::Vacant(slot) => {
                debug!(tag = %spec.tag, port = spec.port, "inbound added");
                slot.insert(Inbound {
                    spec: spec.clone(),
                    users: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    fn remove_inbound(&self, tag: &Tag) -> Result<(), CoreError> {
        let (_, inbound) = self
            .inbounds
            .remove(tag)
            .ok_or_else(|| CoreError::engine(tag, "no such inbound"))?;
        for user_tag in inbound.users.keys() {
            self.traffic.remove(user_tag);
        }
        debug!(%tag, "inbound removed");
        Ok(())
    }

    fn add_outbound(&self, spec: &OutboundSpec) -> Result<(), CoreError> {
        match self.outbounds.entry(spec.tag.clone()) {
            Entry::Occupied(_) => Err(CoreError::engine(&spec.tag, "outbound already exists")),
            Entry::Vacant(slot) => {
                slot.insert(spec.clone());
                Ok(())
            }
        }
    }

    fn remove_outbound(&self, tag: &Tag) -> Result<(), CoreError> {
        self.outbounds
            .remove(tag)
            .map(|_| ())
            .ok_or_else(|| CoreError::engine(tag, "no such outbound"))
    }

    fn add_users(&self, users: &[EngineUser], tag: &Tag) -> Result<(), CoreError> {
        let mut inbound = self
            .inbounds
            .get_mut(tag)
            .ok_or_else(|| CoreError::engine(tag, "no such inbound"))?;
        for user in users {
            self.traffic.entry(user.tag.clone()).or_default();
            inbound.users.insert(user.tag.clone(), user.clone());
        }
        Ok(())
    }

    fn remove_users(&self, user_tags: &[String], tag: &Tag) -> Result<(), CoreError> {
        let mut inbound = self
            .inbounds
            .get_mut(tag)
            .ok_or_else(|| CoreError::engine(tag, "no such inbound"))?;
        for user_tag in user_tags {
            inbound.users.remove(user_tag);
            self.traffic.remove(user_tag);
        }
        Ok(())
    }

    fn user_traffic(&self, user_tag: &str, reset: bool) -> (u64, u64) {
        let Some(c) = self.traffic.get(user_tag) else {
            return (0, 0);
        };
        if reset {
            (
                c.upload.swap(0, Ordering::Relaxed),
                c.download.swap(0, Ordering::Relaxed),
            )
        } else {
            (
                c.upload.load(Ordering::Relaxed),
                c.download.load(Ordering::Relaxed),
            )
        }
    }
}
