// ── Limiter bridge ──
//
// Per-tag rate and device limiting state. Each inbound gets one context
// holding node-level caps, the effective limits of every registered user,
// and the client IPs seen per user (the online-IP table).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use crate::error::CoreError;
use crate::model::{NodeInfo, Tag, UserInfo, UserIp};

/// Effective limits for one registered user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserLimit {
    pub uid: u32,
    /// Bytes per second, `0` = unlimited.
    pub speed_limit: u64,
    /// `0` = unlimited.
    pub device_limit: u32,
}

/// Combine a node-wide cap with a per-user one: the stricter non-zero
/// value wins, `0` on both sides stays unlimited.
fn stricter<T: Copy + Ord + Default>(node: T, user: T) -> T {
    let zero = T::default();
    match (node == zero, user == zero) {
        (true, _) => user,
        (_, true) => node,
        _ => node.min(user),
    }
}

#[derive(Debug)]
struct InboundLimiter {
    node_speed: u64,
    node_devices: u32,
    /// Keyed by engine user tag.
    users: HashMap<String, UserLimit>,
    /// uid -> client IPs.
    online: BTreeMap<u32, BTreeSet<String>>,
}

impl InboundLimiter {
    fn new(info: &NodeInfo) -> Self {
        Self {
            node_speed: info.speed_limit,
            node_devices: info.device_limit,
            users: HashMap::new(),
            online: BTreeMap::new(),
        }
    }

    fn register(&mut self, tag: &Tag, users: &[UserInfo]) {
        for user in users {
            let limit = UserLimit {
                uid: user.uid,
                speed_limit: stricter(self.node_speed, user.speed_limit),
                device_limit: stricter(self.node_devices, user.device_limit),
            };
            self.users.insert(user.engine_tag(tag), limit);
        }
    }
}

/// Per-tag limiter contexts shared by every node controller.
#[derive(Debug, Default)]
pub struct Limiter {
    inbounds: DashMap<Tag, InboundLimiter>,
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the context for a newly registered inbound.
    pub fn add_inbound_limiter(
        &self,
        tag: &Tag,
        info: &NodeInfo,
        users: &[UserInfo],
    ) -> Result<(), CoreError> {
        match self.inbounds.entry(tag.clone()) {
            Entry::Occupied(_) => Err(CoreError::LimiterExists {
                tag: tag.to_string(),
            }),
            Entry::Vacant(slot) => {
                let mut ctx = InboundLimiter::new(info);
                ctx.register(tag, users);
                debug!(%tag, users = users.len(), speed_limit = info.speed_limit, device_limit = info.device_limit, "limiter created");
                slot.insert(ctx);
                Ok(())
            }
        }
    }

    /// Register (or re-register) `users` in an existing context, picking up
    /// the node caps from `info`.
    pub fn update_inbound_limiter(
        &self,
        tag: &Tag,
        info: &NodeInfo,
        users: &[UserInfo],
    ) -> Result<(), CoreError> {
        let mut ctx = self
            .inbounds
            .get_mut(tag)
            .ok_or_else(|| CoreError::LimiterMissing {
                tag: tag.to_string(),
            })?;
        ctx.node_speed = info.speed_limit;
        ctx.node_devices = info.device_limit;
        ctx.register(tag, users);
        debug!(%tag, users = users.len(), "limiter updated");
        Ok(())
    }

    /// Tear down the context for `tag`. Unknown tags are ignored.
    pub fn delete_inbound_limiter(&self, tag: &Tag) {
        if self.inbounds.remove(tag).is_some() {
            debug!(%tag, "limiter deleted");
        }
    }

    /// Deregister users by engine user tag, dropping their online IPs.
    pub fn remove_users(&self, user_tags: &[String], tag: &Tag) {
        let Some(mut ctx) = self.inbounds.get_mut(tag) else {
            return;
        };
        for user_tag in user_tags {
            if let Some(limit) = ctx.users.remove(user_tag) {
                ctx.online.remove(&limit.uid);
            }
        }
        debug!(%tag, users = user_tags.len(), "limiter users removed");
    }

    pub fn has_inbound(&self, tag: &Tag) -> bool {
        self.inbounds.contains_key(tag)
    }

    /// Effective limits of one user, if registered.
    pub fn user_limit(&self, tag: &Tag, user_tag: &str) -> Option<UserLimit> {
        self.inbounds
            .get(tag)
            .and_then(|ctx| ctx.users.get(user_tag).copied())
    }

    // ── Device tracking ──────────────────────────────────────────────

    /// Record a connection from `ip` and report whether it is allowed.
    ///
    /// An IP already known for the user is always allowed. A new IP is
    /// refused once the user's effective device limit is reached.
    /// Unregistered users and unknown tags are refused.
    pub fn check_device(&self, tag: &Tag, user_tag: &str, uid: u32, ip: &str) -> bool {
        let Some(mut ctx) = self.inbounds.get_mut(tag) else {
            return false;
        };
        let Some(limit) = ctx.users.get(user_tag).copied() else {
            return false;
        };
        let ips = ctx.online.entry(uid).or_default();
        if ips.contains(ip) {
            return true;
        }
        let cap = usize::try_from(limit.device_limit).unwrap_or(usize::MAX);
        if limit.device_limit > 0 && ips.len() >= cap {
            trace!(%tag, uid, ip, "device limit reached");
            return false;
        }
        ips.insert(ip.to_owned());
        true
    }

    /// Current online-IP table for `tag`, ordered by uid.
    pub fn online_ips(&self, tag: &Tag) -> Vec<UserIp> {
        self.inbounds.get(tag).map_or_else(Vec::new, |ctx| {
            ctx.online
                .iter()
                .filter(|(_, ips)| !ips.is_empty())
                .map(|(uid, ips)| UserIp {
                    uid: *uid,
                    ips: ips.iter().cloned().collect(),
                })
                .collect()
        })
    }

    /// Replace the online-IP table for `tag` with an authoritative view.
    pub fn update_online_ips(&self, tag: &Tag, ips: Vec<UserIp>) {
        if let Some(mut ctx) = self.inbounds.get_mut(tag) {
            ctx.online = ips
                .into_iter()
                .map(|entry| (entry.uid, entry.ips.into_iter().collect()))
                .collect();
        }
    }

    pub fn clear_online_ips(&self, tag: &Tag) {
        if let Some(mut ctx) = self.inbounds.get_mut(tag) {
            ctx.online.clear();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{NodeType, ProtocolSettings, TrojanSettings};

    fn node(speed: u64, devices: u32) -> NodeInfo {
        NodeInfo {
            node_id: 1,
            port: 443,
            speed_limit: speed,
            device_limit: devices,
            enable_tls: true,
            protocol: ProtocolSettings::Trojan(TrojanSettings::default()),
        }
    }

    fn tag() -> Tag {
        Tag::new(NodeType::Trojan, "0.0.0.0", 1)
    }

    fn user(uid: u32, speed: u64, devices: u32) -> UserInfo {
        UserInfo {
            uid,
            email: format!("u{uid}@x"),
            speed_limit: speed,
            device_limit: devices,
            ..UserInfo::default()
        }
    }

    #[test]
    fn stricter_limit_wins() {
        assert_eq!(stricter(0u64, 0), 0);
        assert_eq!(stricter(100u64, 0), 100);
        assert_eq!(stricter(0u64, 50), 50);
        assert_eq!(stricter(100u64, 50), 50);
        assert_eq!(stricter(30u64, 50), 30);
    }

    #[test]
    fn add_twice_fails() {
        let limiter = Limiter::new();
        limiter.add_inbound_limiter(&tag(), &node(0, 0), &[]).unwrap();
        let err = limiter.add_inbound_limiter(&tag(), &node(0, 0), &[]).unwrap_err();
        assert!(matches!(err, CoreError::LimiterExists { .. }));
    }

    #[test]
    fn update_requires_context() {
        let limiter = Limiter::new();
        let err = limiter
            .update_inbound_limiter(&tag(), &node(0, 0), &[user(1, 0, 0)])
            .unwrap_err();
        assert!(matches!(err, CoreError::LimiterMissing { .. }));
    }

    #[test]
    fn delete_is_idempotent() {
        let limiter = Limiter::new();
        limiter.delete_inbound_limiter(&tag());
        limiter.add_inbound_limiter(&tag(), &node(0, 0), &[]).unwrap();
        limiter.delete_inbound_limiter(&tag());
        limiter.delete_inbound_limiter(&tag());
        assert!(!limiter.has_inbound(&tag()));
    }

    #[test]
    fn user_limits_combine_with_node_caps() {
        let limiter = Limiter::new();
        let u = user(1, 500, 0);
        limiter.add_inbound_limiter(&tag(), &node(1000, 3), &[u.clone()]).unwrap();

        let limit = limiter.user_limit(&tag(), &u.engine_tag(&tag())).unwrap();
        assert_eq!(limit, UserLimit { uid: 1, speed_limit: 500, device_limit: 3 });
    }

    #[test]
    fn remove_users_keeps_context() {
        let limiter = Limiter::new();
        let (a, b) = (user(1, 0, 0), user(2, 0, 0));
        limiter.add_inbound_limiter(&tag(), &node(0, 0), &[a.clone(), b.clone()]).unwrap();

        limiter.remove_users(&[a.engine_tag(&tag())], &tag());

        assert!(limiter.has_inbound(&tag()));
        assert!(limiter.user_limit(&tag(), &a.engine_tag(&tag())).is_none());
        assert!(limiter.user_limit(&tag(), &b.engine_tag(&tag())).is_some());
    }

    #[test]
    fn device_limit_enforced_per_user() {
        let limiter = Limiter::new();
        let u = user(1, 0, 2);
        let ut = u.engine_tag(&tag());
        limiter.add_inbound_limiter(&tag(), &node(0, 0), &[u]).unwrap();

        assert!(limiter.check_device(&tag(), &ut, 1, "10.0.0.1"));
        assert!(limiter.check_device(&tag(), &ut, 1, "10.0.0.2"));
        assert!(!limiter.check_device(&tag(), &ut, 1, "10.0.0.3"));
        assert!(limiter.check_device(&tag(), &ut, 1, "10.0.0.1"));
        assert!(!limiter.check_device(&tag(), "unknown", 9, "10.0.0.1"));
    }

    #[test]
    fn online_ip_table_roundtrip() {
        let limiter = Limiter::new();
        let u = user(1, 0, 0);
        let ut = u.engine_tag(&tag());
        limiter.add_inbound_limiter(&tag(), &node(0, 0), &[u]).unwrap();
        limiter.check_device(&tag(), &ut, 1, "10.0.0.2");
        limiter.check_device(&tag(), &ut, 1, "10.0.0.1");

        assert_eq!(
            limiter.online_ips(&tag()),
            vec![UserIp { uid: 1, ips: vec!["10.0.0.1".into(), "10.0.0.2".into()] }]
        );

        limiter.update_online_ips(&tag(), vec![UserIp { uid: 1, ips: vec!["10.0.0.2".into()] }]);
        assert_eq!(limiter.online_ips(&tag())[0].ips, vec!["10.0.0.2".to_string()]);

        limiter.clear_online_ips(&tag());
        assert!(limiter.online_ips(&tag()).is_empty());
    }
}
