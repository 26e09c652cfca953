// ── Per-tag rule store ──
//
// Detection rules and forbidden protocols are read-mostly and replaced
// wholesale; violation results are write-heavy and drained on report.
// Each lives in its own sharded map so the two never contend.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use crate::model::{DetectResult, DetectRule, Tag};

/// Rules and accumulated violations, keyed by tag.
///
/// Operations on different tags never block each other; writes to the
/// same tag are serialized by the owning shard.
#[derive(Debug, Default)]
pub struct RuleStore {
    detect: DashMap<Tag, Arc<Vec<DetectRule>>>,
    protocols: DashMap<Tag, Arc<HashSet<String>>>,
    results: DashMap<Tag, HashSet<DetectResult>>,
}

/// Replace the value under `tag` unless it is already equal.
fn replace_if_changed<T: PartialEq>(map: &DashMap<Tag, Arc<T>>, tag: &Tag, value: T) -> bool {
    match map.entry(tag.clone()) {
        Entry::Occupied(mut slot) => {
            if **slot.get() == value {
                return false;
            }
            slot.insert(Arc::new(value));
            true
        }
        Entry::Vacant(slot) => {
            slot.insert(Arc::new(value));
            true
        }
    }
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the detection rules for `tag`. Returns `false` when the
    /// stored list is already structurally equal and nothing changed.
    pub fn update_detect_rules(&self, tag: &Tag, rules: Vec<DetectRule>) -> bool {
        let count = rules.len();
        let changed = replace_if_changed(&self.detect, tag, rules);
        if changed {
            debug!(%tag, count, "detect rules replaced");
        }
        changed
    }

    /// Replace the forbidden-protocol set for `tag`, same semantics as
    /// [`update_detect_rules`](Self::update_detect_rules).
    pub fn update_protocol_rules(&self, tag: &Tag, protocols: Vec<String>) -> bool {
        let set: HashSet<String> = protocols.into_iter().collect();
        let count = set.len();
        let changed = replace_if_changed(&self.protocols, tag, set);
        if changed {
            debug!(%tag, count, "protocol rules replaced");
        }
        changed
    }

    /// Check `destination` against the rules of `tag` in stored order.
    ///
    /// Returns `true` on the first match. The violation is recorded under
    /// the UID taken from the last `|` segment of `email`; when that does
    /// not parse the connection is still rejected but nothing is recorded.
    pub fn detect(&self, tag: &Tag, destination: &str, email: &str) -> bool {
        // Clone the Arc so no shard lock is held while matching.
        let Some(rules) = self.detect.get(tag).map(|r| Arc::clone(r.value())) else {
            return false;
        };
        let Some(rule) = rules.iter().find(|rule| rule.matches(destination)) else {
            return false;
        };

        let uid = email.rsplit('|').next().and_then(|s| s.parse::<u32>().ok());
        let Some(uid) = uid else {
            debug!(%tag, email, rule_id = rule.id, "cannot parse uid from user tag, violation not recorded");
            return true;
        };

        let result = DetectResult {
            uid,
            rule_id: rule.id,
        };
        let inserted = self.results.entry(tag.clone()).or_default().insert(result);
        trace!(%tag, uid, rule_id = rule.id, inserted, destination, "destination rejected");
        true
    }

    /// Whether `protocol` is forbidden on `tag`.
    pub fn detect_protocol(&self, tag: &Tag, protocol: &str) -> bool {
        self.protocols
            .get(tag)
            .is_some_and(|set| set.contains(protocol))
    }

    /// Remove and return every violation recorded for `tag`.
    pub fn drain_detect_results(&self, tag: &Tag) -> Vec<DetectResult> {
        let Some((_, results)) = self.results.remove(tag) else {
            return Vec::new();
        };
        let mut results: Vec<DetectResult> = results.into_iter().collect();
        results.sort_unstable();
        results
    }

    /// Drop every entry for `old` once `new` has taken over.
    ///
    /// Pending violations move to `new` so they are still reported. Rules
    /// move only when `new` has none of its own yet.
    pub fn retire_tag(&self, old: &Tag, new: &Tag) {
        if old == new {
            return;
        }
        if let Some((_, rules)) = self.detect.remove(old) {
            self.detect.entry(new.clone()).or_insert(rules);
        }
        if let Some((_, protocols)) = self.protocols.remove(old) {
            self.protocols.entry(new.clone()).or_insert(protocols);
        }
        if let Some((_, pending)) = self.results.remove(old) {
            self.results.entry(new.clone()).or_default().extend(pending);
        }
    }
}
