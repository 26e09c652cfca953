// ── Detection rules and violations ──

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A destination pattern that rejects matching connections.
///
/// Equality compares the rule ID and the source pattern, so two rule
/// lists fetched separately compare equal when the panel did not change
/// them.
#[derive(Debug, Clone)]
pub struct DetectRule {
    pub id: i64,
    pub pattern: Regex,
}

impl DetectRule {
    pub fn new(id: i64, pattern: Regex) -> Self {
        Self { id, pattern }
    }

    pub fn matches(&self, destination: &str) -> bool {
        self.pattern.is_match(destination)
    }
}

impl PartialEq for DetectRule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.pattern.as_str() == other.pattern.as_str()
    }
}

impl Eq for DetectRule {}

/// One recorded violation: user `uid` hit rule `rule_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetectResult {
    pub uid: u32,
    pub rule_id: i64,
}
