// ── User list diff ──

use std::collections::HashMap;

use crate::model::UserInfo;

/// Difference between two user lists, keyed by [`UserInfo::identity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDiff {
    /// In the new list only.
    pub added: Vec<UserInfo>,
    /// In the old list only.
    pub removed: Vec<UserInfo>,
    /// In both, with a different payload. Carries the new record.
    pub changed: Vec<UserInfo>,
}

impl UserDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compare `old` against `new` by identity.
///
/// Output order follows input order: `removed` and `added` keep the order
/// of `old` and `new` respectively.
pub fn diff_users(old: &[UserInfo], new: &[UserInfo]) -> UserDiff {
    let old_by_id: HashMap<String, &UserInfo> = old.iter().map(|u| (u.identity(), u)).collect();
    let new_by_id: HashMap<String, &UserInfo> = new.iter().map(|u| (u.identity(), u)).collect();

    let mut diff = UserDiff::default();

    for user in new {
        match old_by_id.get(&user.identity()) {
            None => diff.added.push(user.clone()),
            Some(prev) if *prev != user => diff.changed.push(user.clone()),
            Some(_) => {}
        }
    }
    diff.removed = old
        .iter()
        .filter(|u| !new_by_id.contains_key(&u.identity()))
        .cloned()
        .collect();

    diff
}
