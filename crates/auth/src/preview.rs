//! Policy change preview: what an edit adds or removes before it is saved.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::{PermissionKey, PolicyLayer};

/// Set differences between two snapshots of one policy layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyChangePreview {
    pub allow_added: BTreeSet<PermissionKey>,
    pub allow_removed: BTreeSet<PermissionKey>,
    pub deny_added: BTreeSet<PermissionKey>,
    pub deny_removed: BTreeSet<PermissionKey>,
}

impl PolicyChangePreview {
    pub fn is_empty(&self) -> bool {
        self.allow_added.is_empty()
            && self.allow_removed.is_empty()
            && self.deny_added.is_empty()
            && self.deny_removed.is_empty()
    }

    /// Any change that can increase effective access needs operator confirmation.
    pub fn requires_confirmation(&self) -> bool {
        !self.allow_added.is_empty() || !self.deny_removed.is_empty()
    }
}

pub fn build_policy_change_preview(before: &PolicyLayer, after: &PolicyLayer) -> PolicyChangePreview {
    PolicyChangePreview {
        allow_added: after.allow.difference(&before.allow).cloned().collect(),
        allow_removed: before.allow.difference(&after.allow).cloned().collect(),
        deny_added: after.deny.difference(&before.deny).cloned().collect(),
        deny_removed: before.deny.difference(&after.deny).cloned().collect(),
    }
}

pub fn requires_confirmation(before: &PolicyLayer, after: &PolicyLayer) -> bool {
    build_policy_change_preview(before, after).requires_confirmation()
}
