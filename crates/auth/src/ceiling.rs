//! Admin grant ceiling: an actor can never grant what they do not hold.

use std::collections::BTreeSet;

use crate::{EffectivePermissionSet, PermissionKey};

/// Keys in `requested_allow` that `actor_allowed` does not contain.
///
/// Advisory: the caller decides whether to block the save or surface the list.
pub fn ceiling_violations(
    actor_allowed: &BTreeSet<PermissionKey>,
    requested_allow: &BTreeSet<PermissionKey>,
) -> BTreeSet<PermissionKey> {
    requested_allow.difference(actor_allowed).cloned().collect()
}

impl EffectivePermissionSet {
    /// Ceiling check against this (actor's) effective set.
    pub fn ceiling_violations(
        &self,
        requested_allow: &BTreeSet<PermissionKey>,
    ) -> BTreeSet<PermissionKey> {
        ceiling_violations(&self.allowed_keys(), requested_allow)
    }
}
