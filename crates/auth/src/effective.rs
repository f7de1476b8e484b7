use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{PermissionDecision, PermissionKey};

/// Final key → allowed mapping for the active session.
///
/// Immutable once built. A session replaces the whole set on login, tenant
/// switch or refresh; there is no API to merge or patch one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectivePermissionSet {
    permissions: BTreeMap<PermissionKey, bool>,
}

impl EffectivePermissionSet {
    /// An empty set: every check is denied.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_decisions<'a, I>(decisions: I) -> Self
    where
        I: IntoIterator<Item = &'a PermissionDecision>,
    {
        Self {
            permissions: decisions
                .into_iter()
                .map(|d| (d.key.clone(), d.is_allowed()))
                .collect(),
        }
    }

    /// Build from `(key, allowed)` pairs, e.g. a server-computed permission list.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (PermissionKey, bool)>,
    {
        Self {
            permissions: pairs.into_iter().collect(),
        }
    }

    /// Unknown keys are denied.
    pub fn is_allowed(&self, key: &PermissionKey) -> bool {
        self.permissions.get(key).copied().unwrap_or(false)
    }

    pub fn allowed_keys(&self) -> BTreeSet<PermissionKey> {
        self.permissions
            .iter()
            .filter(|(_, allowed)| **allowed)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PermissionKey, bool)> {
        self.permissions.iter().map(|(k, v)| (k, *v))
    }
}
