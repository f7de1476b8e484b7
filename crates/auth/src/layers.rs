//! Policy layers: immutable allow/deny sets per precedence level.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::PermissionKey;

/// Precedence level of a policy layer.
///
/// Variants are declared in evaluation order, so `Ord` matches the order in
/// which the resolver applies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Global role template shipped by the platform.
    Template,
    /// Tenant-wide policy.
    Tenant,
    /// Store-specific policy.
    Store,
    /// Per-user override.
    User,
}

impl LayerKind {
    /// All layers, lowest to highest precedence.
    pub const EVALUATION_ORDER: [LayerKind; 4] = [
        LayerKind::Template,
        LayerKind::Tenant,
        LayerKind::Store,
        LayerKind::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Template => "template",
            LayerKind::Tenant => "tenant",
            LayerKind::Store => "store",
            LayerKind::User => "user",
        }
    }
}

impl core::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source of allow/deny rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLayer {
    #[serde(default)]
    pub allow: BTreeSet<PermissionKey>,
    #[serde(default)]
    pub deny: BTreeSet<PermissionKey>,
}

impl PolicyLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_keys<A, D>(allow: A, deny: D) -> Self
    where
        A: IntoIterator,
        A::Item: Into<PermissionKey>,
        D: IntoIterator,
        D::Item: Into<PermissionKey>,
    {
        Self {
            allow: allow.into_iter().map(Into::into).collect(),
            deny: deny.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allowing(mut self, key: impl Into<PermissionKey>) -> Self {
        self.allow.insert(key.into());
        self
    }

    pub fn denying(mut self, key: impl Into<PermissionKey>) -> Self {
        self.deny.insert(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }

    /// Every key this layer mentions, allowed or denied.
    pub fn keys(&self) -> impl Iterator<Item = &PermissionKey> {
        self.allow.iter().chain(self.deny.iter())
    }
}

/// The four layers evaluated for one subject.
///
/// Serialises to the `sources_trace` wire shape:
/// `{template:{allow,deny}, tenant:{..}, store:{..}, user:{..}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLayers {
    #[serde(default)]
    pub template: PolicyLayer,
    #[serde(default)]
    pub tenant: PolicyLayer,
    #[serde(default)]
    pub store: PolicyLayer,
    #[serde(default)]
    pub user: PolicyLayer,
}

impl PolicyLayers {
    pub fn get(&self, kind: LayerKind) -> &PolicyLayer {
        match kind {
            LayerKind::Template => &self.template,
            LayerKind::Tenant => &self.tenant,
            LayerKind::Store => &self.store,
            LayerKind::User => &self.user,
        }
    }

    pub fn with_layer(mut self, kind: LayerKind, layer: PolicyLayer) -> Self {
        match kind {
            LayerKind::Template => self.template = layer,
            LayerKind::Tenant => self.tenant = layer,
            LayerKind::Store => self.store = layer,
            LayerKind::User => self.user = layer,
        }
        self
    }

    /// Layers in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = (LayerKind, &PolicyLayer)> {
        LayerKind::EVALUATION_ORDER
            .into_iter()
            .map(move |kind| (kind, self.get(kind)))
    }

    /// Every key mentioned by any layer, deduplicated and sorted.
    pub fn mentioned_keys(&self) -> BTreeSet<PermissionKey> {
        self.iter()
            .flat_map(|(_, layer)| layer.keys().cloned())
            .collect()
    }
}
