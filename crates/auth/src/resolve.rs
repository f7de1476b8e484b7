//! Effective permission resolution.
//!
//! Layers are applied in the order `template → tenant → store → user` and the
//! **last layer that mentions a key wins**. Within a single layer a deny is
//! applied after an allow, so a layer listing the key in both sets denies it.
//! A key no layer allows is denied (default deny).
//!
//! - No IO
//! - No panics
//! - Deterministic: same layers in, same decisions out

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::layers::{LayerKind, PolicyLayers};
use crate::{EffectivePermissionSet, PermissionKey, Subject};

/// Outcome contributed by a layer (and the final outcome of a decision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// One step of the audit trail: `layer` applied `effect` to the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerContribution {
    pub layer: LayerKind,
    pub effect: Effect,
}

/// Final decision for one key, with the trail that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub key: PermissionKey,
    #[serde(rename = "final")]
    pub final_effect: Effect,
    pub contributing_layers: Vec<LayerContribution>,
    pub deny_sources: BTreeSet<LayerKind>,
}

impl PermissionDecision {
    pub fn is_allowed(&self) -> bool {
        self.final_effect == Effect::Allow
    }

    /// Layer whose contribution settled the decision (`None` under default deny).
    pub fn decided_by(&self) -> Option<LayerKind> {
        self.contributing_layers.last().map(|c| c.layer)
    }

    /// Deny sources that a later allow overrode.
    pub fn overridden_denies(&self) -> Vec<LayerKind> {
        if self.is_allowed() {
            self.deny_sources.iter().copied().collect()
        } else {
            Vec::new()
        }
    }
}

/// Resolve a single key against the subject's layers.
pub fn resolve(layers: &PolicyLayers, key: &PermissionKey) -> PermissionDecision {
    let mut final_effect = Effect::Deny;
    let mut contributing_layers = Vec::new();
    let mut deny_sources = BTreeSet::new();

    for (kind, layer) in layers.iter() {
        if layer.allow.contains(key) {
            final_effect = Effect::Allow;
            contributing_layers.push(LayerContribution {
                layer: kind,
                effect: Effect::Allow,
            });
        }
        if layer.deny.contains(key) {
            final_effect = Effect::Deny;
            contributing_layers.push(LayerContribution {
                layer: kind,
                effect: Effect::Deny,
            });
            deny_sources.insert(kind);
        }
    }

    PermissionDecision {
        key: key.clone(),
        final_effect,
        contributing_layers,
        deny_sources,
    }
}

/// Result of one evaluation pass: exactly one decision per requested key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub subject: Subject,
    decisions: BTreeMap<PermissionKey, PermissionDecision>,
}

impl Evaluation {
    pub fn decision(&self, key: &PermissionKey) -> Option<&PermissionDecision> {
        self.decisions.get(key)
    }

    pub fn decisions(&self) -> impl Iterator<Item = &PermissionDecision> {
        self.decisions.values()
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn denied_keys(&self) -> BTreeSet<PermissionKey> {
        self.decisions
            .values()
            .filter(|d| !d.is_allowed())
            .map(|d| d.key.clone())
            .collect()
    }

    pub fn to_effective_set(&self) -> EffectivePermissionSet {
        EffectivePermissionSet::from_decisions(self.decisions.values())
    }
}

/// Evaluate the requested keys for `subject`.
///
/// Duplicate keys in `requested` collapse into a single decision.
pub fn evaluate<'a, I>(subject: &Subject, layers: &PolicyLayers, requested: I) -> Evaluation
where
    I: IntoIterator<Item = &'a PermissionKey>,
{
    let decisions: BTreeMap<PermissionKey, PermissionDecision> = requested
        .into_iter()
        .map(|key| (key.clone(), resolve(layers, key)))
        .collect();

    tracing::debug!(
        user_id = %subject.user_id,
        tenant_id = %subject.tenant_id,
        keys = decisions.len(),
        "evaluated effective permissions"
    );

    Evaluation {
        subject: subject.clone(),
        decisions,
    }
}

/// Resolve every key mentioned by any layer, in key order.
pub fn resolve_all(layers: &PolicyLayers) -> Vec<PermissionDecision> {
    layers
        .mentioned_keys()
        .iter()
        .map(|key| resolve(layers, key))
        .collect()
}

/// Evaluate every key any layer mentions.
pub fn evaluate_all(subject: &Subject, layers: &PolicyLayers) -> Evaluation {
    let keys = layers.mentioned_keys();
    evaluate(subject, layers, &keys)
}

// ─────────────────────────────────────────────────────────────────────────────
// Decision Explanation (explainer panels)
// ─────────────────────────────────────────────────────────────────────────────

/// Display-ready explanation of a single decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionExplanation {
    pub key: String,
    pub granted: bool,
    pub reason: String,
    pub trail: Vec<LayerContribution>,
    /// Denies that a later layer overrode (only populated for allowed keys).
    pub overridden_denies: Vec<LayerKind>,
    pub suggestions: Vec<String>,
}

/// Explain why a key is allowed or denied.
///
/// Answers "why is this denied?" using the same last-layer-wins rule the
/// resolver applied, so the explanation can never disagree with the decision.
pub fn explain(decision: &PermissionDecision) -> DecisionExplanation {
    let key = decision.key.as_str();
    let trail = decision.contributing_layers.clone();
    let overridden_denies = decision.overridden_denies();

    let (reason, suggestions) = match (decision.decided_by(), decision.final_effect) {
        (None, _) => (
            format!("No policy layer grants '{key}' (default deny)"),
            vec![
                format!("Grant '{key}' in the tenant, store or user layer"),
                "Check that the subject's role template includes this permission".to_string(),
            ],
        ),
        (Some(layer), Effect::Allow) if overridden_denies.is_empty() => {
            (format!("Allowed by the {layer} layer"), Vec::new())
        }
        (Some(layer), Effect::Allow) => {
            let overridden: Vec<&str> = overridden_denies.iter().map(LayerKind::as_str).collect();
            (
                format!(
                    "Allowed by the {layer} layer, overriding an earlier deny from: {}",
                    overridden.join(", ")
                ),
                Vec::new(),
            )
        }
        (Some(layer), Effect::Deny) => {
            let mut suggestions = Vec::new();
            if layer != LayerKind::User {
                suggestions.push(format!(
                    "An allow for '{key}' in a layer after {layer} would restore access"
                ));
            }
            suggestions.push(format!("Remove '{key}' from the {layer} layer's deny list"));
            (format!("Denied by the {layer} layer"), suggestions)
        }
    };

    DecisionExplanation {
        key: key.to_string(),
        granted: decision.is_allowed(),
        reason,
        trail,
        overridden_denies,
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::PolicyLayer;
    use crate::Role;
    use proptest::prelude::*;
    use storedesk_core::{TenantId, UserId};

    fn subject() -> Subject {
        Subject::new(UserId::new(), TenantId::new(), Role::new("manager"))
    }

    fn key(s: &'static str) -> PermissionKey {
        PermissionKey::new(s)
    }

    #[test]
    fn unmentioned_key_is_denied_with_empty_trail() {
        let decision = resolve(&PolicyLayers::default(), &key("users.create"));
        assert_eq!(decision.final_effect, Effect::Deny);
        assert!(decision.contributing_layers.is_empty());
        assert!(decision.deny_sources.is_empty());
        assert_eq!(decision.decided_by(), None);
    }

    #[test]
    fn template_allow_then_tenant_deny_is_denied() {
        let layers = PolicyLayers::default()
            .with_layer(LayerKind::Template, PolicyLayer::new().allowing("stores.read"))
            .with_layer(LayerKind::Tenant, PolicyLayer::new().denying("stores.read"));

        let decision = resolve(&layers, &key("stores.read"));
        assert_eq!(decision.final_effect, Effect::Deny);
        assert_eq!(
            decision.contributing_layers,
            vec![
                LayerContribution { layer: LayerKind::Template, effect: Effect::Allow },
                LayerContribution { layer: LayerKind::Tenant, effect: Effect::Deny },
            ]
        );
        assert_eq!(decision.deny_sources, BTreeSet::from([LayerKind::Tenant]));
    }

    #[test]
    fn later_allow_reinstates_earlier_deny() {
        let layers = PolicyLayers::default()
            .with_layer(LayerKind::Tenant, PolicyLayer::new().denying("reports.export"))
            .with_layer(LayerKind::User, PolicyLayer::new().allowing("reports.export"));

        let decision = resolve(&layers, &key("reports.export"));
        assert!(decision.is_allowed());
        assert_eq!(decision.decided_by(), Some(LayerKind::User));
        assert_eq!(decision.overridden_denies(), vec![LayerKind::Tenant]);
    }

    #[test]
    fn allow_and_deny_in_same_layer_denies() {
        let layers = PolicyLayers::default().with_layer(
            LayerKind::Store,
            PolicyLayer::new().allowing("pos.refund").denying("pos.refund"),
        );

        let decision = resolve(&layers, &key("pos.refund"));
        assert_eq!(decision.final_effect, Effect::Deny);
        assert_eq!(decision.contributing_layers.len(), 2);
    }

    #[test]
    fn evaluate_collapses_duplicate_keys() {
        let layers = PolicyLayers::default()
            .with_layer(LayerKind::Template, PolicyLayer::new().allowing("users.read"));
        let requested = [key("users.read"), key("users.read"), key("users.create")];

        let evaluation = evaluate(&subject(), &layers, &requested);
        assert_eq!(evaluation.len(), 2);
        assert!(evaluation.decision(&key("users.read")).unwrap().is_allowed());
        assert_eq!(evaluation.denied_keys(), BTreeSet::from([key("users.create")]));
    }

    #[test]
    fn evaluate_all_covers_every_mentioned_key() {
        let layers = PolicyLayers::default()
            .with_layer(LayerKind::Template, PolicyLayer::from_keys(["a", "b"], ["c"]))
            .with_layer(LayerKind::User, PolicyLayer::from_keys(["c"], Vec::<&'static str>::new()));

        let effective = evaluate_all(&subject(), &layers).to_effective_set();
        assert!(effective.is_allowed(&key("a")));
        assert!(effective.is_allowed(&key("b")));
        assert!(effective.is_allowed(&key("c")));
        assert!(!effective.is_allowed(&key("d")));
    }

    #[test]
    fn resolve_all_returns_one_decision_per_key_in_order() {
        let layers = PolicyLayers::default()
            .with_layer(LayerKind::Tenant, PolicyLayer::from_keys(["stores.read"], ["users.create"]))
            .with_layer(LayerKind::Store, PolicyLayer::from_keys(["users.create"], Vec::<&'static str>::new()));

        let decisions = resolve_all(&layers);
        let keys: Vec<&str> = decisions.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, ["stores.read", "users.create"]);
        assert!(decisions.iter().all(PermissionDecision::is_allowed));
    }

    #[test]
    fn explain_default_deny() {
        let explanation = explain(&resolve(&PolicyLayers::default(), &key("audit.view")));
        assert!(!explanation.granted);
        assert!(explanation.reason.contains("default deny"));
        assert!(!explanation.suggestions.is_empty());
    }

    #[test]
    fn explain_reports_overridden_deny() {
        let layers = PolicyLayers::default()
            .with_layer(LayerKind::Tenant, PolicyLayer::new().denying("audit.view"))
            .with_layer(LayerKind::User, PolicyLayer::new().allowing("audit.view"));

        let explanation = explain(&resolve(&layers, &key("audit.view")));
        assert!(explanation.granted);
        assert_eq!(explanation.overridden_denies, vec![LayerKind::Tenant]);
        assert!(explanation.reason.contains("tenant"));
    }

    #[test]
    fn explain_denied_by_user_layer_suggests_removal_only() {
        let layers = PolicyLayers::default()
            .with_layer(LayerKind::Template, PolicyLayer::new().allowing("audit.view"))
            .with_layer(LayerKind::User, PolicyLayer::new().denying("audit.view"));

        let explanation = explain(&resolve(&layers, &key("audit.view")));
        assert!(!explanation.granted);
        assert_eq!(explanation.reason, "Denied by the user layer");
        assert_eq!(explanation.suggestions.len(), 1);
    }

    fn layer_strategy() -> impl Strategy<Value = PolicyLayer> {
        let keys = prop::sample::select(vec!["a", "b", "c", "d", "e"]);
        (
            prop::collection::btree_set(keys.clone(), 0..4),
            prop::collection::btree_set(keys, 0..4),
        )
            .prop_map(|(allow, deny)| PolicyLayer::from_keys(allow, deny))
    }

    fn layers_strategy() -> impl Strategy<Value = PolicyLayers> {
        (layer_strategy(), layer_strategy(), layer_strategy(), layer_strategy()).prop_map(
            |(template, tenant, store, user)| PolicyLayers {
                template,
                tenant,
                store,
                user,
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a key no layer allows is always denied.
        #[test]
        fn default_deny_holds(layers in layers_strategy()) {
            let target = key("a");
            let any_allow = layers.iter().any(|(_, l)| l.allow.contains(&target));
            if !any_allow {
                prop_assert!(!resolve(&layers, &target).is_allowed());
            }
        }

        /// Property: the final effect equals the effect of the last contribution.
        #[test]
        fn last_contribution_decides(layers in layers_strategy()) {
            for k in layers.mentioned_keys() {
                let decision = resolve(&layers, &k);
                let last = decision.contributing_layers.last().map(|c| c.effect);
                prop_assert_eq!(last, Some(decision.final_effect));
            }
        }

        /// Property: deny_sources are exactly the layers whose deny set holds the key.
        #[test]
        fn deny_sources_match_layers(layers in layers_strategy()) {
            for k in layers.mentioned_keys() {
                let decision = resolve(&layers, &k);
                let expected: BTreeSet<LayerKind> = layers
                    .iter()
                    .filter(|(_, l)| l.deny.contains(&k))
                    .map(|(kind, _)| kind)
                    .collect();
                prop_assert_eq!(decision.deny_sources, expected);
            }
        }
    }
}
