//! `storedesk-auth`: client-side effective permission engine.
//!
//! Pure functions over immutable snapshots: no IO, no locking, no panics.
//! Safe to call from any thread as long as the snapshot is not mutated
//! concurrently.

pub mod ceiling;
pub mod effective;
pub mod layers;
pub mod permissions;
pub mod preview;
pub mod resolve;
pub mod roles;
pub mod subject;

pub use ceiling::ceiling_violations;
pub use effective::EffectivePermissionSet;
pub use layers::{LayerKind, PolicyLayer, PolicyLayers};
pub use permissions::PermissionKey;
pub use preview::{build_policy_change_preview, requires_confirmation, PolicyChangePreview};
pub use resolve::{
    evaluate, evaluate_all, explain, resolve, resolve_all, DecisionExplanation, Effect, Evaluation,
    LayerContribution, PermissionDecision,
};
pub use roles::Role;
pub use subject::Subject;
