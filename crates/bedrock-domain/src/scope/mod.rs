//! Scope/role graph resolution.
//!
//! A subject's effective permissions in a scope come from its memberships
//! in the visible scope chain (see [`ScopeResolver::visible_scopes`]),
//! filtered through three tiers of scope overrides and per-edge conditions.

mod overrides;
mod resolver;

pub use overrides::{EdgeResolution, OverrideChain, OverrideTier};
pub use resolver::{PermissionQuery, RoleGrant, ScopeResolver};
