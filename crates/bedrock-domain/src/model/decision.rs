//! Engine input and output values.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::resource::Effect;

/// How the request identifies its target resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceLocator {
    /// Internal resource id.
    Id(String),
    /// Caller-facing id, unique per resource type.
    ExternalId(String),
}

/// Reference to the resource an action targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub resource_type: String,
    pub locator: ResourceLocator,
}

impl ResourceRef {
    pub fn by_id(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            locator: ResourceLocator::Id(id.into()),
        }
    }

    pub fn by_external_id(resource_type: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            locator: ResourceLocator::ExternalId(external_id.into()),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locator {
            ResourceLocator::Id(id) => write!(f, "{}#{}", self.resource_type, id),
            ResourceLocator::ExternalId(ext) => write!(f, "{}:{}", self.resource_type, ext),
        }
    }
}

/// A single authorization question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationInput {
    /// The acting subject id.
    pub actor: String,
    pub action: String,
    pub resource: Option<ResourceRef>,
    pub scope_id: String,
    /// Request context visible to conditions.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// The principal the actor works for, if delegated.
    pub on_behalf_of: Option<String>,
}

impl EvaluationInput {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            resource: None,
            scope_id: scope_id.into(),
            context: HashMap::new(),
            on_behalf_of: None,
        }
    }

    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn on_behalf_of(mut self, principal: impl Into<String>) -> Self {
        self.on_behalf_of = Some(principal.into());
        self
    }
}

/// One contribution to a decision, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DecisionMatch {
    /// A resource policy applied.
    #[serde(rename_all = "camelCase")]
    Policy {
        policy_id: String,
        effect: Effect,
        priority: i32,
        /// Set when the policy targets a collection the resource matched.
        collection_id: Option<String>,
    },
    /// Access inherited from an ancestor resource.
    #[serde(rename_all = "camelCase")]
    Inherited { resource_id: String, depth: u32 },
    /// A role-permission edge granted the action.
    #[serde(rename_all = "camelCase")]
    RoleGrant {
        subject_id: String,
        role_id: String,
        permission_id: String,
        scope_id: String,
        conditional: bool,
    },
}

/// The engine's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub matches: Vec<DecisionMatch>,
    pub evaluated_policy: Option<String>,
    pub inherited_from: Option<String>,
    pub explanation: String,
}

impl Decision {
    pub fn allow(explanation: impl Into<String>) -> Self {
        Self {
            allowed: true,
            matches: Vec::new(),
            evaluated_policy: None,
            inherited_from: None,
            explanation: explanation.into(),
        }
    }

    pub fn deny(explanation: impl Into<String>) -> Self {
        Self {
            allowed: false,
            ..Self::allow(explanation)
        }
    }

    pub fn with_match(mut self, m: DecisionMatch) -> Self {
        self.matches.push(m);
        self
    }
}
