//! Resources, hierarchy edges, collections and resource policies.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed object owned by exactly one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub resource_type: String,
    pub external_id: Option<String>,
    /// The scope with exclusive authority over this resource.
    pub owner_scope_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        owner_scope_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            external_id: None,
            owner_scope_id: owner_scope_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// The key matched against permission resource patterns.
    pub fn key(&self) -> &str {
        self.external_id.as_deref().unwrap_or(&self.id)
    }

    /// Attribute view used by role-grant conditions: field data overlaid
    /// with the resource's identity fields.
    pub fn attributes(
        &self,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> serde_json::Value {
        let mut view = data.clone();
        view.insert("id".into(), self.id.clone().into());
        view.insert("resourceType".into(), self.resource_type.clone().into());
        view.insert("ownerScopeId".into(), self.owner_scope_id.clone().into());
        if let Some(external_id) = &self.external_id {
            view.insert("externalId".into(), external_id.clone().into());
        }
        serde_json::Value::Object(view)
    }
}

/// A tag attached to a resource: a tag identifier plus its label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTag {
    pub key: String,
    pub label: String,
}

impl ResourceTag {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// Field data and tags of a resource, fetched for match evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSnapshot {
    pub data: serde_json::Map<String, serde_json::Value>,
    pub tags: Vec<ResourceTag>,
}

impl ResourceSnapshot {
    /// Tags as a JSON object mapping each tag key to its labels.
    pub fn tags_value(&self) -> serde_json::Value {
        tags_to_value(&self.tags)
    }
}

/// Build the `{key: [labels]}` view of a tag list used in condition contexts.
pub fn tags_to_value(tags: &[ResourceTag]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for tag in tags {
        let labels = map
            .entry(tag.key.clone())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let serde_json::Value::Array(labels) = labels {
            labels.push(serde_json::Value::String(tag.label.clone()));
        }
    }
    serde_json::Value::Object(map)
}

/// Kind of non-owning association between a resource and a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Share,
    Alias,
    Mirror,
}

/// Associates a resource with a scope other than its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceScopeLink {
    pub resource_id: String,
    pub scope_id: String,
    pub link_type: LinkType,
}

/// Whether a hierarchy edge propagates permissions from parent to child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cascade {
    Inherit,
    None,
    /// Treated as `Inherit`.
    #[default]
    Unset,
}

impl Cascade {
    pub fn propagates(self) -> bool {
        !matches!(self, Cascade::None)
    }
}

/// Directed parent -> child edge between resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyEdge {
    pub parent_id: String,
    pub child_id: String,
    #[serde(default)]
    pub cascade: Cascade,
}

impl HierarchyEdge {
    pub fn new(parent_id: impl Into<String>, child_id: impl Into<String>, cascade: Cascade) -> Self {
        Self {
            parent_id: parent_id.into(),
            child_id: child_id.into(),
            cascade,
        }
    }
}

/// A named, dynamically computed group of resources of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCollection {
    pub id: String,
    pub scope_id: String,
    pub resource_type: String,
    pub name: String,
    /// Raw match definition; parsed at evaluation time.
    pub match_definition: serde_json::Value,
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => f.write_str("allow"),
            Effect::Deny => f.write_str("deny"),
        }
    }
}

/// What a resource policy is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum PolicyTarget {
    Resource(String),
    Collection(String),
}

/// An explicit allow/deny rule on a resource or collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePolicy {
    pub id: String,
    pub target: PolicyTarget,
    /// Actions this policy covers; `*` covers every action.
    pub actions: Vec<String>,
    pub effect: Effect,
    pub subject_condition: Option<serde_json::Value>,
    pub context_condition: Option<serde_json::Value>,
    /// Higher is evaluated first.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl ResourcePolicy {
    pub fn covers(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == "*" || a == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key_prefers_external_id() {
        let plain = Resource::new("r-1", "document", "s1");
        assert_eq!(plain.key(), "r-1");
        let external = plain.with_external_id("docs/handbook");
        assert_eq!(external.key(), "docs/handbook");
    }

    #[test]
    fn test_unset_cascade_propagates() {
        assert!(Cascade::Unset.propagates());
        assert!(Cascade::Inherit.propagates());
        assert!(!Cascade::None.propagates());
    }

    #[test]
    fn test_policy_action_wildcard() {
        let policy = ResourcePolicy {
            id: "p".to_string(),
            target: PolicyTarget::Resource("r".to_string()),
            actions: vec!["*".to_string()],
            effect: Effect::Deny,
            subject_condition: None,
            context_condition: None,
            priority: 0,
            created_at: Utc::now(),
        };
        assert!(policy.covers("delete"));
    }

    #[test]
    fn test_tags_group_labels_by_key() {
        let tags = vec![
            ResourceTag::new("env", "prod"),
            ResourceTag::new("team", "core"),
            ResourceTag::new("env", "eu"),
        ];
        assert_eq!(
            tags_to_value(&tags),
            serde_json::json!({"env": ["prod", "eu"], "team": ["core"]})
        );
    }

    #[test]
    fn test_attributes_cannot_spoof_identity() {
        let resource = Resource::new("doc-1", "document", "s1");
        let mut data = serde_json::Map::new();
        data.insert("id".into(), "other".into());
        data.insert("status".into(), "draft".into());

        let view = resource.attributes(&data);
        assert_eq!(view["id"], "doc-1");
        assert_eq!(view["status"], "draft");
    }

    #[test]
    fn test_cascade_deserializes_missing_as_unset() {
        let edge: HierarchyEdge =
            serde_json::from_str(r#"{"parentId":"f","childId":"d"}"#).unwrap();
        assert_eq!(edge.cascade, Cascade::Unset);
    }
}
