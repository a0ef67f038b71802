//! End-to-end evaluation tests.
//!
//! Data is written through the `DataStore` API of `MemoryDataStore` and read
//! back by the engine through `DataStoreAdapter`, exactly as an embedding
//! service would wire them.

use std::sync::Arc;

use bedrock_domain::error::DomainError;
use bedrock_domain::model::{DecisionMatch, EvaluationInput, ResourceRef};
use bedrock_server::handlers::{BatchEvaluateRequest, DefinitionError};
use bedrock_server::{ServerConfig, Service};
use bedrock_storage::{
    DataStore, MemoryDataStore, StoredCollection, StoredHierarchyEdge, StoredMembership,
    StoredOverride, StoredPermission, StoredPolicy, StoredResource, StoredRole,
    StoredRolePermission, StoredScope, StoredSubject, StoredTag,
};
use serde_json::json;

// ============================================================
// Fixtures
// ============================================================

fn scope(id: &str, parent: Option<&str>, mode: &str) -> StoredScope {
    StoredScope {
        id: id.to_string(),
        parent_id: parent.map(str::to_string),
        mode: mode.to_string(),
    }
}

fn subject(id: &str, kind: &str) -> StoredSubject {
    StoredSubject {
        id: id.to_string(),
        kind: kind.to_string(),
        attributes: serde_json::Map::new(),
    }
}

fn document(id: &str, status: &str) -> StoredResource {
    let mut resource = StoredResource::new(id, "document", "org");
    resource.data.insert("status".to_string(), json!(status));
    resource
}

fn policy(id: &str, kind: &str, target: &str, action: &str, effect: &str, priority: i32) -> StoredPolicy {
    StoredPolicy {
        id: id.to_string(),
        target_kind: kind.to_string(),
        target_id: target.to_string(),
        actions: vec![action.to_string()],
        effect: effect.to_string(),
        subject_condition: None,
        context_condition: None,
        priority,
        created_at: chrono::Utc::now(),
    }
}

fn input(actor: &str, action: &str, doc: &str) -> EvaluationInput {
    EvaluationInput::new(actor, action, "org").with_resource(ResourceRef::by_id("document", doc))
}

/// Tenant: org (DEFINE) <- team (MERGE). alice is an Editor at org; Editor
/// may read and delete any document, but edit only drafts.
async fn seed(store: &MemoryDataStore) {
    store.put_scope(scope("org", None, "DEFINE")).await.unwrap();
    store
        .put_scope(scope("team", Some("org"), "MERGE"))
        .await
        .unwrap();
    store.put_subject(subject("alice", "user")).await.unwrap();
    store.put_subject(subject("agent-7", "agent")).await.unwrap();
    store
        .put_role(StoredRole {
            id: "editor".to_string(),
            scope_id: "org".to_string(),
            name: "Editor".to_string(),
        })
        .await
        .unwrap();

    for (id, action, condition) in [
        ("doc-read", "read", None),
        ("doc-delete", "delete", None),
        (
            "doc-edit",
            "edit",
            Some(json!({"==": [{"var": "resource.status"}, "draft"]})),
        ),
    ] {
        store
            .put_permission(StoredPermission {
                id: id.to_string(),
                action: action.to_string(),
                resource_type: "document".to_string(),
                resource_pattern: "*".to_string(),
            })
            .await
            .unwrap();
        store
            .put_role_permission(StoredRolePermission {
                role_id: "editor".to_string(),
                permission_id: id.to_string(),
                condition,
            })
            .await
            .unwrap();
    }
    store
        .add_membership(StoredMembership {
            subject_id: "alice".to_string(),
            scope_id: "org".to_string(),
            role_id: "editor".to_string(),
        })
        .await
        .unwrap();

    store.put_resource(document("doc-1", "published")).await.unwrap();
    store.put_resource(document("doc-2", "draft")).await.unwrap();
}

async fn service_with(config: ServerConfig) -> (Arc<MemoryDataStore>, Service<MemoryDataStore>) {
    let store = Arc::new(MemoryDataStore::new());
    seed(&store).await;
    let service = Service::new(Arc::clone(&store), &config);
    (store, service)
}

async fn service() -> (Arc<MemoryDataStore>, Service<MemoryDataStore>) {
    service_with(ServerConfig::default()).await
}

// ============================================================
// Role grants and conditions
// ============================================================

#[tokio::test]
async fn test_editor_condition_follows_resource_status() {
    let (store, service) = service().await;

    let decision = service.evaluate.evaluate(&input("alice", "edit", "doc-1")).await.unwrap();
    assert!(!decision.allowed);

    store.put_resource(document("doc-1", "draft")).await.unwrap();

    let decision = service.evaluate.evaluate(&input("alice", "edit", "doc-1")).await.unwrap();
    assert!(decision.allowed);
    assert!(matches!(
        decision.matches.as_slice(),
        [DecisionMatch::RoleGrant { role_id, permission_id, conditional: true, .. }]
            if role_id == "editor" && permission_id == "doc-edit"
    ));
}

#[tokio::test]
async fn test_role_permission_override_off_in_child_scope() {
    let (store, service) = service().await;
    store
        .put_override(StoredOverride::RolePermission {
            scope_id: "team".to_string(),
            role_id: "editor".to_string(),
            permission_id: "doc-read".to_string(),
            state: "off".to_string(),
            condition: None,
        })
        .await
        .unwrap();

    let in_org = service.evaluate.evaluate(&input("alice", "read", "doc-1")).await.unwrap();
    assert!(in_org.allowed);

    let in_team = EvaluationInput::new("alice", "read", "team")
        .with_resource(ResourceRef::by_id("document", "doc-1"));
    let decision = service.evaluate.evaluate(&in_team).await.unwrap();
    assert!(!decision.allowed);
}

// ============================================================
// Policies and collections
// ============================================================

#[tokio::test]
async fn test_deny_policy_beats_role_grant() {
    let (store, service) = service().await;
    store
        .put_policy(policy("keep-doc-2", "resource", "doc-2", "delete", "deny", 10))
        .await
        .unwrap();

    let decision = service.evaluate.evaluate(&input("alice", "delete", "doc-2")).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.evaluated_policy.as_deref(), Some("keep-doc-2"));

    let other = service.evaluate.evaluate(&input("alice", "delete", "doc-1")).await.unwrap();
    assert!(other.allowed);
}

#[tokio::test]
async fn test_tag_change_flips_collection_policy() {
    let (store, service) = service().await;
    store
        .put_collection(StoredCollection {
            id: "secret-docs".to_string(),
            scope_id: "org".to_string(),
            resource_type: "document".to_string(),
            name: "Secret documents".to_string(),
            match_definition: json!({"tags": {"classification": "secret"}}),
        })
        .await
        .unwrap();
    store
        .put_policy(policy("no-secret-reads", "collection", "secret-docs", "read", "deny", 5))
        .await
        .unwrap();

    let before = service.evaluate.evaluate(&input("alice", "read", "doc-1")).await.unwrap();
    assert!(before.allowed);

    store
        .set_resource_tags(
            "doc-1",
            vec![StoredTag {
                key: "classification".to_string(),
                label: "secret".to_string(),
            }],
        )
        .await
        .unwrap();

    let after = service.evaluate.evaluate(&input("alice", "read", "doc-1")).await.unwrap();
    assert!(!after.allowed);
    assert!(matches!(
        after.matches.first(),
        Some(DecisionMatch::Policy { collection_id: Some(c), .. }) if c == "secret-docs"
    ));
}

// ============================================================
// Hierarchy
// ============================================================

async fn add_folder(store: &MemoryDataStore, cascade: &str) {
    let folder = StoredResource::new("folder-F", "folder", "org");
    store.put_resource(folder).await.unwrap();
    store
        .put_resource(StoredResource::new("doc-D", "report", "org"))
        .await
        .unwrap();
    store
        .put_permission(StoredPermission {
            id: "folder-read".to_string(),
            action: "read".to_string(),
            resource_type: "folder".to_string(),
            resource_pattern: "*".to_string(),
        })
        .await
        .unwrap();
    store
        .put_role(StoredRole {
            id: "reader".to_string(),
            scope_id: "org".to_string(),
            name: "Folder reader".to_string(),
        })
        .await
        .unwrap();
    store
        .put_role_permission(StoredRolePermission {
            role_id: "reader".to_string(),
            permission_id: "folder-read".to_string(),
            condition: None,
        })
        .await
        .unwrap();
    store
        .add_membership(StoredMembership {
            subject_id: "agent-7".to_string(),
            scope_id: "org".to_string(),
            role_id: "reader".to_string(),
        })
        .await
        .unwrap();
    store
        .add_hierarchy_edge(StoredHierarchyEdge {
            parent_id: "folder-F".to_string(),
            child_id: "doc-D".to_string(),
            cascade: cascade.to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_inherited_read_from_folder() {
    let (store, service) = service().await;
    add_folder(&store, "inherit").await;

    let request = EvaluationInput::new("agent-7", "read", "org")
        .with_resource(ResourceRef::by_id("report", "doc-D"));
    let decision = service.evaluate.evaluate(&request).await.unwrap();

    assert!(decision.allowed);
    assert_eq!(decision.inherited_from.as_deref(), Some("folder-F"));
}

#[tokio::test]
async fn test_cascade_none_blocks_inheritance() {
    let (store, service) = service().await;
    add_folder(&store, "none").await;

    let request = EvaluationInput::new("agent-7", "read", "org")
        .with_resource(ResourceRef::by_id("report", "doc-D"));
    let decision = service.evaluate.evaluate(&request).await.unwrap();

    assert!(!decision.allowed);
    assert!(decision.inherited_from.is_none());
}

// ============================================================
// Delegation, lookup by external id and errors
// ============================================================

#[tokio::test]
async fn test_delegate_needs_its_own_grant() {
    let (store, service) = service().await;
    let delegated = input("agent-7", "read", "doc-1").on_behalf_of("alice");

    let decision = service.evaluate.evaluate(&delegated).await.unwrap();
    assert!(!decision.allowed);

    store
        .add_membership(StoredMembership {
            subject_id: "agent-7".to_string(),
            scope_id: "org".to_string(),
            role_id: "editor".to_string(),
        })
        .await
        .unwrap();

    let decision = service.evaluate.evaluate(&delegated).await.unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_lookup_by_external_id() {
    let (store, service) = service().await;
    let mut handbook = document("doc-3", "draft");
    handbook.external_id = Some("handbook/intro".to_string());
    store.put_resource(handbook).await.unwrap();

    let request = EvaluationInput::new("alice", "edit", "org")
        .with_resource(ResourceRef::by_external_id("document", "handbook/intro"));
    assert!(service.evaluate.evaluate(&request).await.unwrap().allowed);

    let wrong_type = EvaluationInput::new("alice", "edit", "org")
        .with_resource(ResourceRef::by_external_id("folder", "handbook/intro"));
    assert!(matches!(
        service.evaluate.evaluate(&wrong_type).await,
        Err(DomainError::ResourceNotFound { .. })
    ));
}

#[tokio::test]
async fn test_unknown_references_are_errors() {
    let (_, service) = service().await;

    assert!(matches!(
        service.evaluate.evaluate(&input("nobody", "read", "doc-1")).await,
        Err(DomainError::SubjectNotFound { .. })
    ));
    let wrong_scope = EvaluationInput::new("alice", "read", "elsewhere");
    assert!(matches!(
        service.evaluate.evaluate(&wrong_scope).await,
        Err(DomainError::ScopeNotFound { .. })
    ));
}

// ============================================================
// Caching and batches
// ============================================================

#[tokio::test]
async fn test_cached_decision_until_invalidated() {
    let mut config = ServerConfig::default();
    config.cache.enabled = true;
    let (store, service) = service_with(config).await;

    let first = service.evaluate.evaluate(&input("alice", "edit", "doc-1")).await.unwrap();
    assert!(!first.allowed);

    store.put_resource(document("doc-1", "draft")).await.unwrap();
    let stale = service.evaluate.evaluate(&input("alice", "edit", "doc-1")).await.unwrap();
    assert!(!stale.allowed);

    let cache = service.engine.config().decision_cache.clone().unwrap();
    cache.invalidate_resource("doc-1").await;

    let fresh = service.evaluate.evaluate(&input("alice", "edit", "doc-1")).await.unwrap();
    assert!(fresh.allowed);
}

#[tokio::test]
async fn test_invalidation_covers_external_id_lookups() {
    let mut config = ServerConfig::default();
    config.cache.enabled = true;
    let (store, service) = service_with(config).await;
    let mut guide = document("doc-1", "published");
    guide.external_id = Some("docs/guide.md".to_string());
    store.put_resource(guide).await.unwrap();
    let by_ext = EvaluationInput::new("alice", "edit", "org")
        .with_resource(ResourceRef::by_external_id("document", "docs/guide.md"));

    assert!(!service.evaluate.evaluate(&by_ext).await.unwrap().allowed);

    let mut draft = document("doc-1", "draft");
    draft.external_id = Some("docs/guide.md".to_string());
    store.put_resource(draft).await.unwrap();
    let cache = service.engine.config().decision_cache.clone().unwrap();
    cache.invalidate_resource("doc-1").await;

    assert!(service.evaluate.evaluate(&by_ext).await.unwrap().allowed);
}

#[tokio::test]
async fn test_policy_written_through_definitions() {
    let (store, service) = service().await;

    let mut broken = policy("keep-doc-2", "resource", "doc-2", "delete", "deny", 10);
    broken.subject_condition = Some(json!({"=": [{"var": "subject.id"}, "alice"]}));
    let err = service.definitions.put_policy(broken).await.unwrap_err();
    assert!(matches!(err, DefinitionError::Invalid(_)));
    assert!(store.list_policies("resource", "doc-2").await.unwrap().is_empty());

    let mut fixed = policy("keep-doc-2", "resource", "doc-2", "delete", "deny", 10);
    fixed.subject_condition = Some(json!({"==": [{"var": "subject.id"}, "alice"]}));
    service.definitions.put_policy(fixed).await.unwrap();

    let decision = service.evaluate.evaluate(&input("alice", "delete", "doc-2")).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.evaluated_policy.as_deref(), Some("keep-doc-2"));
}

#[tokio::test]
async fn test_batch_through_service() {
    let (_, service) = service().await;
    let request = BatchEvaluateRequest::new(vec![
        input("alice", "edit", "doc-2"),
        input("alice", "edit", "doc-1"),
        input("alice", "edit", "doc-2"),
        input("ghost", "read", "doc-1"),
    ]);

    let results = service.batch.evaluate(request).await.unwrap().results;

    assert_eq!(results.len(), 4);
    assert!(results[0].allowed());
    assert!(!results[1].allowed());
    assert_eq!(results[0], results[2]);
    assert!(matches!(
        results[3].error,
        Some(DomainError::SubjectNotFound { .. })
    ));
}
