//! End-to-end decisions through [`DecisionEngine`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::mocks::{collection, collection_policy, resource_policy, MockStore};
use crate::cache::{DecisionCache, DecisionCacheConfig};
use crate::engine::{DecisionEngine, EngineConfig};
use crate::error::DomainError;
use crate::model::{
    Cascade, DecisionMatch, Effect, EvaluationInput, OverrideState, Permission, Resource,
    ResourceRef, ResourceTag, Scope, ScopeMode, Subject, SubjectKind,
};

/// One DEFINE scope `org` with alice as `editor` and bob as nobody.
async fn tenant() -> Arc<MockStore> {
    let store = Arc::new(MockStore::new());
    store.add_scope(Scope::root("org", ScopeMode::Define)).await;
    store.add_user("alice").await;
    store.add_user("bob").await;
    store.add_membership("alice", "org", "editor").await;
    store
}

fn engine(store: &Arc<MockStore>) -> DecisionEngine<MockStore> {
    DecisionEngine::new(Arc::clone(store))
}

fn ask(actor: &str, action: &str, resource_id: &str) -> EvaluationInput {
    EvaluationInput::new(actor, action, "org")
        .with_resource(ResourceRef::by_id("document", resource_id))
}

async fn add_document(store: &MockStore, id: &str) {
    store
        .add_resource(Resource::new(id, "document", "org"))
        .await;
}

// ========== Policy precedence ==========

#[tokio::test]
async fn test_higher_priority_policy_decides() {
    let store = tenant().await;
    add_document(&store, "doc-1").await;
    store
        .add_policy(resource_policy("allow-low", "doc-1", &["read"], Effect::Allow, 1))
        .await;
    store
        .add_policy(resource_policy("deny-high", "doc-1", &["read"], Effect::Deny, 5))
        .await;
    let engine = engine(&store);

    let decision = engine.evaluate(&ask("bob", "read", "doc-1")).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.evaluated_policy.as_deref(), Some("deny-high"));

    store
        .add_policy(resource_policy("allow-top", "doc-1", &["read"], Effect::Allow, 9))
        .await;
    let decision = engine.evaluate(&ask("bob", "read", "doc-1")).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.evaluated_policy.as_deref(), Some("allow-top"));
    assert!(matches!(
        decision.matches.as_slice(),
        [DecisionMatch::Policy { priority: 9, effect: Effect::Allow, .. }]
    ));
}

#[tokio::test]
async fn test_unconditioned_deny_overrides_role_grant() {
    let store = tenant().await;
    add_document(&store, "doc-2").await;
    store
        .grant("editor", Permission::new("doc-delete", "delete", "document", "*"), None)
        .await;
    let engine = engine(&store);

    assert!(engine.evaluate(&ask("alice", "delete", "doc-2")).await.unwrap().allowed);

    store
        .add_policy(resource_policy("no-delete", "doc-2", &["delete"], Effect::Deny, 10))
        .await;
    let decision = engine.evaluate(&ask("alice", "delete", "doc-2")).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.evaluated_policy.as_deref(), Some("no-delete"));
    assert!(decision.explanation.contains("no-delete"));
}

#[tokio::test]
async fn test_malformed_policy_condition_falls_through_to_roles() {
    let store = tenant().await;
    add_document(&store, "doc-1").await;
    store
        .grant("editor", Permission::new("doc-read", "read", "document", "*"), None)
        .await;
    let mut broken = resource_policy("broken", "doc-1", &["read"], Effect::Deny, 100);
    broken.subject_condition = Some(json!({"definitelyNotAnOperator": [1]}));
    store.add_policy(broken).await;

    let decision = engine(&store)
        .evaluate(&ask("alice", "read", "doc-1"))
        .await
        .unwrap();
    assert!(decision.allowed);
    assert!(decision.evaluated_policy.is_none());
}

#[tokio::test]
async fn test_malformed_grant_condition_denies() {
    let store = tenant().await;
    add_document(&store, "doc-1").await;
    store
        .grant(
            "editor",
            Permission::new("doc-read", "read", "document", "*"),
            Some(json!({"==": [{"var": "resource.status"}]})),
        )
        .await;

    let decision = engine(&store)
        .evaluate(&ask("alice", "read", "doc-1"))
        .await
        .unwrap();
    assert!(!decision.allowed);
}

#[tokio::test]
async fn test_policy_context_condition_uses_request_context() {
    let store = tenant().await;
    add_document(&store, "doc-1").await;
    let mut office = resource_policy("office-only", "doc-1", &["read"], Effect::Allow, 0);
    office.context_condition = Some(json!({"startsWith": [{"var": "ip"}, "10."]}));
    store.add_policy(office).await;
    let engine = engine(&store);

    let inside = ask("bob", "read", "doc-1").with_context("ip", json!("10.1.2.3"));
    let outside = ask("bob", "read", "doc-1").with_context("ip", json!("8.8.8.8"));
    assert!(engine.evaluate(&inside).await.unwrap().allowed);
    assert!(!engine.evaluate(&outside).await.unwrap().allowed);
}

// ========== Collections ==========

#[tokio::test]
async fn test_tag_change_applies_collection_policy_immediately() {
    let store = tenant().await;
    add_document(&store, "doc-1").await;
    store
        .grant("editor", Permission::new("doc-share", "share", "document", "*"), None)
        .await;
    store
        .add_collection(collection(
            "restricted",
            "org",
            "document",
            json!({"tags": {"sensitivity": ["restricted", "secret"]}}),
        ))
        .await;
    store
        .add_policy(collection_policy("no-share", "restricted", &["share"], Effect::Deny, 0))
        .await;
    let engine = engine(&store);

    assert!(engine.evaluate(&ask("alice", "share", "doc-1")).await.unwrap().allowed);

    store
        .set_tags("doc-1", vec![ResourceTag::new("sensitivity", "secret")])
        .await;
    let decision = engine.evaluate(&ask("alice", "share", "doc-1")).await.unwrap();
    assert!(!decision.allowed);
    assert!(matches!(
        decision.matches.as_slice(),
        [DecisionMatch::Policy { collection_id: Some(c), .. }] if c == "restricted"
    ));

    store.set_tags("doc-1", Vec::new()).await;
    assert!(engine.evaluate(&ask("alice", "share", "doc-1")).await.unwrap().allowed);
}

// ========== Role grants ==========

#[tokio::test]
async fn test_editor_reads_drafts_only() {
    let store = tenant().await;
    add_document(&store, "doc-1").await;
    store
        .grant(
            "editor",
            Permission::new("doc-read", "read", "document", "*"),
            Some(json!({"==": [{"var": "resource.status"}, "draft"]})),
        )
        .await;
    let engine = engine(&store);

    store.set_field("doc-1", "status", json!("published")).await;
    let decision = engine.evaluate(&ask("alice", "read", "doc-1")).await.unwrap();
    assert!(!decision.allowed);

    store.set_field("doc-1", "status", json!("draft")).await;
    let decision = engine.evaluate(&ask("alice", "read", "doc-1")).await.unwrap();
    assert!(decision.allowed);
    assert!(matches!(
        decision.matches.as_slice(),
        [DecisionMatch::RoleGrant { role_id, conditional: true, .. }] if role_id == "editor"
    ));
}

#[tokio::test]
async fn test_edge_override_off_removes_grant() {
    let store = tenant().await;
    store
        .add_scope(Scope::child("team", "org", ScopeMode::Merge))
        .await;
    store
        .add_resource(Resource::new("doc-1", "document", "team"))
        .await;
    store
        .grant("editor", Permission::new("doc-read", "read", "document", "*"), None)
        .await;
    let engine = engine(&store);
    let input = EvaluationInput::new("alice", "read", "team")
        .with_resource(ResourceRef::by_id("document", "doc-1"));

    assert!(engine.evaluate(&input).await.unwrap().allowed);

    store
        .override_edge("team", "editor", "doc-read", OverrideState::Off, None)
        .await;
    assert!(!engine.evaluate(&input).await.unwrap().allowed);
}

#[tokio::test]
async fn test_request_without_resource_needs_type_wildcard() {
    let store = tenant().await;
    store
        .grant("editor", Permission::new("ws-create", "create", "workspace", "*"), None)
        .await;
    let engine = engine(&store);
    let input = EvaluationInput::new("alice", "create", "org");

    assert!(!engine.evaluate(&input).await.unwrap().allowed);

    store
        .grant("editor", Permission::new("any-create", "create", "*", "*"), None)
        .await;
    assert!(engine.evaluate(&input).await.unwrap().allowed);
}

#[tokio::test]
async fn test_external_id_lookup_and_pattern() {
    let store = tenant().await;
    store
        .add_resource(Resource::new("r-1", "document", "org").with_external_id("handbook/intro"))
        .await;
    store
        .grant("editor", Permission::new("hb-read", "read", "document", "handbook/*"), None)
        .await;
    let engine = engine(&store);

    let by_ext = EvaluationInput::new("alice", "read", "org")
        .with_resource(ResourceRef::by_external_id("document", "handbook/intro"));
    assert!(engine.evaluate(&by_ext).await.unwrap().allowed);

    let wrong_type = EvaluationInput::new("alice", "read", "org")
        .with_resource(ResourceRef::by_external_id("folder", "handbook/intro"));
    assert!(matches!(
        engine.evaluate(&wrong_type).await.unwrap_err(),
        DomainError::ResourceNotFound { reference } if reference == "folder:handbook/intro"
    ));
}

// ========== Hierarchy ==========

async fn folder_with_document(store: &MockStore, cascade: Cascade) {
    store
        .add_resource(Resource::new("folder-F", "folder", "org"))
        .await;
    add_document(store, "doc-D").await;
    store.add_edge("folder-F", "doc-D", cascade).await;
    store
        .grant("editor", Permission::new("folder-read", "read", "folder", "*"), None)
        .await;
}

#[tokio::test]
async fn test_inherit_cascade_grants_child() {
    let store = tenant().await;
    folder_with_document(&store, Cascade::Inherit).await;

    let decision = engine(&store)
        .evaluate(&ask("alice", "read", "doc-D"))
        .await
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.inherited_from.as_deref(), Some("folder-F"));
    assert!(matches!(
        decision.matches.first(),
        Some(DecisionMatch::Inherited { resource_id, depth: 1 }) if resource_id == "folder-F"
    ));
}

#[tokio::test]
async fn test_none_cascade_blocks_child() {
    let store = tenant().await;
    folder_with_document(&store, Cascade::None).await;

    let decision = engine(&store)
        .evaluate(&ask("alice", "read", "doc-D"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert!(decision.inherited_from.is_none());
}

#[tokio::test]
async fn test_none_cascade_blocks_only_its_path() {
    let store = tenant().await;
    folder_with_document(&store, Cascade::None).await;
    store
        .add_resource(Resource::new("folder-G", "folder", "org"))
        .await;
    store.add_edge("folder-G", "doc-D", Cascade::Inherit).await;

    let decision = engine(&store)
        .evaluate(&ask("alice", "read", "doc-D"))
        .await
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.inherited_from.as_deref(), Some("folder-G"));
}

#[tokio::test]
async fn test_resource_policy_beats_inheritance() {
    let store = tenant().await;
    folder_with_document(&store, Cascade::Inherit).await;
    store
        .add_policy(resource_policy("lock", "doc-D", &["*"], Effect::Deny, 0))
        .await;

    let decision = engine(&store)
        .evaluate(&ask("alice", "read", "doc-D"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert!(decision.inherited_from.is_none());
}

#[tokio::test]
async fn test_hierarchy_cycle_is_an_error() {
    let store = tenant().await;
    add_document(&store, "a").await;
    add_document(&store, "b").await;
    store.add_edge("a", "b", Cascade::Inherit).await;
    store.add_edge("b", "a", Cascade::Inherit).await;

    let err = engine(&store)
        .evaluate(&ask("alice", "read", "a"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::CycleDetected { .. }));
}

// ========== Delegation ==========

#[tokio::test]
async fn test_delegation_requires_actor_and_principal() {
    let store = tenant().await;
    add_document(&store, "doc-1").await;
    store
        .add_subject(Subject::new("agent-7", SubjectKind::Agent))
        .await;
    store
        .grant("editor", Permission::new("doc-read", "read", "document", "*"), None)
        .await;
    store
        .grant("assistant", Permission::new("doc-read", "read", "document", "*"), None)
        .await;
    let engine = engine(&store);
    let delegated = ask("agent-7", "read", "doc-1").on_behalf_of("alice");

    // The agent itself holds nothing.
    assert!(!engine.evaluate(&delegated).await.unwrap().allowed);

    store.add_membership("agent-7", "org", "assistant").await;
    let decision = engine.evaluate(&delegated).await.unwrap();
    assert!(decision.allowed);
    let subjects: Vec<_> = decision
        .matches
        .iter()
        .filter_map(|m| match m {
            DecisionMatch::RoleGrant { subject_id, .. } => Some(subject_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(subjects, vec!["agent-7", "alice"]);

    let for_bob = ask("agent-7", "read", "doc-1").on_behalf_of("bob");
    assert!(!engine.evaluate(&for_bob).await.unwrap().allowed);
}

#[tokio::test]
async fn test_policy_subject_condition_sees_principal() {
    let store = tenant().await;
    add_document(&store, "doc-1").await;
    store
        .add_subject(Subject::new("agent-7", SubjectKind::Agent))
        .await;
    let mut no_agents_for_bob = resource_policy("deny-bob", "doc-1", &["read"], Effect::Deny, 0);
    no_agents_for_bob.subject_condition = Some(json!({"==": [{"var": "principal.id"}, "bob"]}));
    store.add_policy(no_agents_for_bob).await;

    let decision = engine(&store)
        .evaluate(&ask("agent-7", "read", "doc-1").on_behalf_of("bob"))
        .await
        .unwrap();
    assert_eq!(decision.evaluated_policy.as_deref(), Some("deny-bob"));
}

// ========== Errors ==========

#[tokio::test]
async fn test_unknown_references_are_errors() {
    let store = tenant().await;
    let engine = engine(&store);

    let err = engine
        .evaluate(&EvaluationInput::new("ghost", "read", "org"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::SubjectNotFound { subject_id } if subject_id == "ghost"));

    let err = engine
        .evaluate(&EvaluationInput::new("alice", "read", "nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ScopeNotFound { .. }));

    let err = engine.evaluate(&ask("alice", "read", "missing")).await.unwrap_err();
    assert!(matches!(err, DomainError::ResourceNotFound { reference } if reference == "document#missing"));

    let err = engine
        .evaluate(&EvaluationInput::new("alice", "read", "org").on_behalf_of("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::SubjectNotFound { .. }));
}

#[tokio::test]
async fn test_blank_fields_are_invalid_input() {
    let store = tenant().await;
    let engine = engine(&store);

    for input in [
        EvaluationInput::new("", "read", "org"),
        EvaluationInput::new("alice", " ", "org"),
        EvaluationInput::new("alice", "read", ""),
        EvaluationInput::new("alice", "read", "org").with_resource(ResourceRef::by_id("document", "")),
    ] {
        assert!(matches!(
            engine.evaluate(&input).await.unwrap_err(),
            DomainError::InvalidInput { .. }
        ));
    }
}

#[tokio::test]
async fn test_store_outage_is_transient_error() {
    let store = tenant().await;
    store.fail_reads(true);

    let err = engine(&store)
        .evaluate(&EvaluationInput::new("alice", "read", "org"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let store = tenant().await;
    store.set_delay(Duration::from_millis(200));
    let engine = DecisionEngine::with_config(
        Arc::clone(&store),
        EngineConfig::default().with_timeout(Duration::from_millis(20)),
    );

    let err = engine
        .evaluate(&EvaluationInput::new("alice", "read", "org"))
        .await
        .unwrap_err();
    assert_eq!(err, DomainError::Timeout { duration_ms: 20 });
}

#[tokio::test]
async fn test_cancellation_aborts_evaluation() {
    let store = tenant().await;
    store.set_delay(Duration::from_millis(200));
    let engine = engine(&store);
    let token = CancellationToken::new();
    let input = EvaluationInput::new("alice", "read", "org");

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let err = engine
        .evaluate_with_cancellation(&input, &token)
        .await
        .unwrap_err();
    assert_eq!(err, DomainError::Cancelled);
}

// ========== Caching ==========

#[tokio::test]
async fn test_cached_decision_skips_store() {
    let store = tenant().await;
    add_document(&store, "doc-1").await;
    let cache = Arc::new(DecisionCache::new(
        DecisionCacheConfig::default().with_enabled(true),
    ));
    let engine = DecisionEngine::with_config(
        Arc::clone(&store),
        EngineConfig::default().with_decision_cache(Arc::clone(&cache)),
    );

    let first = engine.evaluate(&ask("alice", "read", "doc-1")).await.unwrap();
    let reads = store.read_count();
    let second = engine.evaluate(&ask("alice", "read", "doc-1")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.read_count(), reads);

    // Context makes the question uncacheable.
    let contextual = ask("alice", "read", "doc-1").with_context("ip", json!("10.0.0.1"));
    engine.evaluate(&contextual).await.unwrap();
    assert!(store.read_count() > reads);

    cache.invalidate_resource("doc-1").await;
    store
        .grant("editor", Permission::new("doc-read", "read", "document", "*"), None)
        .await;
    assert!(engine.evaluate(&ask("alice", "read", "doc-1")).await.unwrap().allowed);
}

#[tokio::test]
async fn test_invalidation_by_id_drops_external_id_lookups() {
    let store = tenant().await;
    store
        .add_resource(Resource::new("doc-1", "document", "org").with_external_id("docs/guide.md"))
        .await;
    let cache = Arc::new(DecisionCache::new(
        DecisionCacheConfig::default().with_enabled(true),
    ));
    let engine = DecisionEngine::with_config(
        Arc::clone(&store),
        EngineConfig::default().with_decision_cache(Arc::clone(&cache)),
    );
    let by_ext = EvaluationInput::new("alice", "read", "org")
        .with_resource(ResourceRef::by_external_id("document", "docs/guide.md"));

    assert!(!engine.evaluate(&ask("alice", "read", "doc-1")).await.unwrap().allowed);
    assert!(!engine.evaluate(&by_ext).await.unwrap().allowed);

    store
        .grant("editor", Permission::new("doc-read", "read", "document", "*"), None)
        .await;
    cache.invalidate_resource("doc-1").await;

    assert!(engine.evaluate(&ask("alice", "read", "doc-1")).await.unwrap().allowed);
    assert!(engine.evaluate(&by_ext).await.unwrap().allowed);
}

#[tokio::test]
async fn test_errors_are_not_cached() {
    let store = tenant().await;
    let cache = Arc::new(DecisionCache::new(
        DecisionCacheConfig::default().with_enabled(true),
    ));
    let engine = DecisionEngine::with_config(
        Arc::clone(&store),
        EngineConfig::default().with_decision_cache(cache),
    );
    let input = EvaluationInput::new("alice", "read", "org");

    store.fail_reads(true);
    assert!(engine.evaluate(&input).await.is_err());
    store.fail_reads(false);
    assert!(engine.evaluate(&input).await.is_ok());
}
