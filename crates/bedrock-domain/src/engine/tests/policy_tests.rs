//! Policy candidates, ranking and collection membership.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use super::mocks::{collection, collection_policy, resource_policy, MockStore};
use crate::condition::{ConditionContext, ConditionEvaluator};
use crate::model::{Effect, LinkType, Resource, ResourceSnapshot, ResourceTag};
use crate::policy::{PolicyContexts, PolicyEvaluator};
use crate::traits::ResourceReader;

fn evaluator(store: &Arc<MockStore>) -> PolicyEvaluator<MockStore> {
    PolicyEvaluator::new(Arc::clone(store), ConditionEvaluator::new())
}

async fn document(store: &MockStore) -> (Resource, ResourceSnapshot) {
    let doc = Resource::new("doc-1", "document", "org");
    store.add_resource(doc.clone()).await;
    let snapshot = store.get_resource_snapshot("doc-1").await.unwrap();
    (doc, snapshot)
}

fn ids(candidates: &[crate::policy::PolicyMatch]) -> Vec<&str> {
    candidates.iter().map(|m| m.policy.id.as_str()).collect()
}

#[tokio::test]
async fn test_candidates_ranked_and_filtered_by_action() {
    let store = Arc::new(MockStore::new());
    let (doc, snapshot) = document(&store).await;
    store
        .add_policy(resource_policy("low", "doc-1", &["read"], Effect::Allow, 1))
        .await;
    store
        .add_policy(resource_policy("high", "doc-1", &["*"], Effect::Deny, 10))
        .await;
    store
        .add_policy(resource_policy("other-action", "doc-1", &["delete"], Effect::Deny, 99))
        .await;
    store
        .add_policy(resource_policy("other-doc", "doc-2", &["read"], Effect::Deny, 99))
        .await;

    let candidates = evaluator(&store)
        .candidates(&doc, &snapshot, "read", "org")
        .await
        .unwrap();
    assert_eq!(ids(&candidates), vec!["high", "low"]);
}

#[tokio::test]
async fn test_equal_priority_older_policy_first() {
    let store = Arc::new(MockStore::new());
    let (doc, snapshot) = document(&store).await;
    let mut newer = resource_policy("a-newer", "doc-1", &["read"], Effect::Deny, 5);
    let mut older = resource_policy("z-older", "doc-1", &["read"], Effect::Allow, 5);
    newer.created_at = Utc::now();
    older.created_at = newer.created_at - Duration::minutes(5);
    store.add_policy(newer).await;
    store.add_policy(older).await;

    let candidates = evaluator(&store)
        .candidates(&doc, &snapshot, "read", "org")
        .await
        .unwrap();
    assert_eq!(ids(&candidates), vec!["z-older", "a-newer"]);
}

#[tokio::test]
async fn test_collection_policies_follow_current_tags() {
    let store = Arc::new(MockStore::new());
    let (doc, _) = document(&store).await;
    store
        .add_collection(collection(
            "confidential",
            "org",
            "document",
            json!({"tags": {"classification": "confidential"}}),
        ))
        .await;
    store
        .add_policy(collection_policy("no-export", "confidential", &["export"], Effect::Deny, 0))
        .await;
    let policies = evaluator(&store);

    let untagged = store.get_resource_snapshot("doc-1").await.unwrap();
    assert!(policies
        .candidates(&doc, &untagged, "export", "org")
        .await
        .unwrap()
        .is_empty());

    store
        .set_tags("doc-1", vec![ResourceTag::new("classification", "confidential")])
        .await;
    let tagged = store.get_resource_snapshot("doc-1").await.unwrap();
    let candidates = policies
        .candidates(&doc, &tagged, "export", "org")
        .await
        .unwrap();
    assert_eq!(ids(&candidates), vec!["no-export"]);
    assert_eq!(candidates[0].collection_id.as_deref(), Some("confidential"));
}

#[tokio::test]
async fn test_collections_of_linked_and_request_scopes_apply() {
    let store = Arc::new(MockStore::new());
    let (doc, snapshot) = document(&store).await;
    store.add_link("doc-1", "partner", LinkType::Share).await;
    for (id, scope) in [("c-owner", "org"), ("c-link", "partner"), ("c-req", "team"), ("c-far", "elsewhere")] {
        store
            .add_collection(collection(id, scope, "document", json!({})))
            .await;
        store
            .add_policy(collection_policy(&format!("p-{id}"), id, &["read"], Effect::Allow, 0))
            .await;
    }
    store
        .add_collection(collection("c-folders", "org", "folder", json!({})))
        .await;
    store
        .add_policy(collection_policy("p-folders", "c-folders", &["read"], Effect::Deny, 50))
        .await;

    let candidates = evaluator(&store)
        .candidates(&doc, &snapshot, "read", "team")
        .await
        .unwrap();
    let mut got = ids(&candidates);
    got.sort_unstable();
    assert_eq!(got, vec!["p-c-link", "p-c-owner", "p-c-req"]);
}

#[tokio::test]
async fn test_invalid_match_definition_matches_nothing() {
    let store = Arc::new(MockStore::new());
    let (doc, snapshot) = document(&store).await;
    store
        .add_collection(collection("typo", "org", "document", json!({"feilds": {}})))
        .await;
    store
        .add_policy(collection_policy("p", "typo", &["read"], Effect::Deny, 0))
        .await;

    let candidates = evaluator(&store)
        .candidates(&doc, &snapshot, "read", "org")
        .await
        .unwrap();
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn test_first_applying_skips_failed_and_malformed_conditions() {
    let store = Arc::new(MockStore::new());
    let (doc, snapshot) = document(&store).await;

    let mut malformed = resource_policy("malformed", "doc-1", &["read"], Effect::Deny, 30);
    malformed.subject_condition = Some(json!({"nope": []}));
    let mut office_hours = resource_policy("office", "doc-1", &["read"], Effect::Deny, 20);
    office_hours.context_condition = Some(json!({"==": [{"var": "ip"}, "10.0.0.1"]}));
    let mut admins = resource_policy("admins", "doc-1", &["read"], Effect::Allow, 10);
    admins.subject_condition = Some(json!({"==": [{"var": "subject.role"}, "admin"]}));
    for p in [malformed, office_hours, admins] {
        store.add_policy(p).await;
    }

    let subject = ConditionContext::new().with("subject", json!({"id": "alice", "role": "admin"}));
    let request = ConditionContext::new().with("ip", json!("192.168.1.1"));
    let decided = evaluator(&store)
        .decide(
            &doc,
            &snapshot,
            "read",
            "org",
            PolicyContexts {
                subject: &subject,
                request: &request,
            },
        )
        .await
        .unwrap()
        .expect("admins policy applies");
    assert_eq!(decided.policy.id, "admins");
}

#[tokio::test]
async fn test_duplicate_policy_ids_are_deduplicated() {
    let store = Arc::new(MockStore::new());
    let (doc, snapshot) = document(&store).await;
    store
        .add_collection(collection("all-a", "org", "document", json!({})))
        .await;
    store
        .add_collection(collection("all-b", "org", "document", json!({})))
        .await;
    store
        .add_policy(collection_policy("shared", "all-a", &["read"], Effect::Allow, 0))
        .await;
    store
        .add_policy(collection_policy("shared", "all-b", &["read"], Effect::Allow, 0))
        .await;

    let candidates = evaluator(&store)
        .candidates(&doc, &snapshot, "read", "org")
        .await
        .unwrap();
    assert_eq!(ids(&candidates), vec!["shared"]);
}
