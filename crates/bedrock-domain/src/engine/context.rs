//! Per-evaluation condition contexts.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::condition::ConditionContext;
use crate::model::{EvaluationInput, Resource, ResourceSnapshot, Subject};

/// Everything known about the request once references are resolved.
pub(crate) struct RequestFacts<'a> {
    pub(crate) input: &'a EvaluationInput,
    pub(crate) actor: &'a Subject,
    pub(crate) principal: Option<&'a Subject>,
    pub(crate) now: DateTime<Utc>,
}

impl RequestFacts<'_> {
    fn now_value(&self) -> Value {
        Value::String(self.now.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    fn request_map(&self) -> Map<String, Value> {
        self.input
            .context
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn principal_value(&self) -> Value {
        self.principal.map_or(Value::Null, Subject::to_value)
    }

    /// Context for policy `contextCondition`: request keys plus `now`.
    pub(crate) fn request_context(&self) -> ConditionContext {
        let mut ctx = ConditionContext::from_map(self.request_map());
        ctx.insert("now", self.now_value());
        ctx
    }

    /// Context for policy `subjectCondition`: `{subject, principal, ...context}`.
    /// `subject` and `principal` cannot be shadowed by request keys.
    pub(crate) fn subject_context(&self) -> ConditionContext {
        let mut ctx = ConditionContext::from_map(self.request_map());
        ctx.insert("subject", self.actor.to_value());
        ctx.insert("principal", self.principal_value());
        ctx
    }

    /// Context for role-grant conditions of `subject`, optionally about a
    /// resource (the target itself or an ancestor).
    pub(crate) fn role_context(
        &self,
        subject: &Subject,
        resource: Option<(&Resource, &ResourceSnapshot)>,
    ) -> ConditionContext {
        let (resource_value, tags) = match resource {
            Some((r, snapshot)) => (r.attributes(&snapshot.data), snapshot.tags_value()),
            None => (Value::Null, Value::Object(Map::new())),
        };
        ConditionContext::new()
            .with("subject", subject.to_value())
            .with("principal", self.principal_value())
            .with("resource", resource_value)
            .with("tags", tags)
            .with("context", Value::Object(self.request_map()))
            .with("now", self.now_value())
            .with("actor_id", Value::String(self.actor.id.clone()))
            .with(
                "principal_id",
                self.principal
                    .map_or(Value::Null, |p| Value::String(p.id.clone())),
            )
    }
}
