//! Evaluates resources against match definitions.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::definition::{FieldOps, FieldRule, MatchDefinition, PatternRule, TimeBound, TimeRule};
use super::patterns::PatternCache;
use crate::condition::{
    as_timestamp, compare, lookup_path, loose_eq, CompareOp, ConditionContext, ConditionEvaluator,
    MAX_DEPTH,
};
use crate::model::{tags_to_value, Resource, ResourceTag};

/// Decides collection membership at evaluation time.
///
/// Membership is never stored: every call re-reads the data and tags it is
/// given, so a tag change is visible to the very next evaluation. Only the
/// compiled glob and regex patterns are kept between calls.
#[derive(Debug, Clone, Default)]
pub struct CollectionMatcher {
    evaluator: ConditionEvaluator,
    patterns: Arc<PatternCache>,
}

/// The resource under test plus everything a rule may look at.
struct Target<'a> {
    resource: &'a Resource,
    data: &'a Map<String, Value>,
    tags: &'a [ResourceTag],
    now: DateTime<Utc>,
}

impl<'a> Target<'a> {
    /// Field data first, then the resource's built-in attributes.
    fn field(&self, name: &str) -> Option<Cow<'a, Value>> {
        if let Some(v) = lookup_path(self.data, name) {
            return Some(Cow::Borrowed(v));
        }
        let r = self.resource;
        let builtin = match name {
            "id" => Value::String(r.id.clone()),
            "externalId" => Value::String(r.external_id.clone()?),
            "resourceType" => Value::String(r.resource_type.clone()),
            "ownerScopeId" => Value::String(r.owner_scope_id.clone()),
            "createdAt" => Value::String(r.created_at.to_rfc3339()),
            "updatedAt" => Value::String(r.updated_at.to_rfc3339()),
            _ => return None,
        };
        Some(Cow::Owned(builtin))
    }

    fn condition_context(&self) -> ConditionContext {
        ConditionContext::new()
            .with(
                "resource",
                serde_json::to_value(self.resource).unwrap_or_default(),
            )
            .with("data", Value::Object(self.data.clone()))
            .with("tags", tags_to_value(self.tags))
    }
}

impl CollectionMatcher {
    pub fn new(evaluator: ConditionEvaluator) -> Self {
        Self {
            evaluator,
            patterns: Arc::default(),
        }
    }

    pub fn pattern_cache(&self) -> &Arc<PatternCache> {
        &self.patterns
    }

    /// Whether the resource belongs to the collection described by
    /// `definition`, evaluated at the current instant.
    pub fn matches(
        &self,
        resource: &Resource,
        data: &Map<String, Value>,
        tags: &[ResourceTag],
        definition: &Value,
    ) -> bool {
        self.matches_at(resource, data, tags, definition, Utc::now())
    }

    /// Like [`CollectionMatcher::matches`] with an explicit evaluation instant.
    /// Malformed definitions never match.
    pub fn matches_at(
        &self,
        resource: &Resource,
        data: &Map<String, Value>,
        tags: &[ResourceTag],
        definition: &Value,
        now: DateTime<Utc>,
    ) -> bool {
        let definition = match MatchDefinition::from_value(definition) {
            Ok(def) => def,
            Err(err) => {
                debug!(error = %err, resource_id = %resource.id, "malformed match definition");
                return false;
            }
        };
        if definition.depth() > MAX_DEPTH {
            debug!(resource_id = %resource.id, "match definition nested too deeply");
            return false;
        }
        let target = Target {
            resource,
            data,
            tags,
            now,
        };
        self.evaluate(&definition, &target)
    }

    fn evaluate(&self, def: &MatchDefinition, target: &Target<'_>) -> bool {
        def.fields
            .iter()
            .all(|(name, rule)| field_passes(target.field(name).as_deref(), rule))
            && def.tags.iter().all(|(key, rule)| {
                target
                    .tags
                    .iter()
                    .any(|tag| tag.key == *key && rule.accepts(&tag.label))
            })
            && def.patterns.iter().all(|(name, rule)| {
                match target.field(name).as_deref() {
                    Some(Value::String(s)) => self.pattern_passes(rule, s),
                    _ => false,
                }
            })
            && def
                .time
                .iter()
                .all(|(name, rule)| time_passes(target.field(name).as_deref(), rule, target.now))
            && def.all.iter().all(|d| self.evaluate(d, target))
            && (def.any.is_empty() || def.any.iter().any(|d| self.evaluate(d, target)))
            && !def.none.iter().any(|d| self.evaluate(d, target))
            && def
                .condition
                .as_ref()
                .map_or(true, |c| self.evaluator.evaluate(c, &target.condition_context()))
    }

    fn pattern_passes(&self, rule: &PatternRule, value: &str) -> bool {
        match self.patterns.get_or_compile(rule) {
            Ok(compiled) => compiled.is_match(value),
            Err(err) => {
                debug!(error = %err, rule = ?rule, "invalid pattern in match definition");
                false
            }
        }
    }
}

fn field_passes(value: Option<&Value>, rule: &FieldRule) -> bool {
    let value = value.filter(|v| !v.is_null());
    match rule {
        FieldRule::Equals(expected) => value.is_some_and(|v| loose_eq(v, expected)),
        FieldRule::Ops(ops) => ops_pass(value, ops),
    }
}

fn ops_pass(value: Option<&Value>, ops: &FieldOps) -> bool {
    if let Some(exists) = ops.exists {
        if value.is_some() != exists {
            return false;
        }
    }
    let Some(v) = value else {
        // A missing field only satisfies `exists: false`.
        return *ops
            == FieldOps {
                exists: Some(false),
                ..Default::default()
            };
    };
    let ordered = |op: CompareOp, bound: &Option<Value>| {
        bound
            .as_ref()
            .map_or(true, |b| compare(op, v, b).unwrap_or(false))
    };

    ops.eq.as_ref().map_or(true, |e| loose_eq(v, e))
        && ops.ne.as_ref().map_or(true, |e| !loose_eq(v, e))
        && ops
            .in_set
            .as_ref()
            .map_or(true, |set| set.iter().any(|e| loose_eq(v, e)))
        && ops
            .not_in
            .as_ref()
            .map_or(true, |set| !set.iter().any(|e| loose_eq(v, e)))
        && ordered(CompareOp::Gt, &ops.gt)
        && ordered(CompareOp::Ge, &ops.gte)
        && ordered(CompareOp::Lt, &ops.lt)
        && ordered(CompareOp::Le, &ops.lte)
        && ops.contains.as_ref().map_or(true, |needle| match (v, needle) {
            (Value::String(hay), Value::String(n)) => hay.contains(n.as_str()),
            (Value::Array(items), n) => items.iter().any(|i| loose_eq(i, n)),
            _ => false,
        })
}

fn time_passes(value: Option<&Value>, rule: &TimeRule, now: DateTime<Utc>) -> bool {
    let Some(at) = value
        .and_then(Value::as_str)
        .and_then(as_timestamp)
        .map(|t| t.with_timezone(&Utc))
    else {
        return false;
    };
    let check = |bound: &Option<TimeBound>, ok: fn(DateTime<Utc>, DateTime<Utc>) -> bool| {
        bound
            .as_ref()
            .map_or(true, |b| b.resolve(now).is_some_and(|b| ok(at, b)))
    };
    check(&rule.before, |t, b| t < b)
        && check(&rule.after, |t, b| t > b)
        && check(&rule.on_or_before, |t, b| t <= b)
        && check(&rule.on_or_after, |t, b| t >= b)
}
