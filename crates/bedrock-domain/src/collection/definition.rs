//! Typed form of a collection match definition.
//!
//! Definitions are stored as JSON on [`ResourceCollection`]. Unknown keys are
//! rejected so that a typo never widens a collection silently.
//!
//! [`ResourceCollection`]: crate::model::ResourceCollection

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A dynamic collection definition. Every present category must pass.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MatchDefinition {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldRule>,
    #[serde(default)]
    pub tags: BTreeMap<String, TagRule>,
    #[serde(default)]
    pub patterns: BTreeMap<String, PatternRule>,
    #[serde(default)]
    pub time: BTreeMap<String, TimeRule>,
    #[serde(default)]
    pub all: Vec<MatchDefinition>,
    #[serde(default)]
    pub any: Vec<MatchDefinition>,
    #[serde(default)]
    pub none: Vec<MatchDefinition>,
    #[serde(default)]
    pub condition: Option<Value>,
}

impl MatchDefinition {
    /// Parse a stored definition.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        // `null` is the empty definition.
        if value.is_null() {
            return Ok(Self::default());
        }
        Self::deserialize(value)
    }

    /// Nesting depth of the combinator tree (a flat definition is 1).
    pub fn depth(&self) -> usize {
        1 + self
            .all
            .iter()
            .chain(&self.any)
            .chain(&self.none)
            .map(MatchDefinition::depth)
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Rule applied to a single field value.
///
/// A non-object rule is equality shorthand. An object must use only the
/// operator keys of [`FieldOps`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    Equals(Value),
    Ops(FieldOps),
}

impl<'de> Deserialize<'de> for FieldRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if !value.is_object() {
            return Ok(FieldRule::Equals(value));
        }
        let ops: FieldOps = serde_json::from_value(value).map_err(D::Error::custom)?;
        if ops == FieldOps::default() {
            return Err(D::Error::custom("field rule has no operators"));
        }
        Ok(FieldRule::Ops(ops))
    }
}

/// Field operators; all present operators must pass.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldOps {
    pub eq: Option<Value>,
    pub ne: Option<Value>,
    #[serde(rename = "in")]
    pub in_set: Option<Vec<Value>>,
    pub not_in: Option<Vec<Value>>,
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
    pub contains: Option<Value>,
    pub exists: Option<bool>,
}

/// Expected label(s) for a tag key. An empty list only requires the key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TagRule {
    Label(String),
    AnyOf(Vec<String>),
}

impl TagRule {
    pub fn accepts(&self, label: &str) -> bool {
        match self {
            TagRule::Label(expected) => expected == label,
            TagRule::AnyOf(expected) => {
                expected.is_empty() || expected.iter().any(|e| e == label)
            }
        }
    }
}

/// Glob or regular-expression match on a string field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatternRule {
    Glob(String),
    Regex(String),
}

/// Bounds on a timestamp field; all present bounds must pass.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimeRule {
    pub before: Option<TimeBound>,
    pub after: Option<TimeBound>,
    pub on_or_before: Option<TimeBound>,
    pub on_or_after: Option<TimeBound>,
}

/// An absolute instant, or an offset from the evaluation instant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TimeBound {
    Absolute(DateTime<Utc>),
    Relative(RelativeTime),
}

impl TimeBound {
    /// Resolve against `now`. Relative bounds move with the evaluation time.
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeBound::Absolute(at) => Some(*at),
            TimeBound::Relative(RelativeTime::Ago(span)) => now.checked_sub_signed(span.0),
            TimeBound::Relative(RelativeTime::FromNow(span)) => now.checked_add_signed(span.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelativeTime {
    Ago(Span),
    FromNow(Span),
}

/// A duration written as `<count><unit>`, unit one of `s m h d w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Span(pub Duration);

impl TryFrom<String> for Span {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        parse_span(&raw).map(Span)
    }
}

/// Parse a relative duration such as `30d` or `12h`.
pub fn parse_span(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{raw}' has no unit"))?;
    let (count, unit) = raw.split_at(split);
    let count: i64 = count
        .parse()
        .map_err(|_| format!("duration '{raw}' has no count"))?;
    let duration = match unit {
        "s" => Duration::try_seconds(count),
        "m" => Duration::try_minutes(count),
        "h" => Duration::try_hours(count),
        "d" => Duration::try_days(count),
        "w" => Duration::try_weeks(count),
        other => return Err(format!("unknown duration unit '{other}'")),
    };
    duration.ok_or_else(|| format!("duration '{raw}' is out of range"))
}
