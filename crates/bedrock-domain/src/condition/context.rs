//! Read-only variable bindings for condition evaluation.

use serde_json::{Map, Value};

/// A context for condition evaluation.
///
/// Variables are addressed with dotted paths, e.g. `resource.status` or
/// `subject.groups.0`. Numeric segments index into arrays.
///
/// # Example
///
/// ```ignore
/// use bedrock_domain::condition::ConditionContext;
///
/// let mut ctx = ConditionContext::new();
/// ctx.insert("resource", serde_json::json!({"status": "draft"}));
/// assert_eq!(ctx.lookup("resource.status"), Some(&serde_json::json!("draft")));
/// ```
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConditionContext {
    root: Map<String, Value>,
}

impl ConditionContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing JSON object.
    pub fn from_map(root: Map<String, Value>) -> Self {
        Self { root }
    }

    /// Bind a top-level variable, replacing any previous binding.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.root.insert(name.into(), value);
    }

    /// Builder form of [`ConditionContext::insert`].
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Bind every entry of `values` at the top level.
    pub fn extend<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.root.extend(values);
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Resolve a dotted path.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.root, path)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }
}

/// Resolve a dotted path inside a JSON object.
pub fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
