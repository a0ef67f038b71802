//! Dynamic resource collections.
//!
//! A collection is a named, scope- and type-scoped group whose membership is
//! computed from a [`MatchDefinition`] each time it is needed.
//!
//! Categories are checked in order (fields, tags, patterns, time,
//! combinators, escape-hatch condition) and joined with AND. Any parse or
//! evaluation failure means "not a member".

mod definition;
mod matcher;
mod patterns;

pub use definition::{
    parse_span, FieldOps, FieldRule, MatchDefinition, PatternRule, RelativeTime, Span, TagRule,
    TimeBound, TimeRule,
};
pub use matcher::CollectionMatcher;
pub use patterns::{CompiledPattern, PatternCache};
