//! Static validation of stored definitions.
//!
//! The evaluation path fails closed on bad data: a malformed condition is
//! `false` and a malformed match definition matches nothing. Writers call
//! these checks up front so that such data is rejected before it is stored:
//! - Condition expressions parse within the depth and node limits
//! - Match definitions have only known keys, bounded nesting, and patterns
//!   that compile
//! - Policies name at least one action and carry valid conditions
//! - Permission resource patterns compile and carry few `**` segments

use serde_json::Value;

use crate::collection::{CompiledPattern, MatchDefinition, PatternRule};
use crate::condition::{Expr, MAX_DEPTH};
use crate::model::{Permission, ResourcePolicy, MAX_RECURSIVE_SEGMENTS};

/// Validation error types
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A condition expression does not parse
    InvalidCondition { location: String, message: String },
    /// A match definition is not well formed
    InvalidMatchDefinition { message: String },
    /// Combinators nest deeper than allowed
    MatchDefinitionTooDeep { depth: usize, max_depth: usize },
    /// A glob or regex in a match definition does not compile
    InvalidPattern {
        field: String,
        pattern: String,
        message: String,
    },
    /// A policy covers no action
    EmptyActions { policy_id: String },
    /// An action name is blank
    BlankAction { policy_id: String },
    /// A permission resource pattern does not compile
    InvalidResourcePattern {
        permission_id: String,
        pattern: String,
    },
    /// A permission resource pattern has too many `**` segments
    TooManyRecursiveSegments {
        permission_id: String,
        count: usize,
        max: usize,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidCondition { location, message } => {
                write!(f, "invalid condition in {}: {}", location, message)
            }
            ValidationError::InvalidMatchDefinition { message } => {
                write!(f, "invalid match definition: {}", message)
            }
            ValidationError::MatchDefinitionTooDeep { depth, max_depth } => write!(
                f,
                "match definition nests {} levels (max: {})",
                depth, max_depth
            ),
            ValidationError::InvalidPattern {
                field,
                pattern,
                message,
            } => write!(
                f,
                "invalid pattern '{}' for field '{}': {}",
                pattern, field, message
            ),
            ValidationError::EmptyActions { policy_id } => {
                write!(f, "policy '{}' covers no actions", policy_id)
            }
            ValidationError::BlankAction { policy_id } => {
                write!(f, "policy '{}' has a blank action", policy_id)
            }
            ValidationError::InvalidResourcePattern {
                permission_id,
                pattern,
            } => write!(
                f,
                "invalid resource pattern '{}' in permission '{}'",
                pattern, permission_id
            ),
            ValidationError::TooManyRecursiveSegments {
                permission_id,
                count,
                max,
            } => write!(
                f,
                "permission '{}' has {} '**' segments (max: {})",
                permission_id, count, max
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, Vec<ValidationError>>;

/// Check that `condition` parses. `location` names it in the error.
pub fn validate_condition(condition: &Value, location: &str) -> Result<(), ValidationError> {
    Expr::parse(condition)
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidCondition {
            location: location.to_string(),
            message: e.to_string(),
        })
}

/// Validate a stored match definition, collecting every problem found.
pub fn validate_match_definition(definition: &Value) -> ValidationResult<()> {
    let parsed = MatchDefinition::from_value(definition).map_err(|e| {
        vec![ValidationError::InvalidMatchDefinition {
            message: e.to_string(),
        }]
    })?;

    let depth = parsed.depth();
    if depth > MAX_DEPTH {
        return Err(vec![ValidationError::MatchDefinitionTooDeep {
            depth,
            max_depth: MAX_DEPTH,
        }]);
    }

    let mut errors = Vec::new();
    check_definition(&parsed, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_definition(def: &MatchDefinition, errors: &mut Vec<ValidationError>) {
    for (field, rule) in &def.patterns {
        let pattern = match rule {
            PatternRule::Glob(p) | PatternRule::Regex(p) => p,
        };
        if let Err(message) = CompiledPattern::compile(rule) {
            errors.push(ValidationError::InvalidPattern {
                field: field.clone(),
                pattern: pattern.clone(),
                message,
            });
        }
    }
    if let Some(condition) = &def.condition {
        if let Err(e) = validate_condition(condition, "match definition") {
            errors.push(e);
        }
    }
    for nested in def.all.iter().chain(&def.any).chain(&def.none) {
        check_definition(nested, errors);
    }
}

/// Validate a resource policy before it is stored.
pub fn validate_policy(policy: &ResourcePolicy) -> ValidationResult<()> {
    let mut errors = Vec::new();

    if policy.actions.is_empty() {
        errors.push(ValidationError::EmptyActions {
            policy_id: policy.id.clone(),
        });
    } else if policy.actions.iter().any(|a| a.trim().is_empty()) {
        errors.push(ValidationError::BlankAction {
            policy_id: policy.id.clone(),
        });
    }

    for (name, condition) in [
        ("subjectCondition", &policy.subject_condition),
        ("contextCondition", &policy.context_condition),
    ] {
        if let Some(condition) = condition {
            if let Err(e) = validate_condition(condition, &format!("policy {} {}", policy.id, name)) {
                errors.push(e);
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a permission's resource pattern.
pub fn validate_permission(permission: &Permission) -> Result<(), ValidationError> {
    let invalid = permission
        .resource_pattern
        .split('/')
        .filter(|seg| *seg != "**")
        .any(|seg| glob::Pattern::new(seg).is_err());
    if invalid {
        return Err(ValidationError::InvalidResourcePattern {
            permission_id: permission.id.clone(),
            pattern: permission.resource_pattern.clone(),
        });
    }
    let recursive = permission
        .resource_pattern
        .split('/')
        .filter(|seg| *seg == "**")
        .count();
    if recursive > MAX_RECURSIVE_SEGMENTS {
        return Err(ValidationError::TooManyRecursiveSegments {
            permission_id: permission.id.clone(),
            count: recursive,
            max: MAX_RECURSIVE_SEGMENTS,
        });
    }
    Ok(())
}
