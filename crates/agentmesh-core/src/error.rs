// Error types for registry domain logic
//
// A ValidationError rejects a registration as a whole: nothing from a
// malformed payload is ever written to storage.

use thiserror::Error;

/// Reasons a registration payload is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Agent ID is empty, too long, or uses characters outside `[a-z0-9-]`.
    #[error("invalid agent id '{0}': expected 1-253 lowercase alphanumerics or '-', starting and ending alphanumeric")]
    InvalidAgentId(String),

    /// Capability name does not match `^[a-zA-Z][a-zA-Z0-9_-]*$`.
    #[error("invalid capability name '{0}'")]
    InvalidCapability(String),

    /// Tool at the given position has no function name.
    #[error("tool #{0} is missing function_name")]
    MissingFunctionName(usize),

    /// Two tools of the same agent share a function name.
    #[error("duplicate function_name '{0}'")]
    DuplicateFunctionName(String),

    /// Tool version is not valid semver.
    #[error("invalid version '{version}' for tool '{function_name}': {reason}")]
    InvalidToolVersion {
        function_name: String,
        version: String,
        reason: String,
    },

    /// Version constraint expression does not parse.
    #[error("invalid version constraint '{constraint}': {reason}")]
    InvalidVersionConstraint { constraint: String, reason: String },

    /// Tag is empty or carries an operator where none is allowed.
    #[error("invalid tag '{0}'")]
    InvalidTag(String),

    /// An OR group has no member a candidate could match (empty, or only `-tag` members).
    #[error("OR group in dependency tags has no tag to match")]
    EmptyTagGroup,

    /// Selector names neither a capability nor any tag.
    #[error("dependency selector needs a capability or at least one tag")]
    EmptySelector,

    /// OR groups and fallback chains expand past the supported limit.
    #[error("dependency expands to more than {limit} alternatives")]
    TooManyAlternatives { limit: usize },

    /// Timeout/eviction thresholds are out of range or inconsistent.
    #[error("invalid health thresholds: {0}")]
    InvalidThresholds(String),

    /// The agent's own tools form a dependency cycle at the capability level.
    #[error("capability dependency cycle: {}", .0.join(" -> "))]
    CapabilityCycle(Vec<String>),

    /// Input exceeds a hard size limit.
    #[error("{field} exceeds limit of {limit}")]
    LimitExceeded { field: &'static str, limit: usize },

    /// A single dependency declaration is malformed.
    #[error("tool '{function_name}' dependency #{index}: {source}")]
    InvalidDependency {
        function_name: String,
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    pub(crate) fn in_dependency(self, function_name: &str, index: usize) -> Self {
        ValidationError::InvalidDependency {
            function_name: function_name.to_string(),
            index,
            source: Box::new(self),
        }
    }
}

/// Result type for validation.
pub type Result<T> = std::result::Result<T, ValidationError>;
