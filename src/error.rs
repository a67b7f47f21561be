//! Error types for speechrules.
//!
//! All errors are strongly typed using thiserror. Construction problems,
//! per-event evaluation problems and registry administration problems are
//! kept in separate enums so callers can match on the stage that failed.

use thiserror::Error;

/// Errors detected while building rules, matchers or formatters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A property name outside the known vocabulary.
    #[error("Unknown property '{name}'")]
    UnknownProperty {
        /// The name as written.
        name: String,
    },

    /// A literal that does not parse as its property's kind.
    #[error("Property '{property}' expects a {expected} literal, got '{literal}'")]
    InvalidLiteral {
        /// Property the literal was written for.
        property: String,
        /// Name of the expected kind.
        expected: &'static str,
        /// The literal as written.
        literal: String,
    },

    /// A `||` disjunction with a blank segment.
    #[error("Property '{property}' has an empty alternative in '{spec}'")]
    EmptyAlternative {
        /// Property the specification was written for.
        property: String,
        /// The full specification.
        spec: String,
    },

    /// An `eventType` name with no known code.
    #[error("Unknown event type '{name}'")]
    UnknownEventType {
        /// The name as written.
        name: String,
    },

    /// A selector kind other than `property`, `split` or `regex`.
    #[error("Unknown selector kind '{kind}'")]
    UnknownSelector {
        /// The kind as written.
        kind: String,
    },

    /// A template with an unsupported or malformed placeholder.
    #[error("Malformed template '{template}': {reason}")]
    InvalidTemplate {
        /// The template source.
        template: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A `queuing` value that names no queue mode.
    #[error("Unknown queue mode '{name}'")]
    UnknownQueueMode {
        /// The mode name as written.
        name: String,
    },

    /// Processor configuration that failed to deserialize.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Deserializer message.
        reason: String,
    },
}

/// Errors raised while evaluating a rule against one event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// The selectors produced a different number of arguments than the template consumes.
    #[error("Template expects {expected} argument(s), selectors produced {actual}")]
    ArgumentMismatch {
        /// Template arity.
        expected: usize,
        /// Arguments produced.
        actual: usize,
    },

    /// A selector pattern that failed to compile on first use.
    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex {
        /// The pattern source.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// A custom filter reported a failure.
    #[error("Filter failed: {message}")]
    Filter {
        /// Failure description.
        message: String,
    },

    /// A formatter reported a failure.
    #[error("Formatter failed: {message}")]
    Formatter {
        /// Failure description.
        message: String,
    },

    /// A filter or formatter panicked.
    #[error("Rule panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

/// Errors reported to callers mutating the rule registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A blank scope name.
    #[error("Invalid scope key: {reason}")]
    InvalidScopeKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// A blank origin tag.
    #[error("Invalid origin tag: {reason}")]
    InvalidOriginTag {
        /// Why the tag was rejected.
        reason: String,
    },

    /// A writer panicked while holding the registry lock.
    #[error("Registry lock poisoned during {context}")]
    Poisoned {
        /// The operation that found the lock poisoned.
        context: &'static str,
    },
}

/// Top-level error type for speechrules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// Construction-time error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Per-event error.
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Registry mutation error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl RuleError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an evaluation error.
    #[must_use]
    pub const fn is_evaluation(&self) -> bool {
        matches!(self, Self::Evaluation(_))
    }

    /// Returns true if this is a registry error.
    #[must_use]
    pub const fn is_registry(&self) -> bool {
        matches!(self, Self::Registry(_))
    }

    /// Creates a filter evaluation error.
    #[must_use]
    pub fn filter(message: impl Into<String>) -> Self {
        Self::Evaluation(EvaluationError::Filter {
            message: message.into(),
        })
    }

    /// Creates a formatter evaluation error.
    #[must_use]
    pub fn formatter(message: impl Into<String>) -> Self {
        Self::Evaluation(EvaluationError::Formatter {
            message: message.into(),
        })
    }
}

/// Result type alias for speechrules operations.
pub type RuleResult<T> = Result<T, RuleError>;
