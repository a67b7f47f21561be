//! Property matchers: the predicate language of rule filters.
//!
//! A matcher is parsed once from an accepted-value specification such as
//! `"<= 5"`, `"TYPE_VIEW_CLICKED||TYPE_VIEW_FOCUSED"` or `"android.widget.Button"`.
//! Parsing never fails: a malformed specification is logged and the matcher
//! degrades to rejecting every value, so a broken rule simply never fires.

use std::cmp::Ordering;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::environment::{Capabilities, EvalContext};
use crate::error::ValidationError;
use crate::property::{event_type_code, resolve_property, EventView, Property, PropertyKind};
use crate::types::TypeResolver;
use crate::value::{TypeRef, Value};

/// Optional sign, digits with an optional fraction, or a bare fraction.
static FLOAT_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+(\.\d+)?|\.\d+)$").expect("static regex"));

const OR_SEPARATOR: &str = "||";

/// How a matcher compares candidate values against its accepted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMode {
    /// The candidate equals the single accepted value.
    Equals,
    /// The candidate is at most the accepted value.
    LessOrEqual,
    /// The candidate is at least the accepted value.
    GreaterOrEqual,
    /// The candidate is below the accepted value.
    LessThan,
    /// The candidate is above the accepted value.
    GreaterThan,
    /// The candidate equals any accepted value.
    Or,
}

impl MatchMode {
    /// Comparison prefixes, longest first so `<=` wins over `<`.
    const PREFIXES: [(&'static str, Self); 4] = [
        ("<=", Self::LessOrEqual),
        (">=", Self::GreaterOrEqual),
        ("<", Self::LessThan),
        (">", Self::GreaterThan),
    ];

    /// Returns true for the ordering comparison modes.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::LessOrEqual | Self::GreaterOrEqual | Self::LessThan | Self::GreaterThan
        )
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::GreaterOrEqual => ordering != Ordering::Less,
            Self::LessThan => ordering == Ordering::Less,
            Self::GreaterThan => ordering == Ordering::Greater,
            Self::Equals | Self::Or => ordering == Ordering::Equal,
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equals => "==",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::Or => "||",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Accepted {
    /// No accepted values: every candidate matches.
    Any,
    Values(Vec<Value>),
    /// Malformed specification: no candidate matches.
    Invalid(ValidationError),
}

/// A single named-property predicate.
///
/// # Examples
///
/// ```
/// use speechrules::{MatchMode, Property, PropertyMatcher, Value};
///
/// let matcher = PropertyMatcher::parse(Property::ItemCount, "<= 5");
/// assert_eq!(matcher.mode(), MatchMode::LessOrEqual);
/// assert!(matcher.accepts_value(Some(&Value::Int(5))));
/// assert!(!matcher.accepts_value(Some(&Value::Int(6))));
/// assert!(!matcher.accepts_value(None));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMatcher {
    property: Property,
    mode: MatchMode,
    accepted: Accepted,
}

impl PropertyMatcher {
    /// A matcher that accepts every value of `property`.
    #[must_use]
    pub const fn wildcard(property: Property) -> Self {
        Self {
            property,
            mode: MatchMode::Equals,
            accepted: Accepted::Any,
        }
    }

    /// Parses an accepted-value specification for `property`.
    ///
    /// Ordering prefixes (`<=`, `>=`, `<`, `>`) are recognised for numeric
    /// properties only. A specification containing `||` is a disjunction of
    /// literals, each trimmed; anything else is a single literal compared for
    /// equality. String-like literals keep their surrounding whitespace.
    #[must_use]
    pub fn parse(property: Property, spec: &str) -> Self {
        let (mode, parsed) = Self::parse_spec(property, spec);
        match parsed {
            Ok(values) => Self {
                property,
                mode,
                accepted: Accepted::Values(values),
            },
            Err(reason) => {
                warn!(
                    property = %property,
                    spec = %spec,
                    error = %reason,
                    "malformed property matcher, rejecting all values"
                );
                Self {
                    property,
                    mode,
                    accepted: Accepted::Invalid(reason),
                }
            }
        }
    }

    fn parse_spec(property: Property, spec: &str) -> (MatchMode, Result<Vec<Value>, ValidationError>) {
        if property.kind().is_numeric() {
            for (prefix, mode) in MatchMode::PREFIXES {
                if let Some(rest) = spec.trim_start().strip_prefix(prefix) {
                    return (mode, parse_literal(property, rest.trim()).map(|v| vec![v]));
                }
            }
        }

        if spec.contains(OR_SEPARATOR) {
            let values = spec
                .split(OR_SEPARATOR)
                .map(str::trim)
                .map(|segment| {
                    if segment.is_empty() {
                        Err(ValidationError::EmptyAlternative {
                            property: property.name().to_string(),
                            spec: spec.to_string(),
                        })
                    } else {
                        parse_literal(property, segment)
                    }
                })
                .collect::<Result<Vec<_>, _>>();
            return (MatchMode::Or, values);
        }

        (MatchMode::Equals, parse_literal(property, spec).map(|v| vec![v]))
    }

    /// The property this matcher reads.
    #[must_use]
    pub const fn property(&self) -> Property {
        self.property
    }

    /// The comparison mode derived at parse time.
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// The parsed accepted values; empty for wildcard and degraded matchers.
    #[must_use]
    pub fn accepted_values(&self) -> &[Value] {
        match &self.accepted {
            Accepted::Values(values) => values,
            Accepted::Any | Accepted::Invalid(_) => &[],
        }
    }

    /// Returns true if this matcher accepts every value.
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self.accepted, Accepted::Any)
    }

    /// Why this matcher rejects everything, if it was degraded at parse time.
    #[must_use]
    pub const fn diagnostic(&self) -> Option<&ValidationError> {
        match &self.accepted {
            Accepted::Invalid(reason) => Some(reason),
            _ => None,
        }
    }

    /// The single accepted value of an equality matcher.
    #[must_use]
    pub fn equality_value(&self) -> Option<&Value> {
        match (&self.accepted, self.mode) {
            (Accepted::Values(values), MatchMode::Equals) => values.first(),
            _ => None,
        }
    }

    /// Tests a plain candidate value.
    ///
    /// Type properties are compared by literal name only here; use
    /// [`accepts_type`](Self::accepts_type) for polymorphic matching.
    #[must_use]
    pub fn accepts_value(&self, value: Option<&Value>) -> bool {
        let values = match &self.accepted {
            Accepted::Any => return true,
            Accepted::Invalid(_) => return false,
            Accepted::Values(values) => values,
        };
        let Some(value) = value else {
            return false;
        };

        let kind = self.property.kind();
        match self.mode {
            MatchMode::Equals | MatchMode::Or => {
                values.iter().any(|accepted| values_equal(kind, accepted, value))
            }
            mode => values
                .first()
                .and_then(|accepted| compare(kind, value, accepted))
                .is_some_and(|ordering| mode.holds(ordering)),
        }
    }

    /// Tests an event's type against the accepted type names.
    ///
    /// A literal name match short-circuits. Otherwise both names are resolved
    /// (the accepted name relative to `filter_namespace`, the event's type
    /// relative to its own namespace) and the event type must be assignable
    /// to the accepted type. `classNameStrict` never consults the resolver.
    /// Unresolvable names do not match.
    #[must_use]
    pub fn accepts_type(
        &self,
        value: Option<&Value>,
        event_namespace: Option<&str>,
        filter_namespace: Option<&str>,
        types: &dyn TypeResolver,
    ) -> bool {
        let values = match &self.accepted {
            Accepted::Any => return true,
            Accepted::Invalid(_) => return false,
            Accepted::Values(values) => values,
        };
        let Some(event_type) = value.and_then(Value::as_str).filter(|s| !s.is_empty()) else {
            return false;
        };
        let event_namespace = value
            .and_then(Value::as_type_ref)
            .and_then(|t| t.namespace.as_deref())
            .or(event_namespace);
        let mut accepted_names = values.iter().filter_map(Value::as_str);
        if accepted_names.clone().any(|accepted| accepted == event_type) {
            return true;
        }
        if self.property == Property::ClassNameStrict {
            return false;
        }

        let Some(event_handle) = types.resolve(event_type, event_namespace) else {
            return false;
        };
        accepted_names.any(|accepted| {
            types
                .resolve(accepted, filter_namespace)
                .is_some_and(|handle| handle.is_assignable_from(event_handle.as_ref()))
        })
    }

    /// Tests whether any accepted capability is available.
    #[must_use]
    pub fn accepts_capability(&self, capabilities: &dyn Capabilities) -> bool {
        match &self.accepted {
            Accepted::Any => true,
            Accepted::Invalid(_) => false,
            Accepted::Values(values) => values
                .iter()
                .filter_map(Value::as_str)
                .any(|name| capabilities.has_capability(name)),
        }
    }

    /// Evaluates this matcher against an event, dispatching on the property kind.
    #[must_use]
    pub fn evaluate(&self, event: &dyn EventView, ctx: &EvalContext<'_>, filter_namespace: Option<&str>) -> bool {
        match self.property.kind() {
            PropertyKind::Capability => self.accepts_capability(ctx.env.capabilities.as_ref()),
            PropertyKind::Type => {
                let value = resolve_property(event, self.property);
                let event_namespace = resolve_property(event, Property::PackageName);
                self.accepts_type(
                    value.as_ref(),
                    event_namespace.as_ref().and_then(Value::as_str),
                    filter_namespace,
                    ctx.env.types.as_ref(),
                )
            }
            _ => self.accepts_value(resolve_property(event, self.property).as_ref()),
        }
    }
}

impl fmt::Display for PropertyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.accepted {
            Accepted::Any => write!(f, "{}=*", self.property),
            Accepted::Invalid(_) => write!(f, "{}=!", self.property),
            Accepted::Values(values) => {
                let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
                match self.mode {
                    MatchMode::Or => write!(f, "{}={}", self.property, rendered.join("||")),
                    MatchMode::Equals => write!(f, "{}={}", self.property, rendered.join("")),
                    mode => write!(f, "{}{}{}", self.property, mode, rendered.join("")),
                }
            }
        }
    }
}

fn invalid_literal(property: Property, literal: &str) -> ValidationError {
    ValidationError::InvalidLiteral {
        property: property.name().to_string(),
        expected: property.kind().literal_name(),
        literal: literal.to_string(),
    }
}

/// Parses one literal of `property`'s declared kind.
///
/// Numeric and boolean literals are trimmed; string, type and capability
/// literals are taken verbatim.
pub(crate) fn parse_literal(property: Property, literal: &str) -> Result<Value, ValidationError> {
    let kind = property.kind();
    let literal = match kind {
        PropertyKind::Integer | PropertyKind::Float | PropertyKind::Boolean => literal.trim(),
        PropertyKind::String | PropertyKind::Type | PropertyKind::Capability => literal,
    };
    match kind {
        PropertyKind::Integer => {
            if let Ok(v) = literal.parse::<i64>() {
                return Ok(Value::Int(v));
            }
            if property == Property::EventType {
                return event_type_code(literal).map(Value::Int).ok_or_else(|| {
                    ValidationError::UnknownEventType {
                        name: literal.to_string(),
                    }
                });
            }
            Err(invalid_literal(property, literal))
        }
        PropertyKind::Float => {
            if !FLOAT_LITERAL.is_match(literal) {
                return Err(invalid_literal(property, literal));
            }
            literal
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| invalid_literal(property, literal))
        }
        PropertyKind::Boolean => Ok(Value::Bool(literal.eq_ignore_ascii_case("true"))),
        PropertyKind::String | PropertyKind::Capability => Ok(Value::String(literal.to_string())),
        PropertyKind::Type => Ok(Value::Type(TypeRef::new(literal))),
    }
}

fn values_equal(kind: PropertyKind, accepted: &Value, candidate: &Value) -> bool {
    match kind {
        PropertyKind::Integer => match (accepted, candidate) {
            (Value::Int(a), Value::Int(b)) => a == b,
            _ => compare(kind, candidate, accepted) == Some(Ordering::Equal),
        },
        PropertyKind::Float => compare(kind, candidate, accepted) == Some(Ordering::Equal),
        PropertyKind::Boolean => accepted.as_bool().is_some() && accepted.as_bool() == candidate.as_bool(),
        PropertyKind::String | PropertyKind::Type | PropertyKind::Capability => {
            matches!((accepted.as_str(), candidate.as_str()), (Some(a), Some(b)) if a == b)
        }
    }
}

/// Orders `candidate` relative to `accepted`; integers compare exactly,
/// everything else as floating point.
fn compare(kind: PropertyKind, candidate: &Value, accepted: &Value) -> Option<Ordering> {
    if kind == PropertyKind::Integer {
        if let (Value::Int(c), Value::Int(a)) = (candidate, accepted) {
            return Some(c.cmp(a));
        }
    }
    candidate.as_float()?.partial_cmp(&accepted.as_float()?)
}
