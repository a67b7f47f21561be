//! Rule filters.
//!
//! A filter decides whether a rule applies to an event. [`PropertyFilter`]
//! is the declarative form: a set of [`PropertyMatcher`]s that must all
//! accept. Hosts may also supply their own [`EventFilter`] implementations.

use std::fmt;

use tracing::warn;

use crate::environment::EvalContext;
use crate::error::{RuleResult, ValidationError};
use crate::matcher::PropertyMatcher;
use crate::property::{EventView, Property};

/// Decides whether a rule applies to an event.
///
/// Implementations must not mutate the event or any shared state. Returning
/// an error (or panicking) is treated by the processor as "did not match".
pub trait EventFilter: fmt::Debug + Send + Sync {
    /// Returns true if the rule applies to `event`.
    fn accept(&self, event: &dyn EventView, ctx: &EvalContext<'_>) -> RuleResult<bool>;

    /// Short description used in logs.
    fn describe(&self) -> String {
        "custom".to_string()
    }
}

/// Conjunction of property matchers.
///
/// # Examples
///
/// ```
/// use speechrules::{Environment, EvalContext, Property, PropertyBag, PropertyFilter};
/// use std::collections::BTreeMap;
///
/// let filter = PropertyFilter::new()
///     .with(Property::EventType, "TYPE_VIEW_CLICKED")
///     .with(Property::ItemCount, "> 0");
///
/// let env = Environment::empty();
/// let values = BTreeMap::new();
/// let ctx = EvalContext::new(&env, &values);
///
/// let event = PropertyBag::new()
///     .with(Property::EventType, 1)
///     .with(Property::ItemCount, 3);
/// assert!(filter.accepts(&event, &ctx));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyFilter {
    matchers: Vec<PropertyMatcher>,
    rejected: Vec<ValidationError>,
}

impl PropertyFilter {
    /// An empty filter, which accepts every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a matcher for `property` parsed from `spec`.
    #[must_use]
    pub fn with(self, property: Property, spec: &str) -> Self {
        self.with_matcher(PropertyMatcher::parse(property, spec))
    }

    /// Adds a matcher for a property given by name.
    ///
    /// An unknown name is logged and makes the whole filter reject every event.
    #[must_use]
    pub fn with_named(mut self, name: &str, spec: &str) -> Self {
        match name.parse::<Property>() {
            Ok(property) => self.with(property, spec),
            Err(e) => {
                warn!(property = %name, error = %e, "unknown filter property, rule will never fire");
                self.rejected.push(e);
                self
            }
        }
    }

    /// Adds a pre-built matcher, replacing any earlier matcher on the same property.
    #[must_use]
    pub fn with_matcher(mut self, matcher: PropertyMatcher) -> Self {
        self.matchers.retain(|m| m.property() != matcher.property());
        self.matchers.push(matcher);
        self
    }

    /// The matchers in insertion order.
    #[must_use]
    pub fn matchers(&self) -> &[PropertyMatcher] {
        &self.matchers
    }

    /// The matcher on `property`, if any.
    #[must_use]
    pub fn matcher(&self, property: Property) -> Option<&PropertyMatcher> {
        self.matchers.iter().find(|m| m.property() == property)
    }

    /// Returns true if nothing, not even a rejected property, was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty() && self.rejected.is_empty()
    }

    /// Returns false if any part of the filter was degraded to reject-all.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.rejected.is_empty() && self.matchers.iter().all(|m| m.diagnostic().is_none())
    }

    /// Every construction problem recorded by this filter.
    pub fn diagnostics(&self) -> impl Iterator<Item = &ValidationError> {
        self.rejected
            .iter()
            .chain(self.matchers.iter().filter_map(PropertyMatcher::diagnostic))
    }

    /// The package this filter is restricted to by equality, if any.
    ///
    /// Used as the namespace hint for type resolution and as the default
    /// scope of the owning rule.
    #[must_use]
    pub fn package_name(&self) -> Option<&str> {
        self.matcher(Property::PackageName)
            .and_then(PropertyMatcher::equality_value)
            .and_then(|v| v.as_str())
    }

    /// Evaluates every matcher against `event`; all must accept.
    #[must_use]
    pub fn accepts(&self, event: &dyn EventView, ctx: &EvalContext<'_>) -> bool {
        if !self.rejected.is_empty() {
            return false;
        }
        let namespace = self.package_name();
        self.matchers.iter().all(|m| m.evaluate(event, ctx, namespace))
    }
}

impl EventFilter for PropertyFilter {
    fn accept(&self, event: &dyn EventView, ctx: &EvalContext<'_>) -> RuleResult<bool> {
        Ok(self.accepts(event, ctx))
    }

    fn describe(&self) -> String {
        let mut parts: Vec<String> = self.matchers.iter().map(ToString::to_string).collect();
        parts.extend(self.rejected.iter().map(|e| format!("!{e}")));
        parts.join(",")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::environment::Environment;
    use crate::property::PropertyBag;
    use crate::types::StaticTypeRegistry;

    fn check(filter: &PropertyFilter, env: &Environment, event: &PropertyBag) -> bool {
        let values = BTreeMap::new();
        filter.accepts(event, &EvalContext::new(env, &values))
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = PropertyFilter::new();
        assert!(filter.is_empty());
        assert!(check(&filter, &Environment::empty(), &PropertyBag::new()));
    }

    #[test]
    fn test_all_matchers_must_accept() {
        let filter = PropertyFilter::new()
            .with(Property::EventType, "TYPE_VIEW_FOCUSED")
            .with(Property::Checked, "true");
        let env = Environment::empty();

        let focused_checked = PropertyBag::new()
            .with(Property::EventType, 8)
            .with(Property::Checked, true);
        let focused_unchecked = PropertyBag::new()
            .with(Property::EventType, 8)
            .with(Property::Checked, false);
        let focused_unknown = PropertyBag::new().with(Property::EventType, 8);

        assert!(check(&filter, &env, &focused_checked));
        assert!(!check(&filter, &env, &focused_unchecked));
        assert!(!check(&filter, &env, &focused_unknown));
    }

    #[test]
    fn test_unknown_property_rejects_all() {
        let filter = PropertyFilter::new()
            .with(Property::EventType, "1")
            .with_named("colour", "red");
        assert!(!filter.is_valid());
        assert_eq!(filter.diagnostics().count(), 1);
        let event = PropertyBag::new().with(Property::EventType, 1);
        assert!(!check(&filter, &Environment::empty(), &event));
    }

    #[test]
    fn test_later_matcher_replaces_earlier() {
        let filter = PropertyFilter::new()
            .with(Property::ItemCount, "1")
            .with(Property::ItemCount, "2");
        assert_eq!(filter.matchers().len(), 1);
        let event = PropertyBag::new().with(Property::ItemCount, 2);
        assert!(check(&filter, &Environment::empty(), &event));
    }

    #[test]
    fn test_package_name_is_type_namespace() {
        let types = StaticTypeRegistry::new();
        types.register("android.view.View", None);
        types.register_in("com.example", "Dial", Some("android.view.View"));
        types.register_in("com.example", "FancyDial", Some("Dial"));
        let env = Environment::empty().with_types(Arc::new(types));

        let filter = PropertyFilter::new()
            .with(Property::PackageName, "com.example")
            .with(Property::ClassName, "Dial");
        assert_eq!(filter.package_name(), Some("com.example"));

        let event = PropertyBag::new()
            .with(Property::PackageName, "com.example")
            .with(Property::ClassName, "FancyDial");
        assert!(check(&filter, &env, &event));

        // Without the package constraint "Dial" has no namespace to resolve in.
        let unscoped = PropertyFilter::new().with(Property::ClassName, "Dial");
        assert!(!check(&unscoped, &env, &event));

        let global = PropertyFilter::new().with(Property::ClassName, "android.view.View");
        assert!(check(&global, &env, &event));
    }

    #[test]
    fn test_or_package_is_not_a_namespace() {
        let filter = PropertyFilter::new().with(Property::PackageName, "a||b");
        assert_eq!(filter.package_name(), None);
    }

    #[test]
    fn test_describe() {
        let filter = PropertyFilter::new()
            .with(Property::EventType, "1")
            .with(Property::ItemCount, ">2");
        assert_eq!(filter.describe(), "eventType=1,itemCount>2");
    }
}
