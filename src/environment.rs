//! Collaborators consulted while evaluating rules.
//!
//! Filters and formatters never reach for global state. Everything outside
//! the event itself (type resolution, capability flags, localized strings and
//! caller-supplied context values) travels in an [`EvalContext`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{NoTypeResolver, TypeResolver};
use crate::value::Value;

/// Answers whether a named capability (for example a platform feature) is
/// available in the current execution environment.
pub trait Capabilities: Send + Sync {
    /// Returns true if the capability called `name` is available.
    fn has_capability(&self, name: &str) -> bool;
}

/// A fixed set of available capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    names: HashSet<String>,
}

impl CapabilitySet {
    /// An empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a capability, returning the set.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl Capabilities for CapabilitySet {
    fn has_capability(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

static RESOURCE_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@([\w.]+:)?\w+/\w+$").expect("static regex"));

/// Returns true if `text` has the shape of a resource reference
/// (`@[package:]type/name`).
#[must_use]
pub fn is_resource_reference(text: &str) -> bool {
    RESOURCE_REFERENCE.is_match(text)
}

/// Resolves resource references in templates and selectors to localized text.
pub trait StringResources: Send + Sync {
    /// Returns the localized string for `reference`, if known.
    fn lookup(&self, reference: &str) -> Option<String>;

    /// Resolves `text` if it is a resource reference, otherwise returns it unchanged.
    fn localize(&self, text: &str) -> String {
        if is_resource_reference(text) {
            if let Some(localized) = self.lookup(text) {
                return localized;
            }
            tracing::warn!(reference = %text, "unresolved string resource");
        }
        text.to_string()
    }
}

/// A resource table keyed by the full reference text (`@string/value_on`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    entries: HashMap<String, String>,
}

impl StringTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, returning the table.
    #[must_use]
    pub fn with(mut self, reference: impl Into<String>, text: impl Into<String>) -> Self {
        self.entries.insert(reference.into(), text.into());
        self
    }
}

impl StringResources for StringTable {
    fn lookup(&self, reference: &str) -> Option<String> {
        self.entries.get(reference).cloned()
    }
}

/// The collaborators shared by every evaluation on one processor.
#[derive(Clone)]
pub struct Environment {
    /// Resolves type names for `className` matching.
    pub types: Arc<dyn TypeResolver>,
    /// Answers `systemFeature` matchers.
    pub capabilities: Arc<dyn Capabilities>,
    /// Localizes templates and resource-reference values.
    pub resources: Arc<dyn StringResources>,
}

impl Environment {
    /// An environment with no known types, no capabilities and no string resources.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            types: Arc::new(NoTypeResolver),
            capabilities: Arc::new(CapabilitySet::new()),
            resources: Arc::new(StringTable::new()),
        }
    }

    /// Replaces the type resolver.
    #[must_use]
    pub fn with_types(mut self, types: Arc<dyn TypeResolver>) -> Self {
        self.types = types;
        self
    }

    /// Replaces the capability source.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Arc<dyn Capabilities>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Replaces the string resources.
    #[must_use]
    pub fn with_resources(mut self, resources: Arc<dyn StringResources>) -> Self {
        self.resources = resources;
        self
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment").finish_non_exhaustive()
    }
}

/// Everything a filter or formatter may consult besides the event.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// The processor's collaborators.
    pub env: &'a Environment,
    /// Free-form caller context, passed through unmodified.
    pub values: &'a BTreeMap<String, Value>,
}

impl<'a> EvalContext<'a> {
    /// Borrows an environment and caller values for one evaluation.
    #[must_use]
    pub const fn new(env: &'a Environment, values: &'a BTreeMap<String, Value>) -> Self {
        Self { env, values }
    }

    /// Looks up a caller-supplied context value.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&'a Value> {
        self.values.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set() {
        let caps: CapabilitySet = ["android.hardware.touchscreen"].into_iter().collect();
        assert!(caps.has_capability("android.hardware.touchscreen"));
        assert!(!caps.has_capability("android.hardware.telephony"));
    }

    #[test]
    fn test_resource_reference_shape() {
        assert!(is_resource_reference("@string/value_checked"));
        assert!(is_resource_reference("@com.example:string/hello"));
        assert!(!is_resource_reference("string/value_checked"));
        assert!(!is_resource_reference("@string"));
        assert!(!is_resource_reference("%1$s checked"));
    }

    #[test]
    fn test_localize() {
        let table = StringTable::new().with("@string/value_checked", "checked");
        assert_eq!(table.localize("@string/value_checked"), "checked");
        assert_eq!(table.localize("@string/missing"), "@string/missing");
        assert_eq!(table.localize("plain text"), "plain text");
    }

    #[test]
    fn test_eval_context_values() {
        let env = Environment::empty();
        let mut values = BTreeMap::new();
        values.insert("source".to_string(), Value::from("keyboard"));
        let ctx = EvalContext::new(&env, &values);
        assert_eq!(ctx.value("source"), Some(&Value::from("keyboard")));
        assert_eq!(ctx.value("missing"), None);
    }
}
