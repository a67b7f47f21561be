//! Rules: an optional filter, an optional formatter and static metadata.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RuleResult, ValidationError};
use crate::filter::{EventFilter, PropertyFilter};
use crate::formatter::{EventFormatter, Selector, TemplateFormatter};
use crate::matcher::{parse_literal, PropertyMatcher};
use crate::property::Property;
use crate::utterance::{
    Metadata, QueueMode, Utterance, KEY_CUSTOM_EARCON, KEY_CUSTOM_VIBRATION, KEY_EARCON, KEY_QUEUING,
    KEY_VIBRATION,
};
use crate::value::Value;

/// The registry bucket a rule is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKey {
    /// Rules tried when no scoped rule matches.
    Fallback,
    /// Rules for one event source, usually a package name.
    Named(String),
}

impl ScopeKey {
    /// Creates a named scope. The name must not be blank.
    pub fn named(name: impl Into<String>) -> Result<Self, RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidScopeKey {
                reason: "scope name is empty".to_string(),
            });
        }
        Ok(Self::Named(name))
    }

    /// Returns true for the fallback scope.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }

    /// The scope name, or `None` for the fallback scope.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Fallback => None,
            Self::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fallback => f.write_str("<fallback>"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Identifies the rule source that contributed a rule, for bulk removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginTag(String);

impl OriginTag {
    /// Creates an origin tag. The tag must not be blank.
    pub fn new(tag: impl Into<String>) -> Result<Self, RegistryError> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(RegistryError::InvalidOriginTag {
                reason: "origin tag is empty".to_string(),
            });
        }
        Ok(Self(tag))
    }

    /// The tag text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable speech rule.
///
/// A rule without a filter accepts every event. A rule without a formatter
/// only contributes its metadata and feedback.
#[derive(Debug, Clone)]
pub struct Rule {
    scope: ScopeKey,
    filter: Option<Arc<dyn EventFilter>>,
    formatter: Option<Arc<dyn EventFormatter>>,
    metadata: Metadata,
    auditory: Vec<String>,
    haptic: Vec<String>,
    index: usize,
}

impl Rule {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RuleBuilder {
        RuleBuilder::new()
    }

    /// The scope this rule is filed under.
    #[must_use]
    pub const fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    /// The filter, if any.
    #[must_use]
    pub fn filter(&self) -> Option<&dyn EventFilter> {
        self.filter.as_deref()
    }

    /// The formatter, if any.
    #[must_use]
    pub fn formatter(&self) -> Option<&dyn EventFormatter> {
        self.formatter.as_deref()
    }

    /// Static metadata merged into matched utterances.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Auditory feedback resources.
    #[must_use]
    pub fn auditory(&self) -> &[String] {
        &self.auditory
    }

    /// Haptic feedback resources.
    #[must_use]
    pub fn haptic(&self) -> &[String] {
        &self.haptic
    }

    /// Declaration order within the rule source.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Copies this rule's metadata and feedback into `utterance`.
    pub fn apply_metadata(&self, utterance: &mut Utterance) {
        utterance.merge_metadata(&self.metadata);
        for resource in &self.auditory {
            utterance.add_auditory(resource.as_str());
        }
        for resource in &self.haptic {
            utterance.add_haptic(resource.as_str());
        }
    }

    /// Compact description for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        let filter = self
            .filter
            .as_ref()
            .map_or_else(|| "*".to_string(), |f| f.describe());
        format!("#{} scope={} filter=[{}]", self.index, self.scope, filter)
    }
}

/// Builder for [`Rule`].
///
/// Matchers are parsed leniently: a malformed matcher makes the rule never
/// fire but does not fail the build. Malformed formatter parts and metadata
/// do fail the build.
///
/// # Examples
///
/// ```
/// use speechrules::{Property, Rule, ScopeKey};
///
/// let rule = Rule::builder()
///     .matcher(Property::PackageName, "com.android.settings")
///     .matcher(Property::EventType, "TYPE_VIEW_CLICKED")
///     .template("%s selected")
///     .selector("property", "text")
///     .metadata("queuing", "INTERRUPT")
///     .build()
///     .unwrap();
///
/// assert_eq!(rule.scope(), &ScopeKey::Named("com.android.settings".to_string()));
/// ```
#[derive(Debug, Default)]
pub struct RuleBuilder {
    scope: Option<ScopeKey>,
    matchers: PropertyFilter,
    custom_filter: Option<Arc<dyn EventFilter>>,
    template: Option<String>,
    selectors: Vec<Selector>,
    custom_formatter: Option<Arc<dyn EventFormatter>>,
    metadata: Metadata,
    auditory: Vec<String>,
    haptic: Vec<String>,
    index: usize,
    errors: Vec<ValidationError>,
}

impl RuleBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Files the rule under `scope` instead of the derived one.
    #[must_use]
    pub fn scope(mut self, scope: ScopeKey) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Adds a property matcher to the declarative filter.
    #[must_use]
    pub fn matcher(mut self, property: Property, spec: &str) -> Self {
        self.matchers = self.matchers.with(property, spec);
        self
    }

    /// Adds a property matcher by property name.
    #[must_use]
    pub fn matcher_named(mut self, name: &str, spec: &str) -> Self {
        self.matchers = self.matchers.with_named(name, spec);
        self
    }

    /// Adds a pre-built matcher to the declarative filter.
    #[must_use]
    pub fn with_matcher(mut self, matcher: PropertyMatcher) -> Self {
        self.matchers = self.matchers.with_matcher(matcher);
        self
    }

    /// Uses a custom filter instead of the declarative one.
    #[must_use]
    pub fn filter(mut self, filter: impl EventFilter + 'static) -> Self {
        self.custom_filter = Some(Arc::new(filter));
        self
    }

    /// Sets the template, which may be a resource reference.
    #[must_use]
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Appends a selector given by kind name (`property`, `split`, `regex`).
    #[must_use]
    pub fn selector(mut self, kind: &str, value: &str) -> Self {
        match Selector::parse(kind, value) {
            Ok(selector) => self.selectors.push(selector),
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Appends a pre-built selector.
    #[must_use]
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    /// Uses a custom formatter instead of the declarative one.
    #[must_use]
    pub fn formatter(mut self, formatter: impl EventFormatter + 'static) -> Self {
        self.custom_formatter = Some(Arc::new(formatter));
        self
    }

    /// Adds a metadata entry from its textual form.
    ///
    /// `queuing` takes a queue mode name; the feedback keys (`earcon`,
    /// `vibration`, `customEarcon`, `customVibration`) add a feedback
    /// resource; property names are parsed as that property's kind; any other
    /// key is stored as a string.
    #[must_use]
    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        match key {
            KEY_QUEUING => match value.parse::<QueueMode>() {
                Ok(mode) => {
                    self.metadata.insert(key.to_string(), Value::Int(mode.code()));
                }
                Err(e) => self.errors.push(e),
            },
            KEY_EARCON | KEY_CUSTOM_EARCON => self.auditory.push(value.trim().to_string()),
            KEY_VIBRATION | KEY_CUSTOM_VIBRATION => self.haptic.push(value.trim().to_string()),
            _ => match key.parse::<Property>() {
                Ok(property) => match parse_literal(property, value) {
                    Ok(parsed) => {
                        self.metadata.insert(key.to_string(), parsed);
                    }
                    Err(e) => self.errors.push(e),
                },
                Err(_) => {
                    self.metadata.insert(key.to_string(), Value::from(value));
                }
            },
        }
        self
    }

    /// Adds a typed metadata entry as is.
    #[must_use]
    pub fn metadata_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the declaration order index.
    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Build the rule, returning the first construction error found.
    pub fn build(self) -> RuleResult<Rule> {
        if let Some(e) = self.errors.into_iter().next() {
            return Err(e.into());
        }

        let scope = match self.scope {
            Some(scope) => scope,
            None => match self.matchers.package_name() {
                Some(package) if !package.trim().is_empty() => ScopeKey::Named(package.to_string()),
                _ => ScopeKey::Fallback,
            },
        };

        let filter: Option<Arc<dyn EventFilter>> = match self.custom_filter {
            Some(custom) => Some(custom),
            None if self.matchers.is_empty() => None,
            None => Some(Arc::new(self.matchers)),
        };

        let formatter: Option<Arc<dyn EventFormatter>> = match self.custom_formatter {
            Some(custom) => Some(custom),
            None if self.template.is_none() && self.selectors.is_empty() => None,
            None => {
                let mut declarative = TemplateFormatter::new();
                if let Some(template) = &self.template {
                    declarative = declarative.with_template(template)?;
                }
                for selector in self.selectors {
                    declarative = declarative.with_selector(selector);
                }
                Some(Arc::new(declarative))
            }
        };

        Ok(Rule {
            scope,
            filter,
            formatter,
            metadata: self.metadata,
            auditory: self.auditory,
            haptic: self.haptic,
            index: self.index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleError;

    #[test]
    fn test_scope_key_validation() {
        assert!(ScopeKey::named("com.example").is_ok());
        assert!(matches!(
            ScopeKey::named("  "),
            Err(RegistryError::InvalidScopeKey { .. })
        ));
        assert!(matches!(OriginTag::new(""), Err(RegistryError::InvalidOriginTag { .. })));
        assert_eq!(ScopeKey::Fallback.to_string(), "<fallback>");
    }

    #[test]
    fn test_scope_derived_from_package_equality() {
        let rule = Rule::builder()
            .matcher(Property::PackageName, "com.android.phone")
            .build()
            .unwrap();
        assert_eq!(rule.scope(), &ScopeKey::Named("com.android.phone".to_string()));

        let rule = Rule::builder()
            .matcher(Property::PackageName, "a||b")
            .build()
            .unwrap();
        assert!(rule.scope().is_fallback());

        let rule = Rule::builder()
            .matcher(Property::PackageName, "com.android.phone")
            .scope(ScopeKey::Fallback)
            .build()
            .unwrap();
        assert!(rule.scope().is_fallback());
    }

    #[test]
    fn test_bare_rule_has_no_filter_or_formatter() {
        let rule = Rule::builder().build().unwrap();
        assert!(rule.filter().is_none());
        assert!(rule.formatter().is_none());
        assert_eq!(rule.describe(), "#0 scope=<fallback> filter=[*]");
    }

    #[test]
    fn test_malformed_matcher_still_builds() {
        let rule = Rule::builder()
            .matcher(Property::ItemCount, "<= many")
            .build()
            .unwrap();
        assert!(rule.filter().is_some());
    }

    #[test]
    fn test_malformed_formatter_fails_build() {
        let err = Rule::builder().selector("xpath", "//a").build().unwrap_err();
        assert!(err.is_validation());

        let err = Rule::builder().template("%q").build().unwrap_err();
        assert!(matches!(
            err,
            RuleError::Validation(ValidationError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn test_metadata_kinds() {
        let rule = Rule::builder()
            .metadata("queuing", "UNINTERRUPTIBLE")
            .metadata("earcon", "@raw/tick")
            .metadata("customVibration", "pattern_pref")
            .metadata("itemCount", "4")
            .metadata("note", "hello")
            .build()
            .unwrap();
        assert_eq!(
            rule.metadata().get("queuing"),
            Some(&Value::Int(QueueMode::Uninterruptible.code()))
        );
        assert_eq!(rule.metadata().get("itemCount"), Some(&Value::Int(4)));
        assert_eq!(rule.metadata().get("note"), Some(&Value::from("hello")));
        assert_eq!(rule.auditory(), ["@raw/tick".to_string()]);
        assert_eq!(rule.haptic(), ["pattern_pref".to_string()]);

        let mut utterance = Utterance::new();
        rule.apply_metadata(&mut utterance);
        assert_eq!(utterance.queue_mode(), Some(QueueMode::Uninterruptible));
        assert!(utterance.auditory().contains("@raw/tick"));
    }

    #[test]
    fn test_bad_metadata_fails_build() {
        assert!(Rule::builder().metadata("queuing", "SOMETIMES").build().is_err());
        assert!(matches!(
            Rule::builder().metadata("itemCount", "four").build(),
            Err(RuleError::Validation(ValidationError::InvalidLiteral { .. }))
        ));
        assert!(matches!(
            Rule::builder().metadata("eventType", "TYPE_BOGUS").build(),
            Err(RuleError::Validation(ValidationError::UnknownEventType { .. }))
        ));
    }

    #[test]
    fn test_metadata_literals_are_not_matcher_specs() {
        let rule = Rule::builder()
            .metadata("itemCount", " 7 ")
            .metadata("text", "a||b")
            .metadata("eventType", "TYPE_VIEW_FOCUSED")
            .build()
            .unwrap();
        assert_eq!(rule.metadata().get("itemCount"), Some(&Value::Int(7)));
        assert_eq!(rule.metadata().get("text"), Some(&Value::from("a||b")));
        assert_eq!(rule.metadata().get("eventType"), Some(&Value::Int(8)));
    }

    #[test]
    fn test_describe_lists_matchers() {
        let rule = Rule::builder()
            .matcher(Property::EventType, "TYPE_VIEW_CLICKED")
            .index(4)
            .build()
            .unwrap();
        assert_eq!(rule.describe(), "#4 scope=<fallback> filter=[eventType=1]");
    }
}
