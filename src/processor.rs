//! Event dispatch.
//!
//! [`RuleProcessor::process`] looks up the rules of the event's scope, then
//! the fallback rules, and applies the first rule whose filter accepts. Rule
//! failures, including panics in custom filters and formatters, are logged
//! and treated as "did not match"; nothing propagates to the caller.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::environment::{Environment, EvalContext};
use crate::error::{EvaluationError, RegistryError, RuleResult, ValidationError};
use crate::property::{resolve_property, EventView, Property};
use crate::registry::{RegisteredRule, RuleList, RuleRegistry};
use crate::rule::{OriginTag, Rule, ScopeKey};
use crate::utterance::{Utterance, UtterancePool, DEFAULT_POOL_CAPACITY};
use crate::value::Value;

/// Processor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Maximum idle utterances kept for reuse; 0 disables pooling.
    pub pool_capacity: usize,
    /// Log every successful match at debug level.
    pub trace_matches: bool,
    /// Derive the scope from the event's `packageName` when the caller gives none.
    pub fallback_to_package_scope: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            trace_matches: false,
            fallback_to_package_scope: true,
        }
    }
}

impl ProcessorConfig {
    /// Parses the JSON form of the configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })
    }
}

/// Caller-supplied context for one event.
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    /// Scope to search before the fallback scope.
    pub scope: Option<ScopeKey>,
    /// Free-form values handed to filters and formatters unmodified.
    pub values: BTreeMap<String, Value>,
}

impl ProcessContext {
    /// An empty context: no scope and no values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scope searched before the fallback rules.
    #[must_use]
    pub fn with_scope(mut self, scope: ScopeKey) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Adds a free-form value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

/// The result of processing one event.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// The rule that was applied, if any.
    pub matched: Option<RegisteredRule>,
    /// The text, metadata and feedback produced; empty when unmatched.
    pub utterance: Utterance,
}

impl ProcessOutcome {
    /// Returns true if a rule was applied.
    #[must_use]
    pub const fn is_matched(&self) -> bool {
        self.matched.is_some()
    }
}

/// Dispatches events to the rules of a [`RuleRegistry`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use speechrules::{
///     Environment, OriginTag, ProcessContext, Property, PropertyBag, Rule, RuleProcessor,
///     RuleRegistry,
/// };
///
/// let processor = RuleProcessor::new(Arc::new(RuleRegistry::new()), Environment::empty());
/// let rule = Rule::builder()
///     .matcher(Property::EventType, "TYPE_VIEW_CLICKED")
///     .template("Clicked %s")
///     .selector("property", "text")
///     .build()
///     .unwrap();
/// processor.load(&OriginTag::new("defaults").unwrap(), [rule]).unwrap();
///
/// let event = PropertyBag::new()
///     .with(Property::EventType, 1)
///     .with(Property::Text, "Send");
/// let outcome = processor.process(&event, &ProcessContext::new());
/// assert!(outcome.is_matched());
/// assert_eq!(outcome.utterance.text(), "Clicked Send");
/// processor.recycle(outcome.utterance);
/// ```
#[derive(Debug)]
pub struct RuleProcessor {
    registry: Arc<RuleRegistry>,
    env: Environment,
    pool: UtterancePool,
    config: ProcessorConfig,
}

impl RuleProcessor {
    /// Creates a processor with the default configuration.
    #[must_use]
    pub fn new(registry: Arc<RuleRegistry>, env: Environment) -> Self {
        Self::with_config(registry, env, ProcessorConfig::default())
    }

    /// Creates a processor with an explicit configuration.
    #[must_use]
    pub fn with_config(registry: Arc<RuleRegistry>, env: Environment, config: ProcessorConfig) -> Self {
        Self {
            registry,
            env,
            pool: UtterancePool::new(config.pool_capacity),
            config,
        }
    }

    /// The registry this processor reads.
    #[must_use]
    pub const fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// The collaborators passed to every rule.
    #[must_use]
    pub const fn environment(&self) -> &Environment {
        &self.env
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Registers `rules` under each rule's own scope.
    ///
    /// Rules sharing a scope keep their relative order. Returns the number of
    /// rules registered.
    pub fn load<I>(&self, origin: &OriginTag, rules: I) -> Result<usize, RegistryError>
    where
        I: IntoIterator<Item = Rule>,
    {
        let mut grouped: BTreeMap<ScopeKey, Vec<Rule>> = BTreeMap::new();
        for rule in rules {
            grouped.entry(rule.scope().clone()).or_default().push(rule);
        }

        let mut added = 0;
        for (scope, rules) in grouped {
            added += self.registry.add_rules(scope, origin, rules)?;
        }
        Ok(added)
    }

    /// Removes every rule registered by `origin`.
    pub fn unload(&self, origin: &OriginTag) -> Result<usize, RegistryError> {
        self.registry.remove_rules_from(origin)
    }

    /// Processes one event into a pooled utterance.
    ///
    /// Hand the utterance back with [`recycle`](Self::recycle) once consumed.
    #[must_use]
    pub fn process(&self, event: &dyn EventView, ctx: &ProcessContext) -> ProcessOutcome {
        let mut utterance = self.pool.obtain();
        let matched = self.process_into(event, ctx, &mut utterance);
        ProcessOutcome { matched, utterance }
    }

    /// Processes one event into a caller-owned utterance.
    pub fn process_into(
        &self,
        event: &dyn EventView,
        ctx: &ProcessContext,
        utterance: &mut Utterance,
    ) -> Option<RegisteredRule> {
        let eval = EvalContext::new(&self.env, &ctx.values);

        if let Some(scope) = self.scope_of(event, ctx).filter(|s| !s.is_fallback()) {
            if let Some(rules) = self.registry.rules_for(&scope) {
                if let Some(matched) = self.try_rules(&rules, event, &eval, utterance) {
                    return Some(matched);
                }
            }
        }

        let fallback = self.registry.rules_for(&ScopeKey::Fallback)?;
        self.try_rules(&fallback, event, &eval, utterance)
    }

    /// Returns an utterance to the pool.
    pub fn recycle(&self, utterance: Utterance) {
        self.pool.recycle(utterance);
    }

    fn scope_of(&self, event: &dyn EventView, ctx: &ProcessContext) -> Option<ScopeKey> {
        if ctx.scope.is_some() || !self.config.fallback_to_package_scope {
            return ctx.scope.clone();
        }
        resolve_property(event, Property::PackageName)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|name| !name.trim().is_empty())
            .map(ScopeKey::Named)
    }

    fn try_rules(
        &self,
        rules: &RuleList,
        event: &dyn EventView,
        ctx: &EvalContext<'_>,
        utterance: &mut Utterance,
    ) -> Option<RegisteredRule> {
        for entry in rules.iter() {
            match try_rule(&entry.rule, event, ctx, utterance) {
                Ok(true) => {
                    if self.config.trace_matches {
                        debug!(rule = %entry.describe(), "speech rule matched");
                    }
                    return Some(entry.clone());
                }
                Ok(false) => {}
                Err(e) => warn!(rule = %entry.describe(), error = %e, "speech rule failed, skipping"),
            }
        }
        None
    }
}

fn try_rule(rule: &Rule, event: &dyn EventView, ctx: &EvalContext<'_>, utterance: &mut Utterance) -> RuleResult<bool> {
    if let Some(filter) = rule.filter() {
        if !guarded(|| filter.accept(event, ctx))? {
            return Ok(false);
        }
    }

    let Some(formatter) = rule.formatter() else {
        rule.apply_metadata(utterance);
        return Ok(true);
    };

    let checkpoint = utterance.clone();
    rule.apply_metadata(utterance);
    if let Err(e) = guarded(|| formatter.format(event, ctx, &mut *utterance)) {
        *utterance = checkpoint;
        return Err(e);
    }
    Ok(true)
}

fn guarded<T>(f: impl FnOnce() -> RuleResult<T>) -> RuleResult<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(EvaluationError::Panicked {
            message: panic_message(payload.as_ref()),
        }
        .into())
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleError;
    use crate::filter::EventFilter;
    use crate::formatter::EventFormatter;
    use crate::property::PropertyBag;
    use crate::utterance::QueueMode;

    fn origin() -> OriginTag {
        OriginTag::new("test").unwrap()
    }

    fn processor() -> RuleProcessor {
        RuleProcessor::new(Arc::new(RuleRegistry::new()), Environment::empty())
    }

    fn clicked(text: &str) -> PropertyBag {
        PropertyBag::new()
            .with(Property::EventType, 1)
            .with(Property::PackageName, "com.example")
            .with(Property::Text, text)
    }

    #[derive(Debug)]
    struct Failing;

    impl EventFilter for Failing {
        fn accept(&self, _event: &dyn EventView, _ctx: &EvalContext<'_>) -> RuleResult<bool> {
            Err(RuleError::filter("backend unavailable"))
        }
    }

    #[derive(Debug)]
    struct Panicking;

    impl EventFormatter for Panicking {
        fn format(&self, _event: &dyn EventView, _ctx: &EvalContext<'_>, utterance: &mut Utterance) -> RuleResult<()> {
            utterance.append("partial");
            panic!("formatter bug");
        }
    }

    #[derive(Debug)]
    struct ContextEcho;

    impl EventFormatter for ContextEcho {
        fn format(&self, _event: &dyn EventView, ctx: &EvalContext<'_>, utterance: &mut Utterance) -> RuleResult<()> {
            let source = ctx.value("source").map(ToString::to_string).unwrap_or_default();
            utterance.append(&source);
            Ok(())
        }
    }

    #[test]
    fn test_first_match_wins() {
        let p = processor();
        let rules = vec![
            Rule::builder().template("first").index(0).build().unwrap(),
            Rule::builder().template("second").index(1).build().unwrap(),
        ];
        p.load(&origin(), rules).unwrap();

        let outcome = p.process(&clicked("x"), &ProcessContext::new());
        assert_eq!(outcome.utterance.text(), "first");
        assert_eq!(outcome.matched.map(|m| m.rule.index()), Some(0));
    }

    #[test]
    fn test_scoped_before_fallback() {
        let p = processor();
        let rules = vec![
            Rule::builder().template("fallback").build().unwrap(),
            Rule::builder()
                .matcher(Property::PackageName, "com.example")
                .template("scoped")
                .build()
                .unwrap(),
        ];
        p.load(&origin(), rules).unwrap();

        let outcome = p.process(&clicked("x"), &ProcessContext::new());
        assert_eq!(outcome.utterance.text(), "scoped");

        let other = PropertyBag::new().with(Property::PackageName, "com.other");
        assert_eq!(p.process(&other, &ProcessContext::new()).utterance.text(), "fallback");
    }

    #[test]
    fn test_explicit_scope_overrides_package() {
        let p = processor();
        let rules = vec![Rule::builder()
            .scope(ScopeKey::named("keyboard").unwrap())
            .template("keyboard")
            .build()
            .unwrap()];
        p.load(&origin(), rules).unwrap();

        let ctx = ProcessContext::new().with_scope(ScopeKey::named("keyboard").unwrap());
        assert_eq!(p.process(&clicked("x"), &ctx).utterance.text(), "keyboard");
        assert!(!p.process(&clicked("x"), &ProcessContext::new()).is_matched());
    }

    #[test]
    fn test_package_scope_can_be_disabled() {
        let config = ProcessorConfig {
            fallback_to_package_scope: false,
            ..ProcessorConfig::default()
        };
        let p = RuleProcessor::with_config(Arc::new(RuleRegistry::new()), Environment::empty(), config);
        let rules = vec![Rule::builder()
            .matcher(Property::PackageName, "com.example")
            .template("scoped")
            .build()
            .unwrap()];
        p.load(&origin(), rules).unwrap();
        assert!(!p.process(&clicked("x"), &ProcessContext::new()).is_matched());
    }

    #[test]
    fn test_unmatched_event() {
        let p = processor();
        p.load(
            &origin(),
            [Rule::builder().matcher(Property::EventType, "8").build().unwrap()],
        )
        .unwrap();
        let outcome = p.process(&clicked("x"), &ProcessContext::new());
        assert!(!outcome.is_matched());
        assert!(outcome.utterance.is_empty());
    }

    #[test]
    fn test_filter_error_is_isolated() {
        let p = processor();
        let rules = vec![
            Rule::builder().filter(Failing).template("broken").build().unwrap(),
            Rule::builder().template("next").build().unwrap(),
        ];
        p.load(&origin(), rules).unwrap();
        assert_eq!(p.process(&clicked("x"), &ProcessContext::new()).utterance.text(), "next");
    }

    #[test]
    fn test_formatter_panic_rolls_back() {
        let p = processor();
        let rules = vec![
            Rule::builder()
                .formatter(Panicking)
                .metadata("queuing", "INTERRUPT")
                .metadata("earcon", "tick")
                .build()
                .unwrap(),
            Rule::builder().template("recovered").build().unwrap(),
        ];
        p.load(&origin(), rules).unwrap();

        let outcome = p.process(&clicked("x"), &ProcessContext::new());
        assert_eq!(outcome.utterance.text(), "recovered");
        assert!(outcome.utterance.metadata().is_empty());
        assert!(outcome.utterance.auditory().is_empty());
    }

    #[test]
    fn test_filter_only_rule_carries_metadata() {
        let p = processor();
        let rule = Rule::builder()
            .matcher(Property::EventType, "TYPE_VIEW_CLICKED")
            .metadata("queuing", "QUEUE")
            .metadata("vibration", "@array/click")
            .build()
            .unwrap();
        p.load(&origin(), [rule]).unwrap();

        let outcome = p.process(&clicked("x"), &ProcessContext::new());
        assert!(outcome.is_matched());
        assert_eq!(outcome.utterance.text(), "");
        assert_eq!(outcome.utterance.queue_mode(), Some(QueueMode::Queue));
        assert!(outcome.utterance.auditory().is_empty());
        assert!(outcome.utterance.haptic().contains("@array/click"));
    }

    #[test]
    fn test_template_mismatch_keeps_metadata() {
        let p = processor();
        let rule = Rule::builder()
            .template("%s of %s")
            .selector("property", "text")
            .metadata("queuing", "UNINTERRUPTIBLE")
            .build()
            .unwrap();
        p.load(&origin(), [rule]).unwrap();

        let outcome = p.process(&clicked("x"), &ProcessContext::new());
        assert!(outcome.is_matched());
        assert_eq!(outcome.utterance.text(), "");
        assert_eq!(outcome.utterance.queue_mode(), Some(QueueMode::Uninterruptible));
    }

    #[test]
    fn test_context_values_pass_through() {
        let p = processor();
        p.load(&origin(), [Rule::builder().formatter(ContextEcho).build().unwrap()])
            .unwrap();
        let ctx = ProcessContext::new().with_value("source", "keyboard");
        assert_eq!(p.process(&clicked("x"), &ctx).utterance.text(), "keyboard");
    }

    #[test]
    fn test_recycled_utterance_is_clean() {
        let p = processor();
        p.load(
            &origin(),
            [Rule::builder()
                .template("%s")
                .selector("property", "text")
                .metadata("queuing", "QUEUE")
                .build()
                .unwrap()],
        )
        .unwrap();

        let outcome = p.process(&clicked("one"), &ProcessContext::new());
        assert_eq!(outcome.utterance.text(), "one");
        p.recycle(outcome.utterance);

        let unmatched = PropertyBag::new();
        p.registry().remove_rules_from(&origin()).unwrap();
        let outcome = p.process(&unmatched, &ProcessContext::new());
        assert!(outcome.utterance.is_empty());
    }

    #[test]
    fn test_unload() {
        let p = processor();
        p.load(&origin(), [Rule::builder().build().unwrap()]).unwrap();
        assert_eq!(p.unload(&origin()).unwrap(), 1);
        assert!(p.registry().is_empty());
    }

    #[test]
    fn test_config_from_json() {
        let config = ProcessorConfig::from_json_str(r#"{"pool_capacity": 0, "trace_matches": true}"#).unwrap();
        assert_eq!(config.pool_capacity, 0);
        assert!(config.trace_matches);
        assert!(config.fallback_to_package_scope);

        assert!(matches!(
            ProcessorConfig::from_json_str(r#"{"pool_size": 4}"#),
            Err(ValidationError::InvalidConfig { .. })
        ));
    }
}
