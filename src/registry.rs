//! Rule registry: ordered rule lists keyed by scope.
//!
//! Each scope's list is stored as an immutable shared slice and replaced
//! wholesale on mutation, so a reader holding a snapshot keeps scanning the
//! list it started with while writers publish new ones.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::error::RegistryError;
use crate::rule::{OriginTag, Rule, ScopeKey};

fn lock_err(context: &'static str) -> RegistryError {
    RegistryError::Poisoned { context }
}

/// A rule together with the source that registered it.
#[derive(Debug, Clone)]
pub struct RegisteredRule {
    /// The rule source that registered the rule.
    pub origin: OriginTag,
    /// The registered rule.
    pub rule: Arc<Rule>,
}

impl RegisteredRule {
    /// Description used in logs: origin followed by the rule's own description.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.origin, self.rule.describe())
    }
}

/// An ordered, immutable snapshot of one scope's rules.
pub type RuleList = Arc<[RegisteredRule]>;

/// Thread-safe mapping from scope key to ordered rules.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    scopes: RwLock<HashMap<ScopeKey, RuleList>>,
}

impl RuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `rules` to `scope`, recording `origin` on each.
    ///
    /// Returns the number of rules added.
    pub fn add_rules<I>(&self, scope: ScopeKey, origin: &OriginTag, rules: I) -> Result<usize, RegistryError>
    where
        I: IntoIterator<Item = Rule>,
    {
        if let ScopeKey::Named(name) = &scope {
            if name.trim().is_empty() {
                return Err(RegistryError::InvalidScopeKey {
                    reason: "scope name is empty".to_string(),
                });
            }
        }
        if origin.as_str().trim().is_empty() {
            return Err(RegistryError::InvalidOriginTag {
                reason: "origin tag is empty".to_string(),
            });
        }

        let added: Vec<RegisteredRule> = rules
            .into_iter()
            .map(|rule| RegisteredRule {
                origin: origin.clone(),
                rule: Arc::new(rule),
            })
            .collect();
        let count = added.len();
        if count == 0 {
            return Ok(0);
        }

        let mut scopes = self.scopes.write().map_err(|_| lock_err("registry.add_rules"))?;
        let list: RuleList = match scopes.get(&scope) {
            Some(existing) => existing.iter().cloned().chain(added).collect(),
            None => RuleList::from(added),
        };
        scopes.insert(scope.clone(), list);
        drop(scopes);

        info!(scope = %scope, origin = %origin, count, "speech rules added");
        Ok(count)
    }

    /// Removes every rule registered by `origin`, in every scope.
    ///
    /// Remaining rules keep their relative order. Returns the number removed.
    pub fn remove_rules_from(&self, origin: &OriginTag) -> Result<usize, RegistryError> {
        let mut scopes = self
            .scopes
            .write()
            .map_err(|_| lock_err("registry.remove_rules_from"))?;

        let mut removed = 0;
        scopes.retain(|_, list| {
            let before = list.len();
            if list.iter().any(|r| &r.origin == origin) {
                *list = list.iter().filter(|r| &r.origin != origin).cloned().collect();
            }
            removed += before - list.len();
            !list.is_empty()
        });
        drop(scopes);

        info!(origin = %origin, removed, "speech rules removed");
        Ok(removed)
    }

    /// Removes the entire rule list of `scope`. Returns the number removed.
    pub fn remove_rules_for_scope(&self, scope: &ScopeKey) -> Result<usize, RegistryError> {
        let removed = self
            .scopes
            .write()
            .map_err(|_| lock_err("registry.remove_rules_for_scope"))?
            .remove(scope)
            .map_or(0, |list| list.len());

        info!(scope = %scope, removed, "speech rules removed for scope");
        Ok(removed)
    }

    /// Snapshot of the rules registered under `scope`, in registration order.
    ///
    /// Never fails: a poisoned lock is recovered, since every published list
    /// is complete.
    #[must_use]
    pub fn rules_for(&self, scope: &ScopeKey) -> Option<RuleList> {
        let scopes = self.scopes.read().unwrap_or_else(|poisoned| {
            warn!("registry lock poisoned, reading last published rules");
            poisoned.into_inner()
        });
        scopes.get(scope).cloned()
    }

    /// Scopes that currently have rules.
    #[must_use]
    pub fn scopes(&self) -> Vec<ScopeKey> {
        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<ScopeKey> = scopes.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Total number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|list| list.len())
            .sum()
    }

    /// Returns true if no rules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Property;

    fn tag(name: &str) -> OriginTag {
        OriginTag::new(name).unwrap()
    }

    fn named(scope: &str) -> ScopeKey {
        ScopeKey::named(scope).unwrap()
    }

    fn rules(indexes: &[usize]) -> Vec<Rule> {
        indexes
            .iter()
            .map(|&i| Rule::builder().index(i).build().unwrap())
            .collect()
    }

    fn indexes(list: &RuleList) -> Vec<usize> {
        list.iter().map(|r| r.rule.index()).collect()
    }

    #[test]
    fn test_add_appends_in_order() {
        let registry = RuleRegistry::new();
        assert_eq!(registry.add_rules(named("a"), &tag("one"), rules(&[0, 1])).unwrap(), 2);
        assert_eq!(registry.add_rules(named("a"), &tag("two"), rules(&[2])).unwrap(), 1);

        let list = registry.rules_for(&named("a")).unwrap();
        assert_eq!(indexes(&list), vec![0, 1, 2]);
        assert_eq!(list[2].origin, tag("two"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_remove_by_origin_preserves_order() {
        let registry = RuleRegistry::new();
        registry.add_rules(named("a"), &tag("one"), rules(&[0])).unwrap();
        registry.add_rules(named("a"), &tag("two"), rules(&[1])).unwrap();
        registry.add_rules(named("a"), &tag("one"), rules(&[2])).unwrap();
        registry.add_rules(named("a"), &tag("two"), rules(&[3])).unwrap();
        registry.add_rules(ScopeKey::Fallback, &tag("one"), rules(&[4])).unwrap();

        assert_eq!(registry.remove_rules_from(&tag("one")).unwrap(), 3);
        assert_eq!(indexes(&registry.rules_for(&named("a")).unwrap()), vec![1, 3]);
        assert!(registry.rules_for(&ScopeKey::Fallback).is_none());
        assert_eq!(registry.scopes(), vec![named("a")]);
    }

    #[test]
    fn test_remove_scope() {
        let registry = RuleRegistry::new();
        registry.add_rules(named("a"), &tag("one"), rules(&[0, 1])).unwrap();
        registry.add_rules(named("b"), &tag("one"), rules(&[2])).unwrap();

        assert_eq!(registry.remove_rules_for_scope(&named("a")).unwrap(), 2);
        assert_eq!(registry.remove_rules_for_scope(&named("a")).unwrap(), 0);
        assert!(registry.rules_for(&named("a")).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_survives_mutation() {
        let registry = RuleRegistry::new();
        registry.add_rules(named("a"), &tag("one"), rules(&[0, 1])).unwrap();
        let snapshot = registry.rules_for(&named("a")).unwrap();

        registry.remove_rules_for_scope(&named("a")).unwrap();
        registry.add_rules(named("a"), &tag("two"), rules(&[9])).unwrap();

        assert_eq!(indexes(&snapshot), vec![0, 1]);
        assert_eq!(indexes(&registry.rules_for(&named("a")).unwrap()), vec![9]);
    }

    #[test]
    fn test_invalid_scope_key_is_reported() {
        let registry = RuleRegistry::new();
        let err = registry
            .add_rules(ScopeKey::Named(String::new()), &tag("one"), rules(&[0]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidScopeKey { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_add_creates_nothing() {
        let registry = RuleRegistry::new();
        assert_eq!(registry.add_rules(named("a"), &tag("one"), Vec::new()).unwrap(), 0);
        assert!(registry.scopes().is_empty());
    }

    #[test]
    fn test_describe_includes_origin() {
        let registry = RuleRegistry::new();
        let rule = Rule::builder()
            .matcher(Property::EventType, "8")
            .index(2)
            .build()
            .unwrap();
        registry.add_rules(ScopeKey::Fallback, &tag("default.xml"), [rule]).unwrap();
        let list = registry.rules_for(&ScopeKey::Fallback).unwrap();
        assert_eq!(list[0].describe(), "default.xml #2 scope=<fallback> filter=[eventType=8]");
    }
}
