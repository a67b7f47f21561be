//! Polymorphic type resolution for `className` matching.
//!
//! The engine never loads or inspects host types itself. A [`TypeResolver`]
//! maps a type name (plus a namespace hint) to an opaque [`TypeHandle`], and
//! handles answer the "is-assignable-from" question. [`StaticTypeRegistry`] is
//! a resolver backed by an explicit table of known types and their parents.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

/// An opaque, comparable handle to a resolved type.
pub trait TypeHandle: fmt::Debug + Send + Sync {
    /// The resolved type's name.
    fn name(&self) -> &str;

    /// Returns true if `other` is this type or one of its subtypes.
    fn is_assignable_from(&self, other: &dyn TypeHandle) -> bool;

    /// Upcast used by implementations to recover their concrete handle type.
    fn as_any(&self) -> &dyn Any;
}

/// Resolves type names to handles.
///
/// Implementations are expected to cache failed lookups themselves.
pub trait TypeResolver: Send + Sync {
    /// Resolves `type_name`, using `namespace` as a lookup hint.
    fn resolve(&self, type_name: &str, namespace: Option<&str>) -> Option<Arc<dyn TypeHandle>>;
}

/// A resolver that knows no types. Only literal name equality can match.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTypeResolver;

impl TypeResolver for NoTypeResolver {
    fn resolve(&self, _type_name: &str, _namespace: Option<&str>) -> Option<Arc<dyn TypeHandle>> {
        None
    }
}

/// Handle produced by [`StaticTypeRegistry`]: the type name followed by all
/// of its ancestors, nearest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredType {
    lineage: Vec<String>,
}

impl RegisteredType {
    /// Ancestors of this type, excluding the type itself.
    #[must_use]
    pub fn ancestors(&self) -> &[String] {
        &self.lineage[1..]
    }

    fn descends_from(&self, name: &str) -> bool {
        self.lineage.iter().any(|n| n == name)
    }
}

impl TypeHandle for RegisteredType {
    fn name(&self) -> &str {
        &self.lineage[0]
    }

    fn is_assignable_from(&self, other: &dyn TypeHandle) -> bool {
        match other.as_any().downcast_ref::<Self>() {
            Some(other) => other.descends_from(self.name()),
            None => other.name() == self.name(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type TypeKey = (Option<String>, String);

#[derive(Debug, Default)]
struct RegistryState {
    parents: HashMap<TypeKey, Option<String>>,
    misses: HashSet<TypeKey>,
}

impl RegistryState {
    fn lookup(&self, name: &str, namespace: Option<&str>) -> Option<&Option<String>> {
        if let Some(ns) = namespace {
            if let Some(parent) = self.parents.get(&(Some(ns.to_string()), name.to_string())) {
                return Some(parent);
            }
        }
        self.parents.get(&(None, name.to_string()))
    }
}

// Bounds lineage walks so a parent cycle cannot spin forever.
const MAX_LINEAGE_DEPTH: usize = 64;

/// Default number of failed lookups remembered before the cache is reset.
pub const DEFAULT_MISS_CAPACITY: usize = 1024;

/// A [`TypeResolver`] over an explicit table of types.
///
/// Types may be registered globally or inside a namespace; namespaced entries
/// shadow global ones when the lookup hint matches. Failed lookups are cached
/// until the next registration; the cache holds at most `miss_capacity`
/// entries and starts over when full.
///
/// # Examples
///
/// ```
/// use speechrules::{StaticTypeRegistry, TypeResolver};
///
/// let types = StaticTypeRegistry::new();
/// types.register("android.view.View", None);
/// types.register("android.widget.TextView", Some("android.view.View"));
/// types.register("android.widget.Button", Some("android.widget.TextView"));
///
/// let view = types.resolve("android.view.View", None).unwrap();
/// let button = types.resolve("android.widget.Button", None).unwrap();
/// assert!(view.is_assignable_from(button.as_ref()));
/// assert!(!button.is_assignable_from(view.as_ref()));
/// ```
#[derive(Debug)]
pub struct StaticTypeRegistry {
    state: RwLock<RegistryState>,
    miss_capacity: usize,
}

impl Default for StaticTypeRegistry {
    fn default() -> Self {
        Self {
            state: RwLock::default(),
            miss_capacity: DEFAULT_MISS_CAPACITY,
        }
    }
}

impl StaticTypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many failed lookups are remembered; 0 disables the cache.
    #[must_use]
    pub fn with_miss_capacity(mut self, capacity: usize) -> Self {
        self.miss_capacity = capacity;
        self
    }

    /// Registers a global type with an optional parent type name.
    pub fn register(&self, name: impl Into<String>, parent: Option<&str>) {
        self.insert(None, name.into(), parent);
    }

    /// Registers a type visible under `namespace`.
    pub fn register_in(&self, namespace: impl Into<String>, name: impl Into<String>, parent: Option<&str>) {
        self.insert(Some(namespace.into()), name.into(), parent);
    }

    fn insert(&self, namespace: Option<String>, name: String, parent: Option<&str>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.parents.insert((namespace, name), parent.map(str::to_string));
        state.misses.clear();
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .parents
            .len()
    }

    /// Returns true if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached failed lookups.
    #[must_use]
    pub fn cached_misses(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .misses
            .len()
    }

    fn lineage(state: &RegistryState, name: &str, namespace: Option<&str>) -> Option<Vec<String>> {
        let mut parent = state.lookup(name, namespace)?;
        let mut lineage = vec![name.to_string()];

        while let Some(next) = parent {
            if lineage.len() >= MAX_LINEAGE_DEPTH || lineage.iter().any(|n| n == next) {
                warn!(type_name = %name, "type lineage exceeds depth limit or contains a cycle");
                break;
            }
            lineage.push(next.clone());
            // Unregistered ancestors terminate the chain.
            parent = match state.lookup(next, namespace) {
                Some(p) => p,
                None => break,
            };
        }

        Some(lineage)
    }
}

impl TypeResolver for StaticTypeRegistry {
    fn resolve(&self, type_name: &str, namespace: Option<&str>) -> Option<Arc<dyn TypeHandle>> {
        let key = (namespace.map(str::to_string), type_name.to_string());

        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if state.misses.contains(&key) {
                return None;
            }
            if let Some(lineage) = Self::lineage(&state, type_name, namespace) {
                return Some(Arc::new(RegisteredType { lineage }));
            }
        }

        if self.miss_capacity == 0 {
            return None;
        }
        debug!(type_name, namespace, "type not registered, caching miss");
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.misses.len() >= self.miss_capacity {
            debug!(evicted = state.misses.len(), "type miss cache full, resetting");
            state.misses.clear();
        }
        state.misses.insert(key);
        None
    }
}
