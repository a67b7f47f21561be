//! # speechrules - A Declarative Speech-Rule Engine
//!
//! speechrules decides, for each incoming event, which rule applies and what
//! should be spoken. Rules pair a predicate over named event properties with a
//! template that turns the event into text, and are dispatched first-match-wins
//! through a two-tier registry: rules for the event's scope, then fallback rules.
//!
//! ## Core Concepts
//!
//! - **EventView**: An event presented as a closed set of typed properties
//! - **PropertyMatcher**: A predicate parsed from text such as `"<= 5"` or `"A||B"`
//! - **Rule**: An optional filter, an optional formatter and static metadata
//! - **RuleRegistry**: Ordered rule lists per scope, safe to mutate during dispatch
//! - **RuleProcessor**: First-match dispatch producing an `Utterance`
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use speechrules::{
//!     Environment, OriginTag, ProcessContext, Property, PropertyBag, QueueMode, Rule,
//!     RuleProcessor, RuleRegistry,
//! };
//!
//! let processor = RuleProcessor::new(Arc::new(RuleRegistry::new()), Environment::empty());
//!
//! let rule = Rule::builder()
//!     .matcher(Property::EventType, "TYPE_VIEW_SCROLLED")
//!     .matcher(Property::ItemCount, "> 0")
//!     .template("Showing items %d to %d of %d")
//!     .selector("property", "fromIndex")
//!     .selector("property", "toIndex")
//!     .selector("property", "itemCount")
//!     .metadata("queuing", "QUEUE")
//!     .build()?;
//! processor.load(&OriginTag::new("defaults")?, [rule])?;
//!
//! let event = PropertyBag::new()
//!     .with(Property::EventType, 0x1000)
//!     .with(Property::FromIndex, 1)
//!     .with(Property::ToIndex, 10)
//!     .with(Property::ItemCount, 42);
//!
//! let outcome = processor.process(&event, &ProcessContext::new());
//! assert_eq!(outcome.utterance.text(), "Showing items 1 to 10 of 42");
//! assert_eq!(outcome.utterance.queue_mode(), Some(QueueMode::Queue));
//! processor.recycle(outcome.utterance);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Values and the event vocabulary
pub mod error;
pub mod property;
pub mod value;

// Evaluation collaborators
pub mod environment;
pub mod types;

// Rule model
pub mod filter;
pub mod formatter;
pub mod matcher;
pub mod rule;
pub mod utterance;

// Dispatch
pub mod processor;
pub mod registry;

// Re-export primary types at crate root for convenience
pub use environment::{
    is_resource_reference, Capabilities, CapabilitySet, Environment, EvalContext, StringResources,
    StringTable,
};
pub use error::{EvaluationError, RegistryError, RuleError, RuleResult, ValidationError};
pub use filter::{EventFilter, PropertyFilter};
pub use formatter::{
    EventFormatter, LazyPattern, Selector, Template, TemplateFormatter, DISABLED_STATE_RESOURCE,
};
pub use matcher::{MatchMode, PropertyMatcher};
pub use processor::{ProcessContext, ProcessOutcome, ProcessorConfig, RuleProcessor};
pub use property::{
    event_type_code, event_type_name, resolve_property, spoken_text, EventView, Property,
    PropertyBag, PropertyKind,
};
pub use registry::{RegisteredRule, RuleList, RuleRegistry};
pub use rule::{OriginTag, Rule, RuleBuilder, ScopeKey};
pub use types::{
    NoTypeResolver, RegisteredType, StaticTypeRegistry, TypeHandle, TypeResolver, DEFAULT_MISS_CAPACITY,
};
pub use utterance::{append_with_separator, Metadata, QueueMode, Utterance, UtterancePool};
pub use value::{TypeRef, Value};
