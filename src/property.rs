//! The closed vocabulary of event properties.
//!
//! Rules refer to event properties by name. Every name maps to exactly one
//! [`Property`] with a fixed [`PropertyKind`], so matching and formatting are
//! total functions over a known vocabulary. Hosts present events through the
//! [`EventView`] trait; [`PropertyBag`] is a map-backed implementation.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value::Value;

/// The value kind a property is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// A signed integer.
    Integer,
    /// A floating-point number.
    Float,
    /// A boolean flag.
    Boolean,
    /// Text compared verbatim.
    String,
    /// A type name matched polymorphically through a `TypeResolver`.
    Type,
    /// A named capability of the execution environment; never read from the event.
    Capability,
}

impl PropertyKind {
    /// Returns true for kinds that support ordering comparisons.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    /// Returns the literal name used in diagnostics.
    #[must_use]
    pub const fn literal_name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Type => "type name",
            Self::Capability => "capability name",
        }
    }
}

/// A well-known event property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Property {
    /// Integer event type code; matchers also accept `TYPE_*` names.
    EventType,
    /// Package of the event source.
    PackageName,
    /// Class of the event source, matched polymorphically.
    ClassName,
    /// Class of the event source, matched by exact name only.
    ClassNameStrict,
    /// Event text.
    Text,
    /// Text before a text change.
    BeforeText,
    /// Content description of the source.
    ContentDescription,
    /// Text if non-empty, otherwise the content description.
    ContentDescriptionOrText,
    /// Event timestamp.
    EventTime,
    /// Number of items in the source.
    ItemCount,
    /// Index of the current item.
    CurrentItemIndex,
    /// First visible item index.
    FromIndex,
    /// Last visible item index.
    ToIndex,
    /// Whether the source scrolls.
    Scrollable,
    /// Horizontal scroll offset.
    ScrollX,
    /// Vertical scroll offset.
    ScrollY,
    /// Number of attached records.
    RecordCount,
    /// Whether the source is checked.
    Checked,
    /// Whether the source is enabled.
    Enabled,
    /// Whether the source is full screen.
    FullScreen,
    /// Whether the source is a password field.
    Password,
    /// Characters added by a text change.
    AddedCount,
    /// Characters removed by a text change.
    RemovedCount,
    /// Version code of the source package.
    VersionCode,
    /// Version name of the source package.
    VersionName,
    /// Platform release name.
    PlatformRelease,
    /// Platform SDK level.
    PlatformSdk,
    /// A capability of the execution environment.
    SystemFeature,
}

impl Property {
    /// Every property, in declaration order.
    pub const ALL: [Self; 28] = [
        Self::EventType,
        Self::PackageName,
        Self::ClassName,
        Self::ClassNameStrict,
        Self::Text,
        Self::BeforeText,
        Self::ContentDescription,
        Self::ContentDescriptionOrText,
        Self::EventTime,
        Self::ItemCount,
        Self::CurrentItemIndex,
        Self::FromIndex,
        Self::ToIndex,
        Self::Scrollable,
        Self::ScrollX,
        Self::ScrollY,
        Self::RecordCount,
        Self::Checked,
        Self::Enabled,
        Self::FullScreen,
        Self::Password,
        Self::AddedCount,
        Self::RemovedCount,
        Self::VersionCode,
        Self::VersionName,
        Self::PlatformRelease,
        Self::PlatformSdk,
        Self::SystemFeature,
    ];

    /// The name rules use to refer to this property.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EventType => "eventType",
            Self::PackageName => "packageName",
            Self::ClassName => "className",
            Self::ClassNameStrict => "classNameStrict",
            Self::Text => "text",
            Self::BeforeText => "beforeText",
            Self::ContentDescription => "contentDescription",
            Self::ContentDescriptionOrText => "contentDescriptionOrText",
            Self::EventTime => "eventTime",
            Self::ItemCount => "itemCount",
            Self::CurrentItemIndex => "currentItemIndex",
            Self::FromIndex => "fromIndex",
            Self::ToIndex => "toIndex",
            Self::Scrollable => "scrollable",
            Self::ScrollX => "scrollX",
            Self::ScrollY => "scrollY",
            Self::RecordCount => "recordCount",
            Self::Checked => "checked",
            Self::Enabled => "enabled",
            Self::FullScreen => "fullScreen",
            Self::Password => "password",
            Self::AddedCount => "addedCount",
            Self::RemovedCount => "removedCount",
            Self::VersionCode => "versionCode",
            Self::VersionName => "versionName",
            Self::PlatformRelease => "platformRelease",
            Self::PlatformSdk => "platformSdk",
            Self::SystemFeature => "systemFeature",
        }
    }

    /// The declared kind of this property.
    #[must_use]
    pub const fn kind(self) -> PropertyKind {
        match self {
            Self::EventType
            | Self::ItemCount
            | Self::CurrentItemIndex
            | Self::FromIndex
            | Self::ToIndex
            | Self::ScrollX
            | Self::ScrollY
            | Self::RecordCount
            | Self::AddedCount
            | Self::RemovedCount
            | Self::VersionCode
            | Self::PlatformSdk => PropertyKind::Integer,
            Self::EventTime => PropertyKind::Float,
            Self::Scrollable
            | Self::Checked
            | Self::Enabled
            | Self::FullScreen
            | Self::Password => PropertyKind::Boolean,
            Self::PackageName
            | Self::Text
            | Self::BeforeText
            | Self::ContentDescription
            | Self::ContentDescriptionOrText
            | Self::VersionName
            | Self::PlatformRelease => PropertyKind::String,
            Self::ClassName | Self::ClassNameStrict => PropertyKind::Type,
            Self::SystemFeature => PropertyKind::Capability,
        }
    }

    /// Returns true for properties computed from other properties.
    #[must_use]
    pub const fn is_derived(self) -> bool {
        matches!(self, Self::ContentDescriptionOrText | Self::ClassNameStrict)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Property {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.name() == name)
            .ok_or_else(|| ValidationError::UnknownProperty {
                name: name.to_string(),
            })
    }
}

/// Symbolic event type names and their integer codes.
const EVENT_TYPES: &[(&str, i64)] = &[
    ("TYPE_VIEW_CLICKED", 0x0000_0001),
    ("TYPE_VIEW_LONG_CLICKED", 0x0000_0002),
    ("TYPE_VIEW_SELECTED", 0x0000_0004),
    ("TYPE_VIEW_FOCUSED", 0x0000_0008),
    ("TYPE_VIEW_TEXT_CHANGED", 0x0000_0010),
    ("TYPE_WINDOW_STATE_CHANGED", 0x0000_0020),
    ("TYPE_NOTIFICATION_STATE_CHANGED", 0x0000_0040),
    ("TYPE_VIEW_HOVER_ENTER", 0x0000_0080),
    ("TYPE_VIEW_HOVER_EXIT", 0x0000_0100),
    ("TYPE_TOUCH_EXPLORATION_GESTURE_START", 0x0000_0200),
    ("TYPE_TOUCH_EXPLORATION_GESTURE_END", 0x0000_0400),
    ("TYPE_WINDOW_CONTENT_CHANGED", 0x0000_0800),
    ("TYPE_VIEW_SCROLLED", 0x0000_1000),
    ("TYPE_VIEW_TEXT_SELECTION_CHANGED", 0x0000_2000),
    ("TYPE_ANNOUNCEMENT", 0x0000_4000),
    ("TYPE_VIEW_ACCESSIBILITY_FOCUSED", 0x0000_8000),
    ("TYPE_VIEW_ACCESSIBILITY_FOCUS_CLEARED", 0x0001_0000),
    ("TYPE_VIEW_TEXT_TRAVERSED_AT_MOVEMENT_GRANULARITY", 0x0002_0000),
    ("TYPE_GESTURE_DETECTION_START", 0x0004_0000),
    ("TYPE_GESTURE_DETECTION_END", 0x0008_0000),
    ("TYPE_TOUCH_INTERACTION_START", 0x0010_0000),
    ("TYPE_TOUCH_INTERACTION_END", 0x0020_0000),
];

/// Looks up the integer code of a symbolic event type name.
#[must_use]
pub fn event_type_code(name: &str) -> Option<i64> {
    let name = name.trim();
    EVENT_TYPES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, code)| *code)
}

/// Looks up the symbolic name of an event type code.
#[must_use]
pub fn event_type_name(code: i64) -> Option<&'static str> {
    EVENT_TYPES
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(name, _)| *name)
}

/// A read-only view of one event as a mapping from property to value.
///
/// Looking up a property the event does not carry returns `None`, never an
/// error. Implementations only need to supply the raw properties; derived
/// properties are computed by [`resolve_property`].
pub trait EventView {
    /// Returns the raw value of `property`, if the event carries it.
    fn property(&self, property: Property) -> Option<Value>;
}

fn non_empty_text(event: &dyn EventView, property: Property) -> Option<Value> {
    event
        .property(property)
        .filter(|v| v.as_str().is_some_and(|s| !s.is_empty()))
}

/// Reads `property` from `event`, computing derived properties.
pub fn resolve_property(event: &dyn EventView, property: Property) -> Option<Value> {
    match property {
        Property::ContentDescriptionOrText => non_empty_text(event, Property::Text)
            .or_else(|| event.property(Property::ContentDescription)),
        Property::ClassNameStrict => event.property(Property::ClassName),
        other => event.property(other),
    }
}

/// Reads the "text" pseudo-property used by formatters: the content
/// description when it is non-empty, the literal text otherwise.
pub fn spoken_text(event: &dyn EventView) -> Option<Value> {
    non_empty_text(event, Property::ContentDescription).or_else(|| event.property(Property::Text))
}

/// A map-backed event.
///
/// # Examples
///
/// ```
/// use speechrules::{EventView, Property, PropertyBag, Value};
///
/// let event = PropertyBag::new()
///     .with(Property::EventType, 1)
///     .with(Property::Text, "OK");
///
/// assert_eq!(event.property(Property::Text), Some(Value::from("OK")));
/// assert_eq!(event.property(Property::Checked), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag {
    values: HashMap<Property, Value>,
}

impl PropertyBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, returning the bag.
    #[must_use]
    pub fn with(mut self, property: Property, value: impl Into<Value>) -> Self {
        self.values.insert(property, value.into());
        self
    }

    /// Sets a property in place.
    pub fn set(&mut self, property: Property, value: impl Into<Value>) {
        self.values.insert(property, value.into());
    }

    /// Removes a property.
    pub fn remove(&mut self, property: Property) -> Option<Value> {
        self.values.remove(&property)
    }

    /// Number of properties set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no property is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl EventView for PropertyBag {
    fn property(&self, property: Property) -> Option<Value> {
        self.values.get(&property).cloned()
    }
}
