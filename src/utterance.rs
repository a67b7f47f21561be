//! The output of processing one event.
//!
//! An [`Utterance`] accumulates spoken text, rule metadata and the auditory
//! and haptic feedback a rule requested. Utterances are recycled through an
//! [`UtterancePool`] to avoid allocating per event.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ValidationError;
use crate::value::Value;

/// Rule and utterance metadata.
pub type Metadata = BTreeMap<String, Value>;

/// Metadata key carrying the [`QueueMode`] code.
pub const KEY_QUEUING: &str = "queuing";
/// Metadata key naming an auditory feedback resource.
pub const KEY_EARCON: &str = "earcon";
/// Metadata key naming a haptic feedback resource.
pub const KEY_VIBRATION: &str = "vibration";
/// Metadata key naming a user-customizable auditory feedback preference.
pub const KEY_CUSTOM_EARCON: &str = "customEarcon";
/// Metadata key naming a user-customizable haptic feedback preference.
pub const KEY_CUSTOM_VIBRATION: &str = "customVibration";

/// Appends `segment` to `text`, separating it from existing text.
///
/// Existing text ending in a letter or digit is followed by `", "`, anything
/// else by a single space. An empty segment leaves `text` unchanged.
///
/// # Examples
///
/// ```
/// use speechrules::append_with_separator;
///
/// let mut text = String::from("ready");
/// append_with_separator(&mut text, "go");
/// assert_eq!(text, "ready, go");
///
/// let mut text = String::from("5.");
/// append_with_separator(&mut text, "go");
/// assert_eq!(text, "5. go");
/// ```
pub fn append_with_separator(text: &mut String, segment: &str) {
    if segment.is_empty() {
        return;
    }
    match text.chars().last() {
        Some(c) if c.is_alphanumeric() => text.push_str(", "),
        Some(_) => text.push(' '),
        None => {}
    }
    text.push_str(segment);
}

/// How the consumer should interleave an utterance with pending output.
///
/// The engine only carries this value; interpreting it is up to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueMode {
    /// Interrupt pending output.
    Interrupt,
    /// Queue after pending output.
    Queue,
    /// Let the consumer decide from the event.
    ComputeFromEventContext,
    /// Queue and refuse later interruption.
    Uninterruptible,
}

impl QueueMode {
    /// The integer code stored in metadata.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Interrupt => 0,
            Self::Queue => 1,
            Self::ComputeFromEventContext => 2,
            Self::Uninterruptible => 3,
        }
    }

    /// The mode with metadata code `code`.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Interrupt),
            1 => Some(Self::Queue),
            2 => Some(Self::ComputeFromEventContext),
            3 => Some(Self::Uninterruptible),
            _ => None,
        }
    }

    /// The upper-case mode name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "INTERRUPT",
            Self::Queue => "QUEUE",
            Self::ComputeFromEventContext => "COMPUTE_FROM_EVENT_CONTEXT",
            Self::Uninterruptible => "UNINTERRUPTIBLE",
        }
    }
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "INTERRUPT" => Ok(Self::Interrupt),
            "QUEUE" => Ok(Self::Queue),
            "COMPUTE_FROM_EVENT_CONTEXT" => Ok(Self::ComputeFromEventContext),
            "UNINTERRUPTIBLE" => Ok(Self::Uninterruptible),
            other => Err(ValidationError::UnknownQueueMode {
                name: other.to_string(),
            }),
        }
    }
}

/// Text, metadata and feedback produced for one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Utterance {
    text: String,
    metadata: Metadata,
    auditory: BTreeSet<String>,
    haptic: BTreeSet<String>,
}

impl Utterance {
    /// An empty utterance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Appends a segment using [`append_with_separator`].
    pub fn append(&mut self, segment: &str) {
        append_with_separator(&mut self.text, segment);
    }

    /// The accumulated metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable access to the metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Copies every entry of `metadata` into this utterance, overwriting existing keys.
    pub fn merge_metadata(&mut self, metadata: &Metadata) {
        self.metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// The queue mode carried in metadata, if any.
    #[must_use]
    pub fn queue_mode(&self) -> Option<QueueMode> {
        self.metadata
            .get(KEY_QUEUING)
            .and_then(Value::as_int)
            .and_then(QueueMode::from_code)
    }

    /// Auditory feedback resources requested so far.
    #[must_use]
    pub const fn auditory(&self) -> &BTreeSet<String> {
        &self.auditory
    }

    /// Haptic feedback resources requested so far.
    #[must_use]
    pub const fn haptic(&self) -> &BTreeSet<String> {
        &self.haptic
    }

    /// Requests an auditory feedback resource.
    pub fn add_auditory(&mut self, resource: impl Into<String>) {
        self.auditory.insert(resource.into());
    }

    /// Requests a haptic feedback resource.
    pub fn add_haptic(&mut self, resource: impl Into<String>) {
        self.haptic.insert(resource.into());
    }

    /// Returns true if nothing has been written to this utterance.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
            && self.metadata.is_empty()
            && self.auditory.is_empty()
            && self.haptic.is_empty()
    }

    /// Empties text, metadata and feedback, keeping allocated capacity.
    pub fn clear(&mut self) {
        self.text.clear();
        self.metadata.clear();
        self.auditory.clear();
        self.haptic.clear();
    }
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Default number of idle utterances kept by a pool.
pub const DEFAULT_POOL_CAPACITY: usize = 3;

/// A bounded free-list of cleared utterances.
///
/// `recycle` takes the utterance by value, so a recycled instance cannot be
/// touched or recycled again by the caller.
#[derive(Debug)]
pub struct UtterancePool {
    capacity: usize,
    free: Mutex<Vec<Utterance>>,
}

impl UtterancePool {
    /// Creates a pool keeping at most `capacity` idle utterances.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Maximum idle utterances kept.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of idle utterances currently held.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns an idle utterance, or a new one if none is available.
    #[must_use]
    pub fn obtain(&self) -> Utterance {
        let reused = self.free.lock().unwrap_or_else(PoisonError::into_inner).pop();
        match reused {
            Some(utterance) => {
                trace!("utterance pool hit");
                utterance
            }
            None => {
                trace!("utterance pool miss");
                Utterance::new()
            }
        }
    }

    /// Clears `utterance` and keeps it for reuse if the pool has room.
    pub fn recycle(&self, mut utterance: Utterance) {
        utterance.clear();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.capacity {
            free.push(utterance);
        }
    }
}

impl Default for UtterancePool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}
