//! Rule formatters: turning a matched event into utterance text.
//!
//! The declarative [`TemplateFormatter`] evaluates an ordered list of
//! [`Selector`]s to collect arguments and substitutes them into a printf-style
//! [`Template`]. Without a template the arguments are joined with spaces.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::warn;

use crate::environment::{is_resource_reference, EvalContext};
use crate::error::{EvaluationError, RuleError, RuleResult, ValidationError};
use crate::property::{resolve_property, spoken_text, EventView, Property};
use crate::utterance::Utterance;
use crate::value::Value;

/// Writes text (and possibly metadata) for a matched event.
///
/// Returning an error (or panicking) makes the processor discard everything
/// this rule wrote and move on to the next rule.
pub trait EventFormatter: fmt::Debug + Send + Sync {
    /// Appends this formatter's output for `event` to `utterance`.
    fn format(&self, event: &dyn EventView, ctx: &EvalContext<'_>, utterance: &mut Utterance) -> RuleResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    String,
    Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Argument { index: usize, conversion: Conversion },
}

/// A compiled printf-style template.
///
/// Supported placeholders are `%s` and `%d` (consuming arguments in order),
/// `%N$s` and `%N$d` (explicit 1-based argument), and `%%` for a literal
/// percent sign.
///
/// # Examples
///
/// ```
/// use speechrules::{Template, Value};
///
/// let template: Template = "%2$s of %1$d".parse().unwrap();
/// assert_eq!(template.arity(), 2);
/// let text = template.render(&[Value::Int(9), Value::from("page 3")]).unwrap();
/// assert_eq!(text, "page 3 of 9");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
    arity: usize,
}

impl Template {
    /// Compiles `source`.
    pub fn parse(source: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidTemplate {
            template: source.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut sequential = 0usize;
        let mut highest_explicit = 0usize;
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                literal.push('%');
                continue;
            }

            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            let explicit = if digits.is_empty() {
                None
            } else {
                if chars.next() != Some('$') {
                    return Err(invalid("argument index must be followed by '$'"));
                }
                match digits.parse::<usize>() {
                    Ok(n) if n > 0 => Some(n),
                    _ => return Err(invalid("argument index must be a positive integer")),
                }
            };
            let conversion = match chars.next() {
                Some('s') => Conversion::String,
                Some('d') => Conversion::Decimal,
                Some(_) => return Err(invalid("unsupported conversion")),
                None => return Err(invalid("dangling '%'")),
            };

            let index = if let Some(n) = explicit {
                highest_explicit = highest_explicit.max(n);
                n - 1
            } else {
                sequential += 1;
                sequential - 1
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Argument { index, conversion });
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
            arity: sequential.max(highest_explicit),
        })
    }

    /// Number of arguments the template consumes.
    #[must_use]
    pub const fn arity(&self) -> usize {
        self.arity
    }

    /// The template text as parsed.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitutes `args` into the template.
    ///
    /// The argument count must equal [`arity`](Self::arity) exactly.
    pub fn render(&self, args: &[Value]) -> Result<String, EvaluationError> {
        if args.len() != self.arity {
            return Err(EvaluationError::ArgumentMismatch {
                expected: self.arity,
                actual: args.len(),
            });
        }

        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Argument { index, conversion } => {
                    let arg = &args[*index];
                    match conversion {
                        Conversion::String => out.push_str(&arg.to_string()),
                        Conversion::Decimal => out.push_str(&decimal(arg)?.to_string()),
                    }
                }
            }
        }
        Ok(out)
    }
}

impl FromStr for Template {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn decimal(arg: &Value) -> Result<i64, EvaluationError> {
    match arg {
        Value::Int(v) => Ok(*v),
        Value::String(s) => s.trim().parse().map_err(|_| EvaluationError::Formatter {
            message: format!("'%d' expects an integer, got '{s}'"),
        }),
        other => Err(EvaluationError::Formatter {
            message: format!("'%d' expects an integer, got {}", other.type_name()),
        }),
    }
}

/// A regular expression compiled on first use and cached.
#[derive(Debug, Clone)]
pub struct LazyPattern {
    source: String,
    compiled: OnceCell<Result<Regex, EvaluationError>>,
}

impl LazyPattern {
    /// Wraps `source` without compiling it.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            compiled: OnceCell::new(),
        }
    }

    /// The pattern text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the compiled pattern, compiling it on the first call.
    pub fn get(&self) -> Result<&Regex, EvaluationError> {
        self.compiled
            .get_or_init(|| {
                Regex::new(&self.source).map_err(|e| EvaluationError::InvalidRegex {
                    pattern: self.source.clone(),
                    reason: e.to_string(),
                })
            })
            .as_ref()
            .map_err(Clone::clone)
    }
}

/// Produces formatting arguments from an event.
#[derive(Debug, Clone)]
pub enum Selector {
    /// The value of one property. `text` reads the spoken text.
    Property(Property),
    /// The event text split on a pattern. Replaces all arguments collected so
    /// far and ends selector evaluation.
    Split(LazyPattern),
    /// The first substring of the event text matching a pattern, or `""`.
    Regex(LazyPattern),
}

impl Selector {
    /// Builds a selector from its kind name (`property`, `split` or `regex`).
    pub fn parse(kind: &str, value: &str) -> Result<Self, ValidationError> {
        match kind.trim() {
            "property" => Ok(Self::Property(value.parse()?)),
            "split" => Ok(Self::Split(LazyPattern::new(value))),
            "regex" => Ok(Self::Regex(LazyPattern::new(value))),
            other => Err(ValidationError::UnknownSelector {
                kind: other.to_string(),
            }),
        }
    }

    /// The kind name this selector parses from.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Property(_) => "property",
            Self::Split(_) => "split",
            Self::Regex(_) => "regex",
        }
    }
}

fn event_text(event: &dyn EventView) -> String {
    spoken_text(event).map(|v| v.to_string()).unwrap_or_default()
}

// Empty trailing pieces are dropped, but splitting empty text yields one empty piece.
fn split_text(pattern: &Regex, text: &str) -> Vec<Value> {
    let mut pieces: Vec<&str> = pattern.split(text).collect();
    if !text.is_empty() {
        while pieces.last().is_some_and(|p| p.is_empty()) {
            pieces.pop();
        }
    }
    pieces.into_iter().map(Value::from).collect()
}

#[derive(Debug, Clone)]
enum TemplateSource {
    Compiled(Template),
    /// A string resource reference, resolved and compiled at format time.
    Resource(String),
}

/// The declarative formatter: selectors plus an optional template.
///
/// Formatting failures are logged and contribute no text; they never fail
/// the rule.
#[derive(Debug, Clone, Default)]
pub struct TemplateFormatter {
    template: Option<TemplateSource>,
    selectors: Vec<Selector>,
}

impl TemplateFormatter {
    /// A formatter with no template and no selectors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the template. Resource references are resolved when formatting.
    pub fn with_template(mut self, template: &str) -> Result<Self, ValidationError> {
        self.template = Some(if is_resource_reference(template) {
            TemplateSource::Resource(template.to_string())
        } else {
            TemplateSource::Compiled(Template::parse(template)?)
        });
        Ok(self)
    }

    /// Appends a selector.
    #[must_use]
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    /// The selectors in evaluation order.
    #[must_use]
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    /// The template text as declared.
    #[must_use]
    pub fn template(&self) -> Option<&str> {
        self.template.as_ref().map(|t| match t {
            TemplateSource::Compiled(template) => template.source(),
            TemplateSource::Resource(reference) => reference.as_str(),
        })
    }

    /// Evaluates the selectors in order.
    pub fn arguments(&self, event: &dyn EventView, ctx: &EvalContext<'_>) -> RuleResult<Vec<Value>> {
        let mut args = Vec::with_capacity(self.selectors.len());
        for selector in &self.selectors {
            match selector {
                Selector::Property(property) => {
                    let value = if *property == Property::Text {
                        spoken_text(event)
                    } else {
                        resolve_property(event, *property)
                    };
                    args.push(match value {
                        Some(Value::String(s)) if is_resource_reference(&s) => {
                            Value::String(ctx.env.resources.localize(&s))
                        }
                        Some(v) => v,
                        None => Value::String(String::new()),
                    });
                }
                Selector::Split(pattern) => {
                    args = split_text(pattern.get()?, &event_text(event));
                    break;
                }
                Selector::Regex(pattern) => {
                    let text = event_text(event);
                    let found = pattern.get()?.find(&text).map_or("", |m| m.as_str());
                    args.push(Value::from(found));
                }
            }
        }
        Ok(args)
    }

    /// Produces the text this formatter contributes for `event`.
    pub fn render(&self, event: &dyn EventView, ctx: &EvalContext<'_>) -> RuleResult<String> {
        let args = self.arguments(event, ctx)?;
        match &self.template {
            Some(TemplateSource::Compiled(template)) => Ok(template.render(&args)?),
            Some(TemplateSource::Resource(reference)) => {
                let template = Template::parse(&ctx.env.resources.localize(reference))?;
                Ok(template.render(&args)?)
            }
            None => Ok(args
                .iter()
                .map(ToString::to_string)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")),
        }
    }
}

impl EventFormatter for TemplateFormatter {
    fn format(&self, event: &dyn EventView, ctx: &EvalContext<'_>, utterance: &mut Utterance) -> RuleResult<()> {
        match self.render(event, ctx) {
            Ok(text) => {
                utterance.append(&text);
                if !utterance.text().is_empty() && speaks_disabled_state(event) {
                    let state = ctx
                        .env
                        .resources
                        .lookup(DISABLED_STATE_RESOURCE)
                        .unwrap_or_else(|| DISABLED_STATE_TEXT.to_string());
                    utterance.append(&state);
                }
            }
            Err(e) => log_format_failure(self.template(), &e),
        }
        Ok(())
    }
}

/// Resource spoken after the text of a disabled control.
pub const DISABLED_STATE_RESOURCE: &str = "@string/value_disabled";

const DISABLED_STATE_TEXT: &str = "disabled";

/// Accessibility focus, hover enter, focus and selection announce control state.
const SPEAK_STATE_EVENT_TYPES: i64 = 0x0000_8000 | 0x0000_0080 | 0x0000_0008 | 0x0000_0004;

fn speaks_disabled_state(event: &dyn EventView) -> bool {
    let disabled = resolve_property(event, Property::Enabled) == Some(Value::Bool(false));
    let state_event = resolve_property(event, Property::EventType)
        .and_then(|v| v.as_int())
        .is_some_and(|code| code & SPEAK_STATE_EVENT_TYPES != 0);
    disabled && state_event
}

fn log_format_failure(template: Option<&str>, error: &RuleError) {
    warn!(
        template = template.unwrap_or("<none>"),
        error = %error,
        "formatting failed, rule contributes no text"
    );
}
