//! Layered extraction of a schema-valid value from free-form model output.
//!
//! Strategies run cheapest first and stop at the first success:
//!
//! - [`Strategy::Direct`] - the whole text is JSON
//! - [`Strategy::TaggedFence`] - first ```` ```json ```` block
//! - [`Strategy::AnyFence`] - first fenced block of any kind
//! - [`Strategy::BalancedSpan`] - first balanced `{...}` (or `[...]`) span
//! - [`Strategy::QuoteRepair`] - that span after [`repair_quotes`]
//! - [`Strategy::LiteralParse`] - that span through [`parse_literal`]
//!
//! Every candidate is validated against the schema before it is accepted.

pub mod literal;
pub mod locate;
pub mod repair;

use std::cell::OnceCell;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::error::ExtractionFailure;
use crate::schema::SchemaDescriptor;

pub use literal::{parse_literal, LiteralError};
pub use repair::repair_quotes;

/// One extraction strategy, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strategy {
    /// Parse the entire text as JSON.
    Direct,
    /// Parse the first fenced block tagged `json`.
    TaggedFence,
    /// Parse the first fenced block of any kind.
    AnyFence,
    /// Parse the first balanced delimiter span.
    BalancedSpan,
    /// Normalize quotes in the span, then parse.
    QuoteRepair,
    /// Parse the span with the permissive literal parser.
    LiteralParse,
}

impl Strategy {
    /// All strategies in the order they are tried.
    pub const ALL: [Self; 6] = [
        Self::Direct,
        Self::TaggedFence,
        Self::AnyFence,
        Self::BalancedSpan,
        Self::QuoteRepair,
        Self::LiteralParse,
    ];

    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::TaggedFence => "tagged-fence",
            Self::AnyFence => "any-fence",
            Self::BalancedSpan => "balanced-span",
            Self::QuoteRepair => "quote-repair",
            Self::LiteralParse => "literal-parse",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionAttempt {
    /// Strategy that was tried.
    pub strategy: Strategy,
    /// Whether it produced a schema-valid value.
    pub success: bool,
    /// The accepted value, on success.
    pub value: Option<Value>,
    /// Why it failed, on failure.
    pub failure_reason: Option<String>,
}

/// A schema-valid value and how it was found.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The validated value.
    pub value: Value,
    /// The strategy that produced it.
    pub strategy: Strategy,
    /// Every strategy tried, the winner last.
    pub attempts: Vec<ExtractionAttempt>,
}

/// Runs the strategies in order against `raw`.
///
/// # Errors
///
/// Returns [`ExtractionFailure`] with one attempt per strategy when none of
/// them yields a value satisfying `schema`.
///
/// # Examples
///
/// ```
/// use metanovel_resilience::extraction::{extract, Strategy};
/// use metanovel_resilience::SchemaDescriptor;
/// use serde_json::json;
///
/// let schema = SchemaDescriptor::new(json!({"type": "object"})).unwrap();
/// let found = extract("```json\n{\"a\": 1}\n```", &schema).unwrap();
/// assert_eq!(found.value, json!({"a": 1}));
/// assert_eq!(found.strategy, Strategy::TaggedFence);
/// ```
pub fn extract(raw: &str, schema: &SchemaDescriptor) -> Result<Extraction, ExtractionFailure> {
    let (open, close) = schema.root_shape().delimiters();
    let span_cell = OnceCell::new();
    let span = || {
        span_cell
            .get_or_init(|| locate::balanced_span(raw, open, close))
            .clone()
    };

    let mut attempts = Vec::with_capacity(Strategy::ALL.len());
    for strategy in Strategy::ALL {
        let candidate = match strategy {
            Strategy::Direct => parse_json(raw),
            Strategy::TaggedFence => locate::tagged_fence(raw)
                .ok_or_else(|| "no ```json fenced block".to_string())
                .and_then(parse_json),
            Strategy::AnyFence => locate::any_fence(raw)
                .ok_or_else(|| "no fenced code block".to_string())
                .and_then(parse_json),
            Strategy::BalancedSpan => span().and_then(parse_json),
            Strategy::QuoteRepair => span().and_then(|s| parse_json(&repair_quotes(s))),
            Strategy::LiteralParse => {
                span().and_then(|s| parse_literal(s).map_err(|e| e.to_string()))
            }
        };

        match candidate.and_then(|value| validated(schema, value)) {
            Ok(value) => {
                debug!(strategy = %strategy, "Extraction succeeded");
                attempts.push(ExtractionAttempt {
                    strategy,
                    success: true,
                    value: Some(value.clone()),
                    failure_reason: None,
                });
                return Ok(Extraction {
                    value,
                    strategy,
                    attempts,
                });
            }
            Err(reason) => {
                debug!(strategy = %strategy, reason = %reason, "Extraction strategy failed");
                attempts.push(ExtractionAttempt {
                    strategy,
                    success: false,
                    value: None,
                    failure_reason: Some(reason),
                });
            }
        }
    }

    Err(ExtractionFailure { attempts })
}

fn parse_json(text: &str) -> Result<Value, String> {
    serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))
}

fn validated(schema: &SchemaDescriptor, value: Value) -> Result<Value, String> {
    schema
        .validate(&value)
        .map(|()| value)
        .map_err(|errors| format!("schema validation failed: {}", errors.join("; ")))
}
