//! Tool argument validation against a declared input schema.
//!
//! The supported schema subset is:
//!
//! ```json
//! {
//!   "properties": { "<name>": { "type": "...", "minLength": 1, "maxLength": 9, "pattern": "..." } },
//!   "required": ["<name>", ...]
//! }
//! ```
//!
//! Errors come out in a fixed order: required-field errors first (in
//! `required` order), then per-property errors (in `properties` order). The
//! follow-up question shown to the user is generated from this sequence, so
//! the order must be stable across calls.

use crate::descriptor::ToolArguments;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

const MISSING_REQUIRED: &str = "missing required field";

/// A single problem with a proposed tool argument record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// The offending parameter name.
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ValidationError {
    /// Creates a validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates the error reported for an absent or null required field.
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, MISSING_REQUIRED)
    }

    /// Returns true if this error reports a missing required field.
    #[must_use]
    pub fn is_missing_field(&self) -> bool {
        self.reason == MISSING_REQUIRED
    }
}

/// Validates `args` against `schema`.
///
/// Returns an empty vector when the arguments are valid. Argument names not
/// declared in `properties` are ignored. A `null` value on a non-required
/// property is accepted without further checks.
#[must_use]
pub fn validate(schema: &JsonValue, args: &ToolArguments) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let required = schema
        .get("required")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(JsonValue::as_str);
    for name in required {
        if args.get(name).is_none_or(JsonValue::is_null) {
            errors.push(ValidationError::missing(name));
        }
    }

    if let Some(properties) = schema.get("properties").and_then(JsonValue::as_object) {
        for (name, property) in properties {
            let Some(value) = args.get(name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if let Some(reason) = check_property(property, value) {
                errors.push(ValidationError::new(name, reason));
            }
        }
    }

    errors
}

/// Checks one value against one property schema.
///
/// Returns the first failing rule's reason, or `None` if the value passes.
fn check_property(property: &JsonValue, value: &JsonValue) -> Option<String> {
    let declared = declared_types(property);
    for expected in &declared {
        if !is_supported(expected) {
            return Some(format!("unsupported type: {expected}"));
        }
    }

    let actual = JsonKind::of(value);
    let Some(matched) = declared.iter().find(|expected| actual.satisfies(expected)) else {
        return Some(format!(
            "expected {}, got {}",
            declared.join(" or "),
            actual.as_str()
        ));
    };

    if *matched == "string"
        && let JsonValue::String(text) = value
    {
        return check_string_rules(property, text);
    }

    None
}

/// Returns the declared type names; an absent `type` means `string`.
fn declared_types(property: &JsonValue) -> Vec<&str> {
    match property.get("type") {
        Some(JsonValue::String(kind)) => vec![kind.as_str()],
        Some(JsonValue::Array(kinds)) => kinds.iter().filter_map(JsonValue::as_str).collect(),
        _ => vec!["string"],
    }
}

fn is_supported(kind: &str) -> bool {
    matches!(
        kind,
        "string" | "integer" | "number" | "array" | "boolean" | "object"
    )
}

/// Applies `minLength`, `maxLength`, then `pattern`; the first failure wins.
fn check_string_rules(property: &JsonValue, text: &str) -> Option<String> {
    let length = text.chars().count();

    if let Some(raw) = property.get("minLength") {
        let Some(min) = raw.as_u64() else {
            return Some("invalid minLength in schema".to_string());
        };
        if (length as u64) < min {
            return Some(format!("length {length} < minLength ({min})"));
        }
    }

    if let Some(raw) = property.get("maxLength") {
        let Some(max) = raw.as_u64() else {
            return Some("invalid maxLength in schema".to_string());
        };
        if (length as u64) > max {
            return Some(format!("length {length} > maxLength ({max})"));
        }
    }

    if let Some(raw) = property.get("pattern") {
        let Some(pattern) = raw.as_str() else {
            return Some("invalid pattern in schema".to_string());
        };
        // Anchored so the whole value must match, not a substring.
        let Ok(regex) = Regex::new(&format!("^(?:{pattern})$")) else {
            return Some("invalid pattern in schema".to_string());
        };
        if !regex.is_match(text) {
            return Some(format!("value does not match pattern: {pattern}"));
        }
    }

    None
}

/// The JSON kind of a runtime value, named as in JSON Schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonKind {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonKind {
    fn of(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(_) => Self::Boolean,
            JsonValue::Number(n) => {
                let integral = n.is_i64()
                    || n.is_u64()
                    || n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0);
                if integral { Self::Integer } else { Self::Number }
            }
            JsonValue::String(_) => Self::String,
            JsonValue::Array(_) => Self::Array,
            JsonValue::Object(_) => Self::Object,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn satisfies(self, expected: &str) -> bool {
        match expected {
            "number" => matches!(self, Self::Integer | Self::Number),
            other => self.as_str() == other,
        }
    }
}
