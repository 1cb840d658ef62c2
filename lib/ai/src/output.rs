//! Structured output recovery.
//!
//! Models asked for "only a JSON object" still wrap it in a fenced code block
//! now and then, and are instructed to write the bare token `NaN` for values
//! they could not find. Both are handled here so callers receive a plain
//! JSON object where unknown values are `null`.

use crate::error::OutputParseError;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("fence regex must compile")
});

const UNKNOWN_TOKEN: &str = "NaN";

/// Parses a JSON object out of model output.
///
/// Uses the first fenced code block if there is one, otherwise the whole
/// text. Bare `NaN` tokens outside string literals become `null`.
///
/// # Errors
///
/// Returns an error if the text is not valid JSON or is not an object.
pub fn extract_json_object(text: &str) -> Result<Map<String, JsonValue>, OutputParseError> {
    let body = FENCED_BLOCK
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map_or(text, |m| m.as_str())
        .trim();

    let normalized = replace_unknown_tokens(body);
    let value: JsonValue =
        serde_json::from_str(&normalized).map_err(|e| OutputParseError::InvalidJson {
            reason: e.to_string(),
        })?;

    match value {
        JsonValue::Object(map) => Ok(map),
        other => Err(OutputParseError::NotAnObject {
            found: kind_name(&other),
        }),
    }
}

/// Rewrites standalone `NaN` tokens outside of string literals to `null`.
fn replace_unknown_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            rest = &rest[c.len_utf8()..];
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if rest.starts_with(UNKNOWN_TOKEN) && is_token_boundary(&out, rest) {
            out.push_str("null");
            rest = &rest[UNKNOWN_TOKEN.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}

fn is_token_boundary(before: &str, rest: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let clean_start = !before.chars().next_back().is_some_and(is_word);
    let clean_end = !rest[UNKNOWN_TOKEN.len()..].chars().next().is_some_and(is_word);
    clean_start && clean_end
}

fn kind_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
