// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tolerant parsing of AI responses.
//!
//! Models rarely return clean JSON. They wrap it in fenced code blocks,
//! surround it with prose, use single quotes, leave trailing commas, or skip
//! JSON entirely and answer with `key: value` lines. This module recovers a
//! JSON-like structure from all of those and coerces values into the fields
//! a pipeline asked for.
//!
//! Extraction order for [`extract_json`]:
//!
//! 1. The last fenced block (` ```json `, ` ```javascript `, ` ```js ` or
//!    untagged) whose content parses.
//! 2. The first balanced `{...}`/`[...]` span that parses, scanning left to
//!    right. Brackets inside strings are ignored and brace spans without a
//!    `:` are skipped as prose.
//! 3. `key: value` / `key = value` lines turned into an object.
//!
//! [`parse_ai_response`] then maps the result onto the requested fields,
//! falling back to natural-language patterns when no JSON is found.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};
use thiserror::Error;

use crate::types::Item;

static CODE_BLOCK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```(?:json|javascript|js)?[ \t]*\r?\n?(.*?)```").expect("code block regex")
});

static KEY_VALUE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:[-*]\s+)?["']?([A-Za-z_][A-Za-z0-9_]*)["']?\s*[:=]\s*(.*?)\s*$"#)
        .expect("key value regex")
});

static NUMERIC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("numeric regex"));

static SINGLE_QUOTED_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'((?:[^'\\]|\\.)*)'").expect("single quote regex"));

static BARE_KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").expect("bare key regex")
});

static TRAILING_COMMA_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma regex"));

/// Tokens coerced to `null`.
const NULL_TOKENS: &[&str] = &["null", "none", "n/a", ""];

/// Tokens coerced to `true`.
const TRUE_TOKENS: &[&str] = &["true", "yes"];

/// Tokens coerced to `false`.
const FALSE_TOKENS: &[&str] = &["false", "no"];

// ============================================================================
// Errors and Parse Outcomes
// ============================================================================

/// Errors produced while turning an AI response into fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("No JSON found in AI response: {0}")]
    NoJsonFound(String),

    #[error("AI returned an array instead of object")]
    ArrayInsteadOfObject,

    #[error("Expected a JSON array of results: {0}")]
    NotAnArray(String),

    #[error("AI returned {got} results but batch has {expected} items")]
    CountMismatch { got: usize, expected: usize },
}

/// What a response turned out to contain.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Object(serde_json::Map<String, Value>),
    Array(Vec<Value>),
    Failure { reason: String },
}

// ============================================================================
// Extraction
// ============================================================================

/// Find the most plausible JSON document inside an AI response.
///
/// Returns the JSON text (possibly synthesized from `key: value` lines), or
/// `None` when nothing usable is present.
pub fn extract_json(text: &str) -> Option<String> {
    if let Some(block) = extract_from_code_blocks(text) {
        return Some(block);
    }
    if let Some(span) = extract_balanced_span(text) {
        return Some(span);
    }
    extract_key_values(text)
}

fn extract_from_code_blocks(text: &str) -> Option<String> {
    let blocks: Vec<&str> = CODE_BLOCK_REGEX
        .captures_iter(text)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim()))
        .collect();

    blocks
        .into_iter()
        .rev()
        .find(|content| matches!(parse_json_lenient(content), Some(Value::Object(_) | Value::Array(_))))
        .map(str::to_string)
}

enum SpanScan {
    Closed(usize),
    Unclosed,
    Mismatched,
}

/// Walk from an opening bracket to its matching closer, ignoring brackets
/// inside double-quoted strings.
fn scan_balanced(bytes: &[u8], start: usize) -> SpanScan {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return SpanScan::Mismatched;
                }
                if stack.is_empty() {
                    return SpanScan::Closed(start + offset);
                }
            }
            _ => {}
        }
    }

    SpanScan::Unclosed
}

fn extract_balanced_span(text: &str) -> Option<String> {
    let bytes = text.as_bytes();

    for (start, &b) in bytes.iter().enumerate() {
        if b != b'{' && b != b'[' {
            continue;
        }

        match scan_balanced(bytes, start) {
            SpanScan::Closed(end) => {
                let span = &text[start..=end];
                if b == b'{' && !span.contains(':') {
                    continue;
                }
                if parse_json_lenient(span).is_some() {
                    return Some(span.to_string());
                }
            }
            SpanScan::Mismatched => continue,
            // A truncated document fails; a stray opener in prose is skipped.
            SpanScan::Unclosed if opens_document(bytes, start) => return None,
            SpanScan::Unclosed => continue,
        }
    }

    None
}

/// Whether the text after an opener reads like the start of a JSON value
/// rather than prose.
fn opens_document(bytes: &[u8], start: usize) -> bool {
    bytes[start + 1..]
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map_or(true, |b| matches!(b, b'"' | b'\'' | b'{' | b'['))
}

fn clean_scalar(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches(&[',', ';', '.'][..]).trim();
    strip_quotes(trimmed).to_string()
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn extract_key_values(text: &str) -> Option<String> {
    let mut object = serde_json::Map::new();

    for line in text.lines() {
        if let Some(cap) = KEY_VALUE_REGEX.captures(line) {
            let key = cap[1].to_string();
            let value = clean_scalar(&cap[2]);
            object.entry(key).or_insert(Value::String(value));
        }
    }

    if object.is_empty() {
        None
    } else {
        serde_json::to_string(&Value::Object(object)).ok()
    }
}

// ============================================================================
// JSON Parsing and Repair
// ============================================================================

/// Apply light repairs: single quotes to double quotes, quote bare keys, and
/// drop trailing commas.
pub fn repair_json(candidate: &str) -> String {
    let double_quoted = SINGLE_QUOTED_REGEX.replace_all(candidate, "\"$1\"");
    let keys_quoted = BARE_KEY_REGEX.replace_all(&double_quoted, "$1\"$2\":");
    TRAILING_COMMA_REGEX
        .replace_all(&keys_quoted, "$1")
        .into_owned()
}

/// Parse JSON, retrying once after [`repair_json`].
pub fn parse_json_lenient(candidate: &str) -> Option<Value> {
    serde_json::from_str(candidate)
        .ok()
        .or_else(|| serde_json::from_str(&repair_json(candidate)).ok())
}

/// Classify a response into an object, an array, or a failure.
pub fn classify_response(text: &str) -> ParsedResponse {
    let Some(candidate) = extract_json(text) else {
        return ParsedResponse::Failure {
            reason: format!("No JSON found in AI response: {}", preview(text)),
        };
    };

    match parse_json_lenient(&candidate) {
        Some(Value::Object(map)) => ParsedResponse::Object(map),
        Some(Value::Array(items)) => ParsedResponse::Array(items),
        _ => ParsedResponse::Failure {
            reason: format!("Invalid JSON in AI response: {}", preview(&candidate)),
        },
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 200;
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

// ============================================================================
// Field Extraction and Coercion
// ============================================================================

/// Coerce a raw value per the coercion table. Non-string values pass through.
pub fn coerce_value(value: Value) -> Value {
    let Value::String(s) = value else {
        return value;
    };

    let trimmed = s.trim();
    let lower = trimmed.to_lowercase();

    if TRUE_TOKENS.contains(&lower.as_str()) {
        return Value::Bool(true);
    }
    if FALSE_TOKENS.contains(&lower.as_str()) {
        return Value::Bool(false);
    }
    if NUMERIC_REGEX.is_match(trimmed) {
        if let Some(number) = parse_number(trimmed) {
            return Value::Number(number);
        }
    }
    if NULL_TOKENS.contains(&lower.as_str()) {
        return Value::Null;
    }
    Value::String(s)
}

fn parse_number(s: &str) -> Option<Number> {
    if !s.contains('.') {
        if let Ok(i) = s.parse::<i64>() {
            return Some(Number::from(i));
        }
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

fn lookup_ci<'a>(object: &'a serde_json::Map<String, Value>, field: &str) -> Option<&'a Value> {
    object.get(field).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(field))
            .map(|(_, value)| value)
    })
}

/// Project an object onto the requested fields.
///
/// Lookup is case-insensitive; fields the object lacks are present with a
/// `null` value, and keys that were not requested are dropped. With no
/// requested fields the whole object is returned, coerced.
pub fn extract_fields(object: &serde_json::Map<String, Value>, fields: &[String]) -> Item {
    if fields.is_empty() {
        return object
            .iter()
            .map(|(k, v)| (k.clone(), coerce_value(v.clone())))
            .collect();
    }

    fields
        .iter()
        .map(|field| {
            let value = lookup_ci(object, field)
                .cloned()
                .map(coerce_value)
                .unwrap_or(Value::Null);
            (field.clone(), value)
        })
        .collect()
}

fn object_from_array(items: Vec<Value>) -> Result<serde_json::Map<String, Value>, ParseError> {
    if items.len() == 1 {
        return match items.into_iter().next() {
            Some(Value::Object(map)) => Ok(map),
            _ => Err(ParseError::ArrayInsteadOfObject),
        };
    }

    let mut rebuilt = serde_json::Map::new();
    for entry in &items {
        let Value::Object(pair) = entry else {
            return Err(ParseError::ArrayInsteadOfObject);
        };
        let name = pair
            .get("field")
            .or_else(|| pair.get("key"))
            .and_then(Value::as_str);
        match (name, pair.get("value")) {
            (Some(name), Some(value)) => {
                rebuilt.insert(name.to_string(), value.clone());
            }
            _ => return Err(ParseError::ArrayInsteadOfObject),
        }
    }

    if rebuilt.is_empty() {
        return Err(ParseError::ArrayInsteadOfObject);
    }
    Ok(rebuilt)
}

fn natural_language_fields(text: &str, fields: &[String]) -> Option<Item> {
    let mut found_any = false;
    let mut result = Item::new();

    for field in fields {
        let escaped = regex::escape(field);
        let patterns = [
            format!(r"(?im)\*\*{escaped}\*\*\s*:\s*(.+)$"),
            format!(r"(?im)\b{escaped}\s*:\s*(.+)$"),
            format!(r"(?im)\b{escaped}\s+is\s+(.+)$"),
        ];

        let value = patterns.iter().find_map(|pattern| {
            Regex::new(pattern)
                .ok()
                .and_then(|re| re.captures(text))
                .map(|cap| clean_scalar(&cap[1]))
        });

        match value {
            Some(v) => {
                found_any = true;
                result.insert(field.clone(), coerce_value(Value::String(v)));
            }
            None => {
                result.insert(field.clone(), Value::Null);
            }
        }
    }

    found_any.then_some(result)
}

/// Parse an AI response into the requested output fields.
pub fn parse_ai_response(text: &str, fields: &[String]) -> Result<Item, ParseError> {
    match classify_response(text) {
        ParsedResponse::Object(map) => Ok(extract_fields(&map, fields)),
        ParsedResponse::Array(items) => {
            object_from_array(items).map(|map| extract_fields(&map, fields))
        }
        ParsedResponse::Failure { .. } => natural_language_fields(text, fields)
            .ok_or_else(|| ParseError::NoJsonFound(preview(text))),
    }
}

/// Parse a batch response: a JSON array with exactly `expected` elements.
///
/// An object wrapping a single array (`{"results": [...]}`) is unwrapped, and
/// a bare object is accepted when exactly one result is expected.
pub fn parse_batch_response(text: &str, expected: usize) -> Result<Vec<Value>, ParseError> {
    let elements = match classify_response(text) {
        ParsedResponse::Array(items) => items,
        ParsedResponse::Object(map) => {
            let wrapped = if map.len() == 1 {
                map.values().next().and_then(Value::as_array).cloned()
            } else {
                None
            };
            match wrapped {
                Some(items) => items,
                None if expected == 1 => vec![Value::Object(map)],
                None => return Err(ParseError::NotAnArray(preview(text))),
            }
        }
        ParsedResponse::Failure { reason } => return Err(ParseError::NotAnArray(reason)),
    };

    if elements.len() != expected {
        return Err(ParseError::CountMismatch {
            got: elements.len(),
            expected,
        });
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_prefers_code_block() {
        let text = "{\"inline\":1} ```json\n{\"block\":2}\n```";
        assert_eq!(extract_json(text).unwrap(), "{\"block\":2}");
    }

    #[test]
    fn test_extract_last_valid_code_block() {
        let text = "```json\n{\"a\":1}\n```\nthen\n```\n{\"b\":2}\n```\nand\n```js\nnot json\n```";
        assert_eq!(extract_json(text).unwrap(), "{\"b\":2}");
    }

    #[test]
    fn test_extract_inline_with_prose() {
        let text = "Sure! Here you go: {\"score\": 7, \"note\": \"has } brace\"} Hope that helps.";
        let extracted = extract_json(text).unwrap();
        assert_eq!(extracted, "{\"score\": 7, \"note\": \"has } brace\"}");
    }

    #[test]
    fn test_extract_skips_prose_braces() {
        let text = "I used {placeholder} syntax. Result: {\"ok\": true}";
        assert_eq!(extract_json(text).unwrap(), "{\"ok\": true}");
    }

    #[test]
    fn test_extract_handles_escaped_quotes() {
        let text = r#"{"quote": "she said \"hi {there}\"", "n": 1}"#;
        assert_eq!(extract_json(text).unwrap(), text);
    }

    #[test]
    fn test_extract_too_many_closers_trims() {
        let text = "{\"a\": 1}}}";
        assert_eq!(extract_json(text).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_too_many_openers_fails() {
        assert_eq!(extract_json("{\"a\": {\"b\": 1}"), None);
        assert_eq!(extract_json("[{\"a\": 1}, {\"b\": 2}"), None);
        assert_eq!(extract_json("{"), None);
    }

    #[test]
    fn test_extract_skips_stray_opener_in_prose() {
        assert_eq!(extract_json("Sure { here you go {\"a\": 1}").unwrap(), "{\"a\": 1}");
        assert_eq!(extract_json("Using a [ list. Result {\"a\": 1}").unwrap(), "{\"a\": 1}");
        assert_eq!(extract_json("see [1, then {\"a\": 2}").unwrap(), "{\"a\": 2}");

        let parsed = parse_ai_response("Sure { here you go {\"a\": 1}", &fields(&["a"])).unwrap();
        assert_eq!(parsed["a"], json!(1));
    }

    #[test]
    fn test_extract_key_value_fallback() {
        let text = "name: \"Widget\",\nprice = 9.99;\n";
        let extracted = extract_json(text).unwrap();
        let value: Value = serde_json::from_str(&extracted).unwrap();
        assert_eq!(value, json!({"name": "Widget", "price": "9.99"}));
    }

    #[test]
    fn test_extract_nothing() {
        assert_eq!(extract_json("just some words"), None);
    }

    #[test]
    fn test_null_vs_missing() {
        let parsed = parse_ai_response("{\"a\":1}", &fields(&["a", "b"])).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["a"], json!(1));
        assert!(parsed.contains_key("b"));
        assert_eq!(parsed["b"], Value::Null);
    }

    #[test]
    fn test_case_insensitive_fields_and_extra_keys_dropped() {
        let parsed =
            parse_ai_response("{\"Sentiment\": \"positive\", \"extra\": 1}", &fields(&["sentiment"]))
                .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["sentiment"], json!("positive"));
    }

    #[test]
    fn test_coercion_table() {
        let text = r#"{"a": "yes", "b": "No", "c": "-3.5", "d": "42", "e": "N/A", "f": "", "g": "text", "h": "none"}"#;
        let parsed = parse_ai_response(text, &fields(&["a", "b", "c", "d", "e", "f", "g", "h"])).unwrap();
        assert_eq!(parsed["a"], json!(true));
        assert_eq!(parsed["b"], json!(false));
        assert_eq!(parsed["c"], json!(-3.5));
        assert_eq!(parsed["d"], json!(42));
        assert_eq!(parsed["e"], Value::Null);
        assert_eq!(parsed["f"], Value::Null);
        assert_eq!(parsed["g"], json!("text"));
        assert_eq!(parsed["h"], Value::Null);
    }

    #[test]
    fn test_repair_single_quotes_and_trailing_commas() {
        let text = "{'title': 'Dune', year: 1965,}";
        let parsed = parse_ai_response(text, &fields(&["title", "year"])).unwrap();
        assert_eq!(parsed["title"], json!("Dune"));
        assert_eq!(parsed["year"], json!(1965));
    }

    #[test]
    fn test_single_element_array_unwrapped() {
        let parsed = parse_ai_response("[{\"a\": 2}]", &fields(&["a"])).unwrap();
        assert_eq!(parsed["a"], json!(2));
    }

    #[test]
    fn test_pair_array_rebuilt() {
        let text = r#"[{"field": "a", "value": 1}, {"key": "b", "value": "x"}]"#;
        let parsed = parse_ai_response(text, &fields(&["a", "b"])).unwrap();
        assert_eq!(parsed["a"], json!(1));
        assert_eq!(parsed["b"], json!("x"));
    }

    #[test]
    fn test_array_instead_of_object() {
        let err = parse_ai_response("[1, 2, 3]", &fields(&["a"])).unwrap_err();
        assert_eq!(err, ParseError::ArrayInsteadOfObject);
        assert!(err.to_string().contains("array instead of object"));
    }

    #[test]
    fn test_natural_language_fallback() {
        let text = "The **Category**: \"Books\"\nThe rating is 4.\nSummary - nothing much";
        let parsed = parse_ai_response(text, &fields(&["category", "rating", "missing"])).unwrap();
        assert_eq!(parsed["category"], json!("Books"));
        assert_eq!(parsed["rating"], json!(4));
        assert_eq!(parsed["missing"], Value::Null);
    }

    #[test]
    fn test_no_json_found() {
        let err = parse_ai_response("I cannot help with that", &fields(&["answer"])).unwrap_err();
        assert!(err.to_string().contains("No JSON found"));
    }

    #[test]
    fn test_classify_response() {
        assert!(matches!(classify_response("{\"a\":1}"), ParsedResponse::Object(_)));
        assert!(matches!(classify_response("[1]"), ParsedResponse::Array(_)));
        assert!(matches!(classify_response("nope"), ParsedResponse::Failure { .. }));
    }

    #[test]
    fn test_parse_batch_response() {
        let ok = parse_batch_response("```json\n[{\"a\":1},{\"a\":2}]\n```", 2).unwrap();
        assert_eq!(ok.len(), 2);

        let wrapped = parse_batch_response("{\"results\": [{\"a\":1}]}", 1).unwrap();
        assert_eq!(wrapped, vec![json!({"a": 1})]);

        let err = parse_batch_response("[{\"a\":1},{\"a\":2}]", 3).unwrap_err();
        assert_eq!(err.to_string(), "AI returned 2 results but batch has 3 items");

        assert!(matches!(
            parse_batch_response("no json here", 2),
            Err(ParseError::NotAnArray(_))
        ));
    }
}
