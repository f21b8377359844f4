// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Prompt template substitution.
//!
//! Templates use `{{name}}` placeholders where `name` is made of ASCII
//! letters, digits and underscores. Whitespace inside the braces is not
//! allowed, so `{{ name }}` is left as literal text.
//!
//! A handful of reserved names are filled by the executor rather than by
//! item data (see [`SPECIAL_VARIABLES`]). When no value for a reserved name is
//! supplied in the context, its placeholder is kept verbatim so a later pass
//! can fill it in.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

use crate::types::Item;

/// Static regex for placeholder matching (compiled once).
static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("placeholder regex is valid"));

/// Batch rendering of the items in a map batch.
pub const ITEMS_VAR: &str = "ITEMS";
/// JSON array of map outputs, used by ai-reduce.
pub const RESULTS_VAR: &str = "RESULTS";
/// Path of a temp file holding the map outputs, used by ai-reduce.
pub const RESULTS_FILE_VAR: &str = "RESULTS_FILE";
/// Total number of map results.
pub const COUNT_VAR: &str = "COUNT";
/// Number of successful map results.
pub const SUCCESS_COUNT_VAR: &str = "SUCCESS_COUNT";
/// Number of failed map results.
pub const FAILURE_COUNT_VAR: &str = "FAILURE_COUNT";

/// Names resolved by the executor instead of item data.
pub const SPECIAL_VARIABLES: &[&str] = &[
    ITEMS_VAR,
    RESULTS_VAR,
    RESULTS_FILE_VAR,
    COUNT_VAR,
    SUCCESS_COUNT_VAR,
    FAILURE_COUNT_VAR,
];

/// Errors raised by strict substitution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Missing required variable: {0}")]
    MissingVariable(String),
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateValidation {
    pub valid: bool,
    pub missing_variables: Vec<String>,
}

/// Check whether a name is one of the reserved executor variables.
pub fn is_special_variable(name: &str) -> bool {
    SPECIAL_VARIABLES.contains(&name)
}

/// Render a JSON scalar the way it should appear inside a prompt.
pub fn value_to_template_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

enum Resolution {
    Value(String),
    Keep,
    Missing,
}

fn resolve(name: &str, item: &Item, context: Option<&Item>) -> Resolution {
    if is_special_variable(name) {
        return match context.and_then(|ctx| ctx.get(name)) {
            Some(value) => Resolution::Value(value_to_template_string(value)),
            None => Resolution::Keep,
        };
    }

    if let Some(value) = item.get(name) {
        return Resolution::Value(value_to_template_string(value));
    }

    match context.and_then(|ctx| ctx.get(name)) {
        Some(value) => Resolution::Value(value_to_template_string(value)),
        None => Resolution::Missing,
    }
}

/// Substitute placeholders, replacing unknown variables with an empty string.
pub fn substitute(template: &str, item: &Item, context: Option<&Item>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures| match resolve(&caps[1], item, context) {
            Resolution::Value(v) => v,
            Resolution::Keep => caps[0].to_string(),
            Resolution::Missing => String::new(),
        })
        .into_owned()
}

/// Substitute placeholders, failing on the first unknown variable.
pub fn substitute_strict(
    template: &str,
    item: &Item,
    context: Option<&Item>,
) -> Result<String, TemplateError> {
    let mut missing: Option<String> = None;
    let rendered = PLACEHOLDER_REGEX.replace_all(template, |caps: &Captures| {
        match resolve(&caps[1], item, context) {
            Resolution::Value(v) => v,
            Resolution::Keep => caps[0].to_string(),
            Resolution::Missing => {
                if missing.is_none() {
                    missing = Some(caps[1].to_string());
                }
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(TemplateError::MissingVariable(name)),
        None => Ok(rendered.into_owned()),
    }
}

/// List the placeholder names in a template, deduplicated in order of first
/// appearance.
pub fn extract_variables(template: &str, exclude_special: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    PLACEHOLDER_REGEX
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .filter(|name| !(exclude_special && is_special_variable(name)))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Check that an item supplies every non-special variable of a template.
pub fn validate(template: &str, item: &Item) -> TemplateValidation {
    let missing_variables: Vec<String> = extract_variables(template, true)
        .into_iter()
        .filter(|name| !item.contains_key(name))
        .collect();

    TemplateValidation {
        valid: missing_variables.is_empty(),
        missing_variables,
    }
}

/// Check whether a template references a given variable.
pub fn references_variable(template: &str, name: &str) -> bool {
    PLACEHOLDER_REGEX
        .captures_iter(template)
        .any(|cap| &cap[1] == name)
}

/// Escape braces and backslashes so a value can be embedded in a template
/// without being read as a placeholder.
pub fn escape_template_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' | '{' | '}' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_substitute_from_item() {
        let it = item(json!({"name": "Ada", "age": 36, "active": true, "nick": null}));
        let out = substitute("{{name}} is {{age}} ({{active}}) [{{nick}}]", &it, None);
        assert_eq!(out, "Ada is 36 (true) []");
    }

    #[test]
    fn test_whitespace_placeholders_do_not_match() {
        let it = item(json!({"name": "Ada"}));
        assert_eq!(substitute("Hi {{ name }}", &it, None), "Hi {{ name }}");
    }

    #[test]
    fn test_special_variables_kept_without_context() {
        let it = item(json!({"name": "Ada"}));
        let out = substitute("{{name}}: {{RESULTS}} / {{COUNT}}", &it, None);
        assert_eq!(out, "Ada: {{RESULTS}} / {{COUNT}}");
    }

    #[test]
    fn test_special_variables_from_context() {
        let it = Item::new();
        let ctx = item(json!({"COUNT": 3, "RESULTS": "[]"}));
        let out = substitute("{{COUNT}} {{RESULTS}} {{FAILURE_COUNT}}", &it, Some(&ctx));
        assert_eq!(out, "3 [] {{FAILURE_COUNT}}");
    }

    #[test]
    fn test_item_takes_precedence_over_context() {
        let it = item(json!({"tone": "formal"}));
        let ctx = item(json!({"tone": "casual", "lang": "en"}));
        assert_eq!(substitute("{{tone}}/{{lang}}", &it, Some(&ctx)), "formal/en");
    }

    #[test]
    fn test_missing_variable_non_strict_is_empty() {
        let it = Item::new();
        assert_eq!(substitute("a{{missing}}b", &it, None), "ab");
    }

    #[test]
    fn test_missing_variable_strict_errors() {
        let it = Item::new();
        let err = substitute_strict("a{{missing}}b", &it, None).unwrap_err();
        assert_eq!(err, TemplateError::MissingVariable("missing".to_string()));
        assert!(substitute_strict("{{ITEMS}}", &it, None).is_ok());
    }

    #[test]
    fn test_substitute_is_idempotent() {
        let it = item(json!({"a": "x", "b": 2}));
        let template = "{{a}}-{{b}}-{{RESULTS}}-{{c}}";
        let once = substitute(template, &it, None);
        assert_eq!(substitute(&once, &it, None), once);
    }

    #[test]
    fn test_extract_variables() {
        let vars = extract_variables("{{a}} {{b}} {{a}} {{ITEMS}} {{COUNT}}", true);
        assert_eq!(vars, vec!["a", "b"]);

        let all = extract_variables("{{a}} {{ITEMS}}", false);
        assert_eq!(all, vec!["a", "ITEMS"]);
    }

    #[test]
    fn test_validate_ignores_special() {
        let it = item(json!({"a": 1}));
        let result = validate("{{a}} {{b}} {{RESULTS_FILE}}", &it);
        assert!(!result.valid);
        assert_eq!(result.missing_variables, vec!["b"]);

        assert!(validate("{{a}} {{ITEMS}}", &it).valid);
    }

    #[test]
    fn test_escape_template_value() {
        assert_eq!(escape_template_value(r"{x}\y"), r"\{x\}\\y");
        assert_eq!(escape_template_value("plain"), "plain");
    }

    #[test]
    fn test_references_variable() {
        assert!(references_variable("see {{RESULTS_FILE}}", RESULTS_FILE_VAR));
        assert!(!references_variable("see {{RESULTS}}", RESULTS_FILE_VAR));
    }
}
