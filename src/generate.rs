// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! AI-generated input items.
//!
//! When a pipeline has no static input it can ask the AI for a list of items
//! matching a field schema. Every generated item carries exactly the schema
//! fields, as strings.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::config::GenerateConfig;
use crate::executor::retry::{invoke_with_retry, CallOutcome};
use crate::invoker::AiInvoker;
use crate::parser::{classify_response, ParsedResponse};
use crate::template::value_to_template_string;
use crate::types::Item;

static FIELD_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Errors that can occur while generating input items.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("AI generation failed: {0}")]
    AiFailed(String),

    #[error("AI generation timed out after {0}ms")]
    Timeout(u64),

    #[error("Could not parse generated items: {0}")]
    Unparsable(String),
}

/// Check that schema field names are present, identifier-safe and unique.
pub fn validate_schema(schema: &[String]) -> Result<(), GenerateError> {
    if schema.is_empty() {
        return Err(GenerateError::InvalidSchema(
            "at least one field is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for field in schema {
        if !FIELD_NAME_REGEX.is_match(field) {
            return Err(GenerateError::InvalidSchema(format!(
                "\"{}\" is not a valid field name",
                field
            )));
        }
        if !seen.insert(field.as_str()) {
            return Err(GenerateError::InvalidSchema(format!(
                "duplicate field \"{}\"",
                field
            )));
        }
    }
    Ok(())
}

/// Build the prompt sent to the AI.
pub fn build_generation_prompt(prompt: &str, schema: &[String]) -> String {
    let example: serde_json::Map<String, Value> = schema
        .iter()
        .map(|f| (f.clone(), Value::String("...".to_string())))
        .collect();
    let example = Value::Array(vec![Value::Object(example)]);

    format!(
        "{}\n\nReturn a JSON array of objects. Each object must have exactly these fields: {}.\n\
         Example shape:\n{}\n\nRespond with only the JSON array.",
        prompt.trim(),
        schema.join(", "),
        serde_json::to_string_pretty(&example).unwrap_or_default()
    )
}

/// Normalize one generated element against the schema.
///
/// Missing fields become empty strings, other values are stringified, and
/// keys outside the schema are dropped.
pub fn normalize_item(object: &serde_json::Map<String, Value>, schema: &[String]) -> Item {
    schema
        .iter()
        .map(|field| {
            let value = object
                .get(field)
                .map(value_to_template_string)
                .unwrap_or_default();
            (field.clone(), Value::String(value))
        })
        .collect()
}

/// Parse a generation response into normalized items.
pub fn parse_generated_items(text: &str, schema: &[String]) -> Result<Vec<Item>, GenerateError> {
    let elements = match classify_response(text) {
        ParsedResponse::Array(items) => items,
        ParsedResponse::Object(map) => {
            let wrapped = if map.len() == 1 {
                map.values().next().and_then(Value::as_array).cloned()
            } else {
                None
            };
            wrapped.unwrap_or_else(|| vec![Value::Object(map)])
        }
        ParsedResponse::Failure { reason } => return Err(GenerateError::Unparsable(reason)),
    };

    let mut items = Vec::with_capacity(elements.len());
    for (i, element) in elements.iter().enumerate() {
        match element {
            Value::Object(object) => items.push(normalize_item(object, schema)),
            other => tracing::warn!("Skipping generated element {} (not an object): {}", i, other),
        }
    }
    Ok(items)
}

/// Items produced by a generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedItems {
    pub items: Vec<Item>,
    /// Invoker calls it took, retries included
    pub ai_calls: usize,
}

/// Generate input items with one AI call.
pub async fn generate_items(
    invoker: &dyn AiInvoker,
    config: &GenerateConfig,
    timeout_ms: u64,
) -> Result<GeneratedItems, GenerateError> {
    validate_schema(&config.schema)?;

    let prompt = build_generation_prompt(&config.prompt, &config.schema);
    let report = invoke_with_retry(invoker, &prompt, config.model.clone(), timeout_ms).await;

    let result = match report.outcome {
        CallOutcome::Completed(result) => result,
        CallOutcome::TimedOut { timeout_ms } => return Err(GenerateError::Timeout(timeout_ms)),
    };

    if !result.success {
        return Err(GenerateError::AiFailed(result.error_message()));
    }

    let items = parse_generated_items(result.response.as_deref().unwrap_or_default(), &config.schema)?;
    if items.is_empty() {
        tracing::warn!("AI generation returned no items");
    }
    tracing::info!("Generated {} input items", items.len());
    Ok(GeneratedItems {
        items,
        ai_calls: report.attempts,
    })
}
