// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reduce phase: fold map results into one output.
//!
//! | type    | output                                   |
//! |---------|------------------------------------------|
//! | `list`  | every map result, numbered listing       |
//! | `table` | markdown table of successful results     |
//! | `json`  | array of successful outputs              |
//! | `csv`   | CSV of successful results                |
//! | `text`  | concatenated responses                   |
//! | `ai`    | one more AI call over the results        |

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::config::{ReduceConfig, ReduceType, DEFAULT_TIMEOUT_MS};
use crate::csv::write_csv;
use crate::invoker::AiInvoker;
use crate::parser::{parse_ai_response, ParseError};
use crate::template::{
    references_variable, substitute, value_to_template_string, COUNT_VAR, FAILURE_COUNT_VAR,
    RESULTS_FILE_VAR, RESULTS_VAR, SUCCESS_COUNT_VAR,
};
use crate::types::{parameters_to_context, Item, MapResult, Parameter, ReduceResult, ReduceStats};

use super::map::json_instruction;
use super::retry::{invoke_with_retry, CallOutcome};

/// Text used when nothing succeeded.
pub const NO_SUCCESSFUL_RESULTS: &str = "No successful results.";

/// Errors from the reduce phase. All of them fail the pipeline.
#[derive(Error, Debug)]
pub enum ReduceError {
    #[error("AI reduce requires a prompt")]
    MissingPrompt,

    #[error("AI reduce failed: {0}")]
    AiFailed(String),

    #[error("AI reduce timed out after {0}ms (retried once)")]
    Timeout(u64),

    #[error("Failed to parse AI reduce response: {0}")]
    Parse(#[from] ParseError),

    #[error("Failed to write results file: {0}")]
    ResultsFile(String),
}

// ============================================================================
// Shared helpers
// ============================================================================

fn successful(results: &[MapResult]) -> impl Iterator<Item = &MapResult> {
    results.iter().filter(|r| r.success)
}

/// The fields a result contributes as output columns.
///
/// Text-mode results contribute their response under `output`.
fn output_columns_of(result: &MapResult) -> Item {
    if !result.output.is_empty() {
        return result.output.clone();
    }
    let mut fields = Item::new();
    if let Some(ref text) = result.raw_text {
        fields.insert("output".to_string(), Value::String(text.clone()));
    }
    fields
}

/// Column layout for tabular reduces: item fields first, then output
/// fields, renamed `out_<field>` when they collide with an item field.
struct Columns {
    item: Vec<String>,
    output: Vec<(String, String)>,
}

impl Columns {
    fn from_results(results: &[&MapResult]) -> Self {
        let mut item: Vec<String> = Vec::new();
        let mut output_keys: Vec<String> = Vec::new();

        for result in results {
            for key in result.item.keys() {
                if !item.contains(key) {
                    item.push(key.clone());
                }
            }
            for key in output_columns_of(result).keys() {
                if !output_keys.contains(key) {
                    output_keys.push(key.clone());
                }
            }
        }

        let output = output_keys
            .into_iter()
            .map(|key| {
                let header = if item.contains(&key) {
                    format!("out_{}", key)
                } else {
                    key.clone()
                };
                (key, header)
            })
            .collect();

        Self { item, output }
    }

    fn headers(&self) -> Vec<String> {
        self.item
            .iter()
            .cloned()
            .chain(self.output.iter().map(|(_, header)| header.clone()))
            .collect()
    }

    fn row(&self, result: &MapResult) -> Vec<Value> {
        let outputs = output_columns_of(result);
        self.item
            .iter()
            .map(|key| result.item.get(key).cloned().unwrap_or(Value::Null))
            .chain(
                self.output
                    .iter()
                    .map(|(key, _)| outputs.get(key).cloned().unwrap_or(Value::Null)),
            )
            .collect()
    }

    fn row_object(&self, headers: &[String], row: Vec<Value>) -> Value {
        Value::Object(headers.iter().cloned().zip(row).collect())
    }
}

fn compact(value: &impl serde::Serialize) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}

// ============================================================================
// Non-AI reduces
// ============================================================================

/// Every map result, with a numbered ✓/✗ listing.
pub fn reduce_list(results: &[MapResult]) -> (Value, String) {
    let output = serde_json::to_value(results).unwrap_or(Value::Array(Vec::new()));

    if results.is_empty() {
        return (output, "No results.".to_string());
    }

    let lines: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            if r.success {
                let body = match r.raw_text {
                    Some(ref text) if r.output.is_empty() => text.clone(),
                    _ => compact(&r.output),
                };
                format!("{}. ✓ {} -> {}", i + 1, compact(&r.item), body)
            } else {
                format!(
                    "{}. ✗ {} ({})",
                    i + 1,
                    compact(&r.item),
                    r.error.as_deref().unwrap_or("unknown error")
                )
            }
        })
        .collect();

    (output, lines.join("\n"))
}

fn escape_table_cell(value: &Value) -> String {
    value_to_template_string(value)
        .replace('|', "\\|")
        .replace("\r\n", " ")
        .replace('\n', " ")
}

/// Markdown table over successful results.
pub fn reduce_table(results: &[MapResult]) -> (Value, String) {
    let ok: Vec<&MapResult> = successful(results).collect();
    if ok.is_empty() {
        return (Value::Array(Vec::new()), NO_SUCCESSFUL_RESULTS.to_string());
    }

    let columns = Columns::from_results(&ok);
    let headers = columns.headers();

    let mut lines = vec![
        format!("| {} |", headers.join(" | ")),
        format!("|{}", " --- |".repeat(headers.len())),
    ];
    let mut rows = Vec::with_capacity(ok.len());

    for result in &ok {
        let row = columns.row(result);
        let cells: Vec<String> = row.iter().map(escape_table_cell).collect();
        lines.push(format!("| {} |", cells.join(" | ")));
        rows.push(columns.row_object(&headers, row));
    }

    (Value::Array(rows), lines.join("\n"))
}

/// Pretty JSON array of successful outputs.
pub fn reduce_json(results: &[MapResult]) -> (Value, String) {
    let outputs: Vec<Value> = successful(results)
        .map(|r| Value::Object(output_columns_of(r)))
        .collect();
    let formatted = pretty(&outputs);
    (Value::Array(outputs), formatted)
}

/// CSV over successful results.
pub fn reduce_csv(results: &[MapResult]) -> (Value, String) {
    let ok: Vec<&MapResult> = successful(results).collect();
    if ok.is_empty() {
        return (Value::Array(Vec::new()), String::new());
    }

    let columns = Columns::from_results(&ok);
    let headers = columns.headers();

    let mut objects = Vec::with_capacity(ok.len());
    let mut rows = Vec::with_capacity(ok.len());
    for result in &ok {
        let row = columns.row(result);
        rows.push(row.iter().map(value_to_template_string).collect());
        objects.push(columns.row_object(&headers, row));
    }

    (Value::Array(objects), write_csv(&headers, &rows))
}

/// Concatenated responses of successful results.
pub fn reduce_text(results: &[MapResult]) -> (Value, String) {
    let bodies: Vec<String> = successful(results)
        .map(|r| match r.raw_text {
            Some(ref text) => text.clone(),
            None => compact(&r.output),
        })
        .collect();

    let formatted = match bodies.len() {
        0 => NO_SUCCESSFUL_RESULTS.to_string(),
        1 => bodies[0].clone(),
        _ => bodies
            .iter()
            .enumerate()
            .map(|(i, body)| format!("--- Item {} ---\n{}", i + 1, body))
            .collect::<Vec<_>>()
            .join("\n\n"),
    };

    (Value::String(formatted.clone()), formatted)
}

// ============================================================================
// AI reduce
// ============================================================================

/// The `{{RESULTS}}` payload: one entry per successful result.
///
/// Structured results contribute their output object (plus `rawText` when a
/// response was also kept), text-mode results their response string.
pub fn results_payload(results: &[MapResult]) -> Value {
    let entries = successful(results)
        .map(|r| match (r.output.is_empty(), &r.raw_text) {
            (false, Some(text)) => {
                let mut object = r.output.clone();
                object.insert("rawText".to_string(), Value::String(text.clone()));
                Value::Object(object)
            }
            (false, None) => Value::Object(r.output.clone()),
            (true, Some(text)) => Value::String(text.clone()),
            (true, None) => Value::Object(Item::new()),
        })
        .collect();
    Value::Array(entries)
}

/// Temporary file holding the results for `{{RESULTS_FILE}}`.
///
/// Deleted when dropped; a failed delete is logged and otherwise ignored.
struct ResultsFile {
    file: Option<NamedTempFile>,
}

impl ResultsFile {
    fn create(payload: &str) -> Result<Self, ReduceError> {
        let mut file = tempfile::Builder::new()
            .prefix("ai-reduce-results")
            .suffix(".json")
            .tempfile()
            .map_err(|e| ReduceError::ResultsFile(e.to_string()))?;
        file.write_all(payload.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| ReduceError::ResultsFile(e.to_string()))?;

        tracing::debug!("Wrote reduce results to {}", file.path().display());
        Ok(Self { file: Some(file) })
    }

    fn path_string(&self) -> String {
        self.file
            .as_ref()
            .map(|f| f.path().display().to_string())
            .unwrap_or_default()
    }
}

impl Drop for ResultsFile {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                tracing::warn!("Failed to delete results file {}: {}", path.display(), e);
            }
        }
    }
}

/// Runs the reduce phase.
pub struct ReduceExecutor {
    invoker: Arc<dyn AiInvoker>,
}

impl ReduceExecutor {
    pub fn new(invoker: Arc<dyn AiInvoker>) -> Self {
        Self { invoker }
    }

    /// Reduce map results according to `config`.
    pub async fn execute(
        &self,
        results: &[MapResult],
        config: &ReduceConfig,
        parameters: &[Parameter],
    ) -> Result<ReduceResult, ReduceError> {
        let start = Instant::now();
        let success_count = successful(results).count();

        let (output, formatted_output, output_count) = match config.reduce_type {
            ReduceType::List => {
                let (output, formatted) = reduce_list(results);
                (output, formatted, results.len())
            }
            ReduceType::Table => {
                let (output, formatted) = reduce_table(results);
                (output, formatted, success_count)
            }
            ReduceType::Json => {
                let (output, formatted) = reduce_json(results);
                (output, formatted, success_count)
            }
            ReduceType::Csv => {
                let (output, formatted) = reduce_csv(results);
                (output, formatted, success_count)
            }
            ReduceType::Text => {
                let (output, formatted) = reduce_text(results);
                (output, formatted, success_count)
            }
            ReduceType::Ai => {
                let (output, formatted) = self.reduce_with_ai(results, config, parameters).await?;
                (output, formatted, 1)
            }
        };

        let stats = ReduceStats {
            input_count: results.len(),
            output_count,
            reduce_time_ms: start.elapsed().as_millis() as u64,
            used_ai_reduce: config.reduce_type == ReduceType::Ai,
        };

        tracing::debug!(
            "Reduced {} results with '{}' in {}ms",
            stats.input_count,
            config.reduce_type,
            stats.reduce_time_ms
        );

        Ok(ReduceResult {
            output,
            formatted_output,
            stats,
        })
    }

    async fn reduce_with_ai(
        &self,
        results: &[MapResult],
        config: &ReduceConfig,
        parameters: &[Parameter],
    ) -> Result<(Value, String), ReduceError> {
        let template = config
            .prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(ReduceError::MissingPrompt)?;

        let success_count = successful(results).count();
        let payload = pretty(&results_payload(results));

        let mut context = parameters_to_context(parameters);
        context.insert(RESULTS_VAR.to_string(), Value::String(payload.clone()));
        context.insert(COUNT_VAR.to_string(), Value::from(results.len()));
        context.insert(SUCCESS_COUNT_VAR.to_string(), Value::from(success_count));
        context.insert(
            FAILURE_COUNT_VAR.to_string(),
            Value::from(results.len() - success_count),
        );

        // Held until this function returns so the file outlives the call.
        let results_file = if references_variable(template, RESULTS_FILE_VAR) {
            let file = ResultsFile::create(&payload)?;
            context.insert(RESULTS_FILE_VAR.to_string(), Value::String(file.path_string()));
            Some(file)
        } else {
            None
        };

        let fields = config.output_fields();
        let mut prompt = substitute(template, &Item::new(), Some(&context));
        if !fields.is_empty() {
            prompt.push_str(&json_instruction(fields));
        }

        let model = config
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let timeout_ms = config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);

        let report = invoke_with_retry(self.invoker.as_ref(), &prompt, model, timeout_ms).await;
        let response = match report.outcome {
            CallOutcome::TimedOut { timeout_ms } => return Err(ReduceError::Timeout(timeout_ms)),
            CallOutcome::Completed(result) if !result.success => {
                return Err(ReduceError::AiFailed(result.error_message()))
            }
            CallOutcome::Completed(result) => result.response.unwrap_or_default(),
        };

        let reduced = if fields.is_empty() {
            (Value::String(response.clone()), response)
        } else {
            let output = parse_ai_response(&response, fields)?;
            let formatted = pretty(&output);
            (Value::Object(output), formatted)
        };

        drop(results_file);
        Ok(reduced)
    }
}
