// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Map phase: one AI call per item, or per batch of items.
//!
//! Batches are dispatched as tokio tasks gated by a semaphore sized by
//! `parallel`. Results are written back by index, so output order always
//! matches input order no matter which call finishes first.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::config::MapConfig;
use crate::error::PipelineError;
use crate::invoker::AiInvoker;
use crate::parser::{extract_fields, parse_ai_response, parse_batch_response, ParseError};
use crate::template::{self, references_variable, substitute, ITEMS_VAR};
use crate::types::{
    merge_parameters, parameters_to_context, Item, MapResult, Parameter, ProgressPhase,
    ProgressUpdate,
};

use super::retry::{invoke_with_retry, CallOutcome};
use super::PipelineCallbacks;

/// Instruction appended to structured-mode prompts.
pub fn json_instruction(fields: &[String]) -> String {
    format!("\n\nReturn JSON with fields: {}", fields.join(", "))
}

fn batch_instruction(fields: &[String], count: usize) -> String {
    if fields.is_empty() {
        format!(
            "\n\nReturn a JSON array of {} strings, one response per item, in the same order.",
            count
        )
    } else {
        format!(
            "\n\nReturn a JSON array of {} objects, one per item, in the same order. \
             Each object must have fields: {}",
            count,
            fields.join(", ")
        )
    }
}

/// Resolve a model template against an item. Blank means "no model".
pub fn resolve_model(model: Option<&str>, item: &Item) -> Option<String> {
    model
        .map(|m| substitute(m, item, None).trim().to_string())
        .filter(|m| !m.is_empty())
}

/// Check that every item supplies the prompt's non-special variables.
///
/// Fails on the first item with missing names, listing all of that item's
/// missing names.
pub fn validate_items(prompt: &str, items: &[Item], parameters: &[Parameter]) -> Result<(), PipelineError> {
    for (i, item) in items.iter().enumerate() {
        let merged = merge_parameters(item, parameters);
        let validation = template::validate(prompt, &merged);
        if !validation.valid {
            return Err(PipelineError::MissingVariables(format!(
                "Item {} is missing required template variables: {}",
                i + 1,
                validation.missing_variables.join(", ")
            )));
        }
    }
    Ok(())
}

/// Everything the map phase produced.
#[derive(Debug, Clone, Default)]
pub struct MapPhaseOutput {
    /// One result per input item, in input order
    pub results: Vec<MapResult>,

    /// First hard failure (timeout exhausted or batch count mismatch)
    pub fatal_error: Option<String>,

    /// Invoker calls issued, retries included
    pub ai_calls: usize,

    /// Highest number of logical calls in flight at once
    pub max_concurrency: usize,
}

struct BatchOutcome {
    results: Vec<MapResult>,
    fatal: Option<String>,
}

/// Settings shared by every batch task.
struct BatchContext {
    invoker: Arc<dyn AiInvoker>,
    prompt: String,
    output_fields: Vec<String>,
    model: Option<String>,
    timeout_ms: u64,
    parameters: Vec<Parameter>,
    batched: bool,
    ai_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl BatchContext {
    async fn call(&self, prompt: &str, model: Option<String>) -> CallOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let report = invoke_with_retry(self.invoker.as_ref(), prompt, model, self.timeout_ms).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.ai_calls.fetch_add(report.attempts, Ordering::SeqCst);
        report.outcome
    }

    fn structured(&self) -> bool {
        !self.output_fields.is_empty()
    }

    async fn run_single(&self, item: Item) -> BatchOutcome {
        let start = Instant::now();
        let merged = merge_parameters(&item, &self.parameters);

        let mut prompt = substitute(&self.prompt, &merged, None);
        if self.structured() {
            prompt.push_str(&json_instruction(&self.output_fields));
        }
        let model = resolve_model(self.model.as_deref(), &merged);

        let outcome = self.call(&prompt, model).await;
        let elapsed = start.elapsed().as_millis() as u64;

        let (result, fatal) = match outcome {
            CallOutcome::TimedOut { timeout_ms } => {
                let message = CallOutcome::timeout_message(timeout_ms);
                (MapResult::failure(item, message.clone(), elapsed), Some(message))
            }
            CallOutcome::Completed(result) if !result.success => {
                (MapResult::failure(item, result.error_message(), elapsed), None)
            }
            CallOutcome::Completed(result) => {
                let text = result.response.unwrap_or_default();
                if self.structured() {
                    match parse_ai_response(&text, &self.output_fields) {
                        Ok(output) => (MapResult::structured(item, output, elapsed), None),
                        Err(e) => (MapResult::failure(item, e.to_string(), elapsed), None),
                    }
                } else {
                    (MapResult::text(item, text, elapsed), None)
                }
            }
        };

        BatchOutcome {
            results: vec![result],
            fatal,
        }
    }

    async fn run_batch(&self, items: Vec<Item>) -> BatchOutcome {
        let start = Instant::now();
        let count = items.len();

        let items_json = serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string());
        let mut context = parameters_to_context(&self.parameters);
        context.insert(ITEMS_VAR.to_string(), Value::String(items_json));

        let template = if references_variable(&self.prompt, ITEMS_VAR) {
            self.prompt.clone()
        } else {
            format!("{}\n\nItems:\n{{{{{}}}}}", self.prompt, ITEMS_VAR)
        };
        // Item placeholders and the model come from the first item.
        let first = items
            .first()
            .map(|item| merge_parameters(item, &self.parameters))
            .unwrap_or_default();
        let mut prompt = substitute(&template, &first, Some(&context));
        prompt.push_str(&batch_instruction(&self.output_fields, count));

        let model = resolve_model(self.model.as_deref(), &first);

        let outcome = self.call(&prompt, model).await;
        let elapsed = start.elapsed().as_millis() as u64;

        let fail_all = |items: Vec<Item>, message: &str| -> Vec<MapResult> {
            items
                .into_iter()
                .map(|item| MapResult::failure(item, message, elapsed))
                .collect()
        };

        let result = match outcome {
            CallOutcome::TimedOut { timeout_ms } => {
                let message = CallOutcome::timeout_message(timeout_ms);
                return BatchOutcome {
                    results: fail_all(items, &message),
                    fatal: Some(message),
                };
            }
            CallOutcome::Completed(result) => result,
        };

        if !result.success {
            return BatchOutcome {
                results: fail_all(items, &result.error_message()),
                fatal: None,
            };
        }

        let text = result.response.unwrap_or_default();
        match parse_batch_response(&text, count) {
            Ok(elements) => {
                let results = items
                    .into_iter()
                    .zip(elements)
                    .enumerate()
                    .map(|(i, (item, element))| self.batch_element_result(item, element, i, elapsed))
                    .collect();
                BatchOutcome {
                    results,
                    fatal: None,
                }
            }
            Err(e @ ParseError::CountMismatch { .. }) => {
                let message = e.to_string();
                tracing::warn!("Batch of {} failed: {}", count, message);
                BatchOutcome {
                    results: fail_all(items, &message),
                    fatal: Some(message),
                }
            }
            Err(e) => BatchOutcome {
                results: fail_all(items, &e.to_string()),
                fatal: None,
            },
        }
    }

    fn batch_element_result(&self, item: Item, element: Value, index: usize, elapsed: u64) -> MapResult {
        if self.structured() {
            match element {
                Value::Object(object) => {
                    MapResult::structured(item, extract_fields(&object, &self.output_fields), elapsed)
                }
                other => MapResult::failure(
                    item,
                    format!("Batch result {} is not an object: {}", index + 1, other),
                    elapsed,
                ),
            }
        } else {
            match element {
                Value::String(text) => MapResult::text(item, text, elapsed),
                other => MapResult::text(item, other.to_string(), elapsed),
            }
        }
    }
}

/// Runs the map phase.
pub struct MapExecutor {
    invoker: Arc<dyn AiInvoker>,
}

impl MapExecutor {
    pub fn new(invoker: Arc<dyn AiInvoker>) -> Self {
        Self { invoker }
    }

    /// Map every item. Validates template variables before the first call.
    pub async fn execute(
        &self,
        items: &[Item],
        config: &MapConfig,
        parameters: &[Parameter],
        callbacks: Arc<dyn PipelineCallbacks>,
    ) -> Result<MapPhaseOutput, PipelineError> {
        validate_items(&config.prompt, items, parameters)?;

        let total = items.len();
        if total == 0 {
            callbacks.on_progress(&ProgressUpdate::new(ProgressPhase::Mapping, 0, 0));
            return Ok(MapPhaseOutput::default());
        }

        let batch_size = config.batch_size().max(1);
        let batched = batch_size > 1;
        let batches: Vec<(usize, Vec<Item>)> = items
            .chunks(batch_size)
            .enumerate()
            .map(|(i, chunk)| (i * batch_size, chunk.to_vec()))
            .collect();
        let total_batches = batches.len();

        tracing::info!(
            "Mapping {} items in {} {} (parallel {})",
            total,
            total_batches,
            if batched { "batches" } else { "calls" },
            config.parallel()
        );

        let context = Arc::new(BatchContext {
            invoker: self.invoker.clone(),
            prompt: config.prompt.clone(),
            output_fields: config.output_fields().to_vec(),
            model: config.model.clone(),
            timeout_ms: config.timeout_ms(),
            parameters: parameters.to_vec(),
            batched,
            ai_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });

        let semaphore = Arc::new(Semaphore::new(config.parallel().max(1)));
        let processed = Arc::new(AtomicUsize::new(0));
        let batches_done = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(total_batches);
        let mut cancelled = false;

        for (offset, batch) in batches {
            if callbacks.is_cancelled() {
                cancelled = true;
                break;
            }

            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                PipelineError::Scheduling(format!("Failed to acquire map permit: {}", e))
            })?;
            // Cancellation may have arrived while waiting for the permit.
            if callbacks.is_cancelled() {
                drop(permit);
                cancelled = true;
                break;
            }

            let context = context.clone();
            let callbacks = callbacks.clone();
            let processed = processed.clone();
            let batches_done = batches_done.clone();
            let fallback = batch.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let len = batch.len();
                let outcome = if context.batched {
                    context.run_batch(batch).await
                } else {
                    let item = batch.into_iter().next().unwrap_or_default();
                    context.run_single(item).await
                };

                let done = processed.fetch_add(len, Ordering::SeqCst) + len;
                let done_batches = batches_done.fetch_add(1, Ordering::SeqCst) + 1;
                let message = if context.batched {
                    format!("Completed batch {}/{}", done_batches, total_batches)
                } else {
                    format!("Processed {}/{} items", done, total)
                };
                callbacks.on_progress(
                    &ProgressUpdate::new(ProgressPhase::Mapping, done, total).with_message(message),
                );
                outcome
            });

            handles.push((offset, fallback, handle));
        }

        let mut slots: Vec<Option<MapResult>> = vec![None; total];
        let mut fatal_error = None;

        for (offset, fallback, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("Map task failed: {}", e);
                    let message = format!("Map task failed: {}", e);
                    BatchOutcome {
                        results: fallback
                            .into_iter()
                            .map(|item| MapResult::failure(item, message.clone(), 0))
                            .collect(),
                        fatal: Some(message),
                    }
                }
            };

            if fatal_error.is_none() {
                fatal_error = outcome.fatal;
            }
            for (i, result) in outcome.results.into_iter().enumerate() {
                slots[offset + i] = Some(result);
            }
        }

        if cancelled {
            tracing::info!("Map phase cancelled after in-flight calls finished");
            return Err(PipelineError::Cancelled);
        }

        let results: Vec<MapResult> = slots
            .into_iter()
            .zip(items)
            .map(|(slot, item)| {
                slot.unwrap_or_else(|| MapResult::failure(item.clone(), "Item was not processed", 0))
            })
            .collect();

        Ok(MapPhaseOutput {
            results,
            fatal_error,
            ai_calls: context.ai_calls.load(Ordering::SeqCst),
            max_concurrency: context.max_in_flight.load(Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NoOpCallbacks;
    use crate::invoker::{InvokeOptions, InvokeResult, MockAiInvoker};
    use serde_json::json;
    use std::sync::Mutex;

    fn item(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    fn map_config(prompt: &str, output: &[&str]) -> MapConfig {
        MapConfig {
            prompt: prompt.to_string(),
            output: Some(output.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_model() {
        let it = item(json!({"model": "gpt-4o", "blank": "  "}));
        assert_eq!(resolve_model(Some("{{model}}"), &it).as_deref(), Some("gpt-4o"));
        assert_eq!(resolve_model(Some("{{blank}}"), &it), None);
        assert_eq!(resolve_model(Some("{{missing}}"), &it), None);
        assert_eq!(resolve_model(None, &it), None);
    }

    #[test]
    fn test_validate_items_reports_first_offender() {
        let items = vec![item(json!({"a": 1, "b": 2})), item(json!({"a": 1}))];
        let params = vec![Parameter::new("c", "x")];

        assert!(validate_items("{{a}} {{c}} {{ITEMS}}", &items, &params).is_ok());

        let err = validate_items("{{a}} {{b}} {{d}}", &items, &params).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Item 1"));
        assert!(message.contains("d"));
        assert!(!message.contains("b,"));
    }

    #[tokio::test]
    async fn test_pre_pass_blocks_all_calls() {
        let mut mock = MockAiInvoker::new();
        mock.expect_invoke().times(0);

        let executor = MapExecutor::new(Arc::new(mock));
        let items = vec![item(json!({"name": "a"})), item(json!({"other": "b"}))];
        let err = executor
            .execute(&items, &map_config("{{name}}", &["x"]), &[], Arc::new(NoOpCallbacks))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingVariables(ref m) if m.contains("Item 2") && m.contains("name")));
    }

    #[tokio::test]
    async fn test_structured_single_mode() {
        let mut mock = MockAiInvoker::new();
        mock.expect_invoke()
            .times(2)
            .withf(|prompt, _| prompt.contains("Return JSON with fields: sentiment, score"))
            .returning(|prompt: &str, _: InvokeOptions| {
                if prompt.contains("great") {
                    InvokeResult::ok(r#"{"sentiment": "positive", "score": "0.9"}"#)
                } else {
                    InvokeResult::ok("I cannot classify this")
                }
            });

        let executor = MapExecutor::new(Arc::new(mock));
        let items = vec![item(json!({"text": "great"})), item(json!({"text": "meh"}))];
        let output = executor
            .execute(
                &items,
                &map_config("Classify: {{text}}", &["sentiment", "score"]),
                &[],
                Arc::new(NoOpCallbacks),
            )
            .await
            .unwrap();

        assert_eq!(output.results.len(), 2);
        assert!(output.results[0].success);
        assert_eq!(output.results[0].output["score"], json!(0.9));
        assert!(!output.results[1].success);
        assert!(output.results[1].error.as_deref().unwrap().contains("No JSON found"));
        // Parse failures are soft.
        assert!(output.fatal_error.is_none());
        assert_eq!(output.ai_calls, 2);
    }

    #[tokio::test]
    async fn test_text_mode_has_no_suffix() {
        let mut mock = MockAiInvoker::new();
        mock.expect_invoke()
            .times(1)
            .withf(|prompt, _| prompt.trim() == "Write about rust for kids")
            .returning(|_, _| InvokeResult::ok("Rust is a friendly crab."));

        let executor = MapExecutor::new(Arc::new(mock));
        let config = MapConfig {
            prompt: "Write about {{topic}} for {{audience}}".to_string(),
            ..Default::default()
        };
        let output = executor
            .execute(
                &[item(json!({"topic": "rust"}))],
                &config,
                &[Parameter::new("audience", "kids")],
                Arc::new(NoOpCallbacks),
            )
            .await
            .unwrap();

        let result = &output.results[0];
        assert!(result.success);
        assert!(result.output.is_empty());
        assert_eq!(result.raw_text.as_deref(), Some("Rust is a friendly crab."));
        assert!(result.item.get("audience").is_none());
    }

    #[tokio::test]
    async fn test_invoker_failure_is_soft() {
        let mut mock = MockAiInvoker::new();
        mock.expect_invoke()
            .returning(|_, _| InvokeResult::failure("rate limited"));

        let executor = MapExecutor::new(Arc::new(mock));
        let output = executor
            .execute(
                &[item(json!({"a": "1"}))],
                &map_config("{{a}}", &["x"]),
                &[],
                Arc::new(NoOpCallbacks),
            )
            .await
            .unwrap();
        assert_eq!(output.results[0].error.as_deref(), Some("rate limited"));
        assert!(output.fatal_error.is_none());
    }

    #[tokio::test]
    async fn test_batch_items_hold_raw_fields_only() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let captured = prompts.clone();

        let mut mock = MockAiInvoker::new();
        mock.expect_invoke().returning(move |prompt: &str, _: InvokeOptions| {
            captured.lock().unwrap().push(prompt.to_string());
            InvokeResult::ok(r#"["one", "two"]"#)
        });

        let executor = MapExecutor::new(Arc::new(mock));
        let config = MapConfig {
            prompt: "Tone: {{tone}}\n{{ITEMS}}".to_string(),
            batch_size: Some(2),
            ..Default::default()
        };
        let items = vec![item(json!({"id": "a"})), item(json!({"id": "b"}))];
        let output = executor
            .execute(&items, &config, &[Parameter::new("tone", "dry")], Arc::new(NoOpCallbacks))
            .await
            .unwrap();

        let prompt = prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with("Tone: dry\n["));
        assert!(prompt.contains("\"id\": \"a\""));
        assert!(!prompt.contains("\"tone\""));
        assert_eq!(output.results[1].raw_text.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_batch_prompt_fields_come_from_first_item() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let captured = prompts.clone();

        let mut mock = MockAiInvoker::new();
        mock.expect_invoke().returning(move |prompt: &str, _: InvokeOptions| {
            captured.lock().unwrap().push(prompt.to_string());
            InvokeResult::ok(r#"["uno", "dos"]"#)
        });

        let executor = MapExecutor::new(Arc::new(mock));
        let config = MapConfig {
            prompt: "Lang {{lang}}: {{ITEMS}}".to_string(),
            batch_size: Some(2),
            ..Default::default()
        };
        let items = vec![
            item(json!({"lang": "es", "word": "one"})),
            item(json!({"lang": "es", "word": "two"})),
        ];
        let output = executor
            .execute(&items, &config, &[Parameter::new("lang", "en")], Arc::new(NoOpCallbacks))
            .await
            .unwrap();

        let prompt = prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with("Lang es: ["), "{}", prompt);
        assert!(output.results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_batch_without_placeholder_appends_items() {
        let mut mock = MockAiInvoker::new();
        mock.expect_invoke()
            .withf(|prompt, _| prompt.starts_with("Score these\n\nItems:\n[") && prompt.contains("\"n\": 1"))
            .returning(|_, _| InvokeResult::ok(r#"[{"score": 1}, {"score": 2}]"#));

        let executor = MapExecutor::new(Arc::new(mock));
        let mut config = map_config("Score these", &["score"]);
        config.batch_size = Some(5);
        let items = vec![item(json!({"n": 1})), item(json!({"n": 2}))];
        let output = executor
            .execute(&items, &config, &[], Arc::new(NoOpCallbacks))
            .await
            .unwrap();
        assert_eq!(output.results[1].output["score"], json!(2));
    }

    #[tokio::test]
    async fn test_batch_text_mode_non_string_elements() {
        let mut mock = MockAiInvoker::new();
        mock.expect_invoke()
            .returning(|_, _| InvokeResult::ok(r#"["plain", {"k": 1}]"#));

        let executor = MapExecutor::new(Arc::new(mock));
        let config = MapConfig {
            prompt: "{{ITEMS}}".to_string(),
            batch_size: Some(2),
            ..Default::default()
        };
        let output = executor
            .execute(
                &[item(json!({"a": 1})), item(json!({"a": 2}))],
                &config,
                &[],
                Arc::new(NoOpCallbacks),
            )
            .await
            .unwrap();
        assert_eq!(output.results[0].raw_text.as_deref(), Some("plain"));
        assert_eq!(output.results[1].raw_text.as_deref(), Some(r#"{"k":1}"#));
    }

    #[tokio::test]
    async fn test_model_resolved_from_first_batch_item() {
        let mut mock = MockAiInvoker::new();
        mock.expect_invoke()
            .times(1)
            .withf(|_, options| options.model.as_deref() == Some("m-first"))
            .returning(|_, _| InvokeResult::ok(r#"["x", "y"]"#));

        let executor = MapExecutor::new(Arc::new(mock));
        let config = MapConfig {
            prompt: "{{ITEMS}}".to_string(),
            model: Some("{{model}}".to_string()),
            batch_size: Some(2),
            ..Default::default()
        };
        let items = vec![item(json!({"model": "m-first"})), item(json!({"model": "m-second"}))];
        executor
            .execute(&items, &config, &[], Arc::new(NoOpCallbacks))
            .await
            .unwrap();
    }

    struct CancelImmediately;

    impl PipelineCallbacks for CancelImmediately {
        fn on_progress(&self, _update: &ProgressUpdate) {}
        fn is_cancelled(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch() {
        let mut mock = MockAiInvoker::new();
        mock.expect_invoke().times(0);

        let executor = MapExecutor::new(Arc::new(mock));
        let err = executor
            .execute(
                &[item(json!({"a": 1}))],
                &map_config("{{a}}", &[]),
                &[],
                Arc::new(CancelImmediately),
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    struct CancelFlag(Arc<std::sync::atomic::AtomicBool>);

    impl PipelineCallbacks for CancelFlag {
        fn on_progress(&self, _update: &ProgressUpdate) {}
        fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_permit() {
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let trip = flag.clone();

        let mut mock = MockAiInvoker::new();
        mock.expect_invoke().times(1).returning(move |_, _| {
            trip.store(true, Ordering::SeqCst);
            InvokeResult::ok("done")
        });

        let executor = MapExecutor::new(Arc::new(mock));
        let config = MapConfig {
            prompt: "{{a}}".to_string(),
            parallel: Some(1),
            ..Default::default()
        };
        let items: Vec<Item> = (0..3).map(|i| item(json!({"a": i}))).collect();
        let err = executor
            .execute(&items, &config, &[], Arc::new(CancelFlag(flag)))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    struct RecordingCallbacks(Mutex<Vec<ProgressUpdate>>);

    impl PipelineCallbacks for RecordingCallbacks {
        fn on_progress(&self, update: &ProgressUpdate) {
            self.0.lock().unwrap().push(update.clone());
        }
        fn is_cancelled(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_progress_mentions_batches() {
        let mut mock = MockAiInvoker::new();
        mock.expect_invoke().returning(|prompt: &str, _: InvokeOptions| {
            let n = prompt.matches("\"v\"").count();
            let body: Vec<String> = (0..n).map(|i| format!("\"r{}\"", i)).collect();
            InvokeResult::ok(format!("[{}]", body.join(",")))
        });

        let callbacks = Arc::new(RecordingCallbacks(Mutex::new(Vec::new())));
        let executor = MapExecutor::new(Arc::new(mock));
        let config = MapConfig {
            prompt: "{{ITEMS}}".to_string(),
            batch_size: Some(2),
            parallel: Some(1),
            ..Default::default()
        };
        let items: Vec<Item> = (0..3).map(|i| item(json!({"v": i}))).collect();
        executor
            .execute(&items, &config, &[], callbacks.clone())
            .await
            .unwrap();

        let updates = callbacks.0.lock().unwrap();
        assert_eq!(updates.len(), 2);
        let last = updates.last().unwrap();
        assert_eq!(last.phase, ProgressPhase::Mapping);
        assert_eq!(last.processed, 3);
        assert_eq!(last.percentage, 100);
        assert!(last.message.as_deref().unwrap().contains("batch 2/2"));
    }
}
