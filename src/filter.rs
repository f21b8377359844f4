// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pre-map filtering.
//!
//! Three strategies decide which items reach the map phase:
//! - `rule`: synchronous field comparisons
//! - `ai`: one AI verdict per item, run in parallel
//! - `hybrid`: rules first, then AI confirmation (`and`) or rescue (`or`)
//!
//! AI filtering is fail-closed: a failed call, a timeout or an ambiguous
//! answer excludes the item.

use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::config::{
    AiFilterConfig, CombineMode, FilterConfig, FilterOperator, FilterRule, FilterType,
    RuleFilterConfig, RuleMode, DEFAULT_PARALLEL, DEFAULT_TIMEOUT_MS,
};
use crate::error::PipelineError;
use crate::executor::retry::{invoke_with_retry, CallOutcome};
use crate::executor::PipelineCallbacks;
use crate::invoker::AiInvoker;
use crate::parser::parse_ai_response;
use crate::template::{substitute, value_to_template_string};
use crate::types::{merge_parameters, FilterResult, FilterStats, Item, Parameter, ProgressPhase, ProgressUpdate};

// ============================================================================
// Rule Evaluation
// ============================================================================

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Compare two scalars, numerically when both sides are numbers and by
/// rendered text otherwise.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return x.as_f64() == y.as_f64();
    }
    value_to_template_string(a) == value_to_template_string(b)
}

fn compare_numbers(actual: &Value, expected: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Evaluate one rule against an item. A missing field is always false.
pub fn evaluate_rule(rule: &FilterRule, item: &Item) -> bool {
    let Some(actual) = item.get(&rule.field) else {
        return false;
    };
    let expected = &rule.value;

    match rule.operator {
        FilterOperator::Equals => loose_eq(actual, expected),
        FilterOperator::NotEquals => !loose_eq(actual, expected),
        FilterOperator::In | FilterOperator::NotIn => {
            let Some(values) = expected.as_array() else {
                tracing::warn!("Rule on '{}' needs an array value", rule.field);
                return false;
            };
            let found = values.iter().any(|v| loose_eq(actual, v));
            if rule.operator == FilterOperator::In {
                found
            } else {
                !found
            }
        }
        FilterOperator::Contains => {
            value_to_template_string(actual).contains(&value_to_template_string(expected))
        }
        FilterOperator::NotContains => {
            !value_to_template_string(actual).contains(&value_to_template_string(expected))
        }
        FilterOperator::GreaterThan => compare_numbers(actual, expected, |a, b| a > b),
        FilterOperator::LessThan => compare_numbers(actual, expected, |a, b| a < b),
        FilterOperator::Gte => compare_numbers(actual, expected, |a, b| a >= b),
        FilterOperator::Lte => compare_numbers(actual, expected, |a, b| a <= b),
        FilterOperator::Matches => {
            let pattern = value_to_template_string(expected);
            match Regex::new(&pattern) {
                Ok(re) => re.is_match(&value_to_template_string(actual)),
                Err(e) => {
                    tracing::warn!("Invalid regex in rule on '{}': {}", rule.field, e);
                    false
                }
            }
        }
    }
}

/// Evaluate a rule set against an item.
pub fn evaluate_rules(config: &RuleFilterConfig, item: &Item) -> bool {
    match config.mode {
        RuleMode::All => config.rules.iter().all(|r| evaluate_rule(r, item)),
        RuleMode::Any => config.rules.iter().any(|r| evaluate_rule(r, item)),
    }
}

// ============================================================================
// AI Verdicts
// ============================================================================

/// Interpret an AI filter answer.
///
/// Accepts a bare verdict word or JSON carrying an `include` field. Anything
/// else means exclude.
pub fn interpret_verdict(response: &str) -> bool {
    let word = response
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();

    match word.as_str() {
        "true" | "yes" | "include" => return true,
        "false" | "no" | "exclude" => return false,
        _ => {}
    }

    match parse_ai_response(response, &["include".to_string()]) {
        Ok(fields) => fields.get("include") == Some(&Value::Bool(true)),
        Err(_) => false,
    }
}

// ============================================================================
// Filter Executor
// ============================================================================

/// Runs a filter over a list of items.
pub struct FilterExecutor {
    invoker: Arc<dyn AiInvoker>,
}

impl FilterExecutor {
    pub fn new(invoker: Arc<dyn AiInvoker>) -> Self {
        Self { invoker }
    }

    /// Partition `items` into included and excluded, preserving input order.
    pub async fn execute(
        &self,
        items: Vec<Item>,
        config: &FilterConfig,
        parameters: &[Parameter],
        callbacks: Arc<dyn PipelineCallbacks>,
    ) -> Result<FilterResult, PipelineError> {
        let start = Instant::now();
        let total = items.len();

        let rule_config = config.rule.clone().unwrap_or_default();
        let ai_config = config.ai.clone().unwrap_or_default();

        let mut ai_calls = 0;
        let decisions = match config.filter_type {
            FilterType::Rule => self.rule_decisions(&items, &rule_config, callbacks.as_ref())?,
            FilterType::Ai => {
                let all: Vec<usize> = (0..total).collect();
                let (verdicts, calls) = self
                    .ai_decisions(&items, &all, &ai_config, parameters, callbacks.clone())
                    .await?;
                ai_calls = calls;
                verdicts.into_iter().map(|v| v.unwrap_or(false)).collect()
            }
            FilterType::Hybrid => {
                let rule = self.rule_decisions(&items, &rule_config, callbacks.as_ref())?;
                let candidates: Vec<usize> = (0..total)
                    .filter(|&i| match config.combine_mode {
                        CombineMode::And => rule[i],
                        CombineMode::Or => !rule[i],
                    })
                    .collect();
                let (verdicts, calls) = self
                    .ai_decisions(&items, &candidates, &ai_config, parameters, callbacks.clone())
                    .await?;
                ai_calls = calls;

                rule.iter()
                    .zip(verdicts)
                    .map(|(&by_rule, by_ai)| match config.combine_mode {
                        CombineMode::And => by_rule && by_ai.unwrap_or(false),
                        CombineMode::Or => by_rule || by_ai.unwrap_or(false),
                    })
                    .collect()
            }
        };

        let mut included = Vec::new();
        let mut excluded = Vec::new();
        for (item, keep) in items.into_iter().zip(decisions) {
            if keep {
                included.push(item);
            } else {
                excluded.push(item);
            }
        }

        let stats = FilterStats {
            total_items: total,
            included_count: included.len(),
            excluded_count: excluded.len(),
            execution_time_ms: start.elapsed().as_millis() as u64,
            filter_type: config.filter_type.to_string(),
            ai_calls,
        };

        tracing::info!(
            "Filter ({}) kept {} of {} items",
            stats.filter_type,
            stats.included_count,
            stats.total_items
        );

        Ok(FilterResult {
            included,
            excluded,
            stats,
        })
    }

    fn rule_decisions(
        &self,
        items: &[Item],
        config: &RuleFilterConfig,
        callbacks: &dyn PipelineCallbacks,
    ) -> Result<Vec<bool>, PipelineError> {
        let total = items.len();
        let mut decisions = Vec::with_capacity(total);

        for (i, item) in items.iter().enumerate() {
            if callbacks.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            decisions.push(evaluate_rules(config, item));
            callbacks.on_progress(&ProgressUpdate::new(ProgressPhase::Filtering, i + 1, total));
        }

        Ok(decisions)
    }

    /// AI verdicts for the items at `indices`, plus the invoker calls made.
    /// Returns one slot per item in `items`; slots that were not checked stay
    /// `None`.
    async fn ai_decisions(
        &self,
        items: &[Item],
        indices: &[usize],
        config: &AiFilterConfig,
        parameters: &[Parameter],
        callbacks: Arc<dyn PipelineCallbacks>,
    ) -> Result<(Vec<Option<bool>>, usize), PipelineError> {
        let mut verdicts = vec![None; items.len()];
        if indices.is_empty() {
            return Ok((verdicts, 0));
        }

        let parallel = config.parallel.unwrap_or(DEFAULT_PARALLEL).max(1);
        let timeout_ms = config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let semaphore = Arc::new(Semaphore::new(parallel));
        let total = indices.len();
        let processed = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(total);
        let mut cancelled = false;

        for &idx in indices {
            if callbacks.is_cancelled() {
                cancelled = true;
                break;
            }

            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                PipelineError::Scheduling(format!("Failed to acquire filter permit: {}", e))
            })?;
            if callbacks.is_cancelled() {
                drop(permit);
                cancelled = true;
                break;
            }

            let merged = merge_parameters(&items[idx], parameters);
            let prompt = substitute(&config.prompt, &merged, None);
            let model = config.model.as_ref().map(|m| substitute(m, &merged, None));
            let model = model.filter(|m| !m.trim().is_empty());

            let invoker = self.invoker.clone();
            let callbacks = callbacks.clone();
            let processed = processed.clone();

            handles.push((
                idx,
                tokio::spawn(async move {
                    let _permit = permit;
                    let report = invoke_with_retry(invoker.as_ref(), &prompt, model, timeout_ms).await;
                    let verdict = match report.outcome {
                        CallOutcome::Completed(result) if result.success => {
                            interpret_verdict(result.response.as_deref().unwrap_or_default())
                        }
                        CallOutcome::Completed(result) => {
                            tracing::warn!("AI filter call failed, excluding item: {}", result.error_message());
                            false
                        }
                        CallOutcome::TimedOut { timeout_ms } => {
                            tracing::warn!("AI filter call timed out after {}ms, excluding item", timeout_ms);
                            false
                        }
                    };

                    let done = processed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    callbacks.on_progress(&ProgressUpdate::new(ProgressPhase::Filtering, done, total));
                    (verdict, report.attempts)
                }),
            ));
        }

        let mut ai_calls = 0;
        for (idx, handle) in handles {
            verdicts[idx] = Some(match handle.await {
                Ok((verdict, attempts)) => {
                    ai_calls += attempts;
                    verdict
                }
                Err(e) => {
                    tracing::warn!("AI filter task failed, excluding item: {}", e);
                    false
                }
            });
        }

        if cancelled {
            return Err(PipelineError::Cancelled);
        }
        Ok((verdicts, ai_calls))
    }
}
