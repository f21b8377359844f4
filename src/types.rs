// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types shared by the pipeline phases.
//!
//! These are the records that flow between input resolution, filtering,
//! mapping and reducing. All of them serialize to camelCase JSON so results
//! can be printed or handed to other tools unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Items and Parameters
// ============================================================================

/// One unit of work: field name to scalar value.
///
/// Insertion order is preserved so CSV columns and prompt renderings keep the
/// order the fields were declared in.
pub type Item = serde_json::Map<String, Value>;

/// A constant injected into every item's template context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Build an item from parameters overlaid with the item's own fields.
///
/// Item fields win over same-named parameters.
pub fn merge_parameters(item: &Item, parameters: &[Parameter]) -> Item {
    let mut merged = Item::new();
    for param in parameters {
        merged.insert(param.name.clone(), param.value.clone());
    }
    for (key, value) in item {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Parameters as a template context map.
pub fn parameters_to_context(parameters: &[Parameter]) -> Item {
    parameters
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect()
}

// ============================================================================
// Map Results
// ============================================================================

/// Outcome of mapping a single item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapResult {
    /// The input item
    pub item: Item,

    /// Parsed output fields (empty in text mode)
    pub output: Item,

    /// Raw AI response (text mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub execution_time_ms: u64,
}

impl MapResult {
    /// A successful structured result.
    pub fn structured(item: Item, output: Item, execution_time_ms: u64) -> Self {
        Self {
            item,
            output,
            raw_text: None,
            success: true,
            error: None,
            execution_time_ms,
        }
    }

    /// A successful text-mode result.
    pub fn text(item: Item, raw_text: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            item,
            output: Item::new(),
            raw_text: Some(raw_text.into()),
            success: true,
            error: None,
            execution_time_ms,
        }
    }

    /// A failed result.
    pub fn failure(item: Item, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            item,
            output: Item::new(),
            raw_text: None,
            success: false,
            error: Some(error.into()),
            execution_time_ms,
        }
    }
}

// ============================================================================
// Filter Results
// ============================================================================

/// Statistics about a filter run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStats {
    pub total_items: usize,
    pub included_count: usize,
    pub excluded_count: usize,
    pub execution_time_ms: u64,
    pub filter_type: String,
    /// AI filter calls issued, retries included
    #[serde(default)]
    pub ai_calls: usize,
}

/// Partition of items by a filter predicate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResult {
    pub included: Vec<Item>,
    pub excluded: Vec<Item>,
    pub stats: FilterStats,
}

// ============================================================================
// Progress
// ============================================================================

/// Phase reported by progress updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Filtering,
    Mapping,
    Reducing,
    Complete,
}

impl std::fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressPhase::Filtering => write!(f, "filtering"),
            ProgressPhase::Mapping => write!(f, "mapping"),
            ProgressPhase::Reducing => write!(f, "reducing"),
            ProgressPhase::Complete => write!(f, "complete"),
        }
    }
}

/// A progress checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub phase: ProgressPhase,
    pub processed: usize,
    pub total: usize,
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn new(phase: ProgressPhase, processed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            ((processed.min(total) * 100) / total) as u8
        };
        Self {
            phase,
            processed,
            total,
            percentage,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ============================================================================
// Reduce and Execution Results
// ============================================================================

/// Statistics about the reduce phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceStats {
    pub input_count: usize,
    pub output_count: usize,
    pub reduce_time_ms: u64,
    pub used_ai_reduce: bool,
}

/// Final reduced output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceResult {
    /// Structured form of the output
    pub output: Value,

    /// Human-readable rendering
    pub formatted_output: String,

    pub stats: ReduceStats,
}

/// Per-run statistics, built fresh for every execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub total_items: usize,
    pub successful_maps: usize,
    pub failed_maps: usize,
    pub map_phase_time_ms: u64,
    pub reduce_phase_time_ms: u64,
    /// Highest number of map calls observed in flight at once
    pub max_concurrency: usize,
    /// AI calls issued across generation, filter and map phases, retries
    /// included. The reduce call is not counted.
    pub ai_calls: usize,
}

/// Top-level result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ReduceResult>,

    pub map_results: Vec<MapResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_result: Option<FilterResult>,

    pub total_time_ms: u64,

    pub execution_stats: ExecutionStats,

    /// Present whenever the reduce phase ran, including when it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_stats: Option<ReduceStats>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {

    /// Formatted output, when the reduce phase ran.
    pub fn formatted_output(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.formatted_output.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_parameters_item_wins() {
        let item = json!({"lang": "fr", "text": "bonjour"})
            .as_object()
            .cloned()
            .unwrap();
        let params = vec![Parameter::new("lang", "en"), Parameter::new("style", "terse")];

        let merged = merge_parameters(&item, &params);
        assert_eq!(merged["lang"], json!("fr"));
        assert_eq!(merged["style"], json!("terse"));
        assert_eq!(merged["text"], json!("bonjour"));
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(ProgressUpdate::new(ProgressPhase::Mapping, 1, 4).percentage, 25);
        assert_eq!(ProgressUpdate::new(ProgressPhase::Mapping, 0, 0).percentage, 100);
        assert_eq!(ProgressUpdate::new(ProgressPhase::Mapping, 9, 4).percentage, 100);
    }

    #[test]
    fn test_map_result_serialization() {
        let result = MapResult::text(Item::new(), "hello", 12);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["rawText"], json!("hello"));
        assert_eq!(value["executionTimeMs"], json!(12));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ProgressPhase::Filtering.to_string(), "filtering");
        assert_eq!(ProgressPhase::Complete.to_string(), "complete");
    }
}
