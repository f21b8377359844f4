// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the declarative pipeline descriptor (`pipeline.yaml`) and the
//! invoker settings files. Keys are camelCase in YAML and JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Item, Parameter};

/// Default concurrency limit for AI calls.
pub const DEFAULT_PARALLEL: usize = 5;

/// Default per-call timeout (10 minutes).
pub const DEFAULT_TIMEOUT_MS: u64 = 600_000;

/// Default number of items per AI call.
pub const DEFAULT_BATCH_SIZE: usize = 1;

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Complete pipeline descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Pipeline name (for logging and output)
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub input: InputConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,

    pub map: MapConfig,

    #[serde(default)]
    pub reduce: ReduceConfig,

    /// Constants injected into every item's template context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
}

/// Where pipeline items come from. Exactly one source may be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputConfig {
    /// Inline items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,

    /// CSV file, or an inline array for multi-model fanout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<InputFrom>,

    /// AI-generated items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<GenerateConfig>,

    /// Process at most this many items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl InputConfig {
    /// Number of sources that are set.
    pub fn source_count(&self) -> usize {
        [self.items.is_some(), self.from.is_some(), self.generate.is_some()]
            .iter()
            .filter(|&&b| b)
            .count()
    }
}

/// Value of `input.from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputFrom {
    /// Inline array, typically one entry per model for fanout
    Inline(Vec<Item>),

    /// CSV file source
    Csv(CsvSource),
}

/// CSV file source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvSource {
    /// Source type, always `csv`
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: String,

    /// Path, relative to the pipeline file's directory
    pub path: String,

    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    #[serde(default = "default_has_headers")]
    pub has_headers: bool,
}

fn default_source_type() -> String {
    "csv".to_string()
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_has_headers() -> bool {
    true
}

/// AI input generation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateConfig {
    /// What to generate
    pub prompt: String,

    /// Field names every generated item must carry
    pub schema: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Map phase settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    /// Prompt template
    pub prompt: String,

    /// Output fields; empty or absent means text mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<String>>,

    /// Model, may contain `{{field}}` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

impl MapConfig {
    /// Declared output fields (empty in text mode).
    pub fn output_fields(&self) -> &[String] {
        self.output.as_deref().unwrap_or(&[])
    }

    pub fn parallel(&self) -> usize {
        self.parallel.unwrap_or(DEFAULT_PARALLEL)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }
}

/// Reduce output shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceType {
    #[default]
    List,
    Table,
    Json,
    Csv,
    Text,
    Ai,
}

impl std::fmt::Display for ReduceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceType::List => write!(f, "list"),
            ReduceType::Table => write!(f, "table"),
            ReduceType::Json => write!(f, "json"),
            ReduceType::Csv => write!(f, "csv"),
            ReduceType::Text => write!(f, "text"),
            ReduceType::Ai => write!(f, "ai"),
        }
    }
}

/// Reduce phase settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceConfig {
    #[serde(rename = "type", default)]
    pub reduce_type: ReduceType,

    /// Prompt for ai-reduce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Output fields for ai-reduce; empty or absent means text mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ReduceConfig {
    pub fn of_type(reduce_type: ReduceType) -> Self {
        Self {
            reduce_type,
            ..Default::default()
        }
    }

    pub fn output_fields(&self) -> &[String] {
        self.output.as_deref().unwrap_or(&[])
    }
}

// ============================================================================
// Filter Configuration
// ============================================================================

/// Filter strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Rule,
    Ai,
    Hybrid,
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterType::Rule => write!(f, "rule"),
            FilterType::Ai => write!(f, "ai"),
            FilterType::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// How hybrid filters combine rule and AI verdicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// AI re-checks items the rules included
    #[default]
    And,
    /// AI may rescue items the rules excluded
    Or,
}

/// Pre-map filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(rename = "type")]
    pub filter_type: FilterType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleFilterConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<AiFilterConfig>,

    #[serde(default)]
    pub combine_mode: CombineMode,
}

/// How rule results combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    #[default]
    All,
    Any,
}

/// Comparison operators for rule filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    Gte,
    Lte,
    Matches,
}

/// One field comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRule {
    pub field: String,
    pub operator: FilterOperator,

    /// Comparison value (for `in`/`not_in`, an array)
    #[serde(default)]
    pub value: Value,
}

impl FilterRule {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Rule filter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFilterConfig {
    pub rules: Vec<FilterRule>,

    #[serde(default)]
    pub mode: RuleMode,
}

/// AI filter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiFilterConfig {
    /// Prompt template asking whether to include the item
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// Invoker Settings
// ============================================================================

/// Invoker settings as written in a settings file. Every field is optional so
/// files can be layered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFile {
    /// OpenAI-compatible base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Default model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Name of the environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Fully resolved invoker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokerSettings {
    pub base_url: String,
    pub model: String,
    pub api_key_env: Option<String>,
    pub max_tokens: Option<u32>,
}

impl Default for InvokerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.2".to_string(),
            api_key_env: None,
            max_tokens: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_pipeline_yaml() {
        let yaml = r#"
name: sentiment
input:
  from:
    type: csv
    path: reviews.csv
  limit: 10
map:
  prompt: "Classify: {{text}}"
  output: [sentiment, confidence]
  parallel: 3
  batchSize: 2
  timeoutMs: 5000
reduce:
  type: table
parameters:
  - name: tone
    value: neutral
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "sentiment");
        assert!(matches!(config.input.from, Some(InputFrom::Csv(ref src)) if src.path == "reviews.csv" && src.delimiter == ","));
        assert_eq!(config.input.limit, Some(10));
        assert_eq!(config.map.output_fields(), &["sentiment", "confidence"]);
        assert_eq!(config.map.parallel(), 3);
        assert_eq!(config.map.batch_size(), 2);
        assert_eq!(config.map.timeout_ms(), 5000);
        assert_eq!(config.reduce.reduce_type, ReduceType::Table);
        assert_eq!(config.parameters[0].value, json!("neutral"));
    }

    #[test]
    fn test_inline_from_array() {
        let yaml = r#"
input:
  from:
    - model: gpt-4o
    - model: llama3.2
map:
  prompt: "Hi"
  model: "{{model}}"
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        match config.input.from {
            Some(InputFrom::Inline(items)) => assert_eq!(items.len(), 2),
            other => panic!("Expected inline input, got {:?}", other),
        }
        assert_eq!(config.reduce.reduce_type, ReduceType::List);
    }

    #[test]
    fn test_map_defaults() {
        let map = MapConfig::default();
        assert_eq!(map.parallel(), DEFAULT_PARALLEL);
        assert_eq!(map.timeout_ms(), DEFAULT_TIMEOUT_MS);
        assert_eq!(map.batch_size(), DEFAULT_BATCH_SIZE);
        assert!(map.output_fields().is_empty());
    }

    #[test]
    fn test_parse_filter_config() {
        let yaml = r#"
type: hybrid
combineMode: or
rule:
  mode: any
  rules:
    - field: score
      operator: greater_than
      value: 5
    - field: lang
      operator: not_in
      value: [de, fr]
ai:
  prompt: "Is {{title}} relevant?"
"#;
        let filter: FilterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(filter.filter_type, FilterType::Hybrid);
        assert_eq!(filter.combine_mode, CombineMode::Or);
        let rule = filter.rule.unwrap();
        assert_eq!(rule.mode, RuleMode::Any);
        assert_eq!(rule.rules[0].operator, FilterOperator::GreaterThan);
        assert_eq!(rule.rules[1].value, json!(["de", "fr"]));
    }

    #[test]
    fn test_reduce_type_display() {
        assert_eq!(ReduceType::Ai.to_string(), "ai");
        assert_eq!(ReduceType::Csv.to_string(), "csv");
    }
}
