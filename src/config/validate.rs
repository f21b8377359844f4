// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pipeline configuration validation.
//!
//! Collects every problem in one pass so `codi-pipeline validate` can report
//! them together. The executor calls [`ensure_valid`] before touching input.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::ConfigError;
use crate::template;

use super::types::{FilterConfig, FilterOperator, FilterType, InputFrom, PipelineConfig, ReduceType};

/// A non-fatal configuration issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result with errors and warnings.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<ConfigWarning>,
}

impl ValidationResult {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ConfigError::invalid(field, message));
    }

    fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigWarning {
            field: field.into(),
            message: message.into(),
        });
    }
}

/// Validate a pipeline configuration.
pub fn validate_pipeline(config: &PipelineConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_input(config, &mut result);
    validate_map(config, &mut result);
    validate_reduce(config, &mut result);

    if let Some(ref filter) = config.filter {
        validate_filter(filter, &mut result);
    }

    let mut seen = HashSet::new();
    for (i, param) in config.parameters.iter().enumerate() {
        if param.name.trim().is_empty() {
            result.add_error(format!("parameters[{}].name", i), "Parameter name is required");
        } else if !seen.insert(param.name.as_str()) {
            result.add_error(
                format!("parameters[{}].name", i),
                format!("Duplicate parameter \"{}\"", param.name),
            );
        }
    }

    result
}

/// Validate and return the first error, if any.
pub fn ensure_valid(config: &PipelineConfig) -> Result<(), ConfigError> {
    let result = validate_pipeline(config);
    for warning in &result.warnings {
        tracing::warn!("Pipeline config: {}", warning);
    }
    match result.errors.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn validate_input(config: &PipelineConfig, result: &mut ValidationResult) {
    let input = &config.input;

    match input.source_count() {
        0 => result.add_error("input", "One of items, from, or generate is required"),
        1 => {}
        _ => result.add_error("input", "Only one of items, from, or generate may be set"),
    }

    if let Some(InputFrom::Csv(ref source)) = input.from {
        if source.source_type != "csv" {
            result.add_error(
                "input.from.type",
                format!("Unsupported source type \"{}\"", source.source_type),
            );
        }
        if source.path.trim().is_empty() {
            result.add_error("input.from.path", "CSV path is required");
        }
        if source.delimiter.chars().count() != 1 {
            result.add_error("input.from.delimiter", "Delimiter must be a single character");
        }
    }

    if let Some(ref generate) = input.generate {
        if generate.prompt.trim().is_empty() {
            result.add_error("input.generate.prompt", "Generation prompt is required");
        }
        if let Err(e) = crate::generate::validate_schema(&generate.schema) {
            result.add_error("input.generate.schema", e.to_string());
        }
    }

    if input.limit == Some(0) {
        result.add_warning("input.limit", "Limit of 0 processes no items");
    }
}

fn validate_map(config: &PipelineConfig, result: &mut ValidationResult) {
    let map = &config.map;

    if map.prompt.trim().is_empty() {
        result.add_error("map.prompt", "Map prompt is required");
    }
    if map.parallel == Some(0) {
        result.add_error("map.parallel", "Must be at least 1");
    }
    if map.timeout_ms == Some(0) {
        result.add_error("map.timeoutMs", "Must be at least 1");
    }
    if map.batch_size == Some(0) {
        result.add_error("map.batchSize", "Must be at least 1");
    }

    let mut seen = HashSet::new();
    for field in map.output_fields() {
        if field.trim().is_empty() {
            result.add_error("map.output", "Output field names must not be empty");
        } else if !seen.insert(field.as_str()) {
            result.add_error("map.output", format!("Duplicate output field \"{}\"", field));
        }
    }

    if map.batch_size() > 1 && !template::references_variable(&map.prompt, template::ITEMS_VAR) {
        result.add_warning(
            "map.prompt",
            "Batch prompt has no {{ITEMS}} placeholder; items will be appended",
        );
    }
}

fn validate_reduce(config: &PipelineConfig, result: &mut ValidationResult) {
    let reduce = &config.reduce;

    match reduce.reduce_type {
        ReduceType::Ai => {
            let has_prompt = reduce
                .prompt
                .as_deref()
                .map(|p| !p.trim().is_empty())
                .unwrap_or(false);
            if !has_prompt {
                result.add_error("reduce.prompt", "AI reduce requires a prompt");
            }
            if reduce.timeout_ms == Some(0) {
                result.add_error("reduce.timeoutMs", "Must be at least 1");
            }
        }
        other => {
            if reduce.prompt.is_some() {
                result.add_warning(
                    "reduce.prompt",
                    format!("Prompt is ignored for reduce type \"{}\"", other),
                );
            }
        }
    }
}

fn validate_filter(filter: &FilterConfig, result: &mut ValidationResult) {
    let needs_rule = matches!(filter.filter_type, FilterType::Rule | FilterType::Hybrid);
    let needs_ai = matches!(filter.filter_type, FilterType::Ai | FilterType::Hybrid);

    if needs_rule {
        match filter.rule {
            None => result.add_error(
                "filter.rule",
                format!("Filter type \"{}\" requires rule settings", filter.filter_type),
            ),
            Some(ref rule) if rule.rules.is_empty() => {
                result.add_error("filter.rule.rules", "At least one rule is required")
            }
            Some(ref rule) => {
                for (i, r) in rule.rules.iter().enumerate() {
                    let field = format!("filter.rule.rules[{}]", i);
                    if r.field.trim().is_empty() {
                        result.add_error(format!("{}.field", field), "Field is required");
                    }
                    match r.operator {
                        FilterOperator::In | FilterOperator::NotIn if !r.value.is_array() => {
                            result.add_error(format!("{}.value", field), "Value must be an array");
                        }
                        FilterOperator::Matches => match r.value {
                            Value::String(ref pattern) => {
                                if let Err(e) = regex::Regex::new(pattern) {
                                    result.add_error(
                                        format!("{}.value", field),
                                        format!("Invalid regex: {}", e),
                                    );
                                }
                            }
                            _ => result.add_error(
                                format!("{}.value", field),
                                "Value must be a regex string",
                            ),
                        },
                        _ => {}
                    }
                }
            }
        }
    }

    if needs_ai {
        match filter.ai {
            None => result.add_error(
                "filter.ai",
                format!("Filter type \"{}\" requires ai settings", filter.filter_type),
            ),
            Some(ref ai) => {
                if ai.prompt.trim().is_empty() {
                    result.add_error("filter.ai.prompt", "AI filter prompt is required");
                }
                if ai.parallel == Some(0) {
                    result.add_error("filter.ai.parallel", "Must be at least 1");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{
        AiFilterConfig, CombineMode, CsvSource, FilterRule, InputConfig, MapConfig, ReduceConfig,
        RuleFilterConfig, RuleMode,
    };
    use crate::types::{Item, Parameter};
    use serde_json::json;

    fn valid_config() -> PipelineConfig {
        PipelineConfig {
            name: "test".to_string(),
            input: InputConfig {
                items: Some(vec![Item::new()]),
                ..Default::default()
            },
            map: MapConfig {
                prompt: "Say hi".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn error_fields(result: &ValidationResult) -> Vec<String> {
        result
            .errors
            .iter()
            .map(|e| match e {
                ConfigError::InvalidValue { field, .. } => field.clone(),
                other => other.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_valid_config() {
        let result = validate_pipeline(&valid_config());
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(ensure_valid(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_and_multiple_sources() {
        let mut config = valid_config();
        config.input.items = None;
        assert_eq!(error_fields(&validate_pipeline(&config)), vec!["input"]);

        config.input.items = Some(vec![]);
        config.input.from = Some(InputFrom::Inline(vec![]));
        assert_eq!(error_fields(&validate_pipeline(&config)), vec!["input"]);
    }

    #[test]
    fn test_csv_source_checks() {
        let mut config = valid_config();
        config.input.items = None;
        config.input.from = Some(InputFrom::Csv(CsvSource {
            source_type: "xlsx".to_string(),
            path: String::new(),
            delimiter: ";;".to_string(),
            has_headers: true,
        }));

        let fields = error_fields(&validate_pipeline(&config));
        assert!(fields.contains(&"input.from.type".to_string()));
        assert!(fields.contains(&"input.from.path".to_string()));
        assert!(fields.contains(&"input.from.delimiter".to_string()));
    }

    #[test]
    fn test_map_checks() {
        let mut config = valid_config();
        config.map.prompt = "  ".to_string();
        config.map.parallel = Some(0);
        config.map.batch_size = Some(0);
        config.map.output = Some(vec!["a".to_string(), "a".to_string()]);

        let fields = error_fields(&validate_pipeline(&config));
        assert!(fields.contains(&"map.prompt".to_string()));
        assert!(fields.contains(&"map.parallel".to_string()));
        assert!(fields.contains(&"map.batchSize".to_string()));
        assert!(fields.contains(&"map.output".to_string()));
    }

    #[test]
    fn test_batch_without_items_placeholder_warns() {
        let mut config = valid_config();
        config.map.batch_size = Some(3);
        let result = validate_pipeline(&config);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].field, "map.prompt");
    }

    #[test]
    fn test_ai_reduce_requires_prompt() {
        let mut config = valid_config();
        config.reduce = ReduceConfig::of_type(ReduceType::Ai);
        let result = validate_pipeline(&config);
        assert!(!result.valid);
        assert!(matches!(
            ensure_valid(&config),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "reduce.prompt"
        ));
    }

    #[test]
    fn test_prompt_on_non_ai_reduce_warns() {
        let mut config = valid_config();
        config.reduce.prompt = Some("ignored".to_string());
        let result = validate_pipeline(&config);
        assert!(result.valid);
        assert_eq!(result.warnings[0].field, "reduce.prompt");
    }

    #[test]
    fn test_filter_checks() {
        let mut config = valid_config();
        config.filter = Some(FilterConfig {
            filter_type: FilterType::Hybrid,
            rule: Some(RuleFilterConfig {
                rules: vec![
                    FilterRule::new("lang", FilterOperator::In, "en"),
                    FilterRule::new("title", FilterOperator::Matches, "(unclosed"),
                ],
                mode: RuleMode::All,
            }),
            ai: None,
            combine_mode: CombineMode::And,
        });

        let fields = error_fields(&validate_pipeline(&config));
        assert!(fields.contains(&"filter.rule.rules[0].value".to_string()));
        assert!(fields.contains(&"filter.rule.rules[1].value".to_string()));
        assert!(fields.contains(&"filter.ai".to_string()));
    }

    #[test]
    fn test_valid_filter() {
        let mut config = valid_config();
        config.filter = Some(FilterConfig {
            filter_type: FilterType::Ai,
            rule: None,
            ai: Some(AiFilterConfig {
                prompt: "Include {{x}}?".to_string(),
                ..Default::default()
            }),
            combine_mode: CombineMode::And,
        });
        assert!(validate_pipeline(&config).valid);

        config.filter = Some(FilterConfig {
            filter_type: FilterType::Rule,
            rule: Some(RuleFilterConfig {
                rules: vec![FilterRule::new("lang", FilterOperator::NotIn, json!(["de"]))],
                mode: RuleMode::Any,
            }),
            ai: None,
            combine_mode: CombineMode::And,
        });
        assert!(validate_pipeline(&config).valid);
    }

    #[test]
    fn test_parameter_checks() {
        let mut config = valid_config();
        config.parameters = vec![
            Parameter::new("tone", "calm"),
            Parameter::new("tone", "loud"),
            Parameter::new("", "x"),
        ];
        let fields = error_fields(&validate_pipeline(&config));
        assert_eq!(fields, vec!["parameters[1].name", "parameters[2].name"]);
    }

    #[test]
    fn test_generate_schema_checked() {
        let mut config = valid_config();
        config.input.items = None;
        config.input.generate = Some(crate::config::types::GenerateConfig {
            prompt: "Ideas".to_string(),
            schema: vec!["bad field".to_string()],
            model: None,
        });
        let fields = error_fields(&validate_pipeline(&config));
        assert_eq!(fields, vec!["input.generate.schema"]);
    }
}
