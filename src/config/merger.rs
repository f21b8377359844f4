// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Invoker settings are layered with precedence CLI > workspace > global >
//! defaults. Run-time overrides for a loaded pipeline are applied separately.

use super::types::{InvokerSettings, PipelineConfig, SettingsFile};

/// CLI options that can override invoker settings.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub max_tokens: Option<u32>,
}

/// CLI options that override fields of a loaded pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineOverrides {
    pub parallel: Option<usize>,
    pub limit: Option<usize>,
}

/// Merge settings layers with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Workspace settings (.codi-pipeline.yaml)
/// 3. Global settings (~/.codi/pipeline.yaml)
/// 4. Default values
pub fn merge_settings(
    global: Option<SettingsFile>,
    workspace: Option<SettingsFile>,
    cli: CliOptions,
) -> InvokerSettings {
    let mut result = InvokerSettings::default();

    if let Some(file) = global {
        apply_settings_file(&mut result, &file);
    }

    if let Some(file) = workspace {
        apply_settings_file(&mut result, &file);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_settings_file(result: &mut InvokerSettings, file: &SettingsFile) {
    if let Some(ref base_url) = file.base_url {
        result.base_url = base_url.clone();
    }

    if let Some(ref model) = file.model {
        result.model = model.clone();
    }

    if file.api_key_env.is_some() {
        result.api_key_env = file.api_key_env.clone();
    }

    if file.max_tokens.is_some() {
        result.max_tokens = file.max_tokens;
    }
}

fn apply_cli_options(result: &mut InvokerSettings, cli: &CliOptions) {
    if let Some(ref base_url) = cli.base_url {
        result.base_url = base_url.clone();
    }

    if let Some(ref model) = cli.model {
        result.model = model.clone();
    }

    if cli.api_key_env.is_some() {
        result.api_key_env = cli.api_key_env.clone();
    }

    if cli.max_tokens.is_some() {
        result.max_tokens = cli.max_tokens;
    }
}

/// Apply run-time overrides to a pipeline.
pub fn apply_pipeline_overrides(config: &mut PipelineConfig, overrides: &PipelineOverrides) {
    if overrides.parallel.is_some() {
        config.map.parallel = overrides.parallel;
    }

    if overrides.limit.is_some() {
        config.input.limit = overrides.limit;
    }
}
