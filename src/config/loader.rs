// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Pipelines are single YAML (or JSON) descriptors. Invoker settings are
//! layered from a global file in `~/.codi/` and a workspace file.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{PipelineConfig, SettingsFile};

/// Default pipeline file name.
pub const PIPELINE_FILE: &str = "pipeline.yaml";

/// Workspace settings file name.
pub const WORKSPACE_SETTINGS_FILE: &str = ".codi-pipeline.yaml";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".codi";

/// Global settings file name.
pub const GLOBAL_SETTINGS_FILE: &str = "pipeline.yaml";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global settings file path.
pub fn get_global_settings_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_SETTINGS_FILE))
}

fn parse_by_extension<T: serde::de::DeserializeOwned>(
    path: &Path,
    content: &str,
) -> Result<T, ConfigError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "json" => serde_json::from_str(content).map_err(ConfigError::from),
        _ => serde_yaml::from_str(content).map_err(ConfigError::from),
    }
}

/// Load a pipeline descriptor.
///
/// Returns the config together with the directory it was loaded from, which
/// relative input paths resolve against. A directory argument loads its
/// `pipeline.yaml`.
pub fn load_pipeline(path: &Path) -> Result<(PipelineConfig, PathBuf), ConfigError> {
    let file = if path.is_dir() {
        path.join(PIPELINE_FILE)
    } else {
        path.to_path_buf()
    };

    if !file.exists() {
        return Err(ConfigError::NotFound(file.display().to_string()));
    }

    let content = std::fs::read_to_string(&file)?;
    let config: PipelineConfig = parse_by_extension(&file, &content)?;

    let base_dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    tracing::debug!("Loaded pipeline '{}' from {}", config.name, file.display());
    Ok((config, base_dir))
}

/// Load a settings file (JSON or YAML).
pub fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_by_extension(path, &content)
}

/// Load global settings from ~/.codi/pipeline.yaml.
pub fn load_global_settings() -> Result<Option<SettingsFile>, ConfigError> {
    let path = match get_global_settings_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_settings_file(&path).map(Some)
}

/// Load workspace settings from `.codi-pipeline.yaml` in the workspace root.
pub fn load_workspace_settings(workspace_root: &Path) -> Result<Option<SettingsFile>, ConfigError> {
    let path = workspace_root.join(WORKSPACE_SETTINGS_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_settings_file(&path).map(Some)
}

/// Example pipeline written by `init`.
pub const EXAMPLE_PIPELINE: &str = r#"name: topic-summaries
description: Summarize each topic, then combine the summaries.

input:
  items:
    - topic: ownership
    - topic: lifetimes
    - topic: traits

map:
  prompt: |
    Explain the Rust concept "{{topic}}" for a {{audience}} in one sentence
    and rate its difficulty from 1 to 5.
  output: [summary, difficulty]
  parallel: 3

reduce:
  type: table

parameters:
  - name: audience
    value: newcomer
"#;

/// Write the example pipeline into `dir`.
///
/// Refuses to overwrite an existing file.
pub fn init_pipeline(dir: &Path) -> Result<PathBuf, ConfigError> {
    let path = dir.join(PIPELINE_FILE);
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path));
    }

    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, EXAMPLE_PIPELINE)?;
    Ok(path)
}
