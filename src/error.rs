// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the pipeline engine.
//!
//! Library errors are strongly typed with `thiserror`; the binary and a few
//! convenience helpers use `anyhow` for propagation.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the HTTP invoker while talking to a model endpoint.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("API error: {message}")]
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Response parsing error: {0}")]
    ParseError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl ProviderError {
    /// Create an API error with status code.
    pub fn api(message: impl Into<String>, status_code: u16) -> Self {
        Self::ApiError {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Config file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid-value error for a dotted field path.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors returned by [`crate::executor::PipelineExecutor::execute`].
///
/// Only configuration problems, the template pre-pass, input resolution and
/// cancellation surface here. Everything that happens once AI calls start is
/// reported inside the returned `ExecutionResult`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    MissingVariables(String),

    #[error("Failed to read input: {0}")]
    Csv(#[from] crate::csv::CsvError),

    #[error("Failed to generate input: {0}")]
    Generate(#[from] crate::generate::GenerateError),

    #[error("Template error: {0}")]
    Template(#[from] crate::template::TemplateError),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Failed to schedule AI call: {0}")]
    Scheduling(String),
}

impl PipelineError {
    /// Check if this error came from a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_api() {
        let err = ProviderError::api("Bad request", 400);
        match err {
            ProviderError::ApiError { message, status_code } => {
                assert_eq!(message, "Bad request");
                assert_eq!(status_code, Some(400));
            }
            _ => panic!("Expected ApiError"),
        }
        assert!(ProviderError::Timeout(100).is_timeout());
        assert!(!ProviderError::RateLimited("slow down".to_string()).is_timeout());
    }

    #[test]
    fn test_config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ConfigError = io_err.into();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_config_error_from_yaml() {
        let result: std::result::Result<serde_yaml::Value, _> = serde_yaml::from_str("a: [1, 2");
        let err: ConfigError = result.unwrap_err().into();
        assert!(matches!(err, ConfigError::YamlError(_)));
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::Config(ConfigError::invalid("map.batchSize", "must be positive"));
        let display = err.to_string();
        assert!(display.contains("map.batchSize"));
        assert!(display.contains("must be positive"));
        assert!(PipelineError::Cancelled.is_cancelled());
    }
}
