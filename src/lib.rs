// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Codi Pipeline - map-reduce batch processing over AI model calls.
//!
//! A pipeline resolves a list of items, optionally filters them, runs one
//! templated prompt per item (or per batch of items) against a model with
//! bounded concurrency, and reduces the per-item results into a single
//! output.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Items, parameters, map/filter/reduce results and stats
//! - [`error`] - Error types and result aliases
//! - [`config`] - Pipeline YAML loading, settings merging and validation
//! - [`template`] - `{{variable}}` substitution
//! - [`parser`] - Lenient extraction of JSON from model responses
//! - [`csv`] - CSV input reading and output writing
//! - [`generate`] - AI-generated input items
//! - [`filter`] - Rule, AI and hybrid item filters
//! - [`invoker`] - The [`invoker::AiInvoker`] seam and its HTTP implementation
//! - [`executor`] - Map, reduce and whole-pipeline executors
//! - [`telemetry`] - Tracing subscriber setup
//!
//! # Example
//!
//! ```rust,ignore
//! use codi_pipeline::config::{load_pipeline, load_settings, CliOptions};
//! use codi_pipeline::executor::{create_pipeline_executor, PipelineExecuteOptions};
//!
//! let (pipeline, base_dir) = load_pipeline(Path::new("pipeline.yaml"))?;
//! let settings = load_settings(Path::new("."), CliOptions::default())?;
//!
//! let executor = create_pipeline_executor(&settings)?;
//! let options = PipelineExecuteOptions { base_dir: Some(base_dir) };
//! let result = executor.execute(&pipeline, Some(options)).await?;
//! ```

pub mod config;
pub mod csv;
pub mod error;
pub mod executor;
pub mod filter;
pub mod generate;
pub mod invoker;
pub mod parser;
pub mod telemetry;
pub mod template;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ConfigError, PipelineError, ProviderError, Result};
pub use executor::{
    create_pipeline_executor, NoOpCallbacks, PipelineCallbacks, PipelineExecuteOptions,
    PipelineExecutor,
};
pub use invoker::{AiInvoker, HttpInvoker, InvokeOptions, InvokeResult};
pub use types::{
    ExecutionResult, ExecutionStats, Item, MapResult, Parameter, ProgressPhase, ProgressUpdate,
    ReduceResult,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
