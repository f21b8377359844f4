// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pipeline executor.
//!
//! Runs a pipeline end to end: validate the config, resolve input, apply the
//! limit, then filter, map and reduce. Statistics are collected fresh for
//! every run and returned with the result.

pub mod map;
pub mod reduce;
pub mod retry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{ensure_valid, InputFrom, InvokerSettings, PipelineConfig, ReduceType};
use crate::csv::read_csv;
use crate::error::{PipelineError, ProviderError};
use crate::filter::FilterExecutor;
use crate::generate::generate_items;
use crate::invoker::{AiInvoker, HttpInvoker};
use crate::types::{ExecutionResult, ExecutionStats, Item, ProgressPhase, ProgressUpdate, ReduceStats};

pub use map::{MapExecutor, MapPhaseOutput};
pub use reduce::{ReduceError, ReduceExecutor};

// ============================================================================
// Callbacks
// ============================================================================

/// Callbacks for pipeline progress and cancellation.
pub trait PipelineCallbacks: Send + Sync {
    /// Called at each progress checkpoint.
    fn on_progress(&self, update: &ProgressUpdate);

    /// Polled before each unit of work is dispatched.
    fn is_cancelled(&self) -> bool;
}

/// No-op implementation of callbacks.
pub struct NoOpCallbacks;

impl PipelineCallbacks for NoOpCallbacks {
    fn on_progress(&self, _update: &ProgressUpdate) {}
    fn is_cancelled(&self) -> bool {
        false
    }
}

// ============================================================================
// Execution Options
// ============================================================================

/// Options for pipeline execution.
#[derive(Debug, Clone, Default)]
pub struct PipelineExecuteOptions {
    /// Directory relative CSV paths resolve against (defaults to the
    /// current directory)
    pub base_dir: Option<PathBuf>,
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Pipeline executor for map-reduce AI runs.
///
/// # Example
///
/// ```rust,ignore
/// use codi_pipeline::config::load_pipeline;
/// use codi_pipeline::executor::{PipelineExecutor, PipelineExecuteOptions};
///
/// let (config, base_dir) = load_pipeline(Path::new("pipeline.yaml"))?;
/// let executor = PipelineExecutor::new(invoker);
/// let options = PipelineExecuteOptions { base_dir: Some(base_dir) };
///
/// let result = executor.execute(&config, Some(options)).await?;
/// println!("{}", result.formatted_output().unwrap_or_default());
/// ```
pub struct PipelineExecutor {
    invoker: Arc<dyn AiInvoker>,
}

impl PipelineExecutor {
    /// Create a new pipeline executor.
    pub fn new(invoker: Arc<dyn AiInvoker>) -> Self {
        Self { invoker }
    }

    /// Execute a pipeline.
    pub async fn execute(
        &self,
        config: &PipelineConfig,
        options: Option<PipelineExecuteOptions>,
    ) -> Result<ExecutionResult, PipelineError> {
        self.execute_with_callbacks(config, options, Arc::new(NoOpCallbacks))
            .await
    }

    /// Execute a pipeline with callbacks for progress reporting.
    ///
    /// Errors are returned only for invalid configuration, input resolution,
    /// the template pre-pass and cancellation. Failures after the first AI
    /// call land in the returned [`ExecutionResult`].
    #[tracing::instrument(skip_all, fields(pipeline = %config.name))]
    pub async fn execute_with_callbacks(
        &self,
        config: &PipelineConfig,
        options: Option<PipelineExecuteOptions>,
        callbacks: Arc<dyn PipelineCallbacks>,
    ) -> Result<ExecutionResult, PipelineError> {
        let options = options.unwrap_or_default();
        let start = Instant::now();

        ensure_valid(config)?;

        let base_dir = options.base_dir.unwrap_or_else(|| PathBuf::from("."));
        let (mut items, generation_calls) = self.resolve_input(config, &base_dir).await?;
        if let Some(limit) = config.input.limit {
            items.truncate(limit);
        }
        tracing::info!("Resolved {} input items", items.len());

        let filter_result = match config.filter {
            Some(ref filter) => {
                let result = FilterExecutor::new(self.invoker.clone())
                    .execute(items, filter, &config.parameters, callbacks.clone())
                    .await?;
                items = result.included.clone();
                Some(result)
            }
            None => None,
        };

        let map_start = Instant::now();
        let map = MapExecutor::new(self.invoker.clone())
            .execute(&items, &config.map, &config.parameters, callbacks.clone())
            .await?;

        let mut stats = ExecutionStats {
            total_items: items.len(),
            successful_maps: map.results.iter().filter(|r| r.success).count(),
            failed_maps: map.results.iter().filter(|r| !r.success).count(),
            map_phase_time_ms: map_start.elapsed().as_millis() as u64,
            reduce_phase_time_ms: 0,
            max_concurrency: map.max_concurrency,
            ai_calls: generation_calls
                + filter_result.as_ref().map_or(0, |f| f.stats.ai_calls)
                + map.ai_calls,
        };

        tracing::info!(
            "Map phase: {} succeeded, {} failed, {} AI calls",
            stats.successful_maps,
            stats.failed_maps,
            stats.ai_calls
        );

        if let Some(error) = map.fatal_error {
            tracing::warn!("Skipping reduce after map failure: {}", error);
            callbacks.on_progress(&ProgressUpdate::new(ProgressPhase::Complete, 1, 1));
            return Ok(ExecutionResult {
                success: false,
                output: None,
                map_results: map.results,
                filter_result,
                total_time_ms: start.elapsed().as_millis() as u64,
                execution_stats: stats,
                reduce_stats: None,
                error: Some(error),
            });
        }

        callbacks.on_progress(
            &ProgressUpdate::new(ProgressPhase::Reducing, 0, 1)
                .with_message(format!("Reducing {} results ({})", map.results.len(), config.reduce.reduce_type)),
        );

        let reduce_start = Instant::now();
        let reduced = ReduceExecutor::new(self.invoker.clone())
            .execute(&map.results, &config.reduce, &config.parameters)
            .await;
        stats.reduce_phase_time_ms = reduce_start.elapsed().as_millis() as u64;

        callbacks.on_progress(&ProgressUpdate::new(ProgressPhase::Complete, 1, 1));

        let (success, output, reduce_stats, error) = match reduced {
            Ok(output) => {
                let reduce_stats = output.stats.clone();
                (true, Some(output), Some(reduce_stats), None)
            }
            Err(e) => {
                tracing::warn!("Reduce phase failed: {}", e);
                let reduce_stats = ReduceStats {
                    input_count: map.results.len(),
                    output_count: 0,
                    reduce_time_ms: stats.reduce_phase_time_ms,
                    used_ai_reduce: config.reduce.reduce_type == ReduceType::Ai,
                };
                (false, None, Some(reduce_stats), Some(e.to_string()))
            }
        };

        Ok(ExecutionResult {
            success,
            output,
            map_results: map.results,
            filter_result,
            total_time_ms: start.elapsed().as_millis() as u64,
            execution_stats: stats,
            reduce_stats,
            error,
        })
    }

    /// Resolve the configured input source into items, plus the AI calls
    /// spent generating them.
    async fn resolve_input(
        &self,
        config: &PipelineConfig,
        base_dir: &Path,
    ) -> Result<(Vec<Item>, usize), PipelineError> {
        let input = &config.input;

        if let Some(ref items) = input.items {
            return Ok((items.clone(), 0));
        }

        match input.from {
            Some(InputFrom::Inline(ref items)) => return Ok((items.clone(), 0)),
            Some(InputFrom::Csv(ref source)) => {
                let path = base_dir.join(&source.path);
                let delimiter = source.delimiter.chars().next().unwrap_or(',');
                let data = read_csv(&path, delimiter, source.has_headers)?;
                return Ok((data.rows, 0));
            }
            None => {}
        }

        if let Some(ref generate) = input.generate {
            let generated = generate_items(self.invoker.as_ref(), generate, config.map.timeout_ms()).await?;
            return Ok((generated.items, generated.ai_calls));
        }

        Ok((Vec::new(), 0))
    }
}

/// Create a pipeline executor backed by an HTTP invoker.
pub fn create_pipeline_executor(settings: &InvokerSettings) -> Result<PipelineExecutor, ProviderError> {
    let invoker = HttpInvoker::from_settings(settings)?;
    Ok(PipelineExecutor::new(Arc::new(invoker)))
}
