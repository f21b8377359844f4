// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging setup.
//!
//! The engine logs through `tracing` macros; the binary installs a
//! subscriber here. Logs go to stderr so stdout stays clean for pipeline
//! output.
//!
//! ```rust,ignore
//! use codi_pipeline::telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! `RUST_LOG` wins over the configured level, e.g.
//! `RUST_LOG=codi_pipeline=debug codi-pipeline run pipeline.yaml`.

mod init;

pub use init::{init_telemetry, TelemetryConfig};
