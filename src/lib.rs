// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! # liveflow - Incremental Dataset Pipelines
//!
//! `liveflow` declares datasets as pure transforms over their upstreams,
//! orders them by dependency and materializes them incrementally.
//!
//! ## Features
//!
//! - **Views, tables and streaming tables** - streaming tables only consume
//!   records newer than their stored offsets
//! - **Expectations** - per-row data quality checks with drop, warn or fail policies
//! - **Medallion tiers** - bronze/silver/gold metadata on every dataset
//! - **Failure isolation** - a failed dataset skips its dependents, nothing else
//!
//! ## Quick Start
//!
//! ```bash
//! # Scaffold the retail-sales sample
//! liveflow init retail-sales
//!
//! # Check and draw the pipeline
//! liveflow validate
//! liveflow graph --format mermaid
//!
//! # Materialize every dataset
//! liveflow run
//! ```

pub mod cli;
pub mod errors;
pub mod pipeline;
pub mod sources;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use errors::{LiveflowError, LiveflowResult};
pub use pipeline::{
    Dataset, DatasetKind, DatasetRegistry, PipelineDefinition, PipelineScheduler, RunOptions,
    RunResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
