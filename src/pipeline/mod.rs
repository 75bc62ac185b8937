// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Pipeline definitions and execution
//!
//! Datasets are declared in a [`DatasetRegistry`], either directly or by
//! compiling a [`PipelineDefinition`]. The [`PipelineScheduler`] builds the
//! dependency graph and materializes every dataset once per run.

mod dag;
mod dataset;
mod definition;
mod expectations;
mod materializer;
mod registry;
mod scheduler;
mod transform;
mod validation;

pub use dag::DagBuilder;
pub use dataset::{
    lookup, Dataset, DatasetKind, Inputs, QualityTier, Row, Transform, TransformError,
};
pub use definition::{DatasetDef, PipelineDefinition, SourceDef, DEFAULT_PIPELINE_FILE};
pub use expectations::{
    CompareOp, Comparison, Constraint, ConstraintEvaluator, Evaluation, ExpectationReport, Policy,
    Predicate,
};
pub use materializer::{Materialization, Phase, RunContext};
pub use registry::{DatasetRegistry, Node};
pub use scheduler::{
    AbortHandle, DatasetReport, DatasetStatus, PipelineScheduler, PipelineStatus, RunOptions,
    RunResult,
};
pub use transform::{
    AggregateSpec, Cast, ExplodeSpec, JoinKind, JoinSpec, Step, TransformSpec, WithColumnSpec,
};
pub use validation::{PipelineValidator, ValidationResult};
