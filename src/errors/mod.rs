// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Error types with actionable messages
//!
//! Errors fall into two groups. Graph-build errors (duplicate names,
//! unresolved references, cycles) abort a run before any dataset executes.
//! Dataset-scoped errors (constraint violations, transform and source
//! failures) are captured in the run result and only affect the failing
//! dataset and its dependents.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for liveflow operations
pub type LiveflowResult<T> = Result<T, LiveflowError>;

/// Main error type for liveflow
#[derive(Error, Debug, Diagnostic)]
pub enum LiveflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Registry Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Dataset '{name}' is already declared")]
    #[diagnostic(
        code(liveflow::duplicate_name),
        help("Dataset and external source names share one namespace; rename one of them")
    )]
    DuplicateName { name: String },

    #[error("Dataset '{name}' is not declared")]
    #[diagnostic(code(liveflow::unknown_dataset))]
    UnknownDataset { name: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Graph Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Dataset '{dataset}' references unknown dataset '{reference}'")]
    #[diagnostic(
        code(liveflow::unresolved_reference),
        help("Declare '{reference}' as a dataset, or register it as an external source")
    )]
    UnresolvedReference { dataset: String, reference: String },

    #[error("Cyclic dependency detected: {}", .members.join(" → "))]
    #[diagnostic(
        code(liveflow::cyclic_dependency),
        help("Review the upstreams of these datasets to remove the cycle")
    )]
    CyclicDependency { members: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Dataset Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Expectation '{constraint}' on '{dataset}' failed for {violations} row(s)")]
    #[diagnostic(
        code(liveflow::constraint_violation),
        help("Fix the upstream data, or relax the expectation to 'drop' or 'warn'")
    )]
    ConstraintViolation {
        dataset: String,
        constraint: String,
        violations: usize,
    },

    #[error("Transform of '{dataset}' failed: {message}")]
    #[diagnostic(code(liveflow::transform_failed))]
    TransformFailed { dataset: String, message: String },

    #[error("External source '{source_name}' is not available")]
    #[diagnostic(
        code(liveflow::source_unavailable),
        help("Check that the source path exists and matches at least one file")
    )]
    SourceUnavailable { source_name: String },

    #[error("Failed to read external source '{source_name}': {message}")]
    #[diagnostic(code(liveflow::source_read))]
    SourceRead { source_name: String, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Run Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Another run of this pipeline is in progress")]
    #[diagnostic(
        code(liveflow::run_in_progress),
        help("Wait for the current run to finish; remove a stale run.lock file if no run is active")
    )]
    RunInProgress,

    #[error("State store error: {message}")]
    #[diagnostic(code(liveflow::state_store))]
    StateStore { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Definition Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(liveflow::pipeline_not_found),
        help("Create a pipeline with 'liveflow init' or write liveflow.yaml manually")
    )]
    PipelineNotFound { path: PathBuf },

    #[error("Invalid pipeline definition: {reason}")]
    #[diagnostic(code(liveflow::invalid_pipeline))]
    InvalidPipeline {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(liveflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(liveflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(liveflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(liveflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(liveflow::toml_error))]
    Toml { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(liveflow::glob_error))]
    GlobPattern { message: String },

    #[error("Invalid regular expression: {message}")]
    #[diagnostic(code(liveflow::regex_error))]
    Regex { message: String },
}

/// Name of the lock file a filesystem state store holds during a run
pub const LOCK_FILE_NAME: &str = "run.lock";

impl From<std::io::Error> for LiveflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for LiveflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for LiveflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for LiveflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for LiveflowError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl From<regex::Error> for LiveflowError {
    fn from(e: regex::Error) -> Self {
        Self::Regex { message: e.to_string() }
    }
}

impl LiveflowError {
    /// Whether this error is raised while building the dependency graph.
    ///
    /// Graph-build errors abort the whole run; everything else is scoped to
    /// a single dataset.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName { .. }
                | Self::UnknownDataset { .. }
                | Self::UnresolvedReference { .. }
                | Self::CyclicDependency { .. }
        )
    }

    /// Create a state store error from any displayable cause
    pub fn state_store(context: &str, error: impl std::fmt::Display) -> Self {
        Self::StateStore {
            message: format!("{}: {}", context, error),
        }
    }

    /// Create an invalid pipeline error with a hint
    pub fn invalid_pipeline(reason: impl Into<String>, help: Option<&str>) -> Self {
        Self::InvalidPipeline {
            reason: reason.into(),
            help: help.map(String::from),
        }
    }

    /// Actionable next steps for this error, if any apply
    pub fn recovery(&self) -> Option<RecoverySuggestion> {
        match self {
            Self::CyclicDependency { members } => {
                Some(RecoverySuggestion::fix_cyclic_dependency(members))
            }
            Self::UnresolvedReference { dataset, reference } => Some(
                RecoverySuggestion::declare_missing_reference(dataset, reference),
            ),
            Self::ConstraintViolation {
                dataset,
                constraint,
                ..
            } => Some(RecoverySuggestion::relax_expectation(dataset, constraint)),
            Self::PipelineNotFound { .. } => Some(RecoverySuggestion::create_pipeline()),
            Self::RunInProgress => Some(RecoverySuggestion::release_run_lock()),
            _ => None,
        }
    }
}
