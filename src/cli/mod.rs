// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for liveflow.

pub mod graph;
pub mod init;
pub mod run;
pub mod state;
pub mod validate;
pub mod watch;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use miette::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{LiveflowError, LiveflowResult, RecoverySuggestion};
use crate::pipeline::{AbortHandle, PipelineDefinition, PipelineScheduler};
use crate::state::FilesystemStore;

/// Incremental dataset pipelines
///
/// Declare views, tables and streaming tables, enforce expectations and
/// materialize only what changed.
#[derive(Parser, Debug)]
#[clap(
    name = "liveflow",
    version,
    about = "Incremental dataset pipelines with expectations and streaming tables",
    long_about = None,
    after_help = "Examples:\n\
        liveflow init                   Scaffold the retail-sales sample\n\
        liveflow validate               Check the pipeline definition\n\
        liveflow run                    Materialize every dataset\n\
        liveflow run -d sales_orders_cleaned --full-refresh\n\
        liveflow watch                  Re-run when source files change\n\n\
        See 'liveflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold a sample pipeline with bronze, silver and gold datasets
    Init {
        /// Pipeline name (defaults to current directory name)
        name: Option<String>,

        /// Overwrite an existing liveflow.yaml
        #[clap(long)]
        force: bool,
    },

    /// Run the pipeline
    Run {
        /// Pipeline file
        #[clap(short, long, default_value = "liveflow.yaml", env = "LIVEFLOW_PIPELINE")]
        pipeline: PathBuf,

        /// Run only specific datasets
        #[clap(short, long)]
        dataset: Vec<String>,

        /// Reset the state of the selected datasets before running
        #[clap(long)]
        full_refresh: bool,

        /// Dry run (show what would be done)
        #[clap(long)]
        dry_run: bool,

        /// Output format
        #[clap(short, long, default_value = "text", value_enum)]
        format: OutputFormat,
    },

    /// Watch mode - re-run pipeline when source files change
    Watch {
        /// Pipeline file
        #[clap(short, long, default_value = "liveflow.yaml", env = "LIVEFLOW_PIPELINE")]
        pipeline: PathBuf,

        /// Debounce delay in milliseconds
        #[clap(long, default_value = "500")]
        debounce: u64,
    },

    /// Validate pipeline definition
    Validate {
        /// Pipeline file to validate
        #[clap(default_value = "liveflow.yaml", env = "LIVEFLOW_PIPELINE")]
        pipeline: PathBuf,
    },

    /// Show pipeline as a graph
    Graph {
        /// Pipeline file
        #[clap(default_value = "liveflow.yaml", env = "LIVEFLOW_PIPELINE")]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, default_value = "text", value_enum)]
        format: GraphFormat,
    },

    /// Materialized state management
    State {
        /// Pipeline file
        #[clap(short, long, default_value = "liveflow.yaml", env = "LIVEFLOW_PIPELINE")]
        pipeline: PathBuf,

        #[clap(subcommand)]
        action: StateAction,
    },
}

/// State management actions
#[derive(Subcommand, Debug, Clone)]
pub enum StateAction {
    /// Show state store statistics
    Stats,

    /// List materialized datasets
    List,

    /// Delete materialized state so datasets rebuild from scratch
    Reset {
        /// Dataset to reset (default: all)
        dataset: Option<String>,

        /// Skip confirmation
        #[clap(short, long)]
        yes: bool,
    },
}

/// Output format for run results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Directory that relative paths in a pipeline file resolve against
pub(crate) fn base_dir(pipeline_path: &Path) -> PathBuf {
    match pipeline_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Print next steps for a failure to stderr
pub(crate) fn print_recovery(suggestion: &RecoverySuggestion) {
    eprintln!();
    for line in suggestion.to_string().lines() {
        eprintln!("  {}", line.yellow());
    }
}

/// Print the recovery for an error, if it has one, and convert it to a diagnostic
pub(crate) fn with_recovery(err: LiveflowError) -> miette::Report {
    if let Some(suggestion) = err.recovery() {
        print_recovery(&suggestion);
    }
    err.into()
}

/// Load a pipeline definition, reporting failures as diagnostics
pub(crate) fn load_pipeline(pipeline_path: &Path) -> Result<PipelineDefinition> {
    PipelineDefinition::from_file(pipeline_path).map_err(with_recovery)
}

/// Open the state store a pipeline declares
pub(crate) fn open_store(pipeline: &PipelineDefinition, base: &Path) -> Result<FilesystemStore> {
    Ok(FilesystemStore::new(base.join(&pipeline.storage))?)
}

/// Wire a scheduler with file sources and the given store
pub(crate) fn build_scheduler(
    pipeline: &PipelineDefinition,
    base: &Path,
    store: FilesystemStore,
) -> LiveflowResult<PipelineScheduler> {
    let registry = pipeline.build_registry()?;
    let reader = Arc::new(pipeline.file_source(base)?);
    PipelineScheduler::new(registry, reader, Arc::new(store))
}

/// Turn Ctrl+C into a graceful abort
///
/// The first interrupt sets the returned flag and aborts the current run
/// before its next dataset, so the run lock is released on the way out.
/// A second interrupt exits immediately.
pub(crate) fn spawn_interrupt_handler(abort: AbortHandle) -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();

    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if flag.swap(true, Ordering::SeqCst) {
                tracing::warn!("interrupted again, exiting");
                std::process::exit(130);
            }
            eprintln!(
                "\n{}",
                "Interrupted, stopping after the current dataset...".yellow()
            );
            abort.abort();
        }
    });

    interrupted
}
