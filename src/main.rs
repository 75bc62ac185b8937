// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! liveflow - Incremental Dataset Pipelines
//!
//! Declare datasets, enforce expectations, materialize incrementally.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use liveflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "liveflow=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Init { name, force } => liveflow::cli::init::run(name, force, cli.verbose).await,
        Commands::Run {
            pipeline,
            dataset,
            full_refresh,
            dry_run,
            format,
        } => {
            liveflow::cli::run::run(
                pipeline,
                dataset,
                full_refresh,
                dry_run,
                format,
                cli.verbose,
            )
            .await
        }
        Commands::Watch { pipeline, debounce } => {
            liveflow::cli::watch::run(pipeline, debounce, cli.verbose).await
        }
        Commands::Validate { pipeline } => {
            liveflow::cli::validate::run(pipeline, cli.verbose).await
        }
        Commands::Graph { pipeline, format } => {
            liveflow::cli::graph::run(pipeline, format, cli.verbose).await
        }
        Commands::State { pipeline, action } => {
            liveflow::cli::state::run(pipeline, action, cli.verbose).await
        }
    }
}
