// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Graph command - visualize pipeline as a graph

use miette::Result;
use std::path::PathBuf;

use super::{load_pipeline, GraphFormat};
use crate::pipeline::DagBuilder;

/// Run the graph command
pub async fn run(pipeline_path: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    let pipeline = load_pipeline(&pipeline_path)?;
    let registry = pipeline.build_registry()?;

    // Build DAG
    let dag = DagBuilder::build(&registry)?;

    // Output in requested format
    let output = match format {
        GraphFormat::Text => dag.to_text(&registry),
        GraphFormat::Dot => dag.to_dot(&registry),
        GraphFormat::Mermaid => dag.to_mermaid(&registry),
    };

    println!("{}", output);

    Ok(())
}
