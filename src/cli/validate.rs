// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Validate command - check pipeline definition

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{base_dir, with_recovery};
use crate::pipeline::{PipelineDefinition, PipelineValidator};
use crate::utils::{print_error, print_section, print_success, print_warning};
use crate::LiveflowError;

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    // Load pipeline
    let pipeline = match PipelineDefinition::from_file(&pipeline_path) {
        Ok(p) => p,
        Err(e @ LiveflowError::PipelineNotFound { .. }) => return Err(with_recovery(e)),
        Err(e) => {
            eprintln!("  {} Failed to parse pipeline", "✗".red());
            eprintln!();
            return Err(miette::miette!("Parse error: {}", e));
        }
    };

    print_success("Pipeline file parsed");

    // Validate pipeline structure
    let validation = PipelineValidator::validate(&pipeline);

    // Check that sources can be read
    let missing_sources = if validation.is_valid() {
        PipelineValidator::validate_sources(&pipeline, &base_dir(&pipeline_path)).await?
    } else {
        Vec::new()
    };

    // Report results
    let mut has_issues = false;

    if !validation.errors.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            print_error(error);
        }
    }

    if !validation.suggestions.is_empty() {
        println!();
        println!("{}:", "Suggestions".bold());
        for suggestion in &validation.suggestions {
            println!("  {} {}", "→".blue(), suggestion.action);
            for step in &suggestion.steps {
                println!("    {}", step.dimmed());
            }
            for command in &suggestion.commands {
                println!("    {}", command.cyan());
            }
        }
    }

    if !missing_sources.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Missing sources".yellow().bold());
        for missing in &missing_sources {
            print_warning(missing);
        }
    }

    if !validation.warnings.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            print_warning(warning);
        }
    }

    if verbose {
        print_section("Pipeline summary");
        println!("  Name: {}", pipeline.name);
        println!("  Storage: {}", pipeline.storage.display());
        println!("  Sources: {}", pipeline.sources.len());
        for source in &pipeline.sources {
            println!("    - {} {}", source.name, source.path.dimmed());
        }
        println!("  Datasets: {}", pipeline.datasets.len());
        for dataset in &pipeline.datasets {
            let tier = dataset
                .tier
                .map(|t| format!(" {}", t))
                .unwrap_or_default();
            let upstreams = dataset.all_upstreams();
            let deps = if upstreams.is_empty() {
                String::new()
            } else {
                format!(" [reads: {}]", upstreams.join(", "))
            };
            println!(
                "    - {} ({}{}){}",
                dataset.name,
                dataset.kind,
                tier,
                deps.dimmed()
            );
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Pipeline validation failed"));
    }

    if has_issues {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
    }
    Ok(())
}
