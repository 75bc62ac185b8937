// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Run command - materialize the pipeline

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{
    base_dir, build_scheduler, load_pipeline, open_store, print_recovery, spawn_interrupt_handler,
    with_recovery, OutputFormat,
};
use crate::pipeline::{
    DatasetReport, DatasetStatus, PipelineScheduler, PipelineValidator, RunOptions, RunResult,
};
use crate::utils::{create_spinner, print_header};

/// Run the pipeline
pub async fn run(
    pipeline_path: PathBuf,
    datasets: Vec<String>,
    full_refresh: bool,
    dry_run: bool,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let pipeline = load_pipeline(&pipeline_path)?;

    // Validate pipeline
    let validation = PipelineValidator::validate(&pipeline);

    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Pipeline definition is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    let base = base_dir(&pipeline_path);
    let store = open_store(&pipeline, &base)?;

    // Keep other processes off this storage directory until we are done
    let _lock = store.lock().map_err(with_recovery)?;

    let scheduler = build_scheduler(&pipeline, &base, store).map_err(|e| {
        if e.is_graph_error() {
            eprintln!("{}", "Dependency graph could not be built:".red().bold());
        }
        with_recovery(e)
    })?;
    spawn_interrupt_handler(scheduler.abort_handle());

    let options = RunOptions {
        datasets,
        dry_run,
        full_refresh,
    };

    let text = format == OutputFormat::Text;
    if text {
        print_plan(&pipeline.name, &scheduler, &options)?;
    }

    let spinner = (text && !dry_run).then(|| create_spinner("Materializing datasets..."));
    let result = scheduler.run(&options).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let result = result.map_err(with_recovery)?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&result)
                .map_err(|e| miette::miette!("Failed to serialize run result: {}", e))?;
            println!("{}", json);
        }
        OutputFormat::Text if dry_run => {}
        OutputFormat::Text => print_result(&result, verbose),
    }

    if dry_run || result.is_success() {
        Ok(())
    } else {
        Err(miette::miette!("Pipeline run did not succeed ({:?})", result.status))
    }
}

/// Print the execution plan
fn print_plan(name: &str, scheduler: &PipelineScheduler, options: &RunOptions) -> Result<()> {
    let plan = scheduler.plan(options).map_err(with_recovery)?;

    println!();
    print_header(&format!("Pipeline: {}", name));
    println!(
        "Execution plan ({} node{}):",
        plan.len(),
        if plan.len() == 1 { "" } else { "s" }
    );
    println!();

    for (i, node) in plan.iter().enumerate() {
        let kind = match scheduler.registry().get(node.name()) {
            Ok(dataset) => dataset.kind.to_string(),
            Err(_) => "external".to_string(),
        };

        print!("  {}. {} ({})", i + 1, node.name().bold(), kind);

        if !node.upstreams().is_empty() {
            print!(" {}", format!("[reads: {}]", node.upstreams().join(", ")).dimmed());
        }

        println!();
    }

    println!();
    Ok(())
}

fn print_report(report: &DatasetReport, verbose: bool) {
    match report.status {
        DatasetStatus::Success => {
            let detail = match report.kind {
                None => "available".to_string(),
                Some(_) => format!(
                    "{} processed, {} dropped, {} written{}",
                    report.rows_processed,
                    report.rows_dropped,
                    report.rows_written,
                    if report.changed { "" } else { ", unchanged" }
                ),
            };
            println!(
                "  {} {} {} ({:.2}s)",
                "✓".green(),
                report.name.bold(),
                detail.dimmed(),
                report.duration.as_secs_f64()
            );
        }
        DatasetStatus::Failed => {
            println!("  {} {} failed", "✗".red(), report.name.bold());
            if let Some(ref error) = report.error {
                println!("    {}", error.red());
            }
            if let Some(ref recovery) = report.recovery {
                print_recovery(recovery);
            }
        }
        DatasetStatus::Skipped => {
            println!("  {} {} (skipped)", "○".dimmed(), report.name.dimmed());
            if verbose {
                if let Some(ref error) = report.error {
                    println!("    {}", error.dimmed());
                }
            }
        }
        DatasetStatus::Pending => {
            println!("  {} {} (not started)", "…".dimmed(), report.name.dimmed());
        }
    }

    for warning in report.warnings() {
        println!(
            "    {} expectation '{}' failed for {} row(s)",
            "⚠".yellow(),
            warning.name,
            warning.failed
        );
    }

    if verbose {
        for expectation in report.expectations.iter().filter(|e| !e.is_warning()) {
            println!(
                "    {} {} [{}]: {} passed, {} failed",
                "·".dimmed(),
                expectation.name,
                expectation.policy,
                expectation.passed,
                expectation.failed
            );
        }
    }
}

fn print_result(result: &RunResult, verbose: bool) {
    for report in &result.datasets {
        print_report(report, verbose);
    }

    println!();
    let seconds = result.duration.as_secs_f64();
    if result.is_success() {
        println!(
            "{}",
            format!("Pipeline completed successfully in {:.2}s", seconds).green()
        );
    } else {
        println!(
            "{}",
            format!("Pipeline {:?} after {:.2}s", result.status, seconds).red()
        );
    }
}
