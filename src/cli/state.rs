// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! State command - inspect and reset materialized state

use colored::Colorize;
use miette::Result;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use super::{base_dir, load_pipeline, open_store, StateAction};
use crate::state::StateStore;
use crate::utils::print_header;

/// Run the state command
pub async fn run(pipeline_path: PathBuf, action: StateAction, verbose: bool) -> Result<()> {
    let pipeline = load_pipeline(&pipeline_path)?;
    let store = open_store(&pipeline, &base_dir(&pipeline_path))?;

    match action {
        StateAction::Stats => {
            let stats = store.stats().await?;

            print_header("State Statistics");
            println!("  Location: {}", store.root().display());
            println!("  Datasets: {}", stats.entries);
            println!("  Rows:     {}", stats.rows);
            println!("  Size:     {}", stats.formatted_size());

            if let Some(age) = stats.oldest_commit.and_then(elapsed) {
                println!("  Oldest:   {} ago", format_duration(age));
            }

            if let Some(age) = stats.newest_commit.and_then(elapsed) {
                println!("  Newest:   {} ago", format_duration(age));
            }

            Ok(())
        }

        StateAction::List => {
            let summaries = store.list().await?;

            print_header("Materialized Datasets");

            if summaries.is_empty() {
                println!("{}", "  Nothing materialized yet.".dimmed());
                println!("{}", "  Run 'liveflow run' to build the pipeline.".dimmed());
                return Ok(());
            }

            for summary in &summaries {
                let age = elapsed(summary.committed_at)
                    .map(|d| format!("{} ago", format_duration(d)))
                    .unwrap_or_default();
                println!(
                    "  {} ({}) {} rows, v{} {}",
                    summary.dataset.bold(),
                    summary.kind,
                    summary.rows,
                    summary.version,
                    age.dimmed()
                );

                if verbose {
                    for (upstream, offset) in &summary.offsets {
                        println!("    {} {} @ {}", "↳".dimmed(), upstream, offset);
                    }
                    println!("    {}", summary.fingerprint.dimmed());
                }
            }

            Ok(())
        }

        StateAction::Reset { dataset, yes } => {
            let target = match dataset {
                Some(ref name) => {
                    if store.load(name).await?.is_none() {
                        println!("{}", format!("'{}' has no materialized state.", name).dimmed());
                        return Ok(());
                    }
                    format!("state of '{}'", name)
                }
                None => {
                    let stats = store.stats().await?;
                    if stats.entries == 0 {
                        println!("{}", "State store is already empty.".dimmed());
                        return Ok(());
                    }
                    format!(
                        "state of {} dataset(s) ({})",
                        stats.entries,
                        stats.formatted_size()
                    )
                }
            };

            if !yes {
                print!("Reset {}? [y/N] ", target);
                io::stdout().flush().ok();

                let mut input = String::new();
                io::stdin().read_line(&mut input).ok();

                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("{}", "Cancelled.".dimmed());
                    return Ok(());
                }
            }

            // Refuse while a run holds the storage directory
            let _lock = store.lock()?;
            match dataset {
                Some(ref name) => store.reset(name).await?,
                None => store.clear().await?,
            }
            println!("{}", format!("Reset {}.", target).green());

            Ok(())
        }
    }
}

fn elapsed(time: SystemTime) -> Option<Duration> {
    time.elapsed().ok()
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}
