// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Watch command - continuous mode, re-run the pipeline when source files land

use colored::Colorize;
use miette::Result;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::Duration;

use super::{
    base_dir, build_scheduler, load_pipeline, open_store, print_recovery, spawn_interrupt_handler,
};
use crate::pipeline::{AbortHandle, DatasetStatus, RunOptions};

/// How often the event loop checks for Ctrl+C while idle
const INTERRUPT_POLL: Duration = Duration::from_millis(200);

/// Run the watch command
pub async fn run(pipeline_path: PathBuf, debounce_ms: u64, verbose: bool) -> Result<()> {
    let pipeline = load_pipeline(&pipeline_path)?;
    let base = base_dir(&pipeline_path);
    let storage = base.join(&pipeline.storage);

    println!("{}", "Starting watch mode...".bold());
    println!("Watching for changes (debounce: {}ms)", debounce_ms);
    println!("Press {} to exit.", "Ctrl+C".cyan());
    println!();

    // Create channel for receiving events
    let (tx, rx) = channel();

    // Create debounced watcher
    let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), tx)
        .map_err(|e| miette::miette!("Failed to create file watcher: {}", e))?;

    // Watch the pipeline file and every source landing directory
    debouncer
        .watcher()
        .watch(&pipeline_path, RecursiveMode::NonRecursive)
        .map_err(|e| miette::miette!("Failed to start watching: {}", e))?;

    for root in pipeline.file_source(&base)?.watch_roots() {
        if !root.exists() {
            eprintln!(
                "  {} {} does not exist yet, not watching it",
                "⚠".yellow(),
                root.display()
            );
            continue;
        }
        if verbose {
            println!("  {} {}", "watching".dimmed(), root.display());
        }
        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| miette::miette!("Failed to watch '{}': {}", root.display(), e))?;
    }

    let abort = AbortHandle::new();
    let interrupted = spawn_interrupt_handler(abort.clone());

    // Initial run
    run_pipeline(&pipeline_path, &abort, verbose).await;

    // Watch for changes
    while !interrupted.load(Ordering::SeqCst) {
        match rx.recv_timeout(INTERRUPT_POLL) {
            Ok(Ok(events)) => {
                // State writes must not trigger another run
                let relevant: Vec<_> = events
                    .iter()
                    .filter(|e| !is_within(&e.path, &storage))
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                    .collect();

                if !relevant.is_empty() {
                    println!();
                    println!("{}", "─".repeat(50).dimmed());
                    println!(
                        "{}: {} file(s) changed",
                        "Change detected".yellow(),
                        relevant.len()
                    );

                    if verbose {
                        for event in &relevant {
                            println!("  {}", event.path.display());
                        }
                    }

                    println!();
                    run_pipeline(&pipeline_path, &abort, verbose).await;
                }
            }
            Ok(Err(e)) => {
                eprintln!("{}: {:?}", "Watch error".red(), e);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                eprintln!("{}", "File watcher stopped".red());
                break;
            }
        }
    }

    println!("{}", "Watch mode stopped.".dimmed());
    Ok(())
}

fn is_within(path: &Path, dir: &Path) -> bool {
    match (path.canonicalize(), dir.canonicalize()) {
        (Ok(path), Ok(dir)) => path.starts_with(dir),
        _ => path.starts_with(dir),
    }
}

async fn run_pipeline(pipeline_path: &Path, abort: &AbortHandle, verbose: bool) {
    // The pipeline file may have changed, so reload it every time
    let pipeline = match load_pipeline(pipeline_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}: {}", "Failed to load pipeline".red(), e);
            return;
        }
    };

    let base = base_dir(pipeline_path);
    let store = match open_store(&pipeline, &base) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {}", "Failed to open state store".red(), e);
            return;
        }
    };

    let _lock = match store.lock() {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("{}: {}", "Skipping run".yellow(), e);
            return;
        }
    };

    let scheduler = match build_scheduler(&pipeline, &base, store) {
        Ok(s) => s.with_abort_handle(abort.clone()),
        Err(e) => {
            eprintln!("{}: {}", "Invalid pipeline".red(), e);
            if let Some(suggestion) = e.recovery() {
                print_recovery(&suggestion);
            }
            return;
        }
    };

    match scheduler.run(&RunOptions::default()).await {
        Ok(result) => {
            let elapsed = result.duration.as_secs_f64();
            let written: usize = result.datasets.iter().map(|d| d.rows_written).sum();

            if result.is_success() {
                println!(
                    "{} ({} row(s) written, {:.2}s)",
                    "Pipeline completed successfully".green(),
                    written,
                    elapsed
                );
            } else {
                println!("{} ({:.2}s)", "Pipeline failed".red(), elapsed);
            }

            for report in &result.datasets {
                if report.status == DatasetStatus::Failed || verbose {
                    let error = report.error.as_deref().unwrap_or("");
                    println!("  {:?} {} {}", report.status, report.name, error.dimmed());
                }
                if let Some(ref recovery) = report.recovery {
                    print_recovery(recovery);
                }
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Pipeline execution error".red(), e);
        }
    }
}
