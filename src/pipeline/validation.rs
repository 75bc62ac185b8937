// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Pipeline validation
//!
//! Validates a pipeline definition before execution.

use std::collections::HashSet;
use std::path::Path;

use crate::errors::{LiveflowError, LiveflowResult, RecoverySuggestion};
use crate::pipeline::dag::DagBuilder;
use crate::pipeline::dataset::DatasetKind;
use crate::pipeline::definition::{DatasetDef, PipelineDefinition};
use crate::sources::SourceReader;

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline definition
    pub fn validate(pipeline: &PipelineDefinition) -> ValidationResult {
        let mut result = ValidationResult::new();

        if pipeline.datasets.is_empty() {
            result.add_error("Pipeline has no datasets defined");
        }

        // Sources and datasets share one namespace
        let mut seen_names = HashSet::new();
        for name in pipeline
            .sources
            .iter()
            .map(|s| &s.name)
            .chain(pipeline.datasets.iter().map(|d| &d.name))
        {
            if !seen_names.insert(name) {
                result.add_error(&format!("Duplicate name: '{}'", name));
            }
        }

        for source in &pipeline.sources {
            if let Err(e) = pipeline.substitute(&source.path) {
                result.add_error(&format!("Source '{}': {}", source.name, e));
            }
        }

        for dataset in &pipeline.datasets {
            Self::validate_dataset(dataset, pipeline, &mut result);
        }

        // Graph checks need a registry, which only builds from a clean definition
        if result.is_valid() {
            if let Err(e) = pipeline
                .build_registry()
                .and_then(|registry| DagBuilder::build(&registry))
            {
                let message = match e {
                    LiveflowError::CyclicDependency { ref members } => {
                        format!("Cyclic dependency: {}", members.join(" → "))
                    }
                    LiveflowError::UnresolvedReference {
                        ref dataset,
                        ref reference,
                    } => format!(
                        "Dataset '{}' references unknown dataset '{}'",
                        dataset, reference
                    ),
                    ref e => format!("Graph validation error: {}", e),
                };
                result.add_error(&message);
                result.suggestions.extend(e.recovery());
            }
        }

        result
    }

    /// Validate a single dataset
    fn validate_dataset(
        dataset: &DatasetDef,
        pipeline: &PipelineDefinition,
        result: &mut ValidationResult,
    ) {
        if let Some(ref transform) = dataset.transform {
            if let Err(e) = transform.compile() {
                result.add_error(&format!("Dataset '{}': {}", dataset.name, e));
            }
        } else if dataset.upstreams.len() != 1 {
            result.add_error(&format!(
                "Dataset '{}': No transform and {} upstreams - cannot pass through",
                dataset.name,
                dataset.upstreams.len()
            ));
        }

        let mut expectation_names = HashSet::new();
        for expectation in &dataset.expectations {
            if let Err(e) = expectation.check.check() {
                result.add_error(&format!(
                    "Dataset '{}': Expectation '{}': {}",
                    dataset.name, expectation.name, e
                ));
            }
            if !expectation_names.insert(&expectation.name) {
                result.add_warning(&format!(
                    "Dataset '{}': Expectation '{}' is declared twice; metrics will be ambiguous",
                    dataset.name, expectation.name
                ));
            }
        }

        for reference in dataset.implicit_upstreams() {
            result.add_warning(&format!(
                "Dataset '{}': Transform reads '{}' but doesn't list it in upstreams. \
                 This will be added implicitly.",
                dataset.name, reference
            ));
        }

        if dataset.kind == DatasetKind::StreamingTable {
            let incremental = dataset.all_upstreams().iter().any(|u| {
                pipeline.sources.iter().any(|s| &s.name == u)
                    || pipeline
                        .get_dataset(u)
                        .map_or(false, |d| d.kind == DatasetKind::StreamingTable)
            });
            if !incremental {
                result.add_warning(&format!(
                    "Dataset '{}': Streaming table has no external source or streaming table \
                     upstream - it will never see new rows",
                    dataset.name
                ));
            }
        }

        if dataset.kind == DatasetKind::View && !dataset.partition_cols.is_empty() {
            result.add_warning(&format!(
                "Dataset '{}': Partition columns on a view have no effect",
                dataset.name
            ));
        }

        if dataset.tier.is_none() && dataset.kind != DatasetKind::View {
            result.add_warning(&format!(
                "Dataset '{}': No quality tier (bronze, silver, gold) declared",
                dataset.name
            ));
        }
    }

    /// Check that every declared source can be read (runtime validation)
    pub async fn validate_sources(
        pipeline: &PipelineDefinition,
        base_path: &Path,
    ) -> LiveflowResult<Vec<String>> {
        let reader = pipeline.file_source(base_path)?;
        let mut missing = Vec::new();

        for source in &pipeline.sources {
            if !reader.check_available(&source.name).await? {
                missing.push(format!(
                    "Source '{}': Nothing found at {}",
                    source.name,
                    pipeline.substitute(&source.path)?
                ));
            }
        }

        Ok(missing)
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Next steps for graph errors
    pub suggestions: Vec<RecoverySuggestion>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
