// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Pipeline definition structures
//!
//! Defines the schema for liveflow.yaml files and compiles a definition
//! into a [`DatasetRegistry`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::errors::{LiveflowError, LiveflowResult};
use crate::pipeline::dataset::{Dataset, DatasetKind, QualityTier, Transform};
use crate::pipeline::expectations::Constraint;
use crate::pipeline::registry::DatasetRegistry;
use crate::pipeline::transform::TransformSpec;
use crate::sources::{FileSource, SourceFormat};

/// Default pipeline file name
pub const DEFAULT_PIPELINE_FILE: &str = "liveflow.yaml";

/// Pipeline definition from liveflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Parameters substituted as `${key}` in source paths
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configuration: BTreeMap<String, String>,

    /// State store directory
    #[serde(default = "default_storage")]
    pub storage: PathBuf,

    /// External sources, registered before any dataset
    #[serde(default)]
    pub sources: Vec<SourceDef>,

    /// Datasets in declaration order
    #[serde(default)]
    pub datasets: Vec<DatasetDef>,
}

fn default_storage() -> PathBuf {
    PathBuf::from(".liveflow/state")
}

/// An external source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDef {
    pub name: String,

    /// Glob pattern of data files, relative to the pipeline file
    pub path: String,

    /// `json` or `csv`; inferred from the path's extension when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<SourceFormat>,
}

/// A declared dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDef {
    pub name: String,

    #[serde(default = "default_kind")]
    pub kind: DatasetKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<QualityTier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Explicit upstreams; transform references are added implicitly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<String>,

    /// Declarative transform; omitted means pass the single upstream through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expectations: Vec<Constraint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_cols: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

fn default_kind() -> DatasetKind {
    DatasetKind::Table
}

impl DatasetDef {
    /// Explicit upstreams followed by any the transform references
    pub fn all_upstreams(&self) -> Vec<String> {
        let mut all = self.upstreams.clone();
        for reference in self.transform.iter().flat_map(TransformSpec::references) {
            if !all.contains(&reference) {
                all.push(reference);
            }
        }
        all
    }

    /// Transform references missing from the explicit upstream list
    pub fn implicit_upstreams(&self) -> Vec<String> {
        self.transform
            .iter()
            .flat_map(TransformSpec::references)
            .filter(|r| !self.upstreams.contains(r))
            .collect()
    }

    fn compile(&self) -> LiveflowResult<Dataset> {
        let upstreams = self.all_upstreams();

        let transform = match (&self.transform, upstreams.as_slice()) {
            (Some(spec), _) => spec.compile().map_err(|e| {
                LiveflowError::invalid_pipeline(
                    format!("dataset '{}': {}", self.name, e),
                    None,
                )
            })?,
            (None, [single]) => Transform::passthrough(single.clone()),
            (None, _) => {
                return Err(LiveflowError::invalid_pipeline(
                    format!("dataset '{}' has no transform", self.name),
                    Some("Add a 'transform:' block, or list exactly one upstream to pass it through"),
                ))
            }
        };

        let mut dataset = match self.kind {
            DatasetKind::View => Dataset::view(&self.name, transform),
            DatasetKind::Table => Dataset::table(&self.name, transform),
            DatasetKind::StreamingTable => Dataset::streaming_table(&self.name, transform),
        }
        .partitioned_by(self.partition_cols.iter().cloned());

        for upstream in upstreams {
            dataset = dataset.reads(upstream);
        }
        if let Some(tier) = self.tier {
            dataset = dataset.with_tier(tier);
        }
        if let Some(ref comment) = self.comment {
            dataset = dataset.with_comment(comment);
        }
        for (key, value) in &self.properties {
            dataset = dataset.with_property(key, value);
        }
        for expectation in &self.expectations {
            expectation.check.check()?;
            dataset = dataset.with_constraint(expectation.clone());
        }

        Ok(dataset)
    }
}

impl PipelineDefinition {
    /// Load a pipeline from a YAML or TOML file (chosen by extension)
    pub fn from_file(path: &Path) -> LiveflowResult<Self> {
        if !path.exists() {
            return Err(LiveflowError::PipelineNotFound {
                path: path.to_path_buf(),
            });
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| LiveflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(yaml: &str) -> LiveflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse pipeline from TOML string
    pub fn from_toml(content: &str) -> LiveflowResult<Self> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Serialize pipeline to YAML
    pub fn to_yaml(&self) -> LiveflowResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a dataset definition by name
    pub fn get_dataset(&self, name: &str) -> Option<&DatasetDef> {
        self.datasets.iter().find(|d| d.name == name)
    }

    /// All dataset names
    pub fn dataset_names(&self) -> Vec<&str> {
        self.datasets.iter().map(|d| d.name.as_str()).collect()
    }

    /// Replace `${key}` placeholders with configuration values
    pub fn substitute(&self, text: &str) -> LiveflowResult<String> {
        static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
        let Some(re) = PLACEHOLDER
            .get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").ok())
            .as_ref()
        else {
            return Ok(text.to_string());
        };

        let mut missing = None;
        let replaced = re.replace_all(text, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match self.configuration.get(key) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(key) => Err(LiveflowError::invalid_pipeline(
                format!("'{}' references undefined configuration key '{}'", text, key),
                Some("Define the key under 'configuration:'"),
            )),
            None => Ok(replaced.into_owned()),
        }
    }

    /// Compile the definition into a registry: sources first, then datasets
    pub fn build_registry(&self) -> LiveflowResult<DatasetRegistry> {
        let mut registry = DatasetRegistry::new();

        for source in &self.sources {
            registry.register_external(&source.name)?;
        }
        for def in &self.datasets {
            registry.register(def.compile()?)?;
        }

        Ok(registry)
    }

    /// File reader for the declared sources, with paths relative to `base_dir`
    pub fn file_source(&self, base_dir: &Path) -> LiveflowResult<FileSource> {
        self.sources
            .iter()
            .try_fold(FileSource::new(base_dir.to_path_buf()), |reader, source| {
                let path = self.substitute(&source.path)?;
                let format = source.format.unwrap_or_else(|| SourceFormat::infer(&path));
                Ok(reader.with_source_format(&source.name, path, format))
            })
    }
}
