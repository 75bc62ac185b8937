// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Dataset registry
//!
//! Holds every declared dataset and external source of a pipeline, keyed by
//! name, in registration order.

use std::collections::HashMap;

use crate::errors::{LiveflowError, LiveflowResult};
use crate::pipeline::Dataset;

/// A graph node: either a declared dataset or an external source
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Dataset(&'a Dataset),
    External(&'a str),
}

impl<'a> Node<'a> {
    pub fn name(&self) -> &'a str {
        match *self {
            Self::Dataset(ds) => &ds.name,
            Self::External(name) => name,
        }
    }

    pub fn upstreams(&self) -> &'a [String] {
        match *self {
            Self::Dataset(ds) => &ds.upstreams,
            Self::External(_) => &[],
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Dataset(Dataset),
    External(String),
}

/// Registry of declared datasets and external sources
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a dataset
    pub fn register(&mut self, dataset: Dataset) -> LiveflowResult<()> {
        let name = dataset.name.clone();
        self.insert(name, Entry::Dataset(dataset))
    }

    /// Declare a name that is produced outside the pipeline
    pub fn register_external(&mut self, name: impl Into<String>) -> LiveflowResult<()> {
        let name = name.into();
        self.insert(name.clone(), Entry::External(name))
    }

    fn insert(&mut self, name: String, entry: Entry) -> LiveflowResult<()> {
        if self.index.contains_key(&name) {
            return Err(LiveflowError::DuplicateName { name });
        }
        tracing::debug!(name = %name, "registered");
        self.index.insert(name, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Look up a dataset by name
    pub fn get(&self, name: &str) -> LiveflowResult<&Dataset> {
        match self.index.get(name).map(|&i| &self.entries[i]) {
            Some(Entry::Dataset(ds)) => Ok(ds),
            _ => Err(LiveflowError::UnknownDataset {
                name: name.to_string(),
            }),
        }
    }

    pub fn is_external(&self, name: &str) -> bool {
        matches!(
            self.index.get(name).map(|&i| &self.entries[i]),
            Some(Entry::External(_))
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Declared datasets in registration order.
    ///
    /// The iterator is cheap to clone, so it can be restarted. Order is
    /// informational and says nothing about execution order.
    pub fn list_all(&self) -> impl Iterator<Item = &Dataset> + Clone + '_ {
        self.entries.iter().filter_map(|e| match e {
            Entry::Dataset(ds) => Some(ds),
            Entry::External(_) => None,
        })
    }

    /// External source names in registration order
    pub fn externals(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.entries.iter().filter_map(|e| match e {
            Entry::External(name) => Some(name.as_str()),
            Entry::Dataset(_) => None,
        })
    }

    /// Every node (datasets and external sources) in registration order
    pub fn nodes(&self) -> impl Iterator<Item = Node<'_>> + Clone + '_ {
        self.entries.iter().map(|e| match e {
            Entry::Dataset(ds) => Node::Dataset(ds),
            Entry::External(name) => Node::External(name),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
