// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Dataset declarations
//!
//! A dataset is a named unit of data produced by a pure transform over its
//! upstream datasets. Declarations are immutable once registered; the data
//! they produce lives in the state store.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::pipeline::expectations::{Constraint, Policy, Predicate};

/// A single record: column name → JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Upstream name → rows handed to a transform
pub type Inputs = HashMap<String, Vec<Row>>;

/// Look up a column, following `.` into nested objects
///
/// A literal key wins over a path, so a column named `a.b` is still
/// reachable after a rename.
pub fn lookup<'a>(row: &'a Row, path: &str) -> Option<&'a serde_json::Value> {
    if let Some(v) = row.get(path) {
        return Some(v);
    }

    let mut parts = path.split('.');
    let mut current = row.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Error returned by a transform function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError(pub String);

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransformError {}

type TransformFn = dyn Fn(&Inputs) -> Result<Vec<Row>, TransformError> + Send + Sync;

/// Pure function from upstream rows to output rows.
///
/// Transforms must be deterministic and free of side effects: a dataset that
/// fails after its transform ran is re-run from the same offsets next time.
#[derive(Clone)]
pub struct Transform(Arc<TransformFn>);

impl Transform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Inputs) -> Result<Vec<Row>, TransformError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Pass the rows of a single upstream through unchanged
    pub fn passthrough(upstream: impl Into<String>) -> Self {
        let upstream = upstream.into();
        Self::new(move |inputs| Ok(inputs.get(&upstream).cloned().unwrap_or_default()))
    }

    pub fn apply(&self, inputs: &Inputs) -> Result<Vec<Row>, TransformError> {
        (self.0)(inputs)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform(..)")
    }
}

/// How a dataset is read and persisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Recomputed on every read, never persisted
    View,
    /// Fully recomputed and replaced on every run
    Table,
    /// Appends rows derived from upstream data newer than its offsets
    StreamingTable,
}

impl DatasetKind {
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::StreamingTable)
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::View => write!(f, "view"),
            Self::Table => write!(f, "table"),
            Self::StreamingTable => write!(f, "streaming table"),
        }
    }
}

/// Medallion quality tier. Informational only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Bronze,
    Silver,
    Gold,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bronze => write!(f, "bronze"),
            Self::Silver => write!(f, "silver"),
            Self::Gold => write!(f, "gold"),
        }
    }
}

/// A declared dataset
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Unique name within the pipeline
    pub name: String,
    pub kind: DatasetKind,
    pub tier: Option<QualityTier>,
    pub comment: Option<String>,
    /// Names of datasets or external sources this dataset reads
    pub upstreams: Vec<String>,
    /// Expectations, evaluated in declaration order
    pub constraints: Vec<Constraint>,
    pub partition_cols: Vec<String>,
    /// Opaque physical properties, passed through untouched
    pub properties: BTreeMap<String, String>,
    pub transform: Transform,
}

impl Dataset {
    fn new(name: impl Into<String>, kind: DatasetKind, transform: Transform) -> Self {
        Self {
            name: name.into(),
            kind,
            tier: None,
            comment: None,
            upstreams: Vec::new(),
            constraints: Vec::new(),
            partition_cols: Vec::new(),
            properties: BTreeMap::new(),
            transform,
        }
    }

    pub fn view(name: impl Into<String>, transform: Transform) -> Self {
        Self::new(name, DatasetKind::View, transform)
    }

    pub fn table(name: impl Into<String>, transform: Transform) -> Self {
        Self::new(name, DatasetKind::Table, transform)
    }

    pub fn streaming_table(name: impl Into<String>, transform: Transform) -> Self {
        Self::new(name, DatasetKind::StreamingTable, transform)
    }

    /// Add an upstream reference
    pub fn reads(mut self, upstream: impl Into<String>) -> Self {
        let upstream = upstream.into();
        if !self.upstreams.contains(&upstream) {
            self.upstreams.push(upstream);
        }
        self
    }

    pub fn with_tier(mut self, tier: QualityTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Shorthand for a named expectation
    pub fn expect(self, name: impl Into<String>, predicate: Predicate, policy: Policy) -> Self {
        self.with_constraint(Constraint::new(name, predicate, policy))
    }

    pub fn partitioned_by<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_cols = cols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
