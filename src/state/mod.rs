// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Materialized dataset state
//!
//! A state store persists, per dataset, the committed snapshot and the
//! offsets of every incremental upstream it has consumed. Writes replace a
//! dataset's state as a whole so a snapshot and its offsets always advance
//! together.

mod filesystem;
mod hash;
mod memory;

pub use filesystem::{FilesystemStore, RunLockGuard};
pub use hash::{fingerprint, ContentHasher};
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::errors::LiveflowResult;
use crate::pipeline::{DatasetKind, Row};

/// Upstream name → number of records consumed
pub type Offsets = BTreeMap<String, u64>;

/// Trait for state store implementations
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current committed state of a dataset
    async fn load(&self, dataset: &str) -> LiveflowResult<Option<DatasetState>>;

    /// Replace the committed state of a dataset
    async fn store(&self, state: &DatasetState) -> LiveflowResult<()>;

    /// Delete the state of one dataset
    async fn reset(&self, dataset: &str) -> LiveflowResult<()>;

    /// Delete all state
    async fn clear(&self) -> LiveflowResult<()>;

    /// Summaries of every stored dataset, sorted by name
    async fn list(&self) -> LiveflowResult<Vec<StateSummary>>;

    /// Store statistics
    async fn stats(&self) -> LiveflowResult<StoreStats>;
}

/// Committed state of one dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetState {
    pub dataset: String,
    pub kind: DatasetKind,
    pub rows: Vec<Row>,
    #[serde(default)]
    pub offsets: Offsets,
    /// BLAKE3 of rows and offsets
    pub fingerprint: String,
    /// Bumped every time the content changes
    pub version: u64,
    pub committed_at: SystemTime,
}

impl DatasetState {
    /// First commit of a dataset
    pub fn new(dataset: impl Into<String>, kind: DatasetKind, rows: Vec<Row>, offsets: Offsets) -> Self {
        let fingerprint = fingerprint(&rows, &offsets);
        Self {
            dataset: dataset.into(),
            kind,
            rows,
            offsets,
            fingerprint,
            version: 1,
            committed_at: SystemTime::now(),
        }
    }

    /// Successor of `previous`; returns `None` when nothing changed
    pub fn next(previous: &DatasetState, rows: Vec<Row>, offsets: Offsets) -> Option<Self> {
        let fingerprint = fingerprint(&rows, &offsets);
        if fingerprint == previous.fingerprint {
            return None;
        }

        Some(Self {
            dataset: previous.dataset.clone(),
            kind: previous.kind,
            rows,
            offsets,
            fingerprint,
            version: previous.version + 1,
            committed_at: SystemTime::now(),
        })
    }

    pub fn offset(&self, upstream: &str) -> u64 {
        self.offsets.get(upstream).copied().unwrap_or(0)
    }
}

/// Summary of a stored dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub dataset: String,
    pub kind: DatasetKind,
    pub rows: usize,
    pub offsets: Offsets,
    pub fingerprint: String,
    pub version: u64,
    pub committed_at: SystemTime,
}

impl From<&DatasetState> for StateSummary {
    fn from(state: &DatasetState) -> Self {
        Self {
            dataset: state.dataset.clone(),
            kind: state.kind,
            rows: state.rows.len(),
            offsets: state.offsets.clone(),
            fingerprint: state.fingerprint.clone(),
            version: state.version,
            committed_at: state.committed_at,
        }
    }
}

/// State store statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of stored datasets
    pub entries: usize,
    /// Total committed rows
    pub rows: usize,
    /// Total size in bytes
    pub size_bytes: u64,
    pub oldest_commit: Option<SystemTime>,
    pub newest_commit: Option<SystemTime>,
}

impl StoreStats {
    /// Fold summaries into statistics; `size_bytes` is left to the caller
    pub fn from_summaries(summaries: &[StateSummary]) -> Self {
        Self {
            entries: summaries.len(),
            rows: summaries.iter().map(|s| s.rows).sum(),
            size_bytes: 0,
            oldest_commit: summaries.iter().map(|s| s.committed_at).min(),
            newest_commit: summaries.iter().map(|s| s.committed_at).max(),
        }
    }

    /// Format size for display
    pub fn formatted_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size_bytes >= GB {
            format!("{:.2} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.2} MB", self.size_bytes as f64 / MB as f64)
        } else if self.size_bytes >= KB {
            format!("{:.2} KB", self.size_bytes as f64 / KB as f64)
        } else {
            format!("{} bytes", self.size_bytes)
        }
    }
}
