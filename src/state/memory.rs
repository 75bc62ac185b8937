// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! In-memory state store, for embedding and tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{DatasetState, StateStore, StateSummary, StoreStats};
use crate::errors::LiveflowResult;

/// State store backed by a map
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: RwLock<BTreeMap<String, DatasetState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, dataset: &str) -> LiveflowResult<Option<DatasetState>> {
        Ok(self.states.read().await.get(dataset).cloned())
    }

    async fn store(&self, state: &DatasetState) -> LiveflowResult<()> {
        self.states
            .write()
            .await
            .insert(state.dataset.clone(), state.clone());
        Ok(())
    }

    async fn reset(&self, dataset: &str) -> LiveflowResult<()> {
        self.states.write().await.remove(dataset);
        Ok(())
    }

    async fn clear(&self) -> LiveflowResult<()> {
        self.states.write().await.clear();
        Ok(())
    }

    async fn list(&self) -> LiveflowResult<Vec<StateSummary>> {
        Ok(self.states.read().await.values().map(StateSummary::from).collect())
    }

    async fn stats(&self) -> LiveflowResult<StoreStats> {
        let states = self.states.read().await;
        let summaries: Vec<_> = states.values().map(StateSummary::from).collect();
        let mut stats = StoreStats::from_summaries(&summaries);
        stats.size_bytes = states
            .values()
            .map(|s| serde_json::to_vec(&s.rows).map(|b| b.len() as u64).unwrap_or(0))
            .sum();
        Ok(stats)
    }
}
