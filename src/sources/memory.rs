// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! In-memory append-only source, for embedding and tests

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{RecordIter, SourceReader};
use crate::errors::LiveflowResult;
use crate::pipeline::Row;

/// Append-only record logs keyed by source name
#[derive(Debug, Default)]
pub struct MemorySource {
    logs: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append records to a source
    pub async fn append<I>(&self, source: &str, rows: I)
    where
        I: IntoIterator<Item = Row>,
    {
        self.logs
            .write()
            .await
            .entry(source.to_string())
            .or_default()
            .extend(rows);
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn check_available(&self, source: &str) -> LiveflowResult<bool> {
        Ok(self.logs.read().await.contains_key(source))
    }

    async fn open(&self, source: &str, offset: u64) -> LiveflowResult<RecordIter> {
        let records: Vec<Row> = self
            .logs
            .read()
            .await
            .get(source)
            .map(|log| log.iter().skip(offset as usize).cloned().collect())
            .unwrap_or_default();

        Ok(Box::new(records.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_open_is_restartable() {
        let source = MemorySource::new();
        source
            .append(
                "raw",
                (0..4).map(|i| json!({ "id": i }).as_object().cloned().unwrap()),
            )
            .await;

        let first: Vec<_> = source.open("raw", 1).await.unwrap().collect();
        let second: Vec<_> = source.open("raw", 1).await.unwrap().collect();
        assert_eq!(first.len(), 3);
        assert_eq!(first.len(), second.len());

        assert!(source.check_available("raw").await.unwrap());
        assert!(!source.check_available("other").await.unwrap());
    }
}
