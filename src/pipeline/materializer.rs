// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Incremental materializer
//!
//! Moves one dataset through `Reading → Transforming → Validating` and
//! commits the result. Streaming tables read their incremental upstreams
//! (external sources and other streaming tables) from the stored offsets
//! and everything else in full. Nothing is written unless every phase
//! succeeds, so offsets never move past records that were not committed.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::{LiveflowError, LiveflowResult};
use crate::pipeline::dataset::{Dataset, DatasetKind, Inputs, Row};
use crate::pipeline::expectations::{ConstraintEvaluator, ExpectationReport};
use crate::pipeline::registry::DatasetRegistry;
use crate::sources::SourceReader;
use crate::state::{DatasetState, Offsets, StateStore};

/// Lifecycle of one dataset within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Reading,
    Transforming,
    Validating,
    Committed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Reading => "reading",
            Self::Transforming => "transforming",
            Self::Validating => "validating",
            Self::Committed => "committed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful materialization did
#[derive(Debug, Clone, Default)]
pub struct Materialization {
    /// Rows produced by the transform
    pub rows_processed: usize,
    /// Rows removed by drop expectations
    pub rows_dropped: usize,
    /// Rows committed: the new snapshot of a table, the appended rows of a
    /// streaming table, zero for a view
    pub rows_written: usize,
    /// Whether the stored state changed
    pub changed: bool,
    /// Committed state version, if the dataset is persisted
    pub version: Option<u64>,
    pub expectations: Vec<ExpectationReport>,
}

type RowsFuture<'f> = Pin<Box<dyn Future<Output = LiveflowResult<Vec<Row>>> + Send + 'f>>;

/// Per-run view of the registry, the source reader and the state store
pub struct RunContext<'a> {
    registry: &'a DatasetRegistry,
    reader: &'a dyn SourceReader,
    store: &'a dyn StateStore,
    /// States loaded or committed during this run
    states: HashMap<String, Arc<DatasetState>>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        registry: &'a DatasetRegistry,
        reader: &'a dyn SourceReader,
        store: &'a dyn StateStore,
    ) -> Self {
        Self {
            registry,
            reader,
            store,
            states: HashMap::new(),
        }
    }

    /// Check an external source
    pub async fn check_source(&self, source: &str) -> LiveflowResult<()> {
        if self.reader.check_available(source).await? {
            Ok(())
        } else {
            Err(LiveflowError::SourceUnavailable {
                source_name: source.to_string(),
            })
        }
    }

    /// Materialize one dataset
    pub async fn materialize(&mut self, dataset: &'a Dataset) -> LiveflowResult<Materialization> {
        let mut phase = Phase::Pending;
        let result = self.run_phases(dataset, &mut phase).await;

        match result {
            Ok(ref m) => {
                advance(dataset, &mut phase, Phase::Committed);
                tracing::info!(
                    dataset = %dataset.name,
                    kind = %dataset.kind,
                    processed = m.rows_processed,
                    dropped = m.rows_dropped,
                    written = m.rows_written,
                    changed = m.changed,
                    "dataset materialized"
                );
            }
            Err(ref e) => {
                let failed_in = phase;
                advance(dataset, &mut phase, Phase::Failed);
                tracing::warn!(
                    dataset = %dataset.name,
                    phase = %failed_in,
                    error = %e,
                    "dataset failed"
                );
            }
        }

        result
    }

    async fn run_phases(
        &mut self,
        dataset: &'a Dataset,
        phase: &mut Phase,
    ) -> LiveflowResult<Materialization> {
        advance(dataset, phase, Phase::Reading);
        let previous = match dataset.kind {
            DatasetKind::View => None,
            _ => self.state(&dataset.name).await?,
        };
        let (inputs, offsets) = self.read_inputs(dataset, previous.as_deref()).await?;

        advance(dataset, phase, Phase::Transforming);
        let output = dataset
            .transform
            .apply(&inputs)
            .map_err(|e| LiveflowError::TransformFailed {
                dataset: dataset.name.clone(),
                message: e.to_string(),
            })?;
        let rows_processed = output.len();

        advance(dataset, phase, Phase::Validating);
        let evaluation = ConstraintEvaluator::evaluate(&dataset.name, &dataset.constraints, output)?;

        let mut result = Materialization {
            rows_processed,
            rows_dropped: evaluation.dropped,
            rows_written: 0,
            changed: false,
            version: None,
            expectations: evaluation.reports,
        };

        let rows = match dataset.kind {
            DatasetKind::View => return Ok(result),
            DatasetKind::Table => evaluation.kept,
            DatasetKind::StreamingTable => {
                let mut rows = previous.as_ref().map(|p| p.rows.clone()).unwrap_or_default();
                rows.extend(evaluation.kept);
                rows
            }
        };
        result.rows_written = match dataset.kind {
            DatasetKind::StreamingTable => rows.len() - previous.as_ref().map_or(0, |p| p.rows.len()),
            _ => rows.len(),
        };

        let next = match previous {
            None => Some(DatasetState::new(&dataset.name, dataset.kind, rows, offsets)),
            Some(ref prev) => DatasetState::next(prev, rows, offsets),
        };

        match next {
            Some(state) => {
                self.store.store(&state).await?;
                result.changed = true;
                result.version = Some(state.version);
                self.states.insert(dataset.name.clone(), Arc::new(state));
            }
            None => {
                tracing::debug!(dataset = %dataset.name, "state unchanged, skipping write");
                result.version = previous.map(|p| p.version);
            }
        }

        Ok(result)
    }

    /// Committed state of a dataset, loaded once per run
    async fn state(&mut self, name: &str) -> LiveflowResult<Option<Arc<DatasetState>>> {
        if let Some(state) = self.states.get(name) {
            return Ok(Some(Arc::clone(state)));
        }

        let loaded = self.store.load(name).await?.map(Arc::new);
        if let Some(ref state) = loaded {
            self.states.insert(name.to_string(), Arc::clone(state));
        }
        Ok(loaded)
    }

    /// Whether `dataset` reads `upstream` incrementally
    fn is_incremental(&self, dataset: &Dataset, upstream: &str) -> bool {
        dataset.kind.is_streaming()
            && (self.registry.is_external(upstream)
                || self
                    .registry
                    .get(upstream)
                    .map_or(false, |u| u.kind.is_streaming()))
    }

    async fn read_inputs(
        &mut self,
        dataset: &'a Dataset,
        previous: Option<&DatasetState>,
    ) -> LiveflowResult<(Inputs, Offsets)> {
        let mut inputs = Inputs::new();
        let mut offsets = Offsets::new();

        for upstream in &dataset.upstreams {
            let rows = if self.is_incremental(dataset, upstream) {
                let from = previous.map_or(0, |p| p.offset(upstream));
                let (rows, next) = self.read_from(upstream, from).await?;
                tracing::debug!(
                    dataset = %dataset.name,
                    upstream = %upstream,
                    from,
                    to = next,
                    "incremental read"
                );
                offsets.insert(upstream.clone(), next);
                rows
            } else {
                self.read_full(upstream).await?
            };
            inputs.insert(upstream.clone(), rows);
        }

        Ok((inputs, offsets))
    }

    /// Records of an append-only upstream after `from`, and the new offset
    async fn read_from(&mut self, upstream: &str, from: u64) -> LiveflowResult<(Vec<Row>, u64)> {
        if self.registry.is_external(upstream) {
            let rows = self
                .reader
                .open(upstream, from)
                .await?
                .collect::<LiveflowResult<Vec<_>>>()?;
            let next = from + rows.len() as u64;
            return Ok((rows, next));
        }

        let snapshot = self.state(upstream).await?;
        let rows = snapshot.as_ref().map_or(&[][..], |s| s.rows.as_slice());
        let len = rows.len() as u64;
        if from > len {
            tracing::warn!(
                upstream = %upstream,
                offset = from,
                available = len,
                "offset is past the end of the upstream snapshot"
            );
        }
        let start = from.min(len) as usize;
        Ok((rows[start..].to_vec(), len))
    }

    /// Full contents of an upstream
    async fn read_full(&mut self, upstream: &str) -> LiveflowResult<Vec<Row>> {
        if self.registry.is_external(upstream) {
            return self
                .reader
                .open(upstream, 0)
                .await?
                .collect::<LiveflowResult<Vec<_>>>();
        }

        let registry = self.registry;
        let dataset = registry.get(upstream)?;
        match dataset.kind {
            DatasetKind::View => self.view_rows(dataset).await,
            _ => match self.state(upstream).await? {
                Some(state) => Ok(state.rows.clone()),
                None => {
                    tracing::debug!(upstream = %upstream, "upstream not materialized yet");
                    Ok(Vec::new())
                }
            },
        }
    }

    /// Recompute a view for a downstream read
    fn view_rows<'f>(&'f mut self, view: &'a Dataset) -> RowsFuture<'f> {
        Box::pin(async move {
            let mut inputs = Inputs::new();
            for upstream in &view.upstreams {
                let rows = self.read_full(upstream).await?;
                inputs.insert(upstream.clone(), rows);
            }

            let output = view
                .transform
                .apply(&inputs)
                .map_err(|e| LiveflowError::TransformFailed {
                    dataset: view.name.clone(),
                    message: e.to_string(),
                })?;

            Ok(ConstraintEvaluator::evaluate(&view.name, &view.constraints, output)?.kept)
        })
    }
}

fn advance(dataset: &Dataset, phase: &mut Phase, next: Phase) {
    tracing::debug!(dataset = %dataset.name, from = %phase, to = %next, "phase");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dataset::{Transform, TransformError};
    use crate::pipeline::expectations::{CompareOp, Policy, Predicate};
    use crate::sources::MemorySource;
    use crate::state::MemoryStore;
    use serde_json::json;

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    async fn source_with(ids: std::ops::Range<i64>) -> MemorySource {
        let source = MemorySource::new();
        source.append("raw", ids.map(|i| row(json!({ "id": i })))).await;
        source
    }

    #[tokio::test]
    async fn test_streaming_table_reads_only_new_records() {
        let mut registry = DatasetRegistry::new();
        registry.register_external("raw").unwrap();
        registry
            .register(Dataset::streaming_table("bronze", Transform::passthrough("raw")).reads("raw"))
            .unwrap();

        let source = source_with(0..3).await;
        let store = MemoryStore::new();
        let bronze = registry.get("bronze").unwrap();

        let first = RunContext::new(&registry, &source, &store)
            .materialize(bronze)
            .await
            .unwrap();
        assert_eq!(first.rows_written, 3);
        assert_eq!(first.version, Some(1));

        source.append("raw", (3..5).map(|i| row(json!({ "id": i })))).await;
        let second = RunContext::new(&registry, &source, &store)
            .materialize(bronze)
            .await
            .unwrap();
        assert_eq!(second.rows_processed, 2);
        assert_eq!(second.rows_written, 2);

        let state = store.load("bronze").await.unwrap().unwrap();
        assert_eq!(ids(&state.rows), vec![0, 1, 2, 3, 4]);
        assert_eq!(state.offset("raw"), 5);
        assert_eq!(state.version, 2);
    }

    #[tokio::test]
    async fn test_unchanged_streaming_table_is_not_rewritten() {
        let mut registry = DatasetRegistry::new();
        registry.register_external("raw").unwrap();
        registry
            .register(Dataset::streaming_table("bronze", Transform::passthrough("raw")).reads("raw"))
            .unwrap();

        let source = source_with(0..3).await;
        let store = MemoryStore::new();
        let bronze = registry.get("bronze").unwrap();

        RunContext::new(&registry, &source, &store)
            .materialize(bronze)
            .await
            .unwrap();
        let before = store.load("bronze").await.unwrap().unwrap();

        let again = RunContext::new(&registry, &source, &store)
            .materialize(bronze)
            .await
            .unwrap();
        let after = store.load("bronze").await.unwrap().unwrap();

        assert!(!again.changed);
        assert_eq!(again.rows_written, 0);
        assert_eq!(before.fingerprint, after.fingerprint);
        assert_eq!(before.offsets, after.offsets);
        assert_eq!(after.version, 1);
    }

    #[tokio::test]
    async fn test_stream_static_join_reads_static_side_in_full() {
        let mut registry = DatasetRegistry::new();
        registry.register_external("raw").unwrap();
        registry.register_external("dims").unwrap();
        registry
            .register(Dataset::table("lookup", Transform::passthrough("dims")).reads("dims"))
            .unwrap();
        registry
            .register(
                Dataset::streaming_table(
                    "joined",
                    Transform::new(|inputs| {
                        let n = inputs["lookup"].len();
                        Ok(inputs["raw"]
                            .iter()
                            .cloned()
                            .map(|mut r| {
                                r.insert("lookup_rows".into(), json!(n));
                                r
                            })
                            .collect())
                    }),
                )
                .reads("raw")
                .reads("lookup"),
            )
            .unwrap();

        let source = source_with(0..2).await;
        source
            .append("dims", (0..4).map(|i| row(json!({ "k": i }))))
            .await;
        let store = MemoryStore::new();

        let mut ctx = RunContext::new(&registry, &source, &store);
        ctx.materialize(registry.get("lookup").unwrap()).await.unwrap();
        ctx.materialize(registry.get("joined").unwrap()).await.unwrap();

        let state = store.load("joined").await.unwrap().unwrap();
        assert_eq!(state.rows.len(), 2);
        assert_eq!(state.rows[0]["lookup_rows"], json!(4));
        assert_eq!(state.offset("raw"), 2);
        assert!(!state.offsets.contains_key("lookup"));
    }

    #[tokio::test]
    async fn test_view_is_recomputed_and_never_stored() {
        let mut registry = DatasetRegistry::new();
        registry.register_external("raw").unwrap();
        registry
            .register(
                Dataset::view("evens", Transform::passthrough("raw"))
                    .reads("raw")
                    .expect(
                        "even",
                        Predicate::custom(|r| r["id"].as_i64().unwrap_or(1) % 2 == 0),
                        Policy::Drop,
                    ),
            )
            .unwrap();
        registry
            .register(Dataset::table("copy", Transform::passthrough("evens")).reads("evens"))
            .unwrap();

        let source = source_with(0..6).await;
        let store = MemoryStore::new();
        let mut ctx = RunContext::new(&registry, &source, &store);

        let view = ctx.materialize(registry.get("evens").unwrap()).await.unwrap();
        assert_eq!(view.rows_written, 0);
        assert_eq!(view.rows_dropped, 3);
        assert!(store.load("evens").await.unwrap().is_none());

        ctx.materialize(registry.get("copy").unwrap()).await.unwrap();
        let copy = store.load("copy").await.unwrap().unwrap();
        assert_eq!(ids(&copy.rows), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_failure_commits_nothing() {
        let mut registry = DatasetRegistry::new();
        registry.register_external("raw").unwrap();
        registry
            .register(
                Dataset::streaming_table("strict", Transform::passthrough("raw"))
                    .reads("raw")
                    .expect(
                        "small ids",
                        Predicate::compare("id", CompareOp::Lt, 2),
                        Policy::Fail,
                    ),
            )
            .unwrap();
        registry
            .register(
                Dataset::table(
                    "broken",
                    Transform::new(|_| Err(TransformError::new("division by zero"))),
                )
                .reads("raw"),
            )
            .unwrap();

        let source = source_with(0..3).await;
        let store = MemoryStore::new();
        let mut ctx = RunContext::new(&registry, &source, &store);

        let err = ctx
            .materialize(registry.get("strict").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LiveflowError::ConstraintViolation { violations: 1, .. }));
        assert!(store.load("strict").await.unwrap().is_none());

        let err = ctx
            .materialize(registry.get("broken").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LiveflowError::TransformFailed { .. }));
        assert!(store.load("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_table_replaces_snapshot() {
        let mut registry = DatasetRegistry::new();
        registry.register_external("raw").unwrap();
        registry
            .register(Dataset::table("all", Transform::passthrough("raw")).reads("raw"))
            .unwrap();

        let source = source_with(0..2).await;
        let store = MemoryStore::new();
        let all = registry.get("all").unwrap();

        RunContext::new(&registry, &source, &store)
            .materialize(all)
            .await
            .unwrap();
        source.append("raw", [row(json!({ "id": 2 }))]).await;
        let second = RunContext::new(&registry, &source, &store)
            .materialize(all)
            .await
            .unwrap();

        assert_eq!(second.rows_written, 3);
        let state = store.load("all").await.unwrap().unwrap();
        assert_eq!(ids(&state.rows), vec![0, 1, 2]);
        assert!(state.offsets.is_empty());
    }
}
