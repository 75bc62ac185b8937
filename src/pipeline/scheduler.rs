// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Pipeline scheduler
//!
//! Runs every node of the dependency graph once, in topological order. A
//! node whose upstream failed or was skipped in the same run is skipped;
//! independent branches keep going.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::errors::{LiveflowError, LiveflowResult, RecoverySuggestion};
use crate::pipeline::dag::DagBuilder;
use crate::pipeline::dataset::DatasetKind;
use crate::pipeline::expectations::ExpectationReport;
use crate::pipeline::materializer::RunContext;
use crate::pipeline::registry::{DatasetRegistry, Node};
use crate::sources::SourceReader;
use crate::state::StateStore;

/// Pipeline run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only run these datasets (all when empty)
    pub datasets: Vec<String>,
    /// Only plan, run nothing
    pub dry_run: bool,
    /// Reset the state of the selected datasets first
    pub full_refresh: bool,
}

/// Status of one node after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Success,
    Failed,
    Skipped,
    /// Not started: the run was aborted or only planned
    Pending,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Success,
    Failed,
    Aborted,
    Planned,
}

/// Per-node entry of a [`RunResult`]
#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub name: String,
    /// `None` for external sources
    pub kind: Option<DatasetKind>,
    pub status: DatasetStatus,
    pub rows_processed: usize,
    pub rows_dropped: usize,
    pub rows_written: usize,
    /// Whether the committed state changed
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expectations: Vec<ExpectationReport>,
    pub duration: Duration,
    /// Next steps for a failure, when any apply
    #[serde(skip)]
    pub recovery: Option<RecoverySuggestion>,
}

impl DatasetReport {
    fn new(node: Node<'_>, status: DatasetStatus) -> Self {
        Self {
            name: node.name().to_string(),
            kind: match node {
                Node::Dataset(d) => Some(d.kind),
                Node::External(_) => None,
            },
            status,
            rows_processed: 0,
            rows_dropped: 0,
            rows_written: 0,
            changed: false,
            error: None,
            expectations: Vec::new(),
            duration: Duration::ZERO,
            recovery: None,
        }
    }

    /// Warn expectations that saw violations
    pub fn warnings(&self) -> impl Iterator<Item = &ExpectationReport> {
        self.expectations.iter().filter(|e| e.is_warning())
    }
}

/// Result of executing a pipeline
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: PipelineStatus,
    /// Reports in execution order
    pub datasets: Vec<DatasetReport>,
    pub duration: Duration,
}

impl RunResult {
    pub fn get(&self, name: &str) -> Option<&DatasetReport> {
        self.datasets.iter().find(|d| d.name == name)
    }

    pub fn status_of(&self, name: &str) -> Option<DatasetStatus> {
        self.get(name).map(|d| d.status)
    }

    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }

    fn outcome(datasets: &[DatasetReport]) -> PipelineStatus {
        if datasets.iter().any(|d| d.status == DatasetStatus::Pending) {
            PipelineStatus::Aborted
        } else if datasets
            .iter()
            .any(|d| matches!(d.status, DatasetStatus::Failed | DatasetStatus::Skipped))
        {
            PipelineStatus::Failed
        } else {
            PipelineStatus::Success
        }
    }
}

/// Cooperative abort flag, checked between dataset steps
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the current run stops before its next step
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Pipeline scheduler
pub struct PipelineScheduler {
    registry: DatasetRegistry,
    dag: DagBuilder,
    reader: Arc<dyn SourceReader>,
    store: Arc<dyn StateStore>,
    /// Held for a whole run
    run_lock: Mutex<()>,
    abort: AbortHandle,
}

impl PipelineScheduler {
    /// Build the dependency graph; graph errors surface here, before any run
    pub fn new(
        registry: DatasetRegistry,
        reader: Arc<dyn SourceReader>,
        store: Arc<dyn StateStore>,
    ) -> LiveflowResult<Self> {
        let dag = DagBuilder::build(&registry)?;
        Ok(Self {
            registry,
            dag,
            reader,
            store,
            run_lock: Mutex::new(()),
            abort: AbortHandle::new(),
        })
    }

    /// Use an externally created abort handle
    pub fn with_abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = handle;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub fn dag(&self) -> &DagBuilder {
        &self.dag
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Nodes a run with `options` would execute, in order
    pub fn plan(&self, options: &RunOptions) -> LiveflowResult<Vec<Node<'_>>> {
        for name in &options.datasets {
            self.registry.get(name)?;
        }

        if options.datasets.is_empty() {
            return self
                .dag
                .topological_order()
                .map(|name| self.node(name))
                .collect();
        }

        let mut plan = Vec::new();
        for name in self.dag.topological_order() {
            let node = self.node(name)?;
            let wanted = match node {
                Node::Dataset(d) => options.datasets.contains(&d.name),
                Node::External(source) => options.datasets.iter().any(|selected| {
                    self.registry
                        .get(selected)
                        .map_or(false, |d| d.upstreams.iter().any(|u| u == source))
                }),
            };
            if wanted {
                plan.push(node);
            }
        }
        Ok(plan)
    }

    fn node(&self, name: &str) -> LiveflowResult<Node<'_>> {
        if self.registry.is_external(name) {
            return self
                .registry
                .externals()
                .find(|e| *e == name)
                .map(Node::External)
                .ok_or_else(|| LiveflowError::UnknownDataset {
                    name: name.to_string(),
                });
        }
        self.registry.get(name).map(Node::Dataset)
    }

    /// Execute one pass over the pipeline
    pub async fn run(&self, options: &RunOptions) -> LiveflowResult<RunResult> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| LiveflowError::RunInProgress)?;
        let start = Instant::now();

        let plan = self.plan(options)?;

        if options.dry_run {
            return Ok(RunResult {
                status: PipelineStatus::Planned,
                datasets: plan
                    .into_iter()
                    .map(|n| DatasetReport::new(n, DatasetStatus::Pending))
                    .collect(),
                duration: start.elapsed(),
            });
        }

        tracing::info!(nodes = plan.len(), "run started");

        if options.full_refresh {
            for node in &plan {
                if let Node::Dataset(d) = node {
                    tracing::info!(dataset = %d.name, "resetting state");
                    self.store.reset(&d.name).await?;
                }
            }
        }

        let mut ctx = RunContext::new(&self.registry, self.reader.as_ref(), self.store.as_ref());
        let mut statuses: HashMap<&str, DatasetStatus> = HashMap::new();
        let mut reports = Vec::with_capacity(plan.len());

        for node in plan.iter().copied() {
            if self.abort.is_aborted() {
                reports.push(DatasetReport::new(node, DatasetStatus::Pending));
                continue;
            }

            let blocked = node.upstreams().iter().find(|u| {
                matches!(
                    statuses.get(u.as_str()),
                    Some(DatasetStatus::Failed | DatasetStatus::Skipped)
                )
            });

            let report = match blocked {
                Some(upstream) => {
                    tracing::info!(
                        dataset = %node.name(),
                        upstream = %upstream,
                        "skipping, upstream did not succeed"
                    );
                    let mut report = DatasetReport::new(node, DatasetStatus::Skipped);
                    report.error = Some(format!("upstream '{}' did not succeed", upstream));
                    report
                }
                None => self.step(&mut ctx, node).await,
            };

            statuses.insert(node.name(), report.status);
            reports.push(report);
        }

        if self.abort.is_aborted() {
            tracing::warn!("run aborted");
            self.abort.reset();
        }

        let result = RunResult {
            status: RunResult::outcome(&reports),
            datasets: reports,
            duration: start.elapsed(),
        };

        tracing::info!(
            status = ?result.status,
            duration_ms = result.duration.as_millis() as u64,
            "run finished"
        );

        Ok(result)
    }

    async fn step<'a>(&'a self, ctx: &mut RunContext<'a>, node: Node<'a>) -> DatasetReport {
        let start = Instant::now();
        let mut report = DatasetReport::new(node, DatasetStatus::Success);

        let outcome = match node {
            Node::External(source) => ctx.check_source(source).await,
            Node::Dataset(dataset) => ctx.materialize(dataset).await.map(|m| {
                report.rows_processed = m.rows_processed;
                report.rows_dropped = m.rows_dropped;
                report.rows_written = m.rows_written;
                report.changed = m.changed;
                report.expectations = m.expectations;
            }),
        };

        if let Err(e) = outcome {
            if let Node::External(source) = node {
                tracing::warn!(source = %source, error = %e, "external source unavailable");
            }
            report.status = DatasetStatus::Failed;
            report.error = Some(e.to_string());
            report.recovery = e.recovery();
        }

        report.duration = start.elapsed();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dataset::{Dataset, Row, Transform};
    use crate::pipeline::expectations::{Policy, Predicate};
    use crate::pipeline::transform::TransformSpec;
    use crate::sources::MemorySource;
    use crate::state::MemoryStore;
    use serde_json::json;

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn orders(n: i64, failing: &[i64]) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let order_number = if failing.contains(&i) {
                    json!(null)
                } else {
                    json!(format!("SO-{}", i))
                };
                row(json!({ "id": i, "city": "Chicago", "quantity": 2, "order_number": order_number }))
            })
            .collect()
    }

    fn valid_order() -> Predicate {
        Predicate::not_null("order_number")
    }

    fn city_rollup() -> Transform {
        serde_yaml::from_str::<TransformSpec>(
            "from: b\nsteps:\n  - aggregate: { group_by: [city], sum: { total: quantity }, count: orders }\n",
        )
        .unwrap()
        .compile()
        .unwrap()
    }

    async fn scheduler(registry: DatasetRegistry, source: Arc<MemorySource>) -> PipelineScheduler {
        PipelineScheduler::new(registry, source, Arc::new(MemoryStore::new())).unwrap()
    }

    /// A(external) → B(filter, drop) → C(aggregate); D depends on B; E on A only
    fn scenario(b_policy: Policy) -> DatasetRegistry {
        let mut registry = DatasetRegistry::new();
        registry.register_external("a").unwrap();
        registry
            .register(
                Dataset::streaming_table("b", Transform::passthrough("a"))
                    .reads("a")
                    .expect("valid order_number", valid_order(), b_policy),
            )
            .unwrap();
        registry
            .register(Dataset::table("c", city_rollup()).reads("b"))
            .unwrap();
        registry
            .register(Dataset::table("d", Transform::passthrough("b")).reads("b"))
            .unwrap();
        registry
            .register(Dataset::table("e", Transform::passthrough("a")).reads("a"))
            .unwrap();
        registry
    }

    async fn source(rows: Vec<Row>) -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        source.append("a", rows).await;
        source
    }

    #[tokio::test]
    async fn test_filter_then_aggregate_scenario() {
        let scheduler = scheduler(scenario(Policy::Drop), source(orders(5, &[1, 3])).await).await;
        let result = scheduler.run(&RunOptions::default()).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Success);
        let b = result.get("b").unwrap();
        assert_eq!(b.rows_written, 3);
        assert_eq!(b.rows_dropped, 2);
        assert_eq!(b.expectations[0].failed, 2);

        let c = scheduler.store().load("c").await.unwrap().unwrap();
        assert_eq!(c.rows.len(), 1);
        assert_eq!(c.rows[0]["orders"], json!(3));
        assert_eq!(c.rows[0]["total"], json!(6));

        for name in ["a", "b", "c", "d", "e"] {
            assert_eq!(result.status_of(name), Some(DatasetStatus::Success), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_reports_follow_topological_order() {
        let scheduler = scheduler(scenario(Policy::Drop), source(orders(2, &[])).await).await;
        let result = scheduler.run(&RunOptions::default()).await.unwrap();

        let names: Vec<_> = result.datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(result.get("a").unwrap().kind, None);
    }

    #[tokio::test]
    async fn test_drop_policy_ten_rows_three_violating() {
        let scheduler = scheduler(scenario(Policy::Drop), source(orders(10, &[0, 4, 9])).await).await;
        let result = scheduler.run(&RunOptions::default()).await.unwrap();

        let b = result.get("b").unwrap();
        assert_eq!(b.rows_processed, 10);
        assert_eq!(b.rows_dropped, 3);
        assert_eq!(b.rows_written, 7);
        assert_eq!(scheduler.store().load("b").await.unwrap().unwrap().rows.len(), 7);
    }

    #[tokio::test]
    async fn test_fail_policy_isolates_failure() {
        let scheduler = scheduler(scenario(Policy::Fail), source(orders(4, &[2])).await).await;
        let result = scheduler.run(&RunOptions::default()).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(result.status_of("b"), Some(DatasetStatus::Failed));
        assert_eq!(result.status_of("c"), Some(DatasetStatus::Skipped));
        assert_eq!(result.status_of("d"), Some(DatasetStatus::Skipped));
        assert_eq!(result.status_of("e"), Some(DatasetStatus::Success));
        assert!(result.get("b").unwrap().error.as_deref().unwrap().contains("valid order_number"));

        assert!(scheduler.store().load("b").await.unwrap().is_none());
        assert_eq!(scheduler.store().load("e").await.unwrap().unwrap().rows.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_report_carries_recovery() {
        let scheduler = scheduler(scenario(Policy::Fail), source(orders(3, &[0])).await).await;
        let result = scheduler.run(&RunOptions::default()).await.unwrap();

        let recovery = result.get("b").unwrap().recovery.clone().unwrap();
        assert!(recovery.action.contains("valid order_number"));
        assert!(recovery.commands.iter().any(|c| c.contains("--dataset b")));
        assert!(result.get("c").unwrap().recovery.is_none());
        assert!(result.get("e").unwrap().recovery.is_none());
    }

    #[tokio::test]
    async fn test_second_run_without_new_data_is_idempotent() {
        let scheduler = scheduler(scenario(Policy::Drop), source(orders(5, &[1])).await).await;
        scheduler.run(&RunOptions::default()).await.unwrap();

        let before = scheduler.store().load("b").await.unwrap().unwrap();
        let c_before = scheduler.store().load("c").await.unwrap().unwrap();

        let result = scheduler.run(&RunOptions::default()).await.unwrap();
        assert!(result.is_success());

        let after = scheduler.store().load("b").await.unwrap().unwrap();
        let c_after = scheduler.store().load("c").await.unwrap().unwrap();

        assert_eq!(before.offsets, after.offsets);
        assert_eq!(before.fingerprint, after.fingerprint);
        assert_eq!(before.version, after.version);
        assert_eq!(c_before.rows, c_after.rows);
        assert!(!result.get("b").unwrap().changed);
        assert!(!result.get("c").unwrap().changed);
    }

    #[tokio::test]
    async fn test_warn_firings_are_reported_without_failing() {
        let scheduler = scheduler(scenario(Policy::Warn), source(orders(3, &[0])).await).await;
        let result = scheduler.run(&RunOptions::default()).await.unwrap();

        assert!(result.is_success());
        let b = result.get("b").unwrap();
        assert_eq!(b.rows_written, 3);
        assert_eq!(b.warnings().count(), 1);
        assert_eq!(result.get("e").unwrap().warnings().count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_source_skips_dependents() {
        let scheduler = scheduler(scenario(Policy::Drop), Arc::new(MemorySource::new())).await;
        let result = scheduler.run(&RunOptions::default()).await.unwrap();

        assert_eq!(result.status_of("a"), Some(DatasetStatus::Failed));
        for name in ["b", "c", "d", "e"] {
            assert_eq!(result.status_of(name), Some(DatasetStatus::Skipped));
        }
    }

    #[tokio::test]
    async fn test_concurrent_run_fails_fast() {
        let scheduler = scheduler(scenario(Policy::Drop), source(orders(1, &[])).await).await;
        let _held = scheduler.run_lock.try_lock().unwrap();

        let err = scheduler.run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, LiveflowError::RunInProgress));
    }

    #[tokio::test]
    async fn test_abort_leaves_remaining_datasets_pending() {
        let handle = AbortHandle::new();
        let trigger = handle.clone();

        let mut registry = DatasetRegistry::new();
        registry.register_external("a").unwrap();
        registry
            .register(
                Dataset::table(
                    "first",
                    Transform::new(move |inputs| {
                        trigger.abort();
                        Ok(inputs["a"].clone())
                    }),
                )
                .reads("a"),
            )
            .unwrap();
        registry
            .register(Dataset::table("second", Transform::passthrough("first")).reads("first"))
            .unwrap();

        let scheduler = scheduler(registry, source(orders(2, &[])).await)
            .await
            .with_abort_handle(handle.clone());
        let result = scheduler.run(&RunOptions::default()).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Aborted);
        assert_eq!(result.status_of("first"), Some(DatasetStatus::Success));
        assert_eq!(result.status_of("second"), Some(DatasetStatus::Pending));
        assert!(scheduler.store().load("first").await.unwrap().is_some());
        assert!(!handle.is_aborted());
    }

    #[tokio::test]
    async fn test_subset_reads_committed_upstream_state() {
        let src = source(orders(3, &[])).await;
        let scheduler = scheduler(scenario(Policy::Drop), src.clone()).await;
        scheduler.run(&RunOptions::default()).await.unwrap();

        src.append("a", orders(2, &[])).await;
        let options = RunOptions {
            datasets: vec!["d".into()],
            ..Default::default()
        };
        let result = scheduler.run(&options).await.unwrap();

        let names: Vec<_> = result.datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["d"]);
        assert_eq!(scheduler.store().load("d").await.unwrap().unwrap().rows.len(), 3);

        let unknown = RunOptions {
            datasets: vec!["nope".into()],
            ..Default::default()
        };
        assert!(matches!(
            scheduler.run(&unknown).await,
            Err(LiveflowError::UnknownDataset { .. })
        ));
    }

    #[tokio::test]
    async fn test_full_refresh_and_dry_run() {
        let scheduler = scheduler(scenario(Policy::Drop), source(orders(3, &[])).await).await;
        scheduler.run(&RunOptions::default()).await.unwrap();

        let planned = scheduler
            .run(&RunOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(planned.status, PipelineStatus::Planned);
        assert!(planned.datasets.iter().all(|d| d.status == DatasetStatus::Pending));

        let refreshed = scheduler
            .run(&RunOptions {
                datasets: vec!["b".into()],
                full_refresh: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(refreshed.get("b").unwrap().rows_written, 3);
        assert_eq!(refreshed.status_of("a"), Some(DatasetStatus::Success));

        let state = scheduler.store().load("b").await.unwrap().unwrap();
        assert_eq!(state.rows.len(), 3);
        assert_eq!(state.version, 1);
    }

    #[test]
    fn test_graph_errors_surface_before_running() {
        let mut registry = DatasetRegistry::new();
        registry
            .register(Dataset::table("x", Transform::passthrough("y")).reads("y"))
            .unwrap();
        registry
            .register(Dataset::table("y", Transform::passthrough("x")).reads("x"))
            .unwrap();

        let err = PipelineScheduler::new(
            registry,
            Arc::new(MemorySource::new()),
            Arc::new(MemoryStore::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, LiveflowError::CyclicDependency { .. }));
    }
}
