//! Reconciliation loop.
//!
//! One run locks the stack's state, builds the resource graph, diffs it
//! against the records, schedules and executes the plan, appends a history
//! entry, and releases the lock. Whatever happens along the way is returned
//! as a [`RunReport`]; the run itself never fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::{AttributeHasher, ResourceModel, SchemaRegistry, StackConfig};
use crate::error::{ReconcileError, Result, StateError, StratumError};
use crate::graph::GraphBuilder;
use crate::planner::{DiffEngine, Plan, PlanExecutor, PlanScheduler, RetryPolicy, Schedule};
use crate::provider::ResourceProvider;
use crate::report::{NodeStatus, RunReport};
use crate::state::{generate_holder_id, RunHistoryEntry, StateSession, StateStore};

/// Default number of actions executed at once.
const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Drives a stack towards its declared model.
pub struct Reconciler {
    store: Arc<dyn StateStore>,
    provider: Arc<dyn ResourceProvider>,
    schemas: SchemaRegistry,
    stack: String,
    holder: String,
    retry: RetryPolicy,
    max_concurrency: usize,
    hasher: AttributeHasher,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("stack", &self.stack)
            .field("backend", &self.store.backend_type())
            .field("provider", &self.provider.name())
            .field("holder", &self.holder)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler for `stack` with default execution settings.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        provider: Arc<dyn ResourceProvider>,
        schemas: SchemaRegistry,
        stack: &str,
    ) -> Self {
        Self {
            store,
            provider,
            schemas,
            stack: stack.to_string(),
            holder: generate_holder_id(),
            retry: RetryPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            hasher: AttributeHasher::new(),
        }
    }

    /// Creates a reconciler from a loaded stack configuration.
    #[must_use]
    pub fn from_config(
        config: &StackConfig,
        store: Arc<dyn StateStore>,
        provider: Arc<dyn ResourceProvider>,
    ) -> Self {
        Self::new(
            store,
            provider,
            SchemaRegistry::from_kinds(&config.kinds),
            &config.qualified_name(),
        )
        .with_retry_policy(RetryPolicy::from_config(&config.execution.retry))
        .with_max_concurrency(config.execution.max_concurrency)
    }

    /// Sets the retry policy for provider calls.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the maximum number of concurrent actions.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Sets the lock holder name.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Qualified stack name.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Reconciles the stack with `model`.
    ///
    /// Model, lock, and scheduling errors stop the run before any provider
    /// call and yield a failed report carrying the error.
    pub async fn reconcile(&self, model: &ResourceModel, cancel: &CancellationToken) -> RunReport {
        let report = RunReport::start(&self.stack);
        info!("Starting reconciliation of {} ({} resources)", self.stack, model.len());

        if cancel.is_cancelled() {
            return report.fail(StratumError::from(ReconcileError::Cancelled));
        }

        let session = match StateSession::open(Arc::clone(&self.store), &self.stack, &self.holder).await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                error!("Cannot open state for {}: {e}", self.stack);
                return report.fail(e);
            }
        };

        let report = self.run_locked(model, &session, cancel, report).await;

        if let Err(e) = session.add_history(history_entry(&report)).await {
            warn!("Failed to record run history: {e}");
        }
        if let Err(e) = session.release().await {
            warn!("Failed to release state lock: {e}");
        }

        info!(
            "Reconciliation of {} finished: {} ({} succeeded, {} failed, {} skipped)",
            self.stack,
            report.status,
            report.count(NodeStatus::Succeeded),
            report.count(NodeStatus::Failed),
            report.count(NodeStatus::Skipped)
        );
        report
    }

    async fn run_locked(
        &self,
        model: &ResourceModel,
        session: &Arc<StateSession>,
        cancel: &CancellationToken,
        mut report: RunReport,
    ) -> RunReport {
        let model_hash = self.hasher.hash_model(model);
        report.model_hash = Some(model_hash.clone());

        let graph = match GraphBuilder::new(&self.schemas).build(model) {
            Ok(graph) => graph,
            Err(e) => {
                error!("Invalid model: {e}");
                return report.fail(StratumError::from(e));
            }
        };

        let records = session.load().await;
        let plan = DiffEngine::new(&self.schemas).compute(&graph, &records, &self.stack, &model_hash);
        report.plan = Some(plan.summary());

        let schedule = match PlanScheduler::new().schedule(&plan) {
            Ok(schedule) => schedule,
            Err(e) => {
                error!("Cannot schedule plan: {e}");
                return report.fail(StratumError::from(e));
            }
        };

        info!("Plan for {}: {}", self.stack, plan.summary());

        let executor = PlanExecutor::new(Arc::clone(&self.provider), self.retry.clone(), self.max_concurrency);
        report.outcomes = executor.execute(&plan, &schedule, session, cancel).await;
        report.finish()
    }

    /// Computes the plan and schedule for `model` without locking or calling
    /// the provider.
    ///
    /// # Errors
    ///
    /// Returns model, state, or scheduling errors.
    pub async fn plan(&self, model: &ResourceModel) -> Result<(Plan, Schedule)> {
        let graph = GraphBuilder::new(&self.schemas).build(model)?;

        let records = match self.store.load().await? {
            Some(document) if document.stack != self.stack => {
                return Err(StateError::StackMismatch {
                    expected: self.stack.clone(),
                    found: document.stack,
                }
                .into());
            }
            Some(document) => document.records,
            None => BTreeMap::new(),
        };

        let model_hash = self.hasher.hash_model(model);
        let plan = DiffEngine::new(&self.schemas).compute(&graph, &records, &self.stack, &model_hash);
        let schedule = PlanScheduler::new().schedule(&plan)?;
        Ok((plan, schedule))
    }
}

fn history_entry(report: &RunReport) -> RunHistoryEntry {
    RunHistoryEntry {
        run_id: report.run_id.clone(),
        timestamp: report.finished_at,
        model_hash: report.model_hash.clone().unwrap_or_default(),
        status: report.status,
        succeeded: report.count(NodeStatus::Succeeded),
        failed: report.count(NodeStatus::Failed),
        skipped: report.count(NodeStatus::Skipped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeSchema, AttributeType, KindSchema, ResourceDecl};
    use crate::planner::ActionKind;
    use crate::provider::{CallKind, FailureMode, InMemoryProvider};
    use crate::report::RunStatus;
    use crate::state::{MemoryStateStore, StateDocument};
    use std::time::Duration;

    const STACK: &str = "lake/dev";

    fn schemas() -> SchemaRegistry {
        SchemaRegistry::new()
            .with_kind("k1", KindSchema::new())
            .with_kind(
                "k2",
                KindSchema::new().attribute("source", AttributeSchema::new(AttributeType::String)),
            )
            .with_kind("broken", KindSchema::new())
    }

    fn reconciler(store: &Arc<MemoryStateStore>, provider: &Arc<InMemoryProvider>) -> Reconciler {
        let store: Arc<dyn StateStore> = store.clone();
        let provider: Arc<dyn ResourceProvider> = provider.clone();
        Reconciler::new(store, provider, schemas(), STACK)
            .with_retry_policy(RetryPolicy::new(3, Duration::ZERO, Duration::ZERO))
            .with_holder("test")
    }

    fn model(entries: Vec<(&str, ResourceDecl)>) -> ResourceModel {
        entries.into_iter().map(|(id, d)| (id.to_string(), d)).collect()
    }

    fn xy_model() -> ResourceModel {
        model(vec![
            ("x", ResourceDecl::new("k1")),
            ("y", ResourceDecl::new("k2").depends_on("x")),
        ])
    }

    #[tokio::test]
    async fn test_first_run_creates_then_second_is_noop() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(InMemoryProvider::new());
        let reconciler = reconciler(&store, &provider);
        let model = xy_model();

        let (plan, _) = reconciler.plan(&model).await.expect("plan");
        assert_eq!(plan.steps(), vec![("x", ActionKind::Create), ("y", ActionKind::Create)]);

        let first = reconciler.reconcile(&model, &CancellationToken::new()).await;
        assert_eq!(first.status, RunStatus::Clean);
        assert_eq!(provider.call_count(CallKind::Create).await, 2);

        let (plan, _) = reconciler.plan(&model).await.expect("plan");
        assert_eq!(plan.steps(), vec![("x", ActionKind::NoOp), ("y", ActionKind::NoOp)]);

        let second = reconciler.reconcile(&model, &CancellationToken::new()).await;
        assert_eq!(second.status, RunStatus::Clean);
        assert!(second.outcomes.iter().all(|o| o.action == ActionKind::NoOp));
        assert_eq!(provider.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_create_order_follows_dependencies() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(InMemoryProvider::new());
        let reconciler = reconciler(&store, &provider).with_max_concurrency(8);

        reconciler.reconcile(&xy_model(), &CancellationToken::new()).await;

        let kinds: Vec<String> = provider.calls().await.into_iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_removed_resources_are_deleted_dependents_first() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(InMemoryProvider::new());
        let reconciler = reconciler(&store, &provider).with_max_concurrency(8);

        let model = model(vec![
            ("x", ResourceDecl::new("k1")),
            ("y", ResourceDecl::new("k2").with_attribute("source", "${x}")),
        ]);
        reconciler.reconcile(&model, &CancellationToken::new()).await;

        let report = reconciler.reconcile(&ResourceModel::new(), &CancellationToken::new()).await;
        assert_eq!(report.status, RunStatus::Clean);

        let deletes: Vec<String> = provider
            .calls()
            .await
            .into_iter()
            .filter(|c| c.op == CallKind::Delete)
            .filter_map(|c| c.identity)
            .collect();
        assert_eq!(deletes, vec!["k2-0001", "k1-0001"]);
        assert!(store.snapshot().await.is_some_and(|doc| doc.records.is_empty()));
    }

    #[tokio::test]
    async fn test_failure_yields_partial_report() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(InMemoryProvider::new().with_failure("broken", FailureMode::Permanent));
        let reconciler = reconciler(&store, &provider);

        let model = model(vec![
            ("a", ResourceDecl::new("broken")),
            ("b", ResourceDecl::new("k1").depends_on("a")),
            ("c", ResourceDecl::new("k1")),
        ]);
        let report = reconciler.reconcile(&model, &CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.status.exit_code(), 1);
        assert_eq!(report.outcome("a").map(|o| o.status), Some(NodeStatus::Failed));
        assert_eq!(report.outcome("b").map(|o| o.status), Some(NodeStatus::Skipped));
        assert_eq!(report.outcome("c").map(|o| o.status), Some(NodeStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_model_error_fails_before_provider_calls() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(InMemoryProvider::new());
        let reconciler = reconciler(&store, &provider);

        let cyclic = model(vec![
            ("a", ResourceDecl::new("k1").depends_on("b")),
            ("b", ResourceDecl::new("k1").depends_on("a")),
        ]);
        let report = reconciler.reconcile(&cyclic, &CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.as_deref().is_some_and(|e| e.contains("a -> b -> a")));
        assert!(provider.calls().await.is_empty());
        assert!(!store.is_locked().await.expect("is_locked"));
    }

    #[tokio::test]
    async fn test_locked_stack_is_reported() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(InMemoryProvider::new());
        let _other = store.acquire_lock("someone-else").await.expect("lock");

        let report = reconciler(&store, &provider)
            .reconcile(&xy_model(), &CancellationToken::new())
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.as_deref().is_some_and(|e| e.contains("someone-else")));
        assert!(provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_recorded() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(InMemoryProvider::new());
        let reconciler = reconciler(&store, &provider);

        let report = reconciler.reconcile(&xy_model(), &CancellationToken::new()).await;

        let document = store.snapshot().await.expect("document");
        assert_eq!(document.history.len(), 1);
        assert_eq!(document.history[0].run_id, report.run_id);
        assert_eq!(document.history[0].succeeded, 2);
    }

    #[tokio::test]
    async fn test_plan_rejects_foreign_state() {
        let store = Arc::new(MemoryStateStore::with_document(StateDocument::new("other/prod")));
        let provider = Arc::new(InMemoryProvider::new());

        let err = reconciler(&store, &provider).plan(&xy_model()).await.expect_err("mismatch");
        assert!(matches!(err, StratumError::State(StateError::StackMismatch { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(InMemoryProvider::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = reconciler(&store, &provider).reconcile(&xy_model(), &cancel).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert!(!store.exists().await.expect("exists"));
    }
}
