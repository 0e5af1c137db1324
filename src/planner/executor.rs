//! Plan executor.
//!
//! A single coordinator dispatches ready actions onto a bounded pool of
//! worker tasks. An action starts only once all of its prerequisites have
//! succeeded; when an action fails, everything downstream of it is skipped
//! while independent branches keep going.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::{AttributeValue, Attributes, Reference};
use crate::error::{ModelError, ProviderError};
use crate::provider::{ProviderResource, ResourceProvider};
use crate::report::{NodeOutcome, NodeStatus};
use crate::state::{StateRecord, StateSession};

use super::plan::{ActionKind, Plan, PlannedAction};
use super::retry::RetryPolicy;
use super::scheduler::Schedule;

/// Final identity (if any) or a failure message, plus provider attempts made.
type Applied = (Result<Option<String>, String>, u32);

/// Executes scheduled plans against a provider.
pub struct PlanExecutor {
    provider: Arc<dyn ResourceProvider>,
    retry: RetryPolicy,
    max_concurrency: usize,
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl PlanExecutor {
    /// Creates an executor running at most `max_concurrency` actions at once.
    #[must_use]
    pub fn new(provider: Arc<dyn ResourceProvider>, retry: RetryPolicy, max_concurrency: usize) -> Self {
        Self {
            provider,
            retry,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Executes `plan` in `schedule` order, writing state through `session`.
    ///
    /// Returns one outcome per action, in the order the outcomes were
    /// settled.
    pub async fn execute(
        &self,
        plan: &Plan,
        schedule: &Schedule,
        session: &Arc<StateSession>,
        cancel: &CancellationToken,
    ) -> Vec<NodeOutcome> {
        info!(
            "Executing plan with {} actions (max concurrency {})",
            plan.actions.len(),
            self.max_concurrency
        );

        let actions: HashMap<&str, &PlannedAction> =
            plan.actions.iter().map(|a| (a.id.as_str(), a)).collect();
        let mut remaining: HashMap<&str, usize> = schedule
            .order
            .iter()
            .map(|id| (id.as_str(), schedule.prerequisite_count(id)))
            .collect();
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();

        let outcomes = Arc::new(Mutex::new(Vec::with_capacity(plan.actions.len())));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks: JoinSet<(String, bool)> = JoinSet::new();
        let mut in_flight: BTreeSet<String> = BTreeSet::new();
        let mut blocked: HashSet<&str> = HashSet::new();

        loop {
            while !cancel.is_cancelled() {
                let Some(&id) = ready.first() else { break };
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else { break };
                ready.remove(id);

                let Some(action) = actions.get(id) else { continue };
                let action = (*action).clone();
                let worker = Worker {
                    provider: Arc::clone(&self.provider),
                    retry: self.retry.clone(),
                    session: Arc::clone(session),
                    outcomes: Arc::clone(&outcomes),
                };

                debug!("Dispatching {} {id}", action.action);
                in_flight.insert(id.to_string());
                tasks.spawn(async move {
                    let _permit = permit;
                    let id = action.id.clone();
                    let succeeded = worker.run(action).await;
                    (id, succeeded)
                });
            }

            let Some(joined) = tasks.join_next().await else { break };
            match joined {
                Ok((id, true)) => {
                    in_flight.remove(&id);
                    for dependent in schedule.dependents_of(&id) {
                        if let Some(count) = remaining.get_mut(dependent) {
                            *count -= 1;
                            if *count == 0 {
                                ready.insert(dependent);
                            }
                        }
                    }
                }
                Ok((id, false)) => {
                    in_flight.remove(&id);
                    let skipped = skip_downstream(&id, schedule, &actions, &mut blocked);
                    if !skipped.is_empty() {
                        warn!("{id} failed, skipping {} dependent actions", skipped.len());
                        outcomes.lock().await.extend(skipped);
                    }
                }
                Err(e) => error!("Executor worker task failed: {e}"),
            }
        }

        let mut outcomes = std::mem::take(&mut *outcomes.lock().await);
        let settled: HashSet<String> = outcomes.iter().map(|o| o.id.clone()).collect();
        for action in plan.actions.iter().filter(|a| !settled.contains(&a.id)) {
            if in_flight.contains(&action.id) {
                outcomes.push(NodeOutcome {
                    status: NodeStatus::Failed,
                    ..NodeOutcome::skipped(
                        &action.id,
                        action.action,
                        &action.resource_kind,
                        "worker task aborted",
                    )
                });
            } else {
                let reason = if cancel.is_cancelled() {
                    "run cancelled"
                } else {
                    "prerequisite did not complete"
                };
                outcomes.push(NodeOutcome::skipped(&action.id, action.action, &action.resource_kind, reason));
            }
        }

        outcomes
    }
}

/// Marks every transitive dependent of `failed` as skipped.
fn skip_downstream<'a>(
    failed: &str,
    schedule: &'a Schedule,
    actions: &HashMap<&str, &PlannedAction>,
    blocked: &mut HashSet<&'a str>,
) -> Vec<NodeOutcome> {
    let mut pending: Vec<&str> = schedule.dependents_of(failed).collect();
    let mut skipped = Vec::new();

    while let Some(id) = pending.pop() {
        if !blocked.insert(id) {
            continue;
        }
        if let Some(action) = actions.get(id) {
            skipped.push(NodeOutcome::skipped(
                id,
                action.action,
                &action.resource_kind,
                format!("dependency {failed} failed"),
            ));
        }
        pending.extend(schedule.dependents_of(id));
    }

    skipped
}

/// Applies a single action; owned by one spawned task.
struct Worker {
    provider: Arc<dyn ResourceProvider>,
    retry: RetryPolicy,
    session: Arc<StateSession>,
    outcomes: Arc<Mutex<Vec<NodeOutcome>>>,
}

impl Worker {
    async fn run(self, action: PlannedAction) -> bool {
        let started = Instant::now();
        let (result, attempts) = self.apply(&action).await;

        let succeeded = result.is_ok();
        let (identity, error) = match result {
            Ok(identity) => (identity, None),
            Err(message) => (action.identity.clone(), Some(message)),
        };

        match &error {
            None => info!(node = %action.id, action = %action.action, attempts, "Applied resource"),
            Some(message) => error!(
                node = %action.id,
                action = %action.action,
                attempts,
                error = %message,
                "Resource action failed"
            ),
        }

        self.outcomes.lock().await.push(NodeOutcome {
            id: action.id,
            action: action.action,
            resource_kind: action.resource_kind,
            status: if succeeded { NodeStatus::Succeeded } else { NodeStatus::Failed },
            attempts,
            identity,
            error,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });

        succeeded
    }

    async fn apply(&self, action: &PlannedAction) -> Applied {
        match action.action {
            ActionKind::NoOp => (self.refresh(action).await, 0),
            ActionKind::Create => self.create(action).await,
            ActionKind::Update => self.update(action).await,
            ActionKind::Replace => self.replace(action).await,
            ActionKind::Delete => self.delete(action).await,
        }
    }

    /// Resolves references against the records written so far.
    async fn resolve(&self, action: &PlannedAction) -> Result<Attributes, String> {
        let records = self.session.load().await;
        let lookup = |reference: &Reference| -> Option<AttributeValue> {
            records
                .get(&reference.target)?
                .reference_value(reference.attribute.as_deref())
        };

        action
            .attributes
            .iter()
            .map(|(name, value)| {
                value.resolve(&lookup).map(|v| (name.clone(), v)).map_err(|reference| {
                    ModelError::UnresolvedReference {
                        node: action.id.clone(),
                        reference: reference.to_string(),
                    }
                    .to_string()
                })
            })
            .collect()
    }

    /// Writes the record for a successfully applied resource.
    async fn record(
        &self,
        action: &PlannedAction,
        resource: ProviderResource,
        resolved: Attributes,
    ) -> Result<Option<String>, String> {
        let record = StateRecord::new(
            &action.id,
            &action.resource_kind,
            &resource.identity,
            action.attributes.clone(),
            resource.outputs,
            action.dependencies.clone(),
        )
        .with_resolved(resolved);
        self.session
            .save(&action.id, record)
            .await
            .map_err(|e| format!("{} was applied as {} but state could not be saved: {e}", action.id, resource.identity))?;
        Ok(Some(resource.identity))
    }

    async fn refresh(&self, action: &PlannedAction) -> Result<Option<String>, String> {
        let Some(mut record) = self.session.record(&action.id).await else {
            return Ok(action.identity.clone());
        };

        if record.dependencies != action.dependencies {
            debug!("Refreshing recorded dependencies of {}", action.id);
            record.dependencies.clone_from(&action.dependencies);
            self.session
                .save(&action.id, record.clone())
                .await
                .map_err(|e| format!("Failed to refresh state of {}: {e}", action.id))?;
        }
        Ok(Some(record.identity))
    }

    async fn create(&self, action: &PlannedAction) -> Applied {
        let attributes = match self.resolve(action).await {
            Ok(attributes) => attributes,
            Err(message) => return (Err(message), 0),
        };

        let provider = self.provider.as_ref();
        let kind = action.resource_kind.as_str();
        let sent = &attributes;
        let (result, attempts) = self
            .retry
            .run(&action.id, move || provider.create(kind, sent))
            .await;

        match result {
            Ok(resource) => (self.record(action, resource, attributes).await, attempts),
            Err(e) => (Err(e.to_string()), attempts),
        }
    }

    async fn update(&self, action: &PlannedAction) -> Applied {
        let Some(identity) = action.identity.as_deref() else {
            return (Err(format!("{} has no recorded identity to update", action.id)), 0);
        };
        let attributes = match self.resolve(action).await {
            Ok(attributes) => attributes,
            Err(message) => return (Err(message), 0),
        };

        let provider = self.provider.as_ref();
        let kind = action.resource_kind.as_str();
        let sent = &attributes;
        let (result, attempts) = self
            .retry
            .run(&action.id, move || provider.update(identity, kind, sent))
            .await;

        match result {
            Ok(resource) => (self.record(action, resource, attributes).await, attempts),
            Err(e) => (Err(e.to_string()), attempts),
        }
    }

    async fn replace(&self, action: &PlannedAction) -> Applied {
        if let Err(message) = self.resolve(action).await {
            return (Err(message), 0);
        }

        let (removed, delete_attempts) = self.delete(action).await;
        if let Err(message) = removed {
            return (Err(message), delete_attempts);
        }

        let (created, create_attempts) = self.create(action).await;
        (created, delete_attempts + create_attempts)
    }

    /// Deletes the recorded resource, treating `NotFound` as already gone.
    async fn delete(&self, action: &PlannedAction) -> Applied {
        let mut attempts = 0;

        if let Some(identity) = action.identity.as_deref() {
            let provider = self.provider.as_ref();
            let kind = action.recorded_kind.as_deref().unwrap_or(&action.resource_kind);
            let (result, made) = self
                .retry
                .run(&action.id, move || provider.delete(identity, kind))
                .await;
            attempts = made;

            match result {
                Ok(()) => {}
                Err(ProviderError::NotFound { .. }) => {
                    debug!("{identity} was already gone");
                }
                Err(e) => return (Err(format!("Failed to delete {identity}: {e}")), attempts),
            }
        }

        if let Err(e) = self.session.remove(&action.id).await {
            return (Err(format!("Deleted {} but state could not be saved: {e}", action.id)), attempts);
        }
        (Ok(None), attempts)
    }
}
