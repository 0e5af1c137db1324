//! In-memory provider.
//!
//! Assigns deterministic identities (`{kind}-{n:04}`), keeps the resources it
//! created in memory, records every call, and can be told to fail calls for a
//! given kind. Useful for tests and offline dry runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{AttributeValue, Attributes};
use crate::error::ProviderError;

use super::{ProviderResource, ProviderResult, ResourceProvider};

/// How calls for a kind should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Every call is rejected permanently.
    Permanent,
    /// The next `n` calls fail transiently, later calls succeed.
    Transient(u32),
    /// Every call fails transiently.
    AlwaysTransient,
}

/// Kind of provider operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    /// Operation invoked.
    pub op: CallKind,
    /// Resource kind.
    pub kind: String,
    /// Identity targeted by update/delete, or assigned by a successful create.
    pub identity: Option<String>,
    /// Whether the call succeeded.
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct Inner {
    counters: HashMap<String, u32>,
    resources: BTreeMap<String, (String, Attributes)>,
    failures: HashMap<String, FailureMode>,
    calls: Vec<ProviderCall>,
    in_flight: usize,
    max_in_flight: usize,
}

impl Inner {
    /// Consumes one injected failure for `kind`, if any.
    fn take_failure(&mut self, kind: &str) -> Option<ProviderError> {
        let mode = self.failures.get_mut(kind)?;
        match mode {
            FailureMode::Permanent => Some(ProviderError::permanent(format!("{kind} rejected"))),
            FailureMode::AlwaysTransient => Some(ProviderError::transient(format!("{kind} unavailable"))),
            FailureMode::Transient(0) => None,
            FailureMode::Transient(remaining) => {
                *remaining -= 1;
                Some(ProviderError::transient(format!("{kind} throttled")))
            }
        }
    }

    fn record(&mut self, op: CallKind, kind: &str, identity: Option<&str>, succeeded: bool) {
        self.calls.push(ProviderCall {
            op,
            kind: kind.to_string(),
            identity: identity.map(str::to_string),
            succeeded,
        });
    }
}

/// Provider that keeps resources in process memory.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
}

/// Outputs reported for a stored resource: its attributes plus `id` and `arn`.
fn outputs_for(kind: &str, identity: &str, attributes: &Attributes) -> Attributes {
    let mut outputs = attributes.clone();
    outputs.insert(String::from("id"), AttributeValue::from(identity));
    outputs.insert(
        String::from("arn"),
        AttributeValue::from(format!("arn:stratum:{kind}:{identity}")),
    );
    outputs
}

impl InMemoryProvider {
    /// Creates a provider with no injected failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes calls for `kind` fail according to `mode`.
    #[must_use]
    pub fn with_failure(mut self, kind: &str, mode: FailureMode) -> Self {
        self.inner.get_mut().failures.insert(kind.to_string(), mode);
        self
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Changes the failure mode for `kind`, or clears it with `None`.
    pub async fn set_failure(&self, kind: &str, mode: Option<FailureMode>) {
        let mut inner = self.inner.lock().await;
        match mode {
            Some(mode) => inner.failures.insert(kind.to_string(), mode),
            None => inner.failures.remove(kind),
        };
    }

    /// Every call made so far, in call order.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Number of calls of `op`, successful or not.
    pub async fn call_count(&self, op: CallKind) -> usize {
        self.inner.lock().await.calls.iter().filter(|c| c.op == op).count()
    }

    /// Number of calls made for `kind`.
    pub async fn calls_for_kind(&self, kind: &str) -> usize {
        self.inner.lock().await.calls.iter().filter(|c| c.kind == kind).count()
    }

    /// Identities of resources currently held by the provider.
    pub async fn identities(&self) -> Vec<String> {
        self.inner.lock().await.resources.keys().cloned().collect()
    }

    /// Highest number of calls that were in progress at the same time.
    pub async fn max_in_flight(&self) -> usize {
        self.inner.lock().await.max_in_flight
    }

    async fn enter(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ResourceProvider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, kind: &str, attributes: &Attributes) -> ProviderResult<ProviderResource> {
        self.enter().await;
        let mut inner = self.inner.lock().await;
        inner.in_flight -= 1;

        if let Some(err) = inner.take_failure(kind) {
            inner.record(CallKind::Create, kind, None, false);
            return Err(err);
        }

        let counter = inner.counters.entry(kind.to_string()).or_insert(0);
        *counter += 1;
        let identity = format!("{kind}-{:04}", *counter);

        inner
            .resources
            .insert(identity.clone(), (kind.to_string(), attributes.clone()));
        inner.record(CallKind::Create, kind, Some(&identity), true);

        Ok(ProviderResource {
            outputs: outputs_for(kind, &identity, attributes),
            identity,
        })
    }

    async fn update(
        &self,
        identity: &str,
        kind: &str,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderResource> {
        self.enter().await;
        let mut inner = self.inner.lock().await;
        inner.in_flight -= 1;

        if let Some(err) = inner.take_failure(kind) {
            inner.record(CallKind::Update, kind, Some(identity), false);
            return Err(err);
        }

        if !inner.resources.contains_key(identity) {
            inner.record(CallKind::Update, kind, Some(identity), false);
            return Err(ProviderError::NotFound {
                identity: identity.to_string(),
            });
        }
        inner
            .resources
            .insert(identity.to_string(), (kind.to_string(), attributes.clone()));
        inner.record(CallKind::Update, kind, Some(identity), true);

        Ok(ProviderResource {
            identity: identity.to_string(),
            outputs: outputs_for(kind, identity, attributes),
        })
    }

    async fn delete(&self, identity: &str, kind: &str) -> ProviderResult<()> {
        self.enter().await;
        let mut inner = self.inner.lock().await;
        inner.in_flight -= 1;

        if let Some(err) = inner.take_failure(kind) {
            inner.record(CallKind::Delete, kind, Some(identity), false);
            return Err(err);
        }

        let removed = inner.resources.remove(identity).is_some();
        inner.record(CallKind::Delete, kind, Some(identity), removed);
        if removed {
            Ok(())
        } else {
            Err(ProviderError::NotFound {
                identity: identity.to_string(),
            })
        }
    }
}
