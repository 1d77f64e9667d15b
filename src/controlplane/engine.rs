//! Reconciliation Engine
//!
//! Drives Create/Read/Update/Delete/List for a single resource kind against
//! a remote client, waiting on work requests and lifecycle transitions
//! through the [`Poller`].

use crate::controlplane::lifecycle::{PhaseTracker, ResourcePhase};
use crate::controlplane::metrics::EngineMetrics;
use crate::controlplane::planner::{plan, Plan};
use crate::controlplane::poller::{PollSettings, Poller, Probe};
use crate::domain::ports::{
    ListScope, RawResource, RemoteClientRef, RequestVerb, StateProjectorRef,
};
use crate::domain::schema::ResourceSchema;
use crate::domain::state::{
    DesiredState, ObservedState, ResourceId, TerminalStatus, WorkRequestHandle,
};
use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a resource engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Poll loop used for work requests, settling and deletion
    pub poll: PollSettings,
    /// Wait for the lifecycle to leave transitional states after a mutation
    pub wait_for_settled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            wait_for_settled: true,
        }
    }
}

// =============================================================================
// Listing
// =============================================================================

/// Client-side filter over flattened observed attributes
#[derive(Debug, Clone)]
pub struct AttributeFilter {
    name: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(Vec<String>),
    Glob(Vec<glob::Pattern>),
}

impl AttributeFilter {
    /// Keep resources whose attribute equals one of `values`
    pub fn exact<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            matcher: Matcher::Exact(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Keep resources whose attribute matches one of the glob `patterns`
    pub fn glob<I, S>(name: impl Into<String>, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        let compiled = patterns
            .into_iter()
            .map(|p| {
                glob::Pattern::new(p.as_ref()).map_err(|e| {
                    Error::Configuration(format!(
                        "invalid filter pattern '{}' for {}: {}",
                        p.as_ref(),
                        name,
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            matcher: Matcher::Glob(compiled),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, observed: &ObservedState) -> bool {
        let flat = observed.flatten();
        let Some(actual) = flat.get(&self.name) else {
            return false;
        };
        match &self.matcher {
            Matcher::Exact(values) => values.iter().any(|v| v == actual),
            Matcher::Glob(patterns) => patterns.iter().any(|p| p.matches(actual)),
        }
    }
}

/// Lazily paged listing of observed resources
///
/// Pages are fetched as the stream is consumed. A listing is not
/// restartable; list again to start over from the first page.
pub struct Listing {
    id: String,
    items: BoxStream<'static, Result<ObservedState>>,
}

impl Listing {
    /// Snapshot identifier, distinct for every listing
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Drain every page
    pub async fn collect_all(self) -> Result<Vec<ObservedState>> {
        self.items.try_collect().await
    }
}

impl Stream for Listing {
    type Item = Result<ObservedState>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.items.poll_next_unpin(cx)
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

// =============================================================================
// Resource Engine
// =============================================================================

/// Reconciles resources of one kind against the remote
pub struct ResourceEngine {
    projector: StateProjectorRef,
    remote: RemoteClientRef,
    config: EngineConfig,
    metrics: Option<EngineMetrics>,
}

impl ResourceEngine {
    pub fn new(projector: StateProjectorRef, remote: RemoteClientRef, config: EngineConfig) -> Self {
        Self {
            projector,
            remote,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn schema(&self) -> &ResourceSchema {
        self.projector.schema()
    }

    pub fn kind(&self) -> &str {
        self.projector.kind()
    }

    fn collection(&self) -> &str {
        self.schema().collection()
    }

    fn operation(&self, verb: &str) -> String {
        format!("{} {}", verb, self.kind())
    }

    fn poller(&self, cancel: &CancellationToken) -> Poller {
        Poller::new(self.config.poll, cancel.clone())
    }

    fn record<T>(&self, verb: &str, started: Instant, poller: Option<&Poller>, result: &Result<T>) {
        if let Some(metrics) = &self.metrics {
            metrics.observe(self.kind(), verb, result.is_ok(), started.elapsed());
            if let Some(poller) = poller {
                metrics.record_polls(self.kind(), poller.polls());
            }
        }
        if let Err(e) = result {
            match e.resource_id() {
                Some(id) => error!(
                    kind = %self.kind(),
                    verb,
                    id = %id,
                    action = ?e.action(),
                    "Operation failed after remote object was created: {}",
                    e
                ),
                None => warn!(kind = %self.kind(), verb, "Operation failed: {}", e),
            }
        }
    }

    fn cancelled(&self, verb: &str, id: Option<&ResourceId>) -> Error {
        Error::OperationCancelled {
            operation: self.operation(verb),
            resource_id: id.cloned(),
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a resource and wait until it is usable
    ///
    /// If the remote object exists but a later step fails, the returned
    /// error carries its identity (see [`Error::resource_id`]).
    pub async fn create(
        &self,
        desired: &DesiredState,
        cancel: &CancellationToken,
    ) -> Result<ResourceId> {
        let started = Instant::now();
        let poller = self.poller(cancel);
        let result = self.create_inner(desired, cancel, &poller).await;
        self.record("create", started, Some(&poller), &result);
        result
    }

    async fn create_inner(
        &self,
        desired: &DesiredState,
        cancel: &CancellationToken,
        poller: &Poller,
    ) -> Result<ResourceId> {
        if cancel.is_cancelled() {
            return Err(self.cancelled("create", None));
        }

        let mut phase = PhaseTracker::new(self.kind(), ResourcePhase::Absent);
        let desired = self.schema().conform(desired)?;
        let request = self.projector.to_request(&desired, RequestVerb::Create)?;

        phase.advance(ResourcePhase::Creating)?;
        info!(kind = %self.kind(), "Creating resource");

        let response = match self.remote.create(self.collection(), request).await {
            Ok(response) => response,
            Err(e) => {
                phase.fail()?;
                // no resource exists yet, so a 404 here cannot mean "absent"
                return Err(match e {
                    Error::NotFound { .. } => Error::RemoteRejected {
                        status: 404,
                        code: "NotFound".to_string(),
                        message: e.to_string(),
                    },
                    other => other,
                });
            }
        };

        let mut id = response
            .resource
            .as_ref()
            .map(|raw| self.projector.identity(raw))
            .transpose()?;

        match self
            .await_creation(&mut id, response.work_request, poller)
            .await
        {
            Ok(created) => {
                phase.advance(ResourcePhase::Available)?;
                info!(kind = %self.kind(), id = %created, "Created resource");
                Ok(created)
            }
            Err(e) => {
                phase.fail()?;
                Err(e.with_resource_id(id))
            }
        }
    }

    async fn await_creation(
        &self,
        id: &mut Option<ResourceId>,
        work_request: Option<WorkRequestHandle>,
        poller: &Poller,
    ) -> Result<ResourceId> {
        if let Some(handle) = work_request {
            debug!(kind = %self.kind(), work_request = %handle, "Awaiting create work request");
            let status = match poller
                .await_work_request(self.remote.as_ref(), &handle)
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    if id.is_none() {
                        *id = e.resource_id().cloned();
                    }
                    return Err(e);
                }
            };
            match status {
                TerminalStatus::Succeeded { resource_id } => {
                    if id.is_none() {
                        *id = resource_id;
                    }
                }
                TerminalStatus::Failed {
                    reason,
                    resource_id,
                } => {
                    if id.is_none() {
                        *id = resource_id;
                    }
                    return Err(Error::OperationFailed {
                        operation: self.operation("create"),
                        reason,
                        resource_id: None,
                    });
                }
            }
        }

        let created = id.clone().ok_or_else(|| {
            Error::Internal(format!(
                "remote reported no identity for created {}",
                self.kind()
            ))
        })?;

        self.await_settled(&created, "create", poller, true).await?;
        Ok(created)
    }

    /// Wait for the lifecycle to leave transitional states
    async fn await_settled(
        &self,
        id: &ResourceId,
        verb: &str,
        poller: &Poller,
        tolerate_missing: bool,
    ) -> Result<ObservedState> {
        if !self.config.wait_for_settled {
            return self.read(id).await?.ok_or_else(|| self.not_found(id));
        }
        let operation = self.operation(verb);
        poller
            .await_condition(&operation, || {
                self.probe_settled(id, &operation, tolerate_missing)
            })
            .await
    }

    async fn probe_settled(
        &self,
        id: &ResourceId,
        operation: &str,
        tolerate_missing: bool,
    ) -> Result<Probe<ObservedState>> {
        let observed = match self.read(id).await? {
            Some(observed) => observed,
            None if tolerate_missing => return Ok(Probe::Pending),
            None => return Err(self.not_found(id)),
        };

        if observed.lifecycle.is_failed() || self.schema().is_deleted(&observed.lifecycle) {
            return Err(Error::OperationFailed {
                operation: operation.to_string(),
                reason: format!("resource entered lifecycle state {}", observed.lifecycle),
                resource_id: Some(id.clone()),
            });
        }
        if observed.lifecycle.is_transitional() {
            debug!(kind = %self.kind(), id = %id, state = %observed.lifecycle, "Waiting to settle");
            return Ok(Probe::Pending);
        }
        Ok(Probe::Done(observed))
    }

    fn not_found(&self, id: &ResourceId) -> Error {
        Error::NotFound {
            kind: self.kind().to_string(),
            id: id.to_string(),
        }
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Fetch and project the current remote state; `None` if absent
    pub async fn read(&self, id: &ResourceId) -> Result<Option<ObservedState>> {
        match self.remote.get(self.collection(), id).await {
            Ok(raw) => Ok(Some(self.project(&raw)?)),
            Err(e) if e.is_not_found() => {
                debug!(kind = %self.kind(), id = %id, "Resource not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`read`](Self::read), but terminal-deleted resources read as `None`
    pub async fn read_live(&self, id: &ResourceId) -> Result<Option<ObservedState>> {
        Ok(self
            .read(id)
            .await?
            .filter(|observed| !self.schema().is_deleted(&observed.lifecycle)))
    }

    fn project(&self, raw: &RawResource) -> Result<ObservedState> {
        self.projector.to_observed(raw)
    }

    /// Plan against the current remote state of `id`
    pub async fn plan(&self, id: &ResourceId, desired: &DesiredState) -> Result<Plan> {
        let desired = self.schema().conform(desired)?;
        let observed = self
            .read_live(id)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        Ok(plan(self.schema(), &desired, &observed))
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Bring an existing resource to `desired` in place
    pub async fn update(
        &self,
        id: &ResourceId,
        desired: &DesiredState,
        cancel: &CancellationToken,
    ) -> Result<ObservedState> {
        let started = Instant::now();
        let poller = self.poller(cancel);
        let result = self.update_inner(id, desired, cancel, &poller).await;
        self.record("update", started, Some(&poller), &result);
        result
    }

    async fn update_inner(
        &self,
        id: &ResourceId,
        desired: &DesiredState,
        cancel: &CancellationToken,
        poller: &Poller,
    ) -> Result<ObservedState> {
        if cancel.is_cancelled() {
            return Err(self.cancelled("update", Some(id)));
        }

        let desired = self.schema().conform(desired)?;
        let observed = self
            .read_live(id)
            .await?
            .ok_or_else(|| self.not_found(id))?;

        let changes = match plan(self.schema(), &desired, &observed) {
            Plan::NoOp => {
                debug!(kind = %self.kind(), id = %id, "Already up to date");
                return Ok(observed);
            }
            Plan::Replace(attributes) => {
                return Err(Error::RequiresReplacement {
                    kind: self.kind().to_string(),
                    attributes,
                })
            }
            Plan::Update(changes) => changes,
        };

        let mut phase = PhaseTracker::new(self.kind(), ResourcePhase::Available);
        phase.advance(ResourcePhase::Updating)?;
        info!(
            kind = %self.kind(),
            id = %id,
            attributes = ?changes.keys().collect::<Vec<_>>(),
            "Updating resource"
        );

        let subset = desired.subset(changes.keys().map(String::as_str));
        let request = self.projector.to_request(&subset, RequestVerb::Update)?;

        let outcome = self.apply_update(id, request, poller).await;
        match outcome {
            Ok(fresh) => {
                phase.advance(ResourcePhase::Available)?;
                info!(kind = %self.kind(), id = %id, "Updated resource");
                Ok(fresh)
            }
            Err(e) => {
                phase.fail()?;
                Err(e.with_resource_id(Some(id.clone())))
            }
        }
    }

    async fn apply_update(
        &self,
        id: &ResourceId,
        request: RawResource,
        poller: &Poller,
    ) -> Result<ObservedState> {
        let response = self.remote.update(self.collection(), id, request).await?;

        if let Some(handle) = response.work_request {
            if let TerminalStatus::Failed { reason, .. } = poller
                .await_work_request(self.remote.as_ref(), &handle)
                .await?
            {
                return Err(Error::OperationFailed {
                    operation: self.operation("update"),
                    reason,
                    resource_id: Some(id.clone()),
                });
            }
        }

        self.await_settled(id, "update", poller, false).await
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a resource and wait until the remote reports it gone
    pub async fn delete(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        let poller = self.poller(cancel);
        let result = self.delete_inner(id, cancel, &poller).await;
        self.record("delete", started, Some(&poller), &result);
        result
    }

    async fn delete_inner(
        &self,
        id: &ResourceId,
        cancel: &CancellationToken,
        poller: &Poller,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(self.cancelled("delete", Some(id)));
        }

        let mut phase = PhaseTracker::new(self.kind(), ResourcePhase::Available);
        phase.advance(ResourcePhase::Deleting)?;
        info!(kind = %self.kind(), id = %id, "Deleting resource");

        let work_request = match self.remote.delete(self.collection(), id).await {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() => {
                info!(kind = %self.kind(), id = %id, "Resource already absent");
                phase.advance(ResourcePhase::Absent)?;
                return Ok(());
            }
            Err(e) => {
                phase.fail()?;
                return Err(e);
            }
        };

        match self.await_deletion(id, work_request, poller).await {
            Ok(()) => {
                phase.advance(ResourcePhase::Absent)?;
                info!(kind = %self.kind(), id = %id, "Deleted resource");
                Ok(())
            }
            Err(e) => {
                phase.fail()?;
                Err(e.with_resource_id(Some(id.clone())))
            }
        }
    }

    async fn await_deletion(
        &self,
        id: &ResourceId,
        work_request: Option<WorkRequestHandle>,
        poller: &Poller,
    ) -> Result<()> {
        if let Some(handle) = work_request {
            if let TerminalStatus::Failed { reason, .. } = poller
                .await_work_request(self.remote.as_ref(), &handle)
                .await?
            {
                return Err(Error::OperationFailed {
                    operation: self.operation("delete"),
                    reason,
                    resource_id: Some(id.clone()),
                });
            }
        }

        let operation = self.operation("delete");
        poller
            .await_condition(&operation, || self.probe_deleted(id))
            .await
    }

    async fn probe_deleted(&self, id: &ResourceId) -> Result<Probe<()>> {
        match self.read(id).await? {
            None => Ok(Probe::Done(())),
            Some(observed) if self.schema().is_deleted(&observed.lifecycle) => {
                Ok(Probe::Done(()))
            }
            Some(observed) => {
                debug!(kind = %self.kind(), id = %id, state = %observed.lifecycle, "Waiting for deletion");
                Ok(Probe::Pending)
            }
        }
    }

    // =========================================================================
    // List
    // =========================================================================

    /// List resources in `scope`, keeping those that pass every filter
    pub fn list(&self, scope: ListScope, filters: Vec<AttributeFilter>) -> Listing {
        let id = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        debug!(kind = %self.kind(), listing = %id, compartment = %scope.compartment_id, "Listing resources");

        let remote = self.remote.clone();
        let projector = self.projector.clone();
        let collection = self.collection().to_string();

        let pages = stream::try_unfold(Cursor::Start, move |cursor| {
            let remote = remote.clone();
            let collection = collection.clone();
            let scope = scope.clone();
            async move {
                let token = match cursor {
                    Cursor::Done => return Ok(None),
                    Cursor::Start => None,
                    Cursor::Next(token) => Some(token),
                };
                let page = remote.list(&collection, &scope, token.as_deref()).await?;
                let next = match page.next_page {
                    Some(token) => Cursor::Next(token),
                    None => Cursor::Done,
                };
                Ok::<_, Error>(Some((
                    stream::iter(page.items.into_iter().map(Ok::<_, Error>)),
                    next,
                )))
            }
        });

        let items = pages
            .try_flatten()
            .and_then(move |raw| {
                let projected = projector.to_observed(&raw);
                async move { projected }
            })
            .try_filter(move |observed| {
                let keep = filters.iter().all(|f| f.matches(observed));
                futures::future::ready(keep)
            })
            .boxed();

        Listing { id, items }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::planner::AttributeChange;
    use crate::domain::state::LifecycleState;
    use crate::domain::value::Value;
    use crate::error::ErrorAction;
    use crate::domain::ports::StateProjector;
    use crate::remote::memory::MemoryRemote;
    use crate::resources::{IdentityUser, Instance, InternetGateway};
    use assert_matches::assert_matches;
    use prometheus::Registry;
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig {
            poll: PollSettings::fixed(Duration::from_secs(1), Duration::from_secs(60)),
            wait_for_settled: true,
        }
    }

    fn gateway_engine(remote: Arc<MemoryRemote>) -> ResourceEngine {
        ResourceEngine::new(Arc::new(InternetGateway::new()), remote, config())
    }

    fn gateway(enabled: bool) -> DesiredState {
        DesiredState::new()
            .with("compartment_id", "ocid1.compartment.1")
            .with("vcn_id", "ocid1.vcn.1")
            .with("enabled", enabled)
            .with("display_name", "MyInternetGateway")
            .with("freeform_tags", Value::map([("Department", "Finance")]))
    }

    fn instance() -> DesiredState {
        DesiredState::new()
            .with("compartment_id", "ocid1.compartment.1")
            .with("availability_domain", "AD-1")
            .with("shape", "VM.Standard2.1")
            .with("image", "ocid1.image.1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_gateway_disabled() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote);
        let cancel = CancellationToken::new();

        let id = engine.create(&gateway(false), &cancel).await.unwrap();
        let observed = engine.read(&id).await.unwrap().unwrap();

        assert_eq!(observed.lifecycle, LifecycleState::Available);
        assert_eq!(observed.get_rendered("enabled").as_deref(), Some("false"));
        assert_eq!(observed.flatten()["freeform_tags.Department"], "Finance");
        assert!(observed.get("time_created").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_in_place_keeps_identity() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote);
        let cancel = CancellationToken::new();
        let id = engine.create(&gateway(false), &cancel).await.unwrap();

        let planned = engine.plan(&id, &gateway(true)).await.unwrap();
        assert_eq!(
            planned,
            Plan::Update(
                [(
                    "enabled".to_string(),
                    AttributeChange {
                        old: Some(Value::from(false)),
                        new: Value::from(true),
                    },
                )]
                .into_iter()
                .collect()
            )
        );

        let updated = engine.update(&id, &gateway(true), &cancel).await.unwrap();
        assert_eq!(updated.id, id);
        assert_eq!(updated.get("enabled"), Some(&Value::from(true)));

        // converged
        assert!(engine.plan(&id, &gateway(true)).await.unwrap().is_noop());
        let again = engine.update(&id, &gateway(true), &cancel).await.unwrap();
        assert_eq!(again, updated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immutable_change_requires_replacement() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote);
        let cancel = CancellationToken::new();
        let id = engine.create(&gateway(false), &cancel).await.unwrap();

        let moved = gateway(true).with("vcn_id", "ocid1.vcn.2");
        let err = engine.update(&id, &moved, &cancel).await.unwrap_err();

        assert_matches!(&err, Error::RequiresReplacement { attributes, .. } if attributes == &vec!["vcn_id".to_string()]);
        assert_eq!(err.action(), ErrorAction::Replace);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_gateway_leaves_tombstone() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote);
        let cancel = CancellationToken::new();
        let id = engine.create(&gateway(false), &cancel).await.unwrap();

        engine.delete(&id, &cancel).await.unwrap();

        let after = engine.read(&id).await.unwrap();
        assert_matches!(after, Some(observed) if observed.lifecycle == LifecycleState::Terminated);
        assert!(engine.read_live(&id).await.unwrap().is_none());

        // deleting again is still success
        engine.delete(&id, &cancel).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_user_reads_none() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = ResourceEngine::new(Arc::new(IdentityUser::new()), remote, config());
        let cancel = CancellationToken::new();
        let desired = DesiredState::new()
            .with("compartment_id", "ocid1.tenancy.1")
            .with("name", "alice")
            .with("description", "operator");

        let id = engine.create(&desired, &cancel).await.unwrap();
        engine.delete(&id, &cancel).await.unwrap();

        // the record may still be visible as DELETED before it is dropped
        let after = engine.read(&id).await.unwrap();
        assert!(after.map_or(true, |o| o.lifecycle == LifecycleState::Deleted));
        assert!(engine.read(&id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_create_times_out_with_identity() {
        let remote = Arc::new(MemoryRemote::new());
        remote.stall_work_requests(true);
        let engine = ResourceEngine::new(
            Arc::new(Instance::new()),
            remote,
            EngineConfig {
                poll: PollSettings::fixed(Duration::from_secs(5), Duration::from_secs(30)),
                wait_for_settled: true,
            },
        );

        let err = engine
            .create(&instance(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(
            &err,
            Error::OperationTimedOut { polls: 6, resource_id: Some(_), .. }
        );
        assert_eq!(err.action(), ErrorAction::Cleanup);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_work_request_reports_partial_creation() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next_work_request("Out of host capacity");
        let engine = ResourceEngine::new(Arc::new(Instance::new()), remote.clone(), config());

        let err = engine
            .create(&instance(), &CancellationToken::new())
            .await
            .unwrap_err();

        let id = err.resource_id().cloned().unwrap();
        assert_matches!(&err, Error::OperationFailed { reason, .. } if reason == "Out of host capacity");
        let leftover = engine.read(&id).await.unwrap().unwrap();
        assert_eq!(leftover.lifecycle, LifecycleState::Failed);
    }

    fn bodiless_instance_remote() -> Arc<MemoryRemote> {
        let remote = Arc::new(MemoryRemote::new());
        let mut profile = remote.profile(crate::resources::instance::COLLECTION);
        profile.create_body = false;
        remote.set_profile(crate::resources::instance::COLLECTION, profile);
        remote
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_work_request_without_create_body_keeps_identity() {
        let remote = bodiless_instance_remote();
        remote.fail_next_work_request("Out of host capacity");
        let engine = ResourceEngine::new(Arc::new(Instance::new()), remote.clone(), config());

        let err = engine
            .create(&instance(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(&err, Error::OperationFailed { reason, resource_id: Some(_), .. } if reason == "Out of host capacity");
        assert_eq!(err.action(), ErrorAction::Cleanup);
        assert_eq!(remote.len(), 1);
        let id = err.resource_id().cloned().unwrap();
        assert!(engine.read(&id).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_create_without_body_keeps_identity() {
        let remote = bodiless_instance_remote();
        remote.stall_work_requests(true);
        let engine = ResourceEngine::new(
            Arc::new(Instance::new()),
            remote,
            EngineConfig {
                poll: PollSettings::fixed(Duration::from_secs(5), Duration::from_secs(30)),
                wait_for_settled: true,
            },
        );

        let err = engine
            .create(&instance(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(&err, Error::OperationTimedOut { polls: 6, resource_id: Some(_), .. });
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_without_body_takes_identity_from_work_request() {
        let remote = bodiless_instance_remote();
        let engine = ResourceEngine::new(Arc::new(Instance::new()), remote, config());

        let id = engine
            .create(&instance(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(id.as_str().starts_with("ocid1.instance.mem."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scalar_tag_values_converge() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote);
        let cancel = CancellationToken::new();
        let tagged = gateway(true).with(
            "freeform_tags",
            Value::map([("Count", Value::from(5i64)), ("Audited", Value::from(true))]),
        );

        let id = engine.create(&tagged, &cancel).await.unwrap();
        let first = engine.update(&id, &tagged, &cancel).await.unwrap();
        let second = engine.update(&id, &tagged, &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.flatten()["freeform_tags.Count"], "5");
        assert_eq!(engine.plan(&id, &tagged).await.unwrap(), Plan::NoOp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_tag_values_rejected() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote.clone());
        let nested = gateway(true).with(
            "freeform_tags",
            Value::map([("Team", Value::map([("Lead", "alice")]))]),
        );

        let err = engine
            .create(&nested, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation { .. });
        assert!(remote.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_instance_via_work_request() {
        let remote = Arc::new(MemoryRemote::new());
        let registry = Registry::new();
        let metrics = EngineMetrics::register(&registry).unwrap();
        let engine = ResourceEngine::new(Arc::new(Instance::new()), remote, config())
            .with_metrics(metrics.clone());

        let id = engine
            .create(&instance(), &CancellationToken::new())
            .await
            .unwrap();
        let observed = engine.read(&id).await.unwrap().unwrap();

        assert_eq!(observed.lifecycle, LifecycleState::Running);
        assert_eq!(observed.get_rendered("region").as_deref(), Some("us-phoenix-1"));
        assert_eq!(metrics.operations("oci_core_instance", "create", "success"), 1);
        // two work request polls, one settle poll
        assert_eq!(metrics.polls("oci_core_instance"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_create() {
        let remote = Arc::new(MemoryRemote::new());
        remote.reject_next_mutation(400, "InvalidParameter", "vcn does not exist");
        let engine = gateway_engine(remote.clone());

        let err = engine
            .create(&gateway(false), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::RemoteRejected { status: 400, .. });
        assert!(remote.is_empty());

        remote.reject_next_mutation(404, "NotAuthorizedOrNotFound", "no such compartment");
        let err = engine
            .create(&gateway(false), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::RemoteRejected { status: 404, ref code, ref message }
                if code == "NotAuthorizedOrNotFound" && message == "no such compartment"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_resource_on_update_is_not_found() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote.clone());
        let cancel = CancellationToken::new();
        let id = engine.create(&gateway(false), &cancel).await.unwrap();

        remote.reject_next_mutation(404, "NotAuthorizedOrNotFound", "gone");
        let err = engine.update(&id, &gateway(true), &cancel).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_create_touches_nothing() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine.create(&gateway(false), &cancel).await.unwrap_err();
        assert_matches!(err, Error::OperationCancelled { resource_id: None, .. });
        assert!(remote.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_desired_state() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote.clone());
        let desired = gateway(false).with("time_created", "now");

        let err = engine
            .create(&desired, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation { .. });
        assert!(remote.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_observed_round_trip_converges() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote);
        let cancel = CancellationToken::new();
        let id = engine.create(&gateway(true), &cancel).await.unwrap();
        let observed = engine.read(&id).await.unwrap().unwrap();

        let desired = DesiredState::from_observed(&observed, engine.schema());
        assert!(desired.get("time_created").is_none());
        assert!(engine.plan(&id, &desired).await.unwrap().is_noop());
    }

    #[test]
    fn test_projector_round_trip() {
        let projector = InternetGateway::new();
        let mut raw = serde_json::json!({
            "id": "ocid1.internetgateway.1",
            "compartmentId": "c",
            "vcnId": "v",
            "isEnabled": true,
            "displayName": "gw",
            "lifecycleState": "AVAILABLE",
            "timeCreated": "2026-10-19T10:00:00+00:00",
            "freeformTags": {"Department": "Finance"},
            "definedTags": {"Operations": {"CostCenter": "42"}}
        });
        let observed = projector.to_observed(&raw).unwrap();

        let desired = DesiredState::from_observed(&observed, projector.schema());
        let request = projector.to_request(&desired, RequestVerb::Update).unwrap();
        if let (Some(body), Some(fields)) = (raw.as_object_mut(), request.as_object()) {
            for (k, v) in fields {
                body.insert(k.clone(), v.clone());
            }
        }

        assert_eq!(projector.to_observed(&raw).unwrap(), observed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_pages_and_filters() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote);
        let cancel = CancellationToken::new();
        for name in ["web-1", "web-2", "db-1", "web-3"] {
            engine
                .create(&gateway(true).with("display_name", name), &cancel)
                .await
                .unwrap();
        }

        let scope = ListScope::new("ocid1.compartment.1").with_limit(1);
        let all = engine.list(scope.clone(), vec![]).collect_all().await.unwrap();
        assert_eq!(all.len(), 4);

        let filter = AttributeFilter::glob("display_name", ["web-*"]).unwrap();
        let listing = engine.list(scope.clone(), vec![filter]);
        assert!(!listing.id().is_empty());
        let names: Vec<String> = listing
            .collect_all()
            .await
            .unwrap()
            .iter()
            .filter_map(|o| o.get_rendered("display_name"))
            .collect();
        assert_eq!(names, vec!["web-1", "web-2", "web-3"]);

        let exact = AttributeFilter::exact("freeform_tags.Department", ["Finance"]);
        let matched = engine.list(scope, vec![exact]).collect_all().await.unwrap();
        assert_eq!(matched.len(), 4);
    }

    #[test]
    fn test_bad_glob_rejected() {
        assert!(AttributeFilter::glob("display_name", ["[unclosed"]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_id_is_utc_timestamp() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = gateway_engine(remote);
        let first = engine.list(ListScope::new("c"), vec![]);
        // wall clock, not the paused tokio clock
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = engine.list(ListScope::new("c"), vec![]);
        assert!(first.id().ends_with('Z'));
        assert_ne!(first.id(), second.id());
        assert_eq!(first.collect_all().await.unwrap().len(), 0);
        assert_eq!(second.collect_all().await.unwrap().len(), 0);
    }
}
