//! Orchestrator
//!
//! Reconciles a batch of resources. Each resource runs its
//! read → plan → act sequence inside one task; distinct resources run
//! concurrently, bounded by `max_concurrent`.

use crate::controlplane::engine::{EngineConfig, ResourceEngine};
use crate::controlplane::metrics::EngineMetrics;
use crate::controlplane::planner::{plan, Plan};
use crate::controlplane::registry::ResourceRegistry;
use crate::domain::ports::RemoteClientRef;
use crate::domain::state::{DesiredState, ObservedState, ResourceId};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Resources reconciled at the same time
    pub max_concurrent: usize,
    /// Engine settings shared by every resource
    pub engine: EngineConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            engine: EngineConfig::default(),
        }
    }
}

// =============================================================================
// Requests and Reports
// =============================================================================

/// One named resource to reconcile
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub kind: String,
    /// Local name, unique within a batch
    pub name: String,
    pub desired: DesiredState,
    /// Remote identity from a previous apply, if any
    pub id: Option<ResourceId>,
}

/// A resource known to exist remotely, to be destroyed
#[derive(Debug, Clone)]
pub struct ResourceTarget {
    pub kind: String,
    pub name: String,
    pub id: ResourceId,
}

/// What reconciliation did to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    Created,
    Updated,
    Replaced,
    Unchanged,
    Deleted,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyAction::Created => "created",
            ApplyAction::Updated => "updated",
            ApplyAction::Replaced => "replaced",
            ApplyAction::Unchanged => "unchanged",
            ApplyAction::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Successful reconciliation of one resource
#[derive(Debug, Clone)]
pub struct Applied {
    pub action: ApplyAction,
    pub id: ResourceId,
    /// Latest observed state; `None` after deletion
    pub observed: Option<ObservedState>,
}

/// Per-resource result within a batch
#[derive(Debug)]
pub struct ApplyEntry {
    pub name: String,
    pub kind: String,
    pub outcome: Result<Applied>,
}

impl ApplyEntry {
    /// Remote identity, including one left behind by a failed create
    pub fn resource_id(&self) -> Option<&ResourceId> {
        match &self.outcome {
            Ok(applied) => Some(&applied.id),
            Err(e) => e.resource_id(),
        }
    }
}

/// Results of a batch, in request order
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub entries: Vec<ApplyEntry>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ApplyEntry> {
        self.entries.iter().filter(|e| e.outcome.is_err())
    }

    pub fn get(&self, name: &str) -> Option<&ApplyEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Planned action for one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "plan", rename_all = "lowercase")]
pub enum PlannedAction {
    /// No remote object yet
    Create,
    Change(Plan),
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedResource {
    pub name: String,
    pub kind: String,
    pub id: Option<ResourceId>,
    pub action: PlannedAction,
}

impl PlannedResource {
    pub fn is_noop(&self) -> bool {
        matches!(&self.action, PlannedAction::Change(p) if p.is_noop())
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs resource engines for a batch of resources
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: ResourceRegistry,
    remote: RemoteClientRef,
    metrics: Option<EngineMetrics>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, registry: ResourceRegistry, remote: RemoteClientRef) -> Self {
        Self {
            config,
            registry,
            remote,
            metrics: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Token cancelling every in-flight reconciliation
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Engine for one resource kind
    pub fn engine(&self, kind: &str) -> Result<ResourceEngine> {
        let projector = self.registry.get(kind)?;
        let engine = ResourceEngine::new(projector, self.remote.clone(), self.config.engine.clone());
        Ok(match &self.metrics {
            Some(metrics) => engine.with_metrics(metrics.clone()),
            None => engine,
        })
    }

    fn check_unique<'a>(names: impl Iterator<Item = (&'a str, &'a str)>) -> Result<()> {
        let mut seen = BTreeSet::new();
        for (kind, name) in names {
            if !seen.insert(name) {
                return Err(Error::Configuration(format!(
                    "resource '{}' ({}) appears more than once",
                    name, kind
                )));
            }
        }
        Ok(())
    }

    /// Compute the plan for every resource without mutating anything
    pub async fn plan(&self, specs: &[ResourceSpec]) -> Result<Vec<PlannedResource>> {
        Self::check_unique(specs.iter().map(|s| (s.kind.as_str(), s.name.as_str())))?;

        let planned = futures::future::try_join_all(specs.iter().map(|spec| async move {
            let engine = self.engine(&spec.kind)?;
            let desired = engine.schema().conform(&spec.desired)?;
            let observed = match &spec.id {
                Some(id) => engine.read_live(id).await?,
                None => None,
            };
            let action = match &observed {
                Some(observed) => PlannedAction::Change(plan(engine.schema(), &desired, observed)),
                None => PlannedAction::Create,
            };
            debug!(name = %spec.name, kind = %spec.kind, ?action, "Planned resource");
            Ok::<_, Error>(PlannedResource {
                name: spec.name.clone(),
                kind: spec.kind.clone(),
                id: observed.map(|o| o.id),
                action,
            })
        }))
        .await?;

        Ok(planned)
    }

    /// Reconcile every resource to its desired state
    ///
    /// Fails up front on unknown kinds or duplicate names; per-resource
    /// failures are collected in the report.
    pub async fn apply(&self, specs: Vec<ResourceSpec>) -> Result<ApplyReport> {
        Self::check_unique(specs.iter().map(|s| (s.kind.as_str(), s.name.as_str())))?;
        let jobs = specs
            .into_iter()
            .map(|spec| {
                let engine = self.engine(&spec.kind)?;
                let cancel = self.cancel.clone();
                let (name, kind) = (spec.name.clone(), spec.kind.clone());
                Ok((name, kind, reconcile(engine, spec, cancel)))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(resources = jobs.len(), "Applying resources");
        let report = self.run(jobs).await;
        info!(
            resources = report.entries.len(),
            failed = report.failures().count(),
            "Apply finished"
        );
        Ok(report)
    }

    /// Delete every target
    pub async fn destroy(&self, targets: Vec<ResourceTarget>) -> Result<ApplyReport> {
        Self::check_unique(targets.iter().map(|t| (t.kind.as_str(), t.name.as_str())))?;
        let jobs = targets
            .into_iter()
            .map(|target| {
                let engine = self.engine(&target.kind)?;
                let cancel = self.cancel.clone();
                let (name, kind) = (target.name.clone(), target.kind.clone());
                let job = async move {
                    engine.delete(&target.id, &cancel).await?;
                    Ok(Applied {
                        action: ApplyAction::Deleted,
                        id: target.id,
                        observed: None,
                    })
                };
                Ok((name, kind, job))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(resources = jobs.len(), "Destroying resources");
        Ok(self.run(jobs).await)
    }

    async fn run<F>(&self, jobs: Vec<(String, String, F)>) -> ApplyReport
    where
        F: Future<Output = Result<Applied>> + Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<ApplyEntry>> = Vec::with_capacity(jobs.len());
        let mut names = Vec::with_capacity(jobs.len());

        for (index, (name, kind, job)) in jobs.into_iter().enumerate() {
            slots.push(None);
            names.push((name.clone(), kind.clone()));
            let permits = permits.clone();
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => job.await,
                    Err(_) => Err(Error::Internal("concurrency limiter closed".to_string())),
                };
                (index, ApplyEntry { name, kind, outcome })
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, entry)) => {
                    match &entry.outcome {
                        Ok(applied) => info!(
                            name = %entry.name,
                            kind = %entry.kind,
                            id = %applied.id,
                            action = %applied.action,
                            "Resource reconciled"
                        ),
                        Err(e) => warn!(name = %entry.name, kind = %entry.kind, "Resource failed: {}", e),
                    }
                    slots[index] = Some(entry);
                }
                Err(e) => error!("Reconciliation task aborted: {}", e),
            }
        }

        let entries = slots
            .into_iter()
            .zip(names)
            .map(|(slot, (name, kind))| {
                slot.unwrap_or_else(|| ApplyEntry {
                    name,
                    kind,
                    outcome: Err(Error::Internal("reconciliation task aborted".to_string())),
                })
            })
            .collect();

        ApplyReport { entries }
    }
}

/// Read → plan → act for one resource
async fn reconcile(
    engine: ResourceEngine,
    spec: ResourceSpec,
    cancel: CancellationToken,
) -> Result<Applied> {
    let observed = match &spec.id {
        Some(id) => engine.read_live(id).await?,
        None => None,
    };

    let Some(observed) = observed else {
        if let Some(id) = &spec.id {
            warn!(name = %spec.name, id = %id, "Resource vanished remotely, recreating");
        }
        return create(&engine, &spec.desired, &cancel, ApplyAction::Created).await;
    };

    let desired = engine.schema().conform(&spec.desired)?;
    match plan(engine.schema(), &desired, &observed) {
        Plan::NoOp => Ok(Applied {
            action: ApplyAction::Unchanged,
            id: observed.id.clone(),
            observed: Some(observed),
        }),
        Plan::Update(_) => {
            let updated = engine.update(&observed.id, &desired, &cancel).await?;
            Ok(Applied {
                action: ApplyAction::Updated,
                id: updated.id.clone(),
                observed: Some(updated),
            })
        }
        Plan::Replace(attributes) => {
            info!(
                name = %spec.name,
                id = %observed.id,
                ?attributes,
                "Replacing resource"
            );
            engine.delete(&observed.id, &cancel).await?;
            create(&engine, &desired, &cancel, ApplyAction::Replaced).await
        }
    }
}

async fn create(
    engine: &ResourceEngine,
    desired: &DesiredState,
    cancel: &CancellationToken,
    action: ApplyAction,
) -> Result<Applied> {
    let id = engine.create(desired, cancel).await?;
    let observed = engine.read(&id).await?;
    Ok(Applied {
        action,
        id,
        observed,
    })
}
