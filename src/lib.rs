//! Cloud Reconciler - Declarative Resource Reconciliation Core
//!
//! Reconciles a desired-state description of cloud resources against a
//! remote control plane: plans the minimal change, issues create/update/
//! delete calls, waits on asynchronous work requests and projects remote
//! responses back into a stable, comparable local form.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              Orchestrator                                   │
//! │            (one task per resource, bounded by max_concurrent)               │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Reconciliation │  │   Diff & Plan   │  │     Work Request            │  │
//! │  │     Engine      │──│    Evaluator    │  │       Poller                │  │
//! │  └────────┬────────┘  └─────────────────┘  └─────────────┬───────────────┘  │
//! │           │                                              │                  │
//! │  ┌────────┴────────────────────────┐                     │                  │
//! │  │  State Projectors (per kind)    │                     │                  │
//! │  │  gateway / instance / volume /  │                     │                  │
//! │  │  user                           │                     │                  │
//! │  └─────────────────────────────────┘                     │                  │
//! ├──────────────────────────────────────────────────────────┴──────────────────┤
//! │                          Remote Client Facades                              │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │        Memory               │  │             REST                    │   │
//! │  │  (simulated control plane)  │  │   (reqwest, retry with backoff)     │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: engine, poller, planner, registry and orchestrator
//! - [`domain`]: values, states, schemas and the remote/projector ports
//! - [`projection`]: helpers shared by state projectors
//! - [`resources`]: one state projector per resource kind
//! - [`remote`]: remote client facades
//! - [`representation`]: synthetic desired-state templates
//! - [`config`]: provider configuration and desired-state documents
//! - [`statefile`]: local record of reconciled resources
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod projection;
pub mod remote;
pub mod representation;
pub mod resources;
pub mod statefile;

// Re-export commonly used types
pub use controlplane::{
    AttributeFilter, EngineConfig, EngineMetrics, Listing, Orchestrator, OrchestratorConfig,
    Plan, PollSettings, ResourceEngine, ResourceRegistry, ResourceSpec,
};

pub use config::{DesiredDocument, ProviderConfig};

pub use domain::{
    DesiredState, LifecycleState, ListScope, ObservedState, RemoteClient, ResourceId,
    ResourceSchema, StateProjector, Value,
};

pub use error::{Error, ErrorAction, Result};

pub use remote::{MemoryRemote, RemoteConfig, RemoteFactory, RestRemote};

pub use statefile::StateFile;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
