//! Control Plane
//!
//! Engine, poller and planner for single resources, plus the orchestrator
//! that reconciles batches of them.

pub mod engine;
pub mod lifecycle;
pub mod metrics;
pub mod orchestrator;
pub mod planner;
pub mod poller;
pub mod registry;

pub use engine::{AttributeFilter, EngineConfig, Listing, ResourceEngine};
pub use lifecycle::{PhaseTracker, ResourcePhase};
pub use metrics::EngineMetrics;
pub use orchestrator::*;
pub use planner::{plan, AttributeChange, Plan};
pub use poller::{PollSettings, PollStrategy, Poller, Probe};
pub use registry::ResourceRegistry;
