//! Resource Phase Machine
//!
//! Local view of where a single resource is in its reconciliation:
//!
//! ```text
//! Absent -> Creating -> Available -> Updating -> Available -> Deleting -> Absent
//! ```
//!
//! Any transitional phase may fall back to `Absent` on failure.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Reconciliation phase of one resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourcePhase {
    #[default]
    Absent,
    Creating,
    Available,
    Updating,
    Deleting,
}

impl ResourcePhase {
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ResourcePhase::Creating | ResourcePhase::Updating | ResourcePhase::Deleting
        )
    }

    /// Whether `next` may directly follow `self` on the success path
    pub fn can_transition_to(&self, next: ResourcePhase) -> bool {
        use ResourcePhase::*;
        matches!(
            (self, next),
            (Absent, Creating)
                | (Creating, Available)
                | (Available, Updating)
                | (Updating, Available)
                | (Available, Deleting)
                | (Deleting, Absent)
        )
    }
}

impl std::fmt::Display for ResourcePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourcePhase::Absent => write!(f, "Absent"),
            ResourcePhase::Creating => write!(f, "Creating"),
            ResourcePhase::Available => write!(f, "Available"),
            ResourcePhase::Updating => write!(f, "Updating"),
            ResourcePhase::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Tracks the phase of one resource across an engine call
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    kind: String,
    phase: ResourcePhase,
    last_transition_time: DateTime<Utc>,
}

impl PhaseTracker {
    pub fn new(kind: impl Into<String>, phase: ResourcePhase) -> Self {
        Self {
            kind: kind.into(),
            phase,
            last_transition_time: Utc::now(),
        }
    }

    pub fn phase(&self) -> ResourcePhase {
        self.phase
    }

    pub fn last_transition_time(&self) -> DateTime<Utc> {
        self.last_transition_time
    }

    /// Advance along the success path
    pub fn advance(&mut self, next: ResourcePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                kind: self.kind.clone(),
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.set(next);
        Ok(())
    }

    /// Fall back to `Absent` after a failed transitional step
    pub fn fail(&mut self) -> Result<()> {
        if !self.phase.is_transitional() {
            return Err(Error::InvalidTransition {
                kind: self.kind.clone(),
                from: self.phase.to_string(),
                to: ResourcePhase::Absent.to_string(),
            });
        }
        self.set(ResourcePhase::Absent);
        Ok(())
    }

    fn set(&mut self, next: ResourcePhase) {
        debug!(kind = %self.kind, from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
        self.last_transition_time = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_full_lifecycle() {
        let mut tracker = PhaseTracker::new("oci_core_volume", ResourcePhase::Absent);
        for next in [
            ResourcePhase::Creating,
            ResourcePhase::Available,
            ResourcePhase::Updating,
            ResourcePhase::Available,
            ResourcePhase::Deleting,
            ResourcePhase::Absent,
        ] {
            tracker.advance(next).unwrap();
        }
        assert_eq!(tracker.phase(), ResourcePhase::Absent);
    }

    #[test]
    fn test_invalid_transition() {
        let mut tracker = PhaseTracker::new("oci_core_volume", ResourcePhase::Absent);
        assert_matches!(
            tracker.advance(ResourcePhase::Updating),
            Err(Error::InvalidTransition { from, to, .. }) if from == "Absent" && to == "Updating"
        );
        assert_eq!(tracker.phase(), ResourcePhase::Absent);
    }

    #[test]
    fn test_failure_returns_to_absent() {
        let mut tracker = PhaseTracker::new("oci_core_volume", ResourcePhase::Available);
        assert!(tracker.fail().is_err());

        tracker.advance(ResourcePhase::Updating).unwrap();
        tracker.fail().unwrap();
        assert_eq!(tracker.phase(), ResourcePhase::Absent);
    }
}
