//! Resource State Types
//!
//! Desired state (what the user declared), observed state (what the remote
//! reported, normalised) and the handles that tie them to remote objects.

use crate::domain::schema::ResourceSchema;
use crate::domain::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Resource Identity
// =============================================================================

/// Opaque identifier assigned by the remote system at creation time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Lifecycle State
// =============================================================================

/// Remote lifecycle status attached to observed state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum LifecycleState {
    Provisioning,
    Creating,
    Available,
    Active,
    Inactive,
    Starting,
    Running,
    Stopping,
    Stopped,
    Updating,
    Terminating,
    Terminated,
    Deleting,
    Deleted,
    Failed,
    Unknown(String),
}

impl LifecycleState {
    /// Whether the remote is still working towards a settled state
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            LifecycleState::Provisioning
                | LifecycleState::Creating
                | LifecycleState::Starting
                | LifecycleState::Stopping
                | LifecycleState::Updating
                | LifecycleState::Terminating
                | LifecycleState::Deleting
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LifecycleState::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            LifecycleState::Provisioning => "PROVISIONING",
            LifecycleState::Creating => "CREATING",
            LifecycleState::Available => "AVAILABLE",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Inactive => "INACTIVE",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Updating => "UPDATING",
            LifecycleState::Terminating => "TERMINATING",
            LifecycleState::Terminated => "TERMINATED",
            LifecycleState::Deleting => "DELETING",
            LifecycleState::Deleted => "DELETED",
            LifecycleState::Failed => "FAILED",
            LifecycleState::Unknown(raw) => raw,
        }
    }
}

impl FromStr for LifecycleState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "PROVISIONING" => LifecycleState::Provisioning,
            "CREATING" => LifecycleState::Creating,
            "AVAILABLE" => LifecycleState::Available,
            "ACTIVE" => LifecycleState::Active,
            "INACTIVE" => LifecycleState::Inactive,
            "STARTING" => LifecycleState::Starting,
            "RUNNING" => LifecycleState::Running,
            "STOPPING" => LifecycleState::Stopping,
            "STOPPED" => LifecycleState::Stopped,
            "UPDATING" => LifecycleState::Updating,
            "TERMINATING" => LifecycleState::Terminating,
            "TERMINATED" => LifecycleState::Terminated,
            "DELETING" => LifecycleState::Deleting,
            "DELETED" => LifecycleState::Deleted,
            "FAILED" => LifecycleState::Failed,
            _ => LifecycleState::Unknown(s.to_string()),
        })
    }
}

impl From<String> for LifecycleState {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }
}

impl From<LifecycleState> for String {
    fn from(state: LifecycleState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Desired State
// =============================================================================

/// User-declared target attributes, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredState {
    attributes: IndexMap<String, Value>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attributes.iter()
    }

    /// Keep only the named attributes, preserving order
    pub fn subset<'a, I>(&self, names: I) -> DesiredState
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: Vec<&str> = names.into_iter().collect();
        DesiredState {
            attributes: self
                .attributes
                .iter()
                .filter(|(k, _)| keep.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Desired state that would reproduce `observed`: user-settable attributes only
    pub fn from_observed(observed: &ObservedState, schema: &ResourceSchema) -> DesiredState {
        let mut desired = DesiredState::new();
        for (name, attr) in schema.attributes() {
            if attr.is_computed() {
                continue;
            }
            if let Some(value) = observed.get(name) {
                desired.insert(name.clone(), value.clone());
            }
        }
        desired
    }
}

impl FromIterator<(String, Value)> for DesiredState {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Observed State
// =============================================================================

/// Normalised snapshot of a remote resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    pub id: ResourceId,
    pub lifecycle: LifecycleState,
    pub attributes: BTreeMap<String, Value>,
}

impl ObservedState {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// String form of an attribute, as a scalar rendering
    pub fn get_rendered(&self, name: &str) -> Option<String> {
        self.attributes.get(name).map(Value::render)
    }

    /// Flat dotted-key view of every attribute
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (name, value) in &self.attributes {
            value.flatten_into(name, &mut out);
        }
        out
    }
}

// =============================================================================
// Work Requests
// =============================================================================

/// Handle to an in-flight asynchronous remote mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkRequestHandle(String);

impl WorkRequestHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkRequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a work request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkRequestStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl WorkRequestStatus {
    /// Map a provider status string
    pub fn from_remote(status: &str) -> Option<Self> {
        match status.to_ascii_uppercase().as_str() {
            "ACCEPTED" | "PENDING" => Some(WorkRequestStatus::Pending),
            "IN_PROGRESS" | "CANCELING" => Some(WorkRequestStatus::InProgress),
            "SUCCEEDED" => Some(WorkRequestStatus::Succeeded),
            "FAILED" | "CANCELED" => Some(WorkRequestStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkRequestStatus::Succeeded | WorkRequestStatus::Failed)
    }

    /// Whether `self` may follow `previous`
    pub fn can_follow(&self, previous: WorkRequestStatus) -> bool {
        use WorkRequestStatus::*;
        match (previous, self) {
            (Pending, _) => true,
            (InProgress, InProgress | Succeeded | Failed) => true,
            (Succeeded, Succeeded) | (Failed, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkRequestStatus::Pending => write!(f, "pending"),
            WorkRequestStatus::InProgress => write!(f, "in_progress"),
            WorkRequestStatus::Succeeded => write!(f, "succeeded"),
            WorkRequestStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of a work request as reported by the remote
#[derive(Debug, Clone, PartialEq)]
pub struct WorkRequest {
    pub handle: WorkRequestHandle,
    pub status: WorkRequestStatus,
    /// Resource the request acts on, when the remote reports it
    pub resource_id: Option<ResourceId>,
    pub percent_complete: Option<f32>,
    /// Remote-provided failure reason
    pub failure: Option<String>,
}

/// Resolved outcome of a work request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Succeeded {
        resource_id: Option<ResourceId>,
    },
    /// `resource_id` is set when the request got far enough to name one
    Failed {
        reason: String,
        resource_id: Option<ResourceId>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_parse_roundtrip() {
        let state: LifecycleState = "available".parse().unwrap();
        assert_eq!(state, LifecycleState::Available);
        assert_eq!(state.to_string(), "AVAILABLE");

        let odd = LifecycleState::from("MIGRATING".to_string());
        assert_eq!(odd, LifecycleState::Unknown("MIGRATING".into()));
        assert!(!odd.is_transitional());
        assert!(LifecycleState::Terminating.is_transitional());
    }

    #[test]
    fn test_work_request_status_mapping() {
        assert_eq!(
            WorkRequestStatus::from_remote("ACCEPTED"),
            Some(WorkRequestStatus::Pending)
        );
        assert_eq!(
            WorkRequestStatus::from_remote("CANCELED"),
            Some(WorkRequestStatus::Failed)
        );
        assert_eq!(WorkRequestStatus::from_remote("???"), None);

        assert!(WorkRequestStatus::InProgress.can_follow(WorkRequestStatus::Pending));
        assert!(!WorkRequestStatus::Pending.can_follow(WorkRequestStatus::InProgress));
        assert!(!WorkRequestStatus::Failed.can_follow(WorkRequestStatus::Succeeded));
    }

    #[test]
    fn test_desired_subset_keeps_order() {
        let desired = DesiredState::new()
            .with("b", 1i64)
            .with("a", true)
            .with("c", "x");

        let subset = desired.subset(["c", "b"]);
        let names: Vec<&String> = subset.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_observed_flatten() {
        let mut attributes = BTreeMap::new();
        attributes.insert("enabled".to_string(), Value::from(false));
        attributes.insert(
            "freeform_tags".to_string(),
            Value::map([("Department", "Finance")]),
        );
        let observed = ObservedState {
            id: ResourceId::new("ocid1.internetgateway.1"),
            lifecycle: LifecycleState::Available,
            attributes,
        };

        let flat = observed.flatten();
        assert_eq!(flat["enabled"], "false");
        assert_eq!(flat["freeform_tags.%"], "1");
        assert_eq!(observed.get_rendered("enabled").as_deref(), Some("false"));
    }
}
