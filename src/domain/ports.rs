//! Domain Ports - Core trait definitions for the reconciler
//!
//! These traits define the boundaries between the reconciliation core and
//! the remote control plane. Adapters implement these traits to provide
//! concrete functionality.

use crate::domain::schema::ResourceSchema;
use crate::domain::state::{
    DesiredState, ObservedState, ResourceId, WorkRequest, WorkRequestHandle,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Raw Wire Types
// =============================================================================

/// Raw remote resource representation, as returned by the provider
pub type RawResource = serde_json::Value;

/// Raw request body sent to the provider
pub type RawRequest = serde_json::Value;

/// One page of a remote listing
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<RawResource>,
    /// Token for the next page; `None` on the last page
    pub next_page: Option<String>,
}

/// Response to a create or update call
#[derive(Debug, Clone, Default)]
pub struct MutationResponse {
    /// Resource body, when the remote returns one synchronously
    pub resource: Option<RawResource>,
    /// Handle of the asynchronous operation, when one was started
    pub work_request: Option<WorkRequestHandle>,
}

/// Scope of a listing: compartment plus server-side query parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListScope {
    pub compartment_id: String,
    /// Query parameters (camelCase wire names, e.g. `displayName`)
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Page size hint
    #[serde(default)]
    pub limit: Option<u32>,
}

impl ListScope {
    pub fn new(compartment_id: impl Into<String>) -> Self {
        Self {
            compartment_id: compartment_id.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Which request a projector should build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestVerb {
    Create,
    Update,
}

impl fmt::Display for RequestVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestVerb::Create => write!(f, "create"),
            RequestVerb::Update => write!(f, "update"),
        }
    }
}

// =============================================================================
// Remote Client Port
// =============================================================================

/// Port for remote control plane operations
///
/// Implementations must be safe for concurrent use across distinct
/// resources. A 404 on `get` or `delete` is reported as [`Error::NotFound`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch one page of a collection
    async fn list(
        &self,
        collection: &str,
        scope: &ListScope,
        page: Option<&str>,
    ) -> Result<Page>;

    /// Fetch a single resource
    async fn get(&self, collection: &str, id: &ResourceId) -> Result<RawResource>;

    /// Create a resource
    async fn create(&self, collection: &str, request: RawRequest) -> Result<MutationResponse>;

    /// Update a resource in place
    async fn update(
        &self,
        collection: &str,
        id: &ResourceId,
        request: RawRequest,
    ) -> Result<MutationResponse>;

    /// Delete a resource
    async fn delete(&self, collection: &str, id: &ResourceId) -> Result<Option<WorkRequestHandle>>;

    /// Check the status of an asynchronous operation
    async fn get_work_request(&self, handle: &WorkRequestHandle) -> Result<WorkRequest>;

    /// Facade name for logging
    fn name(&self) -> &str;
}

// =============================================================================
// State Projector Port
// =============================================================================

/// Port converting between remote representations and local state
pub trait StateProjector: Send + Sync {
    /// Schema of the projected resource kind
    fn schema(&self) -> &ResourceSchema;

    /// Project a raw remote response into observed state
    fn to_observed(&self, raw: &RawResource) -> Result<ObservedState>;

    /// Build a raw request body from (conformed) desired state
    fn to_request(&self, desired: &DesiredState, verb: RequestVerb) -> Result<RawRequest>;

    /// Identity carried by a raw response
    fn identity(&self, raw: &RawResource) -> Result<ResourceId> {
        raw.get("id")
            .and_then(|v| v.as_str())
            .map(ResourceId::from)
            .ok_or_else(|| Error::Projection {
                kind: self.schema().kind().to_string(),
                attribute: "id".into(),
                reason: "response carries no identifier".into(),
            })
    }

    /// User-facing kind name
    fn kind(&self) -> &str {
        self.schema().kind()
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type RemoteClientRef = Arc<dyn RemoteClient>;
pub type StateProjectorRef = Arc<dyn StateProjector>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_scope_builder() {
        let scope = ListScope::new("ocid1.compartment.1")
            .with_query("displayName", "gw")
            .with_limit(10);
        assert_eq!(scope.compartment_id, "ocid1.compartment.1");
        assert_eq!(scope.query["displayName"], "gw");
        assert_eq!(scope.limit, Some(10));
    }

    #[test]
    fn test_request_verb_display() {
        assert_eq!(format!("{}", RequestVerb::Create), "create");
        assert_eq!(format!("{}", RequestVerb::Update), "update");
    }
}
