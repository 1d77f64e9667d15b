//! In-Memory Remote
//!
//! A simulated control plane. Resources move through their lifecycle as
//! they are read, work requests resolve as they are polled, and faults can
//! be injected for testing error paths.

use crate::domain::ports::{
    ListScope, MutationResponse, Page, RawRequest, RawResource, RemoteClient,
};
use crate::domain::state::{ResourceId, WorkRequest, WorkRequestHandle, WorkRequestStatus};
use crate::error::{Error, Result};
use crate::remote::classify_status;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the in-memory remote
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryRemoteConfig {
    /// Region reported on regional resources
    pub region: String,
    /// Page size when the caller gives no limit
    pub page_size: u32,
}

impl Default for MemoryRemoteConfig {
    fn default() -> Self {
        Self {
            region: "us-phoenix-1".to_string(),
            page_size: 50,
        }
    }
}

/// What happens to a record once deletion completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deletion {
    /// Record stays readable in the given terminal state
    Tombstone(String),
    /// Record passes through the given state, then reads as 404
    Remove(String),
}

/// Simulated behaviour of one collection
#[derive(Debug, Clone)]
pub struct KindProfile {
    /// Prefix used in generated identifiers
    pub ocid_prefix: String,
    pub initial_state: String,
    pub settled_state: String,
    pub deleting_state: String,
    pub deletion: Deletion,
    /// Mutations return work request handles
    pub work_requests: bool,
    /// Reads needed for each lifecycle step
    pub settle_reads: u32,
    /// Polls needed for a work request to resolve
    pub work_request_polls: u32,
    /// Stamp the configured region on new records
    pub regional: bool,
    /// Create responds with the new record; otherwise only the work
    /// request names it
    pub create_body: bool,
}

impl KindProfile {
    fn core(prefix: &str, settled: &str) -> Self {
        Self {
            ocid_prefix: prefix.to_string(),
            initial_state: "PROVISIONING".to_string(),
            settled_state: settled.to_string(),
            deleting_state: "TERMINATING".to_string(),
            deletion: Deletion::Tombstone("TERMINATED".to_string()),
            work_requests: false,
            settle_reads: 1,
            work_request_polls: 2,
            regional: false,
            create_body: true,
        }
    }

    /// Profile used for collections without a registered one
    pub fn generic(collection: &str) -> Self {
        Self::core(&collection.to_ascii_lowercase(), "AVAILABLE")
    }

    fn defaults() -> Vec<(&'static str, KindProfile)> {
        let instance = KindProfile {
            settled_state: "RUNNING".to_string(),
            work_requests: true,
            regional: true,
            ..Self::core("instance", "RUNNING")
        };
        let user = KindProfile {
            initial_state: "CREATING".to_string(),
            deleting_state: "DELETING".to_string(),
            deletion: Deletion::Remove("DELETED".to_string()),
            ..Self::core("user", "ACTIVE")
        };

        vec![
            ("internetGateways", Self::core("internetgateway", "AVAILABLE")),
            ("instances", instance),
            ("volumes", Self::core("volume", "AVAILABLE")),
            ("users", user),
        ]
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone)]
enum Step {
    State(String),
    Remove,
}

#[derive(Debug, Clone)]
struct Record {
    seq: u64,
    collection: String,
    body: Map<String, Json>,
    /// Pending lifecycle steps, each applied after `settle_reads` reads
    pending: VecDeque<Step>,
    reads: u32,
}

impl Record {
    fn set_state(&mut self, state: &str) {
        self.body
            .insert("lifecycleState".to_string(), Json::String(state.to_string()));
    }
}

#[derive(Debug, Clone)]
struct WorkRequestRecord {
    resource_id: ResourceId,
    polls: u32,
    failure: Option<String>,
    resolved: bool,
}

// =============================================================================
// Memory Remote
// =============================================================================

/// Simulated control plane
pub struct MemoryRemote {
    config: MemoryRemoteConfig,
    profiles: DashMap<String, KindProfile>,
    records: DashMap<String, Record>,
    work_requests: DashMap<String, WorkRequestRecord>,
    next_id: AtomicU64,
    stall: AtomicBool,
    transient_errors: AtomicU32,
    fail_next: Mutex<Option<String>>,
    reject_next: Mutex<Option<(u16, String, String)>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::with_config(MemoryRemoteConfig::default())
    }

    pub fn with_config(config: MemoryRemoteConfig) -> Self {
        let profiles = DashMap::new();
        for (collection, profile) in KindProfile::defaults() {
            profiles.insert(collection.to_string(), profile);
        }

        Self {
            config,
            profiles,
            records: DashMap::new(),
            work_requests: DashMap::new(),
            next_id: AtomicU64::new(1),
            stall: AtomicBool::new(false),
            transient_errors: AtomicU32::new(0),
            fail_next: Mutex::new(None),
            reject_next: Mutex::new(None),
        }
    }

    /// Override the simulated behaviour of a collection
    pub fn set_profile(&self, collection: &str, profile: KindProfile) {
        self.profiles.insert(collection.to_string(), profile);
    }

    /// The next work request created resolves as failed
    pub fn fail_next_work_request(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }

    /// Keep every work request in progress while set
    pub fn stall_work_requests(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Fail the next `count` calls with a 503
    pub fn inject_transient_errors(&self, count: u32) {
        self.transient_errors.store(count, Ordering::SeqCst);
    }

    /// Reject the next create or update with the given status
    pub fn reject_next_mutation(&self, status: u16, code: &str, message: &str) {
        *self.reject_next.lock() = Some((status, code.to_string(), message.to_string()));
    }

    /// Times a work request has been polled
    pub fn work_request_polls(&self, handle: &WorkRequestHandle) -> u32 {
        self.work_requests
            .get(handle.as_str())
            .map(|wr| wr.polls)
            .unwrap_or(0)
    }

    /// Number of records still held, tombstones included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Simulated behaviour of `collection`
    pub fn profile(&self, collection: &str) -> KindProfile {
        self.profiles
            .get(collection)
            .map(|p| p.clone())
            .unwrap_or_else(|| KindProfile::generic(collection))
    }

    fn take_transient(&self) -> Result<()> {
        let took = self
            .transient_errors
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            return Err(classify_status(
                503,
                "ServiceUnavailable".to_string(),
                "injected transient failure".to_string(),
                "",
                "",
            ));
        }
        Ok(())
    }

    fn take_rejection(&self, collection: &str, id: &str) -> Result<()> {
        match self.reject_next.lock().take() {
            Some((status, code, message)) => {
                Err(classify_status(status, code, message, collection, id))
            }
            None => Ok(()),
        }
    }

    fn not_found(collection: &str, id: &str) -> Error {
        Error::NotFound {
            kind: collection.to_string(),
            id: id.to_string(),
        }
    }

    fn open_work_request(&self, resource_id: &ResourceId) -> WorkRequestHandle {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = WorkRequestHandle::new(format!("ocid1.workrequest.mem.{}", n));
        let failure = self.fail_next.lock().take();

        self.work_requests.insert(
            handle.as_str().to_string(),
            WorkRequestRecord {
                resource_id: resource_id.clone(),
                polls: 0,
                failure,
                resolved: false,
            },
        );
        debug!(work_request = %handle, resource = %resource_id, "Opened work request");
        handle
    }

    fn matches_scope(record: &Record, collection: &str, scope: &ListScope) -> bool {
        if record.collection != collection {
            return false;
        }
        let field = |name: &str| record.body.get(name).map(render_json);
        if field("compartmentId").as_deref() != Some(scope.compartment_id.as_str()) {
            return false;
        }
        scope
            .query
            .iter()
            .all(|(name, wanted)| field(name).as_deref() == Some(wanted.as_str()))
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn render_json(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn merge(body: &mut Map<String, Json>, request: RawRequest) -> Result<()> {
    match request {
        Json::Object(fields) => {
            for (k, v) in fields {
                body.insert(k, v);
            }
            Ok(())
        }
        other => Err(Error::RemoteRejected {
            status: 400,
            code: "InvalidParameter".to_string(),
            message: format!("request body must be an object, got {}", other),
        }),
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn list(
        &self,
        collection: &str,
        scope: &ListScope,
        page: Option<&str>,
    ) -> Result<Page> {
        self.take_transient()?;

        let offset: usize = match page {
            Some(token) => token.parse().map_err(|_| Error::RemoteRejected {
                status: 400,
                code: "InvalidParameter".to_string(),
                message: format!("invalid page token '{}'", token),
            })?,
            None => 0,
        };
        let size = scope.limit.unwrap_or(self.config.page_size).max(1) as usize;

        let mut matching: Vec<(u64, RawResource)> = self
            .records
            .iter()
            .filter(|r| Self::matches_scope(r.value(), collection, scope))
            .map(|r| (r.seq, Json::Object(r.body.clone())))
            .collect();
        matching.sort_by_key(|(seq, _)| *seq);

        let total = matching.len();
        let items: Vec<RawResource> = matching
            .into_iter()
            .skip(offset)
            .take(size)
            .map(|(_, body)| body)
            .collect();
        let next_page = (offset + size < total).then(|| (offset + size).to_string());

        Ok(Page { items, next_page })
    }

    async fn get(&self, collection: &str, id: &ResourceId) -> Result<RawResource> {
        self.take_transient()?;

        let profile = self.profile(collection);
        let mut entry = self
            .records
            .get_mut(id.as_str())
            .filter(|r| r.collection == collection)
            .ok_or_else(|| Self::not_found(collection, id.as_str()))?;

        let record = entry.value_mut();
        if !record.pending.is_empty() {
            record.reads += 1;
            if record.reads >= profile.settle_reads {
                record.reads = 0;
                match record.pending.pop_front() {
                    Some(Step::State(state)) => record.set_state(&state),
                    Some(Step::Remove) => {
                        drop(entry);
                        self.records.remove(id.as_str());
                        debug!(collection, id = %id, "Record removed");
                        return Err(Self::not_found(collection, id.as_str()));
                    }
                    None => {}
                }
            }
        }

        Ok(Json::Object(record.body.clone()))
    }

    async fn create(&self, collection: &str, request: RawRequest) -> Result<MutationResponse> {
        self.take_transient()?;
        self.take_rejection(collection, "")?;

        let profile = self.profile(collection);
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = ResourceId::new(format!("ocid1.{}.mem.{}", profile.ocid_prefix, n));

        let mut body = Map::new();
        merge(&mut body, request)?;
        body.insert("id".to_string(), Json::String(id.to_string()));
        body.insert(
            "timeCreated".to_string(),
            Json::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        if profile.regional {
            body.insert("region".to_string(), Json::String(self.config.region.clone()));
        }

        let mut record = Record {
            seq: n,
            collection: collection.to_string(),
            body,
            pending: VecDeque::from([Step::State(profile.settled_state.clone())]),
            reads: 0,
        };
        record.set_state(&profile.initial_state);
        let snapshot = Json::Object(record.body.clone());
        self.records.insert(id.to_string(), record);

        info!(collection, id = %id, "Created record");

        let work_request = profile
            .work_requests
            .then(|| self.open_work_request(&id));

        Ok(MutationResponse {
            resource: (profile.create_body || work_request.is_none()).then_some(snapshot),
            work_request,
        })
    }

    async fn update(
        &self,
        collection: &str,
        id: &ResourceId,
        request: RawRequest,
    ) -> Result<MutationResponse> {
        self.take_transient()?;
        self.take_rejection(collection, id.as_str())?;

        let profile = self.profile(collection);
        let snapshot = {
            let mut entry = self
                .records
                .get_mut(id.as_str())
                .filter(|r| r.collection == collection)
                .ok_or_else(|| Self::not_found(collection, id.as_str()))?;
            merge(&mut entry.body, request)?;
            Json::Object(entry.body.clone())
        };

        debug!(collection, id = %id, "Updated record");

        let work_request = profile.work_requests.then(|| self.open_work_request(id));
        Ok(MutationResponse {
            resource: Some(snapshot),
            work_request,
        })
    }

    async fn delete(&self, collection: &str, id: &ResourceId) -> Result<Option<WorkRequestHandle>> {
        self.take_transient()?;

        let profile = self.profile(collection);
        {
            let mut entry = self
                .records
                .get_mut(id.as_str())
                .filter(|r| r.collection == collection)
                .ok_or_else(|| Self::not_found(collection, id.as_str()))?;

            let record = entry.value_mut();
            let already_gone = match &profile.deletion {
                Deletion::Tombstone(state) | Deletion::Remove(state) => {
                    record.body.get("lifecycleState").map(render_json).as_deref()
                        == Some(state.as_str())
                }
            };
            if !already_gone {
                record.set_state(&profile.deleting_state);
                record.reads = 0;
                record.pending = match &profile.deletion {
                    Deletion::Tombstone(state) => VecDeque::from([Step::State(state.clone())]),
                    Deletion::Remove(state) => {
                        VecDeque::from([Step::State(state.clone()), Step::Remove])
                    }
                };
            }
        }

        info!(collection, id = %id, "Deleting record");

        Ok(profile.work_requests.then(|| self.open_work_request(id)))
    }

    async fn get_work_request(&self, handle: &WorkRequestHandle) -> Result<WorkRequest> {
        self.take_transient()?;

        let mut entry = self
            .work_requests
            .get_mut(handle.as_str())
            .ok_or_else(|| Self::not_found("workRequests", handle.as_str()))?;
        let wr = entry.value_mut();
        wr.polls += 1;

        let collection = self
            .records
            .get(wr.resource_id.as_str())
            .map(|r| r.collection.clone());
        let needed = collection
            .as_deref()
            .map(|c| self.profile(c).work_request_polls)
            .unwrap_or(1);

        let status = if self.stall.load(Ordering::SeqCst) {
            WorkRequestStatus::InProgress
        } else if wr.polls < needed {
            WorkRequestStatus::InProgress
        } else if wr.failure.is_some() {
            WorkRequestStatus::Failed
        } else {
            WorkRequestStatus::Succeeded
        };

        if status == WorkRequestStatus::Failed && !wr.resolved {
            if let Some(mut record) = self.records.get_mut(wr.resource_id.as_str()) {
                record.pending.clear();
                record.set_state("FAILED");
            }
        }
        wr.resolved = status.is_terminal();

        let percent = match status {
            WorkRequestStatus::Succeeded | WorkRequestStatus::Failed => 100.0,
            _ => (wr.polls as f32 / needed.max(1) as f32 * 100.0).min(99.0),
        };

        Ok(WorkRequest {
            handle: handle.clone(),
            status,
            resource_id: Some(wr.resource_id.clone()),
            percent_complete: Some(percent),
            failure: if status == WorkRequestStatus::Failed {
                wr.failure.clone()
            } else {
                None
            },
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway() -> RawRequest {
        json!({"compartmentId": "c", "vcnId": "v", "isEnabled": true, "displayName": "gw"})
    }

    #[test]
    fn test_collection_profiles() {
        let remote = MemoryRemote::new();
        assert!(remote.profile("instances").work_requests);
        assert!(remote.profile("instances").create_body);

        let mut profile = remote.profile("instances");
        profile.create_body = false;
        remote.set_profile("instances", profile);

        let launch = json!({"compartmentId": "c", "shape": "VM.Standard2.1"});
        let response = tokio_test::block_on(remote.create("instances", launch)).unwrap();
        assert!(response.resource.is_none());
        assert!(response.work_request.is_some());

        let missing = tokio_test::block_on(remote.get("users", &ResourceId::new("ocid1.user.404")));
        assert!(missing.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_lifecycle_advances_on_read() {
        let remote = MemoryRemote::new();
        let created = remote.create("internetGateways", gateway()).await.unwrap();
        let body = created.resource.unwrap();
        assert_eq!(body["lifecycleState"], "PROVISIONING");
        assert!(created.work_request.is_none());

        let id = ResourceId::new(body["id"].as_str().unwrap());
        let read = remote.get("internetGateways", &id).await.unwrap();
        assert_eq!(read["lifecycleState"], "AVAILABLE");
    }

    #[tokio::test]
    async fn test_user_deletion_removes_record() {
        let remote = MemoryRemote::new();
        let created = remote
            .create("users", json!({"compartmentId": "t", "name": "a", "description": "d"}))
            .await
            .unwrap();
        let id = ResourceId::new(created.resource.unwrap()["id"].as_str().unwrap());
        remote.get("users", &id).await.unwrap();

        assert!(remote.delete("users", &id).await.unwrap().is_none());
        let deleted = remote.get("users", &id).await.unwrap();
        assert_eq!(deleted["lifecycleState"], "DELETED");
        assert!(remote.get("users", &id).await.unwrap_err().is_not_found());
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_pagination_and_query() {
        let remote = MemoryRemote::new();
        for i in 0..5 {
            let mut body = gateway();
            body["displayName"] = json!(if i % 2 == 0 { "even" } else { "odd" });
            remote.create("internetGateways", body).await.unwrap();
        }

        let scope = ListScope::new("c").with_limit(2);
        let first = remote.list("internetGateways", &scope, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_page.as_deref(), Some("2"));

        let last = remote
            .list("internetGateways", &scope, Some("4"))
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.next_page.is_none());

        let evens = remote
            .list(
                "internetGateways",
                &ListScope::new("c").with_query("displayName", "even"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(evens.items.len(), 3);
    }

    #[tokio::test]
    async fn test_rejection_and_transient_injection() {
        let remote = MemoryRemote::new();
        remote.reject_next_mutation(400, "InvalidParameter", "bad vcn");
        let err = remote
            .create("internetGateways", gateway())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { status: 400, .. }));

        remote.inject_transient_errors(1);
        let err = remote
            .create("internetGateways", gateway())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(remote.create("internetGateways", gateway()).await.is_ok());
    }
}
