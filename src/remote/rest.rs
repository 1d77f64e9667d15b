//! REST Remote
//!
//! HTTP/JSON facade over the control plane API. Transient failures (429,
//! 5xx, transport errors) are retried with bounded exponential backoff,
//! honouring `Retry-After` when the service sends one.

use crate::domain::ports::{
    ListScope, MutationResponse, Page, RawRequest, RawResource, RemoteClient,
};
use crate::domain::state::{ResourceId, WorkRequest, WorkRequestHandle, WorkRequestStatus};
use crate::error::{Error, Result};
use crate::remote::classify_status;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const NEXT_PAGE_HEADER: &str = "opc-next-page";
const WORK_REQUEST_HEADER: &str = "opc-work-request-id";
const REQUEST_ID_HEADER: &str = "opc-request-id";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST facade
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestRemoteConfig {
    /// Base URL, e.g. `https://iaas.us-phoenix-1.oraclecloud.com/20160918`
    pub endpoint: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// First retry delay in milliseconds
    pub retry_initial_ms: u64,
    /// Longest single retry delay in seconds
    pub retry_max_interval_secs: u64,
    /// Give up retrying after this many seconds
    pub retry_max_elapsed_secs: u64,
    pub user_agent: String,
}

impl Default for RestRemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            timeout_secs: 60,
            retry_initial_ms: 500,
            retry_max_interval_secs: 30,
            retry_max_elapsed_secs: 120,
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkRequestBody {
    id: String,
    status: String,
    #[serde(default)]
    resources: Vec<WorkRequestResource>,
    percent_complete: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkRequestResource {
    identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkRequestErrorBody {
    #[serde(default)]
    code: String,
    message: String,
}

/// What a single call returned
#[derive(Debug)]
struct Reply {
    body: Option<serde_json::Value>,
    next_page: Option<String>,
    work_request: Option<WorkRequestHandle>,
}

// =============================================================================
// Helpers
// =============================================================================

/// `{endpoint}/{collection}[/{id}]`
fn resource_url(endpoint: &str, collection: &str, id: Option<&str>) -> String {
    let base = endpoint.trim_end_matches('/');
    match id {
        Some(id) => format!("{}/{}/{}", base, collection, urlencoding::encode(id)),
        None => format!("{}/{}", base, collection),
    }
}

/// Listing query string: compartment, server-side filters, limit and page
fn list_query(scope: &ListScope, page: Option<&str>) -> String {
    let mut params: Vec<(&str, String)> = vec![("compartmentId", scope.compartment_id.clone())];
    for (name, value) in &scope.query {
        params.push((name.as_str(), value.clone()));
    }
    if let Some(limit) = scope.limit {
        params.push(("limit", limit.to_string()));
    }
    if let Some(page) = page {
        params.push(("page", page.to_string()));
    }

    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Delay requested by a `Retry-After` header given in seconds
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn error_from_body(status: StatusCode, text: &str, kind: &str, id: &str) -> Error {
    let (code, message) = match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => (body.code, body.message),
        Err(_) => (
            status.canonical_reason().unwrap_or("Unknown").to_string(),
            text.to_string(),
        ),
    };
    classify_status(status.as_u16(), code, message, kind, id)
}

// =============================================================================
// REST Remote
// =============================================================================

/// HTTP/JSON control plane client
pub struct RestRemote {
    config: RestRemoteConfig,
    client: Client,
}

impl RestRemote {
    pub fn new(config: RestRemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Send one request, retrying transient failures
    async fn call(
        &self,
        method: Method,
        url: String,
        body: Option<&RawRequest>,
        kind: &str,
        id: &str,
    ) -> Result<Reply> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.retry_initial_ms))
            .with_max_interval(Duration::from_secs(self.config.retry_max_interval_secs))
            .with_max_elapsed_time(Some(Duration::from_secs(
                self.config.retry_max_elapsed_secs,
            )))
            .build();

        backoff::future::retry(policy, || async {
            match self.send_once(method.clone(), &url, body, kind, id).await {
                Ok(reply) => Ok(reply),
                Err((e, Some(delay))) if e.is_transient() => {
                    warn!(url = %url, error = %e, delay = ?delay, "Throttled, retrying");
                    Err(backoff::Error::retry_after(e, delay))
                }
                Err((e, _)) if e.is_transient() => {
                    warn!(url = %url, error = %e, "Transient failure, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err((e, _)) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&RawRequest>,
        kind: &str,
        id: &str,
    ) -> std::result::Result<Reply, (Error, Option<Duration>)> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header("accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| (Error::Http(e), None))?;
        let status = response.status();
        let headers = response.headers().clone();
        debug!(
            method = %method,
            url,
            status = status.as_u16(),
            request_id = ?header(&headers, REQUEST_ID_HEADER),
            "Remote call"
        );

        let text = response.text().await.map_err(|e| (Error::Http(e), None))?;

        if !status.is_success() {
            let delay = (status == StatusCode::TOO_MANY_REQUESTS)
                .then(|| retry_after(&headers))
                .flatten();
            return Err((error_from_body(status, &text, kind, id), delay));
        }

        let body = if text.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).map_err(|e| (Error::JsonParse(e), None))?)
        };

        Ok(Reply {
            body,
            next_page: header(&headers, NEXT_PAGE_HEADER),
            work_request: header(&headers, WORK_REQUEST_HEADER).map(WorkRequestHandle::new),
        })
    }

    fn expect_body(reply: Reply, what: &str) -> Result<serde_json::Value> {
        reply
            .body
            .ok_or_else(|| Error::Internal(format!("empty response body for {}", what)))
    }

    async fn work_request_failure(&self, handle: &WorkRequestHandle) -> Result<Option<String>> {
        let url = format!(
            "{}/errors",
            resource_url(&self.config.endpoint, "workRequests", Some(handle.as_str()))
        );
        let reply = self
            .call(Method::GET, url, None, "workRequests", handle.as_str())
            .await?;

        let errors: Vec<WorkRequestErrorBody> = match reply.body {
            Some(body) => serde_json::from_value(body)?,
            None => Vec::new(),
        };
        Ok(errors
            .into_iter()
            .map(|e| {
                if e.code.is_empty() {
                    e.message
                } else {
                    format!("{}: {}", e.code, e.message)
                }
            })
            .reduce(|a, b| format!("{}; {}", a, b)))
    }
}

#[async_trait]
impl RemoteClient for RestRemote {
    async fn list(
        &self,
        collection: &str,
        scope: &ListScope,
        page: Option<&str>,
    ) -> Result<Page> {
        let url = format!(
            "{}?{}",
            resource_url(&self.config.endpoint, collection, None),
            list_query(scope, page)
        );
        let reply = self.call(Method::GET, url, None, collection, "").await?;
        let next_page = reply.next_page.clone();

        let items = match reply.body {
            Some(serde_json::Value::Array(items)) => items,
            Some(serde_json::Value::Object(mut wrapper)) => match wrapper.remove("items") {
                Some(serde_json::Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        Ok(Page { items, next_page })
    }

    async fn get(&self, collection: &str, id: &ResourceId) -> Result<RawResource> {
        let url = resource_url(&self.config.endpoint, collection, Some(id.as_str()));
        let reply = self
            .call(Method::GET, url, None, collection, id.as_str())
            .await?;
        Self::expect_body(reply, collection)
    }

    async fn create(&self, collection: &str, request: RawRequest) -> Result<MutationResponse> {
        let url = resource_url(&self.config.endpoint, collection, None);
        let reply = self
            .call(Method::POST, url, Some(&request), collection, "")
            .await?;

        Ok(MutationResponse {
            resource: reply.body,
            work_request: reply.work_request,
        })
    }

    async fn update(
        &self,
        collection: &str,
        id: &ResourceId,
        request: RawRequest,
    ) -> Result<MutationResponse> {
        let url = resource_url(&self.config.endpoint, collection, Some(id.as_str()));
        let reply = self
            .call(Method::PUT, url, Some(&request), collection, id.as_str())
            .await?;

        Ok(MutationResponse {
            resource: reply.body,
            work_request: reply.work_request,
        })
    }

    async fn delete(&self, collection: &str, id: &ResourceId) -> Result<Option<WorkRequestHandle>> {
        let url = resource_url(&self.config.endpoint, collection, Some(id.as_str()));
        let reply = self
            .call(Method::DELETE, url, None, collection, id.as_str())
            .await?;
        Ok(reply.work_request)
    }

    async fn get_work_request(&self, handle: &WorkRequestHandle) -> Result<WorkRequest> {
        let url = resource_url(&self.config.endpoint, "workRequests", Some(handle.as_str()));
        let reply = self
            .call(Method::GET, url, None, "workRequests", handle.as_str())
            .await?;
        let body: WorkRequestBody =
            serde_json::from_value(Self::expect_body(reply, "workRequests")?)?;

        let status =
            WorkRequestStatus::from_remote(&body.status).ok_or_else(|| Error::Projection {
                kind: "workRequests".to_string(),
                attribute: "status".to_string(),
                reason: format!("unrecognised status '{}'", body.status),
            })?;

        let failure = if status == WorkRequestStatus::Failed {
            self.work_request_failure(handle).await?
        } else {
            None
        };

        Ok(WorkRequest {
            handle: WorkRequestHandle::new(body.id),
            status,
            resource_id: body
                .resources
                .into_iter()
                .find_map(|r| r.identifier)
                .map(ResourceId::new),
            percent_complete: body.percent_complete,
            failure,
        })
    }

    fn name(&self) -> &str {
        "rest"
    }
}
