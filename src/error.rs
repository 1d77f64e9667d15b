//! Error types for the Cloud Reconciler
//!
//! Provides the classified error taxonomy shared by the remote facades,
//! the state projectors and the reconciliation engine.

use crate::domain::state::ResourceId;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the reconciler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid phase transition for {kind}: {from} -> {to}")]
    InvalidTransition {
        kind: String,
        from: String,
        to: String,
    },

    // =========================================================================
    // Remote Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{id}")]
    NotFound { kind: String, id: String },

    #[error("Remote rejected request ({status} {code}): {message}")]
    RemoteRejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Transient service error ({status}): {message}")]
    TransientService { status: u16, message: String },

    // =========================================================================
    // Operation Errors
    // =========================================================================
    #[error("{operation} timed out after {}s ({polls} polls)", .waited.as_secs())]
    OperationTimedOut {
        operation: String,
        waited: Duration,
        polls: u32,
        resource_id: Option<ResourceId>,
    },

    #[error("{operation} failed: {reason}")]
    OperationFailed {
        operation: String,
        reason: String,
        resource_id: Option<ResourceId>,
    },

    #[error("{operation} cancelled")]
    OperationCancelled {
        operation: String,
        resource_id: Option<ResourceId>,
    },

    #[error("{kind} requires replacement, immutable attributes changed: {}", .attributes.join(", "))]
    RequiresReplacement {
        kind: String,
        attributes: Vec<String>,
    },

    // =========================================================================
    // Schema & Projection Errors
    // =========================================================================
    #[error("Unknown resource kind: {0}")]
    UnknownResourceKind(String),

    #[error("Validation failed for {kind}: {reason}")]
    Validation { kind: String, reason: String },

    #[error("Projection failed for {kind}.{attribute}: {reason}")]
    Projection {
        kind: String,
        attribute: String,
        reason: String,
    },

    // =========================================================================
    // Transport & Parse Errors
    // =========================================================================
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the caller should do with a failed reconciliation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry the step with backoff
    Retry,
    /// Destroy and recreate the resource
    Replace,
    /// A remote object was left behind and should be cleaned up
    Cleanup,
    /// Report to the user, do not retry automatically
    Surface,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::TransientService { .. } | Error::Http(_) => ErrorAction::Retry,

            Error::RequiresReplacement { .. } => ErrorAction::Replace,

            // Partially created resources must not leak
            Error::OperationFailed {
                resource_id: Some(_),
                ..
            }
            | Error::OperationTimedOut {
                resource_id: Some(_),
                ..
            }
            | Error::OperationCancelled {
                resource_id: Some(_),
                ..
            } => ErrorAction::Cleanup,

            _ => ErrorAction::Surface,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.action(), ErrorAction::Retry)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientService { .. } | Error::Http(_))
    }

    /// Check if this error signals an absent remote resource
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Identity of a remote object created before the failure, if any
    pub fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            Error::OperationFailed { resource_id, .. }
            | Error::OperationTimedOut { resource_id, .. }
            | Error::OperationCancelled { resource_id, .. } => resource_id.as_ref(),
            _ => None,
        }
    }

    /// Attach a resource identity to operation errors that lack one
    pub fn with_resource_id(self, id: Option<ResourceId>) -> Self {
        match self {
            Error::OperationFailed {
                operation,
                reason,
                resource_id: None,
            } => Error::OperationFailed {
                operation,
                reason,
                resource_id: id,
            },
            Error::OperationTimedOut {
                operation,
                waited,
                polls,
                resource_id: None,
            } => Error::OperationTimedOut {
                operation,
                waited,
                polls,
                resource_id: id,
            },
            Error::OperationCancelled {
                operation,
                resource_id: None,
            } => Error::OperationCancelled {
                operation,
                resource_id: id,
            },
            other => other,
        }
    }
}

/// Result type alias for the reconciler
pub type Result<T> = std::result::Result<T, Error>;
