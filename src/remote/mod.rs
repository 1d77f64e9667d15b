//! Remote Client Facades
//!
//! Adapters implementing [`RemoteClient`](crate::domain::ports::RemoteClient):
//! - Memory: simulated control plane for tests and standalone runs
//! - REST: HTTP/JSON control plane API

pub mod memory;
pub mod rest;

pub use memory::*;
pub use rest::*;

use crate::domain::ports::RemoteClientRef;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Map a remote failure status onto the error taxonomy
///
/// 404 on a resource is [`Error::NotFound`], 429 and 5xx are transient,
/// any other status is a rejection. A 404 on a collection-level call
/// (empty `id`) keeps the remote's code and message as a rejection.
pub fn classify_status(status: u16, code: String, message: String, kind: &str, id: &str) -> Error {
    match status {
        404 if !id.is_empty() => Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        },
        429 | 500..=599 => Error::TransientService { status, message },
        _ => Error::RemoteRejected {
            status,
            code,
            message,
        },
    }
}

/// Which facade to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    #[default]
    Memory,
    Rest,
}

impl FromStr for RemoteKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "memory" | "mem" => Ok(RemoteKind::Memory),
            "rest" | "http" => Ok(RemoteKind::Rest),
            _ => Err(Error::Configuration(format!(
                "unknown remote '{}', expected memory or rest",
                name
            ))),
        }
    }
}

/// Combined remote configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub kind: RemoteKind,
    pub memory: MemoryRemoteConfig,
    pub rest: RestRemoteConfig,
}

/// Factory for remote client facades
pub struct RemoteFactory;

impl RemoteFactory {
    /// Create the facade selected by `config.kind`
    pub fn create(config: &RemoteConfig) -> Result<RemoteClientRef> {
        match config.kind {
            RemoteKind::Memory => Ok(Arc::new(MemoryRemote::with_config(config.memory.clone()))),
            RemoteKind::Rest => Ok(Arc::new(RestRemote::new(config.rest.clone())?)),
        }
    }

    /// Create a facade by name
    pub fn by_name(name: &str, config: &RemoteConfig) -> Result<RemoteClientRef> {
        Self::create(&RemoteConfig {
            kind: name.parse()?,
            ..config.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(404, "NotAuthorizedOrNotFound".into(), "".into(), "users", "x")
            .is_not_found());
        assert!(classify_status(429, "TooManyRequests".into(), "".into(), "users", "").is_transient());
        assert!(classify_status(503, "".into(), "".into(), "users", "").is_transient());
        assert_matches!(
            classify_status(409, "Conflict".into(), "busy".into(), "users", ""),
            Error::RemoteRejected { status: 409, .. }
        );
        assert_matches!(
            classify_status(404, "NotAuthorizedOrNotFound".into(), "no such compartment".into(), "users", ""),
            Error::RemoteRejected { status: 404, ref code, ref message }
                if code == "NotAuthorizedOrNotFound" && message == "no such compartment"
        );
    }

    #[test]
    fn test_factory_by_name() {
        let remote = RemoteFactory::by_name("memory", &RemoteConfig::default()).unwrap();
        assert_eq!(remote.name(), "memory");
        assert!(RemoteFactory::by_name("grpc", &RemoteConfig::default()).is_err());
    }
}
