//! Resource Registry
//!
//! Table of resource kind to projector, built once at startup and shared
//! by reference.

use crate::domain::ports::StateProjectorRef;
use crate::error::{Error, Result};
use crate::resources::{IdentityUser, Instance, InternetGateway, Volume};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registered resource kinds
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    projectors: BTreeMap<String, StateProjectorRef>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(InternetGateway::new()))
            .register(Arc::new(Instance::new()))
            .register(Arc::new(Volume::new()))
            .register(Arc::new(IdentityUser::new()))
    }

    /// Add a projector, keyed by its schema's kind
    pub fn register(mut self, projector: StateProjectorRef) -> Self {
        self.projectors
            .insert(projector.kind().to_string(), projector);
        self
    }

    pub fn get(&self, kind: &str) -> Result<StateProjectorRef> {
        self.projectors
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownResourceKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.projectors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.projectors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.projectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let registry = ResourceRegistry::with_defaults();
        assert_eq!(registry.len(), 4);
        assert_eq!(
            registry.get("oci_core_internet_gateway").unwrap().schema().collection(),
            "internetGateways"
        );
        assert!(registry.contains("oci_identity_user"));
    }

    #[test]
    fn test_unknown_kind() {
        let registry = ResourceRegistry::with_defaults();
        assert!(matches!(
            registry.get("oci_core_vcn"),
            Err(Error::UnknownResourceKind(kind)) if kind == "oci_core_vcn"
        ));
    }
}
