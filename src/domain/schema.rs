//! Resource Schemas
//!
//! Per-attribute classification (required / optional / computed, mutable /
//! immutable) used by projection, validation and planning.

use crate::domain::state::{DesiredState, LifecycleState};
use crate::domain::value::ValueKind;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Attribute Schema
// =============================================================================

/// Who supplies an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    /// Must be supplied by the user
    Required,
    /// May be supplied by the user, otherwise remote-defaulted
    Optional,
    /// Assigned by the remote only, never supplied
    Computed,
}

/// Whether an attribute can change without recreating the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    Mutable,
    /// Fixed at create time; a change forces replacement
    Immutable,
}

/// Schema of a single attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub kind: ValueKind,
    pub presence: Presence,
    pub mutability: Mutability,
}

impl AttributeSchema {
    pub fn required(kind: ValueKind) -> Self {
        Self {
            kind,
            presence: Presence::Required,
            mutability: Mutability::Mutable,
        }
    }

    pub fn optional(kind: ValueKind) -> Self {
        Self {
            kind,
            presence: Presence::Optional,
            mutability: Mutability::Mutable,
        }
    }

    pub fn computed(kind: ValueKind) -> Self {
        Self {
            kind,
            presence: Presence::Computed,
            mutability: Mutability::Immutable,
        }
    }

    /// Mark as fixed at create time
    pub fn immutable(mut self) -> Self {
        self.mutability = Mutability::Immutable;
        self
    }

    pub fn is_computed(&self) -> bool {
        self.presence == Presence::Computed
    }

    pub fn is_required(&self) -> bool {
        self.presence == Presence::Required
    }

    pub fn is_immutable(&self) -> bool {
        self.mutability == Mutability::Immutable
    }
}

// =============================================================================
// Resource Schema
// =============================================================================

/// Schema of a resource kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// User-facing kind name (e.g. `oci_core_internet_gateway`)
    kind: String,
    /// Remote collection name (e.g. `internetGateways`)
    collection: String,
    attributes: IndexMap<String, AttributeSchema>,
    /// Lifecycle states that mean the resource is gone
    deleted_states: Vec<LifecycleState>,
}

impl ResourceSchema {
    /// New schema; `id` and `state` are declared as computed
    pub fn new(kind: impl Into<String>, collection: impl Into<String>) -> Self {
        let mut attributes = IndexMap::new();
        attributes.insert("id".to_string(), AttributeSchema::computed(ValueKind::String));
        attributes.insert("state".to_string(), AttributeSchema::computed(ValueKind::String));

        Self {
            kind: kind.into(),
            collection: collection.into(),
            attributes,
            deleted_states: Vec::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, schema: AttributeSchema) -> Self {
        self.attributes.insert(name.into(), schema);
        self
    }

    pub fn deleted_when<I>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = LifecycleState>,
    {
        self.deleted_states.extend(states);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&String, &AttributeSchema)> {
        self.attributes.iter()
    }

    /// Whether `state` is a terminal "deleted" value for this kind
    pub fn is_deleted(&self, state: &LifecycleState) -> bool {
        self.deleted_states.contains(state)
    }

    pub fn deleted_states(&self) -> &[LifecycleState] {
        &self.deleted_states
    }

    /// Validate user input and coerce scalars to their declared kinds
    pub fn conform(&self, desired: &DesiredState) -> Result<DesiredState> {
        let mut conformed = DesiredState::new();

        for (name, value) in desired.iter() {
            let attr = self.attributes.get(name).ok_or_else(|| Error::Validation {
                kind: self.kind.clone(),
                reason: format!("unknown attribute '{}'", name),
            })?;

            if attr.is_computed() {
                return Err(Error::Validation {
                    kind: self.kind.clone(),
                    reason: format!("attribute '{}' is computed and cannot be set", name),
                });
            }

            let coerced = value.clone().coerce(attr.kind).ok_or_else(|| Error::Validation {
                kind: self.kind.clone(),
                reason: format!(
                    "attribute '{}' expects {}, got {}",
                    name,
                    attr.kind,
                    value.kind()
                ),
            })?;

            conformed.insert(name.clone(), coerced);
        }

        let missing: Vec<&str> = self
            .attributes
            .iter()
            .filter(|(name, attr)| attr.is_required() && !desired.contains(name))
            .map(|(name, _)| name.as_str())
            .collect();

        if !missing.is_empty() {
            return Err(Error::Validation {
                kind: self.kind.clone(),
                reason: format!("missing required attributes: {}", missing.join(", ")),
            });
        }

        Ok(conformed)
    }
}
