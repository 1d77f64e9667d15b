//! Synthetic-State Generator
//!
//! Declarative templates that expand into desired-state documents for
//! create and update scenarios.
//!
//! ```
//! use cloud_reconciler::representation::{FieldSelector, Phase, Representation};
//!
//! let gateway = Representation::new()
//!     .required("compartment_id", "ocid1.compartment.1")
//!     .required("vcn_id", "ocid1.vcn.1")
//!     .required_updatable("enabled", false, true)
//!     .optional_updatable("display_name", "MyInternetGateway", "displayName2");
//!
//! let create = gateway.generate(FieldSelector::RequiredOnly, Phase::Create);
//! assert_eq!(create.len(), 3);
//!
//! let update = gateway.generate(FieldSelector::RequiredAndOptional, Phase::Update);
//! assert_eq!(update.get("display_name").unwrap().render(), "displayName2");
//! ```

use crate::domain::state::DesiredState;
use crate::domain::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a field is always emitted or only with optionals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepType {
    Required,
    Optional,
}

/// Which value variant to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSelector {
    RequiredOnly,
    RequiredAndOptional,
}

impl FieldSelector {
    fn includes(&self, rep_type: RepType) -> bool {
        match self {
            FieldSelector::RequiredOnly => rep_type == RepType::Required,
            FieldSelector::RequiredAndOptional => true,
        }
    }
}

/// One template entry
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Attribute {
        rep_type: RepType,
        create: Value,
        /// Falls back to `create` when absent
        update: Option<Value>,
    },
    Group {
        rep_type: RepType,
        fields: Representation,
    },
}

impl Field {
    pub fn rep_type(&self) -> RepType {
        match self {
            Field::Attribute { rep_type, .. } | Field::Group { rep_type, .. } => *rep_type,
        }
    }

    fn generate(&self, selector: FieldSelector, phase: Phase) -> Option<Value> {
        if !selector.includes(self.rep_type()) {
            return None;
        }
        match self {
            Field::Attribute { create, update, .. } => Some(match (phase, update) {
                (Phase::Update, Some(update)) => update.clone(),
                _ => create.clone(),
            }),
            Field::Group {
                rep_type, fields, ..
            } => {
                let nested: BTreeMap<String, Value> = fields.entries(selector, phase).collect();
                if nested.is_empty() && *rep_type == RepType::Optional {
                    None
                } else {
                    Some(Value::Map(nested))
                }
            }
        }
    }
}

/// Ordered template of fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Representation {
    fields: IndexMap<String, Field>,
}

impl Representation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn required(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attribute(name, RepType::Required, value.into(), None)
    }

    pub fn required_updatable(
        self,
        name: impl Into<String>,
        create: impl Into<Value>,
        update: impl Into<Value>,
    ) -> Self {
        self.attribute(name, RepType::Required, create.into(), Some(update.into()))
    }

    pub fn optional(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attribute(name, RepType::Optional, value.into(), None)
    }

    pub fn optional_updatable(
        self,
        name: impl Into<String>,
        create: impl Into<Value>,
        update: impl Into<Value>,
    ) -> Self {
        self.attribute(name, RepType::Optional, create.into(), Some(update.into()))
    }

    pub fn group(self, name: impl Into<String>, rep_type: RepType, fields: Representation) -> Self {
        self.field(name, Field::Group { rep_type, fields })
    }

    fn attribute(
        self,
        name: impl Into<String>,
        rep_type: RepType,
        create: Value,
        update: Option<Value>,
    ) -> Self {
        self.field(
            name,
            Field::Attribute {
                rep_type,
                create,
                update,
            },
        )
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy with `name` added or replaced, keeping its position
    pub fn with_field(&self, name: impl Into<String>, field: Field) -> Self {
        self.clone().field(name, field)
    }

    /// Copy without `name`
    pub fn without(&self, name: &str) -> Self {
        let mut copy = self.clone();
        copy.fields.shift_remove(name);
        copy
    }

    fn entries(
        &self,
        selector: FieldSelector,
        phase: Phase,
    ) -> impl Iterator<Item = (String, Value)> + '_ {
        self.fields.iter().filter_map(move |(name, field)| {
            field
                .generate(selector, phase)
                .map(|value| (name.clone(), value))
        })
    }

    /// Expand into a desired-state document, in declaration order
    pub fn generate(&self, selector: FieldSelector, phase: Phase) -> DesiredState {
        self.entries(selector, phase).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> Representation {
        Representation::new()
            .required("compartment_id", "ocid1.compartment.1")
            .required_updatable("enabled", false, true)
            .optional_updatable("display_name", "MyInternetGateway", "displayName2")
            .optional("freeform_tags", Value::map([("Department", "Finance")]))
            .required("vcn_id", "ocid1.vcn.1")
    }

    fn names(desired: &DesiredState) -> Vec<&str> {
        desired.iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn test_required_only_create() {
        let desired = gateway().generate(FieldSelector::RequiredOnly, Phase::Create);
        assert_eq!(names(&desired), vec!["compartment_id", "enabled", "vcn_id"]);
        assert_eq!(desired.get("enabled"), Some(&Value::from(false)));
    }

    #[test]
    fn test_update_falls_back_to_create_value() {
        let desired = gateway().generate(FieldSelector::RequiredAndOptional, Phase::Update);
        assert_eq!(
            names(&desired),
            vec!["compartment_id", "enabled", "display_name", "freeform_tags", "vcn_id"]
        );
        assert_eq!(desired.get("enabled"), Some(&Value::from(true)));
        assert_eq!(desired.get("display_name"), Some(&Value::from("displayName2")));
        assert_eq!(
            desired.get("freeform_tags"),
            Some(&Value::map([("Department", "Finance")]))
        );
    }

    #[test]
    fn test_deterministic() {
        let a = gateway().generate(FieldSelector::RequiredAndOptional, Phase::Create);
        let b = gateway().generate(FieldSelector::RequiredAndOptional, Phase::Create);
        assert_eq!(a, b);
    }

    #[test]
    fn test_groups() {
        let source = Representation::new()
            .required("source_type", "image")
            .optional("boot_volume_size_in_gbs", 60);
        let agent = Representation::new().optional("is_monitoring_disabled", false);
        let instance = Representation::new()
            .required("shape", "VM.Standard2.1")
            .group("source_details", RepType::Required, source)
            .group("agent_config", RepType::Required, agent.clone());

        let create = instance.generate(FieldSelector::RequiredOnly, Phase::Create);
        assert_eq!(
            create.get("source_details"),
            Some(&Value::map([("source_type", "image")]))
        );
        // required group with nothing selected stays as an empty map
        assert_eq!(create.get("agent_config"), Some(&Value::Map(BTreeMap::new())));

        let optional_group = Representation::new()
            .required("shape", "VM.Standard2.1")
            .group("agent_config", RepType::Optional, Representation::new());
        let full = optional_group.generate(FieldSelector::RequiredAndOptional, Phase::Create);
        assert!(!full.contains("agent_config"));
    }

    #[test]
    fn test_copy_helpers() {
        let base = gateway();
        let disabled = base.with_field(
            "enabled",
            Field::Attribute {
                rep_type: RepType::Required,
                create: Value::from(true),
                update: None,
            },
        );
        let without_tags = base.without("freeform_tags");

        assert_eq!(base.len(), 5);
        assert_eq!(without_tags.len(), 4);
        assert!(without_tags.get("freeform_tags").is_none());

        let desired = disabled.generate(FieldSelector::RequiredOnly, Phase::Update);
        assert_eq!(names(&desired), vec!["compartment_id", "enabled", "vcn_id"]);
        assert_eq!(desired.get("enabled"), Some(&Value::from(true)));
    }
}
