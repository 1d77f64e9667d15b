//! Diff & Plan Evaluator
//!
//! Pure comparison of desired state against observed state.

use crate::domain::schema::ResourceSchema;
use crate::domain::state::{DesiredState, ObservedState};
use crate::domain::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// One attribute that differs between observed and desired state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    /// Observed value, absent if the remote does not report the attribute
    pub old: Option<Value>,
    pub new: Value,
}

/// What a reconciliation pass must do
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "attributes", rename_all = "lowercase")]
pub enum Plan {
    NoOp,
    /// In-place update of mutable attributes
    Update(BTreeMap<String, AttributeChange>),
    /// Immutable attributes changed; destroy and recreate
    Replace(Vec<String>),
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        matches!(self, Plan::NoOp)
    }

    /// Names of the attributes involved, sorted
    pub fn attributes(&self) -> Vec<&str> {
        match self {
            Plan::NoOp => Vec::new(),
            Plan::Update(changes) => changes.keys().map(String::as_str).collect(),
            Plan::Replace(attributes) => attributes.iter().map(String::as_str).collect(),
        }
    }

    /// One-line human readable description
    pub fn summary(&self) -> String {
        match self {
            Plan::NoOp => "no changes".to_string(),
            Plan::Update(changes) => {
                let parts: Vec<String> = changes
                    .iter()
                    .map(|(name, change)| match &change.old {
                        Some(old) => format!("{}: {} -> {}", name, old, change.new),
                        None => format!("{}: (unset) -> {}", name, change.new),
                    })
                    .collect();
                format!("update in place: {}", parts.join("; "))
            }
            Plan::Replace(attributes) => {
                format!("must be replaced: {}", attributes.join(", "))
            }
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Decide what must change to bring `observed` to `desired`
///
/// Computed and unknown attributes are ignored, as are optional attributes
/// the desired state leaves unset. Any immutable difference forces a
/// replacement.
pub fn plan(schema: &ResourceSchema, desired: &DesiredState, observed: &ObservedState) -> Plan {
    let mut replace = Vec::new();
    let mut update = BTreeMap::new();

    for (name, attr) in schema.attributes() {
        if attr.is_computed() {
            continue;
        }
        let Some(wanted) = desired.get(name) else {
            continue;
        };

        let current = observed.get(name);
        if current == Some(wanted) {
            continue;
        }

        if attr.is_immutable() {
            replace.push(name.clone());
        } else {
            update.insert(
                name.clone(),
                AttributeChange {
                    old: current.cloned(),
                    new: wanted.clone(),
                },
            );
        }
    }

    if !replace.is_empty() {
        replace.sort();
        Plan::Replace(replace)
    } else if !update.is_empty() {
        Plan::Update(update)
    } else {
        Plan::NoOp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::AttributeSchema;
    use crate::domain::state::{LifecycleState, ResourceId};
    use crate::domain::value::ValueKind;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("oci_core_internet_gateway", "internetGateways")
            .attribute(
                "vcn_id",
                AttributeSchema::required(ValueKind::String).immutable(),
            )
            .attribute(
                "compartment_id",
                AttributeSchema::required(ValueKind::String).immutable(),
            )
            .attribute("enabled", AttributeSchema::required(ValueKind::Bool))
            .attribute("display_name", AttributeSchema::optional(ValueKind::String))
            .attribute("time_created", AttributeSchema::computed(ValueKind::String))
    }

    fn observed() -> ObservedState {
        let mut attributes = BTreeMap::new();
        attributes.insert("compartment_id".to_string(), Value::from("c"));
        attributes.insert("vcn_id".to_string(), Value::from("v"));
        attributes.insert("enabled".to_string(), Value::from(false));
        attributes.insert("display_name".to_string(), Value::from("gw"));
        attributes.insert(
            "time_created".to_string(),
            Value::from("2026-10-19T10:00:00.000Z"),
        );
        ObservedState {
            id: ResourceId::new("ocid1.internetgateway.1"),
            lifecycle: LifecycleState::Available,
            attributes,
        }
    }

    fn desired() -> DesiredState {
        DesiredState::new()
            .with("compartment_id", "c")
            .with("vcn_id", "v")
            .with("enabled", false)
    }

    #[test]
    fn test_noop_ignores_unset_optional() {
        assert_eq!(plan(&schema(), &desired(), &observed()), Plan::NoOp);
    }

    #[test]
    fn test_update_mutable() {
        let desired = desired().with("enabled", true);
        let result = plan(&schema(), &desired, &observed());

        let Plan::Update(changes) = &result else {
            panic!("expected update, got {:?}", result);
        };
        assert_eq!(result.attributes(), vec!["enabled"]);
        assert_eq!(changes["enabled"].old, Some(Value::from(false)));
        assert_eq!(changes["enabled"].new, Value::from(true));
        assert_eq!(result.summary(), "update in place: enabled: false -> true");
    }

    #[test]
    fn test_replace_wins_over_update() {
        let desired = desired()
            .with("vcn_id", "v2")
            .with("compartment_id", "c2")
            .with("enabled", true);

        assert_eq!(
            plan(&schema(), &desired, &observed()),
            Plan::Replace(vec!["compartment_id".into(), "vcn_id".into()])
        );
    }

    #[test]
    fn test_deterministic() {
        let desired = desired().with("display_name", "other").with("enabled", true);
        let first = plan(&schema(), &desired, &observed());
        let second = plan(&schema(), &desired, &observed());
        assert_eq!(first, second);
        assert_eq!(first.attributes(), vec!["display_name", "enabled"]);
    }

    #[test]
    fn test_missing_observed_attribute_is_change() {
        let mut observed = observed();
        observed.attributes.remove("display_name");
        let desired = desired().with("display_name", "gw");

        let result = plan(&schema(), &desired, &observed);
        assert_eq!(
            result.summary(),
            "update in place: display_name: (unset) -> gw"
        );
    }
}
