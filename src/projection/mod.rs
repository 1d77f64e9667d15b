//! State Projection
//!
//! Shared building blocks for the per-kind projectors: decoding typed
//! remote bodies, assembling observed state and reading desired state
//! into request bodies.

pub mod normalize;

use crate::domain::ports::{RawRequest, RawResource, RequestVerb};
use crate::domain::schema::ResourceSchema;
use crate::domain::state::{DesiredState, LifecycleState, ObservedState, ResourceId};
use crate::domain::value::Value;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// Decode a raw response into the kind's typed body
pub fn decode_body<T: DeserializeOwned>(kind: &str, raw: &RawResource) -> Result<T> {
    T::deserialize(raw).map_err(|e| Error::Projection {
        kind: kind.to_string(),
        attribute: "<body>".into(),
        reason: e.to_string(),
    })
}

/// Encode a typed request body
pub fn encode_request<T: Serialize>(body: &T) -> Result<RawRequest> {
    Ok(serde_json::to_value(body)?)
}

// =============================================================================
// Observed State Builder
// =============================================================================

/// Assembles an [`ObservedState`] attribute by attribute
#[derive(Debug)]
pub struct ObservedBuilder {
    kind: String,
    id: ResourceId,
    lifecycle: LifecycleState,
    attributes: BTreeMap<String, Value>,
}

impl ObservedBuilder {
    pub fn new(kind: &str, id: &str, lifecycle: &str) -> Self {
        Self {
            kind: kind.to_string(),
            id: ResourceId::new(id),
            lifecycle: LifecycleState::from(lifecycle.to_string()),
            attributes: BTreeMap::new(),
        }
    }

    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into().normalized());
        self
    }

    pub fn set_opt<V: Into<Value>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(name, v),
            None => self,
        }
    }

    pub fn timestamp(self, name: &str, raw: Option<&str>) -> Result<Self> {
        match raw {
            Some(raw) => {
                let canonical = normalize::timestamp(raw).map_err(|reason| Error::Projection {
                    kind: self.kind.clone(),
                    attribute: name.to_string(),
                    reason,
                })?;
                Ok(self.set(name, canonical))
            }
            None => Ok(self),
        }
    }

    pub fn freeform_tags(self, name: &str, tags: &BTreeMap<String, String>) -> Self {
        let value = normalize::freeform_tags(tags);
        self.set(name, value)
    }

    pub fn defined_tags(
        self,
        name: &str,
        tags: &BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    ) -> Self {
        let value = normalize::defined_tags(tags);
        self.set(name, value)
    }

    pub fn build(mut self) -> ObservedState {
        self.attributes
            .insert("id".to_string(), Value::String(self.id.to_string()));
        self.attributes.insert(
            "state".to_string(),
            Value::String(self.lifecycle.to_string()),
        );

        ObservedState {
            id: self.id,
            lifecycle: self.lifecycle,
            attributes: self.attributes,
        }
    }
}

// =============================================================================
// Request Reader
// =============================================================================

/// Typed access to desired state while building a request body
///
/// For [`RequestVerb::Update`] immutable attributes read as absent, so
/// update bodies only ever carry mutable fields.
pub struct RequestReader<'a> {
    schema: &'a ResourceSchema,
    desired: &'a DesiredState,
    verb: RequestVerb,
}

impl<'a> RequestReader<'a> {
    pub fn new(schema: &'a ResourceSchema, desired: &'a DesiredState, verb: RequestVerb) -> Self {
        Self {
            schema,
            desired,
            verb,
        }
    }

    fn value(&self, name: &str) -> Option<&'a Value> {
        if self.verb == RequestVerb::Update
            && self.schema.get(name).map_or(false, |a| a.is_immutable())
        {
            return None;
        }
        self.desired.get(name)
    }

    fn mismatch(&self, name: &str, expected: &str, got: &Value) -> Error {
        Error::Projection {
            kind: self.schema.kind().to_string(),
            attribute: name.to_string(),
            reason: format!("expected {}, got {}", expected, got.kind()),
        }
    }

    fn missing(&self, name: &str) -> Error {
        Error::Projection {
            kind: self.schema.kind().to_string(),
            attribute: name.to_string(),
            reason: format!("required for {}", self.verb),
        }
    }

    pub fn string(&self, name: &str) -> Result<Option<String>> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.mismatch(name, "string", other)),
        }
    }

    pub fn required_string(&self, name: &str) -> Result<String> {
        self.string(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn bool(&self, name: &str) -> Result<Option<bool>> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.mismatch(name, "bool", other)),
        }
    }

    pub fn required_bool(&self, name: &str) -> Result<bool> {
        self.bool(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn i64(&self, name: &str) -> Result<Option<i64>> {
        match self.value(name) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.mismatch(name, "integer", v)),
        }
    }

    pub fn string_map(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::Map(entries)) => Ok(Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.render()))
                    .collect(),
            )),
            Some(other) => Err(self.mismatch(name, "map", other)),
        }
    }

    pub fn defined_tags(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, BTreeMap<String, serde_json::Value>>>> {
        match self.string_map(name)? {
            None => Ok(None),
            Some(flat) => normalize::nest_defined_tags(&flat)
                .map(Some)
                .map_err(|reason| Error::Projection {
                    kind: self.schema.kind().to_string(),
                    attribute: name.to_string(),
                    reason,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::AttributeSchema;
    use crate::domain::value::ValueKind;
    use assert_matches::assert_matches;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("test_kind", "things")
            .attribute(
                "compartment_id",
                AttributeSchema::required(ValueKind::String).immutable(),
            )
            .attribute("enabled", AttributeSchema::required(ValueKind::Bool))
    }

    #[test]
    fn test_builder_adds_identity_and_state() {
        let observed = ObservedBuilder::new("test_kind", "ocid1.thing.1", "AVAILABLE")
            .set("enabled", true)
            .set_opt("display_name", None::<String>)
            .build();

        assert_eq!(observed.lifecycle, LifecycleState::Available);
        assert_eq!(observed.get("id"), Some(&Value::from("ocid1.thing.1")));
        assert_eq!(observed.get("state"), Some(&Value::from("AVAILABLE")));
        assert!(observed.get("display_name").is_none());
    }

    #[test]
    fn test_builder_rejects_bad_timestamp() {
        let result = ObservedBuilder::new("test_kind", "x", "AVAILABLE")
            .timestamp("time_created", Some("not-a-time"));
        assert_matches!(result, Err(Error::Projection { attribute, .. }) if attribute == "time_created");
    }

    #[test]
    fn test_reader_hides_immutable_on_update() {
        let schema = schema();
        let desired = DesiredState::new()
            .with("compartment_id", "c")
            .with("enabled", true);

        let create = RequestReader::new(&schema, &desired, RequestVerb::Create);
        assert_eq!(create.required_string("compartment_id").unwrap(), "c");

        let update = RequestReader::new(&schema, &desired, RequestVerb::Update);
        assert_eq!(update.string("compartment_id").unwrap(), None);
        assert_eq!(update.bool("enabled").unwrap(), Some(true));
    }

    #[test]
    fn test_reader_type_mismatch() {
        let schema = schema();
        let desired = DesiredState::new().with("enabled", "yes");
        let reader = RequestReader::new(&schema, &desired, RequestVerb::Create);
        assert_matches!(reader.bool("enabled"), Err(Error::Projection { .. }));
        assert_matches!(reader.required_string("compartment_id"), Err(Error::Projection { .. }));
    }
}
