//! Compute Instance
//!
//! `oci_core_instance`. Launch and terminate run as work requests; the
//! image, shape and placement are fixed at launch.

use crate::domain::ports::{RawRequest, RawResource, RequestVerb, StateProjector};
use crate::domain::schema::{AttributeSchema, ResourceSchema};
use crate::domain::state::{DesiredState, LifecycleState, ObservedState};
use crate::domain::value::ValueKind;
use crate::error::Result;
use crate::projection::{decode_body, encode_request, ObservedBuilder, RequestReader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KIND: &str = "oci_core_instance";
pub const COLLECTION: &str = "instances";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceBody {
    id: String,
    compartment_id: String,
    availability_domain: String,
    display_name: Option<String>,
    image_id: Option<String>,
    shape: String,
    region: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    lifecycle_state: String,
    time_created: Option<String>,
    #[serde(default)]
    freeform_tags: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LaunchInstanceDetails {
    compartment_id: String,
    availability_domain: String,
    shape: String,
    image_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    freeform_tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateInstanceDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    freeform_tags: Option<BTreeMap<String, String>>,
}

/// Projector for compute instances
pub struct Instance {
    schema: ResourceSchema,
}

impl Instance {
    pub fn new() -> Self {
        let immutable_string = || AttributeSchema::required(ValueKind::String).immutable();

        let schema = ResourceSchema::new(KIND, COLLECTION)
            .attribute("compartment_id", immutable_string())
            .attribute("availability_domain", immutable_string())
            .attribute("shape", immutable_string())
            .attribute("image", immutable_string())
            .attribute("display_name", AttributeSchema::optional(ValueKind::String))
            .attribute(
                "metadata",
                AttributeSchema::optional(ValueKind::StringMap).immutable(),
            )
            .attribute("freeform_tags", AttributeSchema::optional(ValueKind::StringMap))
            .attribute("region", AttributeSchema::computed(ValueKind::String))
            .attribute("time_created", AttributeSchema::computed(ValueKind::String))
            .deleted_when([LifecycleState::Terminated]);

        Self { schema }
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

impl StateProjector for Instance {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn to_observed(&self, raw: &RawResource) -> Result<ObservedState> {
        let body: InstanceBody = decode_body(KIND, raw)?;

        Ok(ObservedBuilder::new(KIND, &body.id, &body.lifecycle_state)
            .set("compartment_id", body.compartment_id)
            .set("availability_domain", body.availability_domain)
            .set("shape", body.shape)
            .set_opt("image", body.image_id)
            .set_opt("display_name", body.display_name)
            .set_opt("region", body.region)
            .freeform_tags("metadata", &body.metadata)
            .freeform_tags("freeform_tags", &body.freeform_tags)
            .timestamp("time_created", body.time_created.as_deref())?
            .build())
    }

    fn to_request(&self, desired: &DesiredState, verb: RequestVerb) -> Result<RawRequest> {
        let reader = RequestReader::new(&self.schema, desired, verb);

        match verb {
            RequestVerb::Create => encode_request(&LaunchInstanceDetails {
                compartment_id: reader.required_string("compartment_id")?,
                availability_domain: reader.required_string("availability_domain")?,
                shape: reader.required_string("shape")?,
                image_id: reader.required_string("image")?,
                display_name: reader.string("display_name")?,
                metadata: reader.string_map("metadata")?,
                freeform_tags: reader.string_map("freeform_tags")?,
            }),
            RequestVerb::Update => encode_request(&UpdateInstanceDetails {
                display_name: reader.string("display_name")?,
                freeform_tags: reader.string_map("freeform_tags")?,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_and_metadata_projection() {
        let raw = json!({
            "id": "ocid1.instance.1",
            "compartmentId": "c",
            "availabilityDomain": "Uocm:PHX-AD-1",
            "imageId": "ocid1.image.1",
            "shape": "VM.Standard2.1",
            "region": "phx",
            "metadata": {"user_data": "abc", "ssh_authorized_keys": "key"},
            "lifecycleState": "RUNNING",
        });

        let observed = Instance::new().to_observed(&raw).unwrap();
        assert_eq!(observed.get_rendered("image").as_deref(), Some("ocid1.image.1"));
        assert_eq!(observed.flatten()["metadata.%"], "2");
        assert_eq!(observed.lifecycle, LifecycleState::Running);
        assert!(observed.get("time_created").is_none());
    }

    #[test]
    fn test_launch_request_requires_image() {
        let desired = DesiredState::new()
            .with("compartment_id", "c")
            .with("availability_domain", "AD-1")
            .with("shape", "VM.Standard2.1");

        assert!(Instance::new()
            .to_request(&desired, RequestVerb::Create)
            .is_err());
    }

    #[test]
    fn test_update_request_only_mutable() {
        let desired = DesiredState::new()
            .with("shape", "VM.Standard2.2")
            .with("display_name", "web-1");

        let request = Instance::new()
            .to_request(&desired, RequestVerb::Update)
            .unwrap();
        assert_eq!(request, json!({"displayName": "web-1"}));
    }
}
