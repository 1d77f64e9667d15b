//! Block Volume
//!
//! `oci_core_volume`. Size may grow in place; placement is fixed.

use crate::domain::ports::{RawRequest, RawResource, RequestVerb, StateProjector};
use crate::domain::schema::{AttributeSchema, ResourceSchema};
use crate::domain::state::{DesiredState, LifecycleState, ObservedState};
use crate::domain::value::ValueKind;
use crate::error::Result;
use crate::projection::{decode_body, encode_request, ObservedBuilder, RequestReader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KIND: &str = "oci_core_volume";
pub const COLLECTION: &str = "volumes";

type DefinedTags = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeBody {
    id: String,
    compartment_id: String,
    availability_domain: String,
    display_name: Option<String>,
    #[serde(rename = "sizeInGBs")]
    size_in_gbs: Option<serde_json::Number>,
    lifecycle_state: String,
    time_created: Option<String>,
    #[serde(default)]
    freeform_tags: BTreeMap<String, String>,
    #[serde(default)]
    defined_tags: DefinedTags,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateVolumeDetails {
    compartment_id: String,
    availability_domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(rename = "sizeInGBs", skip_serializing_if = "Option::is_none")]
    size_in_gbs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    freeform_tags: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    defined_tags: Option<DefinedTags>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateVolumeDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(rename = "sizeInGBs", skip_serializing_if = "Option::is_none")]
    size_in_gbs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    freeform_tags: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    defined_tags: Option<DefinedTags>,
}

/// Projector for block volumes
pub struct Volume {
    schema: ResourceSchema,
}

impl Volume {
    pub fn new() -> Self {
        let schema = ResourceSchema::new(KIND, COLLECTION)
            .attribute(
                "compartment_id",
                AttributeSchema::required(ValueKind::String).immutable(),
            )
            .attribute(
                "availability_domain",
                AttributeSchema::required(ValueKind::String).immutable(),
            )
            .attribute("display_name", AttributeSchema::optional(ValueKind::String))
            .attribute("size_in_gbs", AttributeSchema::optional(ValueKind::Number))
            .attribute("freeform_tags", AttributeSchema::optional(ValueKind::StringMap))
            .attribute("defined_tags", AttributeSchema::optional(ValueKind::StringMap))
            .attribute("time_created", AttributeSchema::computed(ValueKind::String))
            .deleted_when([LifecycleState::Terminated]);

        Self { schema }
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new()
    }
}

impl StateProjector for Volume {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn to_observed(&self, raw: &RawResource) -> Result<ObservedState> {
        let body: VolumeBody = decode_body(KIND, raw)?;

        Ok(ObservedBuilder::new(KIND, &body.id, &body.lifecycle_state)
            .set("compartment_id", body.compartment_id)
            .set("availability_domain", body.availability_domain)
            .set_opt("display_name", body.display_name)
            .set_opt("size_in_gbs", body.size_in_gbs)
            .freeform_tags("freeform_tags", &body.freeform_tags)
            .defined_tags("defined_tags", &body.defined_tags)
            .timestamp("time_created", body.time_created.as_deref())?
            .build())
    }

    fn to_request(&self, desired: &DesiredState, verb: RequestVerb) -> Result<RawRequest> {
        let reader = RequestReader::new(&self.schema, desired, verb);

        match verb {
            RequestVerb::Create => encode_request(&CreateVolumeDetails {
                compartment_id: reader.required_string("compartment_id")?,
                availability_domain: reader.required_string("availability_domain")?,
                display_name: reader.string("display_name")?,
                size_in_gbs: reader.i64("size_in_gbs")?,
                freeform_tags: reader.string_map("freeform_tags")?,
                defined_tags: reader.defined_tags("defined_tags")?,
            }),
            RequestVerb::Update => encode_request(&UpdateVolumeDetails {
                display_name: reader.string("display_name")?,
                size_in_gbs: reader.i64("size_in_gbs")?,
                freeform_tags: reader.string_map("freeform_tags")?,
                defined_tags: reader.defined_tags("defined_tags")?,
            }),
        }
    }
}
