//! Internet Gateway
//!
//! `oci_core_internet_gateway`: a VCN's route to the internet. Lifecycle
//! driven (no work requests); deleted gateways linger as `TERMINATED`.

use crate::domain::ports::{RawRequest, RawResource, RequestVerb, StateProjector};
use crate::domain::schema::{AttributeSchema, ResourceSchema};
use crate::domain::state::{DesiredState, LifecycleState, ObservedState};
use crate::domain::value::ValueKind;
use crate::error::Result;
use crate::projection::{decode_body, encode_request, ObservedBuilder, RequestReader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KIND: &str = "oci_core_internet_gateway";
pub const COLLECTION: &str = "internetGateways";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternetGatewayBody {
    id: String,
    compartment_id: String,
    vcn_id: String,
    is_enabled: bool,
    display_name: Option<String>,
    lifecycle_state: String,
    time_created: Option<String>,
    #[serde(default)]
    freeform_tags: BTreeMap<String, String>,
    #[serde(default)]
    defined_tags: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateInternetGatewayDetails {
    compartment_id: String,
    vcn_id: String,
    is_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    freeform_tags: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    defined_tags: Option<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateInternetGatewayDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    is_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    freeform_tags: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    defined_tags: Option<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
}

// =============================================================================
// Projector
// =============================================================================

/// Projector for internet gateways
pub struct InternetGateway {
    schema: ResourceSchema,
}

impl InternetGateway {
    pub fn new() -> Self {
        let schema = ResourceSchema::new(KIND, COLLECTION)
            .attribute(
                "compartment_id",
                AttributeSchema::required(ValueKind::String).immutable(),
            )
            .attribute(
                "vcn_id",
                AttributeSchema::required(ValueKind::String).immutable(),
            )
            .attribute("enabled", AttributeSchema::required(ValueKind::Bool))
            .attribute("display_name", AttributeSchema::optional(ValueKind::String))
            .attribute("freeform_tags", AttributeSchema::optional(ValueKind::StringMap))
            .attribute("defined_tags", AttributeSchema::optional(ValueKind::StringMap))
            .attribute("time_created", AttributeSchema::computed(ValueKind::String))
            .deleted_when([LifecycleState::Terminated]);

        Self { schema }
    }
}

impl Default for InternetGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl StateProjector for InternetGateway {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn to_observed(&self, raw: &RawResource) -> Result<ObservedState> {
        let body: InternetGatewayBody = decode_body(KIND, raw)?;

        Ok(ObservedBuilder::new(KIND, &body.id, &body.lifecycle_state)
            .set("compartment_id", body.compartment_id)
            .set("vcn_id", body.vcn_id)
            .set("enabled", body.is_enabled)
            .set_opt("display_name", body.display_name)
            .freeform_tags("freeform_tags", &body.freeform_tags)
            .defined_tags("defined_tags", &body.defined_tags)
            .timestamp("time_created", body.time_created.as_deref())?
            .build())
    }

    fn to_request(&self, desired: &DesiredState, verb: RequestVerb) -> Result<RawRequest> {
        let reader = RequestReader::new(&self.schema, desired, verb);

        match verb {
            RequestVerb::Create => encode_request(&CreateInternetGatewayDetails {
                compartment_id: reader.required_string("compartment_id")?,
                vcn_id: reader.required_string("vcn_id")?,
                is_enabled: reader.required_bool("enabled")?,
                display_name: reader.string("display_name")?,
                freeform_tags: reader.string_map("freeform_tags")?,
                defined_tags: reader.defined_tags("defined_tags")?,
            }),
            RequestVerb::Update => encode_request(&UpdateInternetGatewayDetails {
                is_enabled: reader.bool("enabled")?,
                display_name: reader.string("display_name")?,
                freeform_tags: reader.string_map("freeform_tags")?,
                defined_tags: reader.defined_tags("defined_tags")?,
            }),
        }
    }
}
