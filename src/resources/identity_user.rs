//! Identity User
//!
//! `oci_identity_user`. Deleted users pass through `DELETED` and are then
//! dropped by the remote, so a later read is a 404.

use crate::domain::ports::{RawRequest, RawResource, RequestVerb, StateProjector};
use crate::domain::schema::{AttributeSchema, ResourceSchema};
use crate::domain::state::{DesiredState, LifecycleState, ObservedState};
use crate::domain::value::ValueKind;
use crate::error::Result;
use crate::projection::{decode_body, encode_request, ObservedBuilder, RequestReader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KIND: &str = "oci_identity_user";
pub const COLLECTION: &str = "users";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserBody {
    id: String,
    compartment_id: String,
    name: String,
    description: String,
    email: Option<String>,
    lifecycle_state: String,
    time_created: Option<String>,
    #[serde(default)]
    freeform_tags: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserDetails {
    compartment_id: String,
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    freeform_tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    freeform_tags: Option<BTreeMap<String, String>>,
}

/// Projector for identity users
pub struct IdentityUser {
    schema: ResourceSchema,
}

impl IdentityUser {
    pub fn new() -> Self {
        let schema = ResourceSchema::new(KIND, COLLECTION)
            .attribute(
                "compartment_id",
                AttributeSchema::required(ValueKind::String).immutable(),
            )
            .attribute(
                "name",
                AttributeSchema::required(ValueKind::String).immutable(),
            )
            .attribute("description", AttributeSchema::required(ValueKind::String))
            .attribute("email", AttributeSchema::optional(ValueKind::String))
            .attribute("freeform_tags", AttributeSchema::optional(ValueKind::StringMap))
            .attribute("time_created", AttributeSchema::computed(ValueKind::String))
            .deleted_when([LifecycleState::Deleted]);

        Self { schema }
    }
}

impl Default for IdentityUser {
    fn default() -> Self {
        Self::new()
    }
}

impl StateProjector for IdentityUser {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn to_observed(&self, raw: &RawResource) -> Result<ObservedState> {
        let body: UserBody = decode_body(KIND, raw)?;

        Ok(ObservedBuilder::new(KIND, &body.id, &body.lifecycle_state)
            .set("compartment_id", body.compartment_id)
            .set("name", body.name)
            .set("description", body.description)
            .set_opt("email", body.email)
            .freeform_tags("freeform_tags", &body.freeform_tags)
            .timestamp("time_created", body.time_created.as_deref())?
            .build())
    }

    fn to_request(&self, desired: &DesiredState, verb: RequestVerb) -> Result<RawRequest> {
        let reader = RequestReader::new(&self.schema, desired, verb);

        match verb {
            RequestVerb::Create => encode_request(&CreateUserDetails {
                compartment_id: reader.required_string("compartment_id")?,
                name: reader.required_string("name")?,
                description: reader.required_string("description")?,
                email: reader.string("email")?,
                freeform_tags: reader.string_map("freeform_tags")?,
            }),
            RequestVerb::Update => encode_request(&UpdateUserDetails {
                description: reader.string("description")?,
                email: reader.string("email")?,
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
    fn test_deleted_state_is_terminal() {
        let user = IdentityUser::new();
        let raw = json!({
            "id": "ocid1.user.1",
            "compartmentId": "tenancy",
            "name": "alice",
            "description": "ops",
            "lifecycleState": "DELETED",
        });

        let observed = user.to_observed(&raw).unwrap();
        assert!(user.schema().is_deleted(&observed.lifecycle));
        assert!(!user.schema().is_deleted(&LifecycleState::Terminated));
    }

    #[test]
    fn test_missing_body_field_is_projection_error() {
        let raw = json!({"id": "ocid1.user.1", "lifecycleState": "ACTIVE"});
        let err = IdentityUser::new().to_observed(&raw).unwrap_err();
        assert!(err.to_string().contains("oci_identity_user"));
    }
}
