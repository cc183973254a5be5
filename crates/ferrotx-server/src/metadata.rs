//! CapabilityStatement rendering per mount.

use crate::server::MountState;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// The capability statement for one gateway mount: the supported
/// operations per resource type, nothing more.
pub fn capability_statement(state: &MountState) -> Value {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"));

    let operation = |name: &str, definition: &str| {
        json!({
            "name": name,
            "definition": format!("http://hl7.org/fhir/OperationDefinition/{definition}"),
        })
    };

    json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "date": now,
        "kind": "instance",
        "software": {
            "name": "FerroTX",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "implementation": {
            "description": "FerroTX terminology server",
            "url": state.mount_path,
        },
        "fhirVersion": state.provider.fhir_version().to_string(),
        "format": ["application/fhir+json"],
        "rest": [{
            "mode": "server",
            "resource": [
                {
                    "type": "CodeSystem",
                    "interaction": [{"code": "read"}, {"code": "search-type"}],
                    "searchParam": search_params(),
                    "operation": [
                        operation("lookup", "CodeSystem-lookup"),
                        operation("validate-code", "CodeSystem-validate-code"),
                        operation("subsumes", "CodeSystem-subsumes"),
                    ],
                },
                {
                    "type": "ValueSet",
                    "interaction": [{"code": "read"}, {"code": "search-type"}],
                    "searchParam": search_params(),
                    "operation": [
                        operation("expand", "ValueSet-expand"),
                        operation("validate-code", "ValueSet-validate-code"),
                    ],
                },
                {
                    "type": "ConceptMap",
                    "interaction": [{"code": "read"}, {"code": "search-type"}],
                    "searchParam": search_params(),
                    "operation": [
                        operation("translate", "ConceptMap-translate"),
                    ],
                },
            ],
            "interaction": [{"code": "batch"}],
        }],
    })
}

fn search_params() -> Value {
    json!([
        {"name": "url", "type": "uri"},
        {"name": "name", "type": "string"},
        {"name": "status", "type": "token"},
    ])
}
