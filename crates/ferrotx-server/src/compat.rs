//! Per-FHIR-version wire-shape normalization.
//!
//! The engines speak one internal dialect (R5-flavored relationships,
//! R4-flavored resources); this layer adjusts the few shapes that differ
//! between the mounted versions.

use ferrotx_core::fhir::FhirVersion;
use serde_json::Value;

/// Name of the translate match relationship element per version.
pub fn relationship_element(version: FhirVersion) -> &'static str {
    match version {
        FhirVersion::R3 | FhirVersion::R4 => "equivalence",
        FhirVersion::R5 | FhirVersion::R6 => "relationship",
    }
}

/// Normalize a ConceptMap read for the mount's version: element targets
/// carry `equivalence` up to R4 and `relationship` from R5 on.
pub fn normalize_concept_map(map: &Value, version: FhirVersion) -> Value {
    let mut out = map.clone();
    let to_r5 = matches!(version, FhirVersion::R5 | FhirVersion::R6);

    let Some(groups) = out.get_mut("group").and_then(|v| v.as_array_mut()) else {
        return out;
    };
    for group in groups {
        let Some(elements) = group.get_mut("element").and_then(|v| v.as_array_mut()) else {
            continue;
        };
        for element in elements {
            let Some(targets) = element.get_mut("target").and_then(|v| v.as_array_mut()) else {
                continue;
            };
            for target in targets {
                let Some(target) = target.as_object_mut() else {
                    continue;
                };
                if to_r5 {
                    if let Some(equivalence) = target.remove("equivalence") {
                        if !target.contains_key("relationship") {
                            let relationship = equivalence
                                .as_str()
                                .map(equivalence_to_relationship)
                                .unwrap_or("related-to");
                            target.insert("relationship".to_string(), Value::String(relationship.to_string()));
                        }
                    }
                } else if let Some(relationship) = target.remove("relationship") {
                    if !target.contains_key("equivalence") {
                        let equivalence = relationship
                            .as_str()
                            .map(relationship_to_equivalence)
                            .unwrap_or("relatedto");
                        target.insert("equivalence".to_string(), Value::String(equivalence.to_string()));
                    }
                }
            }
        }
    }
    out
}

fn equivalence_to_relationship(equivalence: &str) -> &'static str {
    match equivalence {
        "equal" | "equivalent" => "equivalent",
        "wider" | "subsumes" => "source-is-narrower-than-target",
        "narrower" | "specializes" => "source-is-broader-than-target",
        "unmatched" | "disjoint" => "not-related-to",
        _ => "related-to",
    }
}

fn relationship_to_equivalence(relationship: &str) -> &'static str {
    match relationship {
        "equivalent" => "equivalent",
        "source-is-narrower-than-target" => "wider",
        "source-is-broader-than-target" => "narrower",
        "not-related-to" => "unmatched",
        _ => "relatedto",
    }
}
