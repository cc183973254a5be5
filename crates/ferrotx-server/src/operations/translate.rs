//! The $translate worker.

use crate::server::MountState;
use ferrotx_core::context::OperationContext;
use ferrotx_core::fhir::Coding;
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::parameters::Parameters;
use ferrotx_terminology::translate::{TranslationResult, to_parameters, translate};
use serde_json::Value;

/// Run $translate. Without an explicit map url every known concept map
/// is consulted, in library order; matches aggregate.
pub fn run(
    state: &MountState,
    ctx: &mut OperationContext,
    params: &Parameters,
    instance_id: Option<&str>,
) -> TxResult<Value> {
    let coding = match params.coding_value("coding") {
        Some(coding) => coding.clone(),
        None => match params.codeable_concept_value("codeableConcept") {
            Some(cc) => cc
                .coding
                .first()
                .cloned()
                .ok_or_else(|| TxIssue::invalid("codeableConcept has no coding"))?,
            None => {
                let code = params.str_value("code").ok_or_else(|| {
                    TxIssue::invalid("One of 'code', 'coding' or 'codeableConcept' is required")
                })?;
                let system = params
                    .str_value("system")
                    .ok_or_else(|| TxIssue::invalid("Missing 'system' parameter"))?;
                Coding::new(system, code)
            }
        },
    };

    let reverse = params.bool_value("reverse").unwrap_or(false);
    let target_system = params
        .str_value("targetsystem")
        .or_else(|| params.str_value("targetSystem"));

    let maps: Vec<Value> = if let Some(id) = instance_id {
        vec![state
            .provider
            .get_concept_map_by_id(id)
            .ok_or_else(|| TxIssue::not_found(format!("ConceptMap '{id}' is not known")))?]
    } else if let Some(url) = params.str_value("url") {
        let version = params.str_value("conceptMapVersion");
        vec![state.provider.find_concept_map(url, version).ok_or_else(|| {
            TxIssue::not_found(format!("A definition for ConceptMap '{url}' could not be found"))
        })?]
    } else {
        let mut maps = state.provider.list_concept_maps();
        // `source`/`target` scope the candidate maps by their value set
        // bindings when no url was given.
        if let Some(source) = params.str_value("source") {
            maps.retain(|m| canonical_matches(m, "sourceUri", "sourceCanonical", source));
        }
        if let Some(target) = params.str_value("target") {
            maps.retain(|m| canonical_matches(m, "targetUri", "targetCanonical", target));
        }
        maps
    };

    if maps.is_empty() {
        return Err(TxIssue::not_found("No concept map matches this request"));
    }

    let mut combined = TranslationResult::default();
    for map in &maps {
        ctx.dead_check("translate map")?;
        let result = translate(ctx, map, &coding, target_system, reverse)?;
        combined.matches.extend(result.matches);
    }
    combined.result = combined
        .matches
        .iter()
        .any(|m| m.relationship != "not-related-to");
    if combined.matches.is_empty() {
        combined.message = Some(format!(
            "No translation found for '{}'",
            coding.code.as_deref().unwrap_or("")
        ));
    }

    Ok(to_parameters(&combined, state.relationship_element))
}

fn canonical_matches(map: &Value, uri_key: &str, canonical_key: &str, wanted: &str) -> bool {
    map.get(uri_key)
        .or_else(|| map.get(canonical_key))
        .and_then(|v| v.as_str())
        .map(|v| v == wanted)
        .unwrap_or(false)
}
