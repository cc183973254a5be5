//! The $validate-code worker, CodeSystem and ValueSet modes.

use crate::server::MountState;
use ferrotx_core::context::OperationContext;
use ferrotx_core::fhir::Coding;
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::parameters::Parameters;
use ferrotx_terminology::{codings_from_inputs, validate_in_code_system, validate_in_value_set};
use serde_json::{Value, json};

/// Which resource type anchors the validation; explicit in the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    CodeSystem,
    ValueSet,
}

pub fn run(
    state: &MountState,
    ctx: &mut OperationContext,
    params: &Parameters,
    target: Target,
    instance_id: Option<&str>,
) -> TxResult<Value> {
    let options = super::make_options(state, ctx, params)?;

    let mut codings = codings_from_inputs(
        params.str_value("code"),
        params.str_value("system"),
        params.str_value("systemVersion").or_else(|| params.str_value("version")),
        params.str_value("display"),
        params.coding_value("coding"),
        params.codeable_concept_value("codeableConcept"),
    );
    if codings.is_empty() {
        return Err(TxIssue::invalid(
            "One of 'code', 'coding' or 'codeableConcept' must be supplied",
        ));
    }

    match target {
        Target::CodeSystem => {
            // The url parameter names the CodeSystem; instance form reads it
            // from the addressed resource.
            let system_url = match instance_id {
                Some(id) => {
                    let resource = state.provider.get_code_system_by_id(id).ok_or_else(|| {
                        TxIssue::not_found(format!("CodeSystem '{id}' is not known"))
                    })?;
                    resource
                        .get("url")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                        .ok_or_else(|| TxIssue::invalid(format!("CodeSystem '{id}' has no url")))?
                }
                None => match params.str_value("url") {
                    Some(url) => url.to_string(),
                    None => codings[0]
                        .system
                        .clone()
                        .ok_or_else(|| TxIssue::invalid("Missing 'url' parameter"))?,
                },
            };
            for coding in &mut codings {
                if coding.system.is_none() {
                    coding.system = Some(system_url.clone());
                } else if coding.system.as_deref() != Some(system_url.as_str()) {
                    return Err(TxIssue::invalid(format!(
                        "The coding system '{}' does not match the CodeSystem '{system_url}'",
                        coding.system.as_deref().unwrap_or(""),
                    )));
                }
            }
            let outcome = validate_in_code_system(&state.provider, ctx, &codings[0], &options)?;
            Ok(outcome.to_parameters(options.membership_only))
        }
        Target::ValueSet => {
            let value_set = resolve_value_set(state, ctx, params, instance_id)?;
            infer_system(&value_set, &mut codings, params)?;
            let text = params
                .codeable_concept_value("codeableConcept")
                .and_then(|cc| cc.text.clone());
            let outcome = validate_in_value_set(
                &state.provider,
                ctx,
                &value_set,
                &codings,
                text.as_deref(),
                &options,
            )?;
            Ok(outcome.to_parameters(options.membership_only))
        }
    }
}

fn resolve_value_set(
    state: &MountState,
    ctx: &mut OperationContext,
    params: &Parameters,
    instance_id: Option<&str>,
) -> TxResult<Value> {
    if let Some(id) = instance_id {
        return state
            .provider
            .get_value_set_by_id(id)
            .ok_or_else(|| TxIssue::not_found(format!("ValueSet '{id}' is not known")));
    }
    if let Some(inline) = params.resource_value("valueSet") {
        return Ok(inline.clone());
    }
    if let Some(url) = params.str_value("url") {
        let version = params.str_value("valueSetVersion");
        return state.provider.find_value_set(ctx, url, version).ok_or_else(|| {
            TxIssue::not_found(format!("A definition for ValueSet '{url}' could not be found"))
        });
    }
    // Implicit value set: the one the coding's CodeSystem is bound to, or
    // all of that system.
    if let Some(system) = params
        .str_value("system")
        .or_else(|| params.coding_value("coding").and_then(|c| c.system.as_deref()))
    {
        if let Some(csp) = state.provider.get_code_system_provider(ctx, system, None, &[])? {
            let _ = csp;
            return Ok(json!({
                "resourceType": "ValueSet",
                "compose": {"include": [{"system": system}]}
            }));
        }
    }
    Err(TxIssue::invalid(
        "One of 'url', 'valueSet' or an addressable instance is required",
    ))
}

/// `inferSystem`: when the coding has no system and the value set draws
/// from exactly one, use that one.
fn infer_system(value_set: &Value, codings: &mut [Coding], params: &Parameters) -> TxResult<()> {
    let wanted = params.bool_value("inferSystem").unwrap_or(false);
    if !wanted || codings.iter().all(|c| c.system.is_some()) {
        return Ok(());
    }
    let systems: Vec<&str> = value_set
        .get("compose")
        .and_then(|c| c.get("include"))
        .and_then(|i| i.as_array())
        .map(|includes| {
            includes
                .iter()
                .filter_map(|include| include.get("system").and_then(|s| s.as_str()))
                .collect()
        })
        .unwrap_or_default();
    let mut unique = systems.clone();
    unique.sort_unstable();
    unique.dedup();
    match unique.as_slice() {
        [single] => {
            for coding in codings.iter_mut() {
                if coding.system.is_none() {
                    coding.system = Some((*single).to_string());
                }
            }
            Ok(())
        }
        _ => Err(TxIssue::invalid(
            "inferSystem needs a value set drawing from exactly one code system",
        )),
    }
}
