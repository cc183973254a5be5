//! The $lookup worker.

use crate::server::MountState;
use ferrotx_core::context::OperationContext;
use ferrotx_core::fhir::Coding;
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::parameters::Parameters;
use ferrotx_terminology::provider::PropertyValue;
use serde_json::{Value, json};

/// Run $lookup over marshalled parameters. `instance_id` is set for
/// `CodeSystem/{id}/$lookup`.
pub fn run(
    state: &MountState,
    ctx: &mut OperationContext,
    params: &Parameters,
    instance_id: Option<&str>,
) -> TxResult<Value> {
    let options = super::make_options(state, ctx, params)?;
    let languages = options.languages();

    // code+system or a full coding.
    let coding = match params.coding_value("coding") {
        Some(coding) => coding.clone(),
        None => {
            let code = params
                .str_value("code")
                .ok_or_else(|| TxIssue::invalid("Missing 'code' or 'coding' parameter"))?;
            Coding {
                system: params.str_value("system").map(String::from),
                version: params.str_value("version").map(String::from),
                code: Some(code.to_string()),
                display: None,
            }
        }
    };
    let code = coding
        .code
        .as_deref()
        .ok_or_else(|| TxIssue::invalid("The coding has no code"))?;

    let csp = match instance_id {
        Some(id) => {
            let resource = state
                .provider
                .get_code_system_by_id(id)
                .ok_or_else(|| TxIssue::not_found(format!("CodeSystem '{id}' is not known")))?;
            state.provider.create_code_system_provider(ctx, &resource, &[])?
        }
        None => {
            let system = coding
                .system
                .as_deref()
                .ok_or_else(|| TxIssue::invalid("Missing 'system' parameter"))?;
            state
                .provider
                .get_code_system_provider(ctx, system, coding.version.as_deref(), &[])?
                .ok_or_else(|| {
                    TxIssue::not_found(format!(
                        "A definition for CodeSystem '{system}' could not be found"
                    ))
                })?
        }
    };

    ctx.dead_check("lookup")?;
    let located = csp.locate(code)?.ok_or_else(|| {
        TxIssue::code_invalid(state.provider.i18n().message(
            &languages,
            "unknown-code",
            &[code, csp.system()],
        ))
    })?;
    let concept = &located.concept;

    let mut out = vec![json!({"name": "name", "valueString": csp.system()})];
    if let Some(version) = csp.version() {
        out.push(json!({"name": "version", "valueString": version}));
    }
    if let Some(display) = csp.display(concept, &languages) {
        out.push(json!({"name": "display", "valueString": display}));
    }
    if let Some(definition) = csp.definition(concept) {
        if options.include_definition || options.properties.iter().any(|p| p == "definition") {
            out.push(json!({"name": "property", "part": [
                {"name": "code", "valueCode": "definition"},
                {"name": "value", "valueString": definition},
            ]}));
        }
    }

    for designation in csp.designations(concept) {
        let mut parts = vec![json!({"name": "value", "valueString": designation.value})];
        if let Some(language) = designation.language {
            parts.insert(0, json!({"name": "language", "valueCode": language}));
        }
        if let Some(use_coding) = designation.use_coding {
            parts.push(json!({
                "name": "use",
                "valueCoding": serde_json::to_value(&use_coding).unwrap_or(Value::Null),
            }));
        }
        out.push(json!({"name": "designation", "part": parts}));
    }

    let wanted: Option<&[String]> = if options.properties.is_empty() {
        None
    } else {
        Some(options.properties.as_slice())
    };
    for property in csp.properties(concept, wanted) {
        let value_part = match &property.value {
            PropertyValue::Coding(coding) => {
                json!({"name": "value", "valueCoding": serde_json::to_value(coding).unwrap_or(Value::Null)})
            }
            other => {
                let mut part = json!({"name": "value"});
                part[other.wire_key()] = match other {
                    PropertyValue::Boolean(b) => json!(b),
                    PropertyValue::Integer(i) => json!(i),
                    PropertyValue::Decimal(d) => json!(d),
                    _ => json!(other.as_display_string()),
                };
                part
            }
        };
        out.push(json!({"name": "property", "part": [
            {"name": "code", "valueCode": property.code},
            value_part,
        ]}));
    }

    if let Some(message) = located.message {
        out.push(json!({"name": "message", "valueString": message}));
    }

    Ok(json!({"resourceType": "Parameters", "parameter": out}))
}
