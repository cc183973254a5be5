//! Parameter marshalling: every invocation style (GET query string,
//! POST form-urlencoded, POST Parameters resource) reshapes into one
//! typed Parameters value before a worker runs.
//!
//! The primitive type of each parameter is fixed by name; a query
//! string has no types of its own.

use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::parameters::{ParamValue, Parameter, Parameters};
use serde_json::Value;

/// Wire type assigned to a parameter name.
fn wire_type(name: &str) -> WireType {
    match name {
        "url" | "system" | "source" | "target" | "targetsystem" | "targetSystem" | "valueSet"
        | "context" | "system-version" | "check-system-version" | "force-system-version"
        | "default-valueset-version" | "check-valueset-version" | "force-valueset-version" => {
            WireType::Uri
        }
        "code" | "codeA" | "codeB" | "displayLanguage" | "mode" | "property" | "designation"
        | "use" => WireType::Code,
        "offset" | "count" => WireType::Integer,
        "activeOnly" | "excludeNested" | "generateNarrative" | "limitedExpansion"
        | "excludeNotForUI" | "excludePostCoordinated" | "includeDesignations"
        | "includeDefinition" | "membershipOnly" | "default-to-latest-version"
        | "incomplete-ok" | "lenient-display-validation" | "abstract" | "inferSystem"
        | "reverse" => WireType::Boolean,
        _ => WireType::String,
    }
}

enum WireType {
    Uri,
    Code,
    String,
    Boolean,
    Integer,
}

fn typed_value(name: &str, raw: &str) -> TxResult<ParamValue> {
    Ok(match wire_type(name) {
        WireType::Uri => ParamValue::Uri(raw.to_string()),
        WireType::Code => ParamValue::Code(raw.to_string()),
        WireType::String => ParamValue::String(raw.to_string()),
        WireType::Boolean => match raw {
            "true" => ParamValue::Boolean(true),
            "false" => ParamValue::Boolean(false),
            _ => {
                return Err(TxIssue::invalid(format!(
                    "Parameter '{name}' must be true or false, not '{raw}'"
                )));
            }
        },
        WireType::Integer => ParamValue::Integer(raw.parse().map_err(|_| {
            TxIssue::invalid(format!("Parameter '{name}' must be an integer, not '{raw}'"))
        })?),
    })
}

/// Reshape a query string (or form-urlencoded body) into Parameters.
pub fn from_query(query: &str) -> TxResult<Parameters> {
    let mut params = Parameters::new();
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params.push(Parameter::new(name.as_ref(), typed_value(&name, &value)?));
    }
    Ok(params)
}

/// Reshape a POST body into Parameters. JSON bodies must be a
/// Parameters resource; form bodies reuse the query rules.
pub fn from_body(body: &[u8], content_type: Option<&str>) -> TxResult<Parameters> {
    let content_type = content_type.unwrap_or("application/fhir+json");
    if content_type.starts_with("application/x-www-form-urlencoded") {
        return from_query(std::str::from_utf8(body).map_err(|_| {
            TxIssue::invalid("Form body is not valid UTF-8")
        })?);
    }
    if body.is_empty() {
        return Ok(Parameters::new());
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| TxIssue::invalid(format!("Request body is not valid JSON: {e}")))?;
    Parameters::from_json(&value)
}

/// Merge query parameters over a body (GET parameters win on conflict,
/// matching the precedence the operations expect from instance urls).
pub fn merge(mut base: Parameters, extra: Parameters) -> Parameters {
    for parameter in extra.parameter {
        if base.first(&parameter.name).is_none() {
            base.parameter.push(parameter);
        }
    }
    base
}
