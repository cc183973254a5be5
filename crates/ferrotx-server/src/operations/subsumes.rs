//! The $subsumes worker.

use crate::server::MountState;
use ferrotx_core::context::OperationContext;
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::parameters::Parameters;
use serde_json::{Value, json};

/// Run $subsumes. `instance_id` is set for `CodeSystem/{id}/$subsumes`.
pub fn run(
    state: &MountState,
    ctx: &mut OperationContext,
    params: &Parameters,
    instance_id: Option<&str>,
) -> TxResult<Value> {
    let coding_a = params.coding_value("codingA");
    let coding_b = params.coding_value("codingB");

    let code_a = coding_a
        .and_then(|c| c.code.as_deref())
        .or_else(|| params.str_value("codeA"))
        .ok_or_else(|| TxIssue::invalid("Missing 'codeA' or 'codingA' parameter"))?;
    let code_b = coding_b
        .and_then(|c| c.code.as_deref())
        .or_else(|| params.str_value("codeB"))
        .ok_or_else(|| TxIssue::invalid("Missing 'codeB' or 'codingB' parameter"))?;

    // Cross-parameter constraint: both codings must agree on the system.
    let system_a = coding_a.and_then(|c| c.system.as_deref());
    let system_b = coding_b.and_then(|c| c.system.as_deref());
    if let (Some(a), Some(b)) = (system_a, system_b) {
        if !a.eq_ignore_ascii_case(b) {
            return Err(TxIssue::invalid(format!(
                "codingA and codingB are from different code systems: '{a}' vs '{b}'"
            )));
        }
    }

    let csp = match instance_id {
        Some(id) => {
            let resource = state
                .provider
                .get_code_system_by_id(id)
                .ok_or_else(|| TxIssue::not_found(format!("CodeSystem '{id}' is not known")))?;
            state.provider.create_code_system_provider(ctx, &resource, &[])?
        }
        None => {
            // Missing system is answered not-found, unlike a missing code
            // which is invalid: the operation has no resolvable subject
            // without it. Kept deliberately, matching long-standing server
            // behavior.
            let system = params
                .str_value("system")
                .or(system_a)
                .or(system_b)
                .ok_or_else(|| {
                    TxIssue::not_found("No code system could be determined for this request")
                })?;
            let version = params
                .str_value("version")
                .or_else(|| coding_a.and_then(|c| c.version.as_deref()));
            state
                .provider
                .get_code_system_provider(ctx, system, version, &[])?
                .ok_or_else(|| {
                    TxIssue::not_found(format!(
                        "A definition for CodeSystem '{system}' could not be found"
                    ))
                })?
        }
    };

    ctx.dead_check("subsumes")?;
    let locate = |code: &str| -> TxResult<_> {
        csp.locate(code)?.ok_or_else(|| {
            TxIssue::code_invalid(format!(
                "Unknown code '{code}' in the CodeSystem '{}'",
                csp.system()
            ))
        })
    };
    let a = locate(code_a)?;
    let b = locate(code_b)?;

    let outcome = csp.subsumes(&a.concept, &b.concept)?;
    Ok(json!({
        "resourceType": "Parameters",
        "parameter": [{"name": "outcome", "valueCode": outcome.as_code()}]
    }))
}
