//! The $batch worker: a batch Bundle fanned out over the other workers.
//!
//! Workers run on `(Parameters, OperationContext)` directly, so the
//! fan-out needs no synthetic HTTP round-trips. Per-entry failures
//! become per-entry OperationOutcome responses; the batch itself always
//! answers with a `batch-response` Bundle.

use crate::operations::validate_code::Target;
use crate::operations::{expand, lookup, subsumes, translate, validate_code, wire};
use crate::server::MountState;
use ferrotx_core::context::OperationContext;
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::parameters::Parameters;
use serde_json::{Value, json};

pub async fn run(state: &MountState, ctx: &OperationContext, bundle: &Value) -> TxResult<Value> {
    if bundle.get("resourceType").and_then(|v| v.as_str()) != Some("Bundle") {
        return Err(TxIssue::invalid("The request body must be a Bundle"));
    }
    if bundle.get("type").and_then(|v| v.as_str()) != Some("batch") {
        return Err(TxIssue::invalid("The Bundle type must be 'batch'"));
    }

    let entries = bundle
        .get("entry")
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[]);

    let mut responses = Vec::with_capacity(entries.len());
    for entry in entries {
        ctx.dead_check("batch entry")?;
        let mut entry_ctx = ctx.copy();
        let outcome = run_entry(state, &mut entry_ctx, entry).await;
        responses.push(match outcome {
            Ok(resource) => json!({
                "response": {"status": "200 OK"},
                "resource": resource,
            }),
            Err(issue) => json!({
                "response": {"status": issue.http_status.to_string()},
                "resource": issue.to_operation_outcome(),
            }),
        });
    }

    Ok(json!({
        "resourceType": "Bundle",
        "type": "batch-response",
        "entry": responses,
    }))
}

async fn run_entry(
    state: &MountState,
    ctx: &mut OperationContext,
    entry: &Value,
) -> TxResult<Value> {
    let request = entry
        .get("request")
        .ok_or_else(|| TxIssue::invalid("Batch entry without a request").with_status(422))?;
    let method = request.get("method").and_then(|v| v.as_str()).unwrap_or("GET");
    let url = request
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TxIssue::invalid("Batch entry request without a url").with_status(422))?;

    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };

    // Parameters: query string for GET, entry resource for POST, both
    // merged when present.
    let mut params = match query {
        Some(query) => wire::from_query(query)?,
        None => Parameters::new(),
    };
    if method.eq_ignore_ascii_case("POST") {
        if let Some(resource) = entry.get("resource") {
            params = wire::merge(params, Parameters::from_json(resource)?);
        }
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    let (resource_type, instance_id, operation) = match segments.as_slice() {
        [resource_type, operation] if operation.starts_with('$') => {
            (*resource_type, None, *operation)
        }
        [resource_type, id, operation] if operation.starts_with('$') => {
            (*resource_type, Some(*id), *operation)
        }
        _ => {
            return Err(TxIssue::invalid(format!(
                "Batch entry url '{url}' is not an operation request"
            ))
            .with_status(422));
        }
    };

    match (resource_type, operation) {
        ("CodeSystem", "$lookup") => lookup::run(state, ctx, &params, instance_id),
        ("CodeSystem", "$subsumes") => subsumes::run(state, ctx, &params, instance_id),
        ("CodeSystem", "$validate-code") => {
            validate_code::run(state, ctx, &params, Target::CodeSystem, instance_id)
        }
        ("ValueSet", "$validate-code") => {
            validate_code::run(state, ctx, &params, Target::ValueSet, instance_id)
        }
        ("ValueSet", "$expand") => expand::run(state, ctx, &params, instance_id).await,
        ("ConceptMap", "$translate") => translate::run(state, ctx, &params, instance_id),
        _ => Err(TxIssue::invalid(format!(
            "Operation '{operation}' on '{resource_type}' is not supported in a batch"
        ))
        .with_status(422)),
    }
}
