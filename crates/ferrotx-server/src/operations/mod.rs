//! Operation workers.
//!
//! Every worker has the same shape: a synchronous
//! `run(state, ctx, params, …) -> Result<Value, TxIssue>` over already
//! marshalled Parameters, so `$batch` can fan out in-process without any
//! HTTP plumbing. The axum handlers in the gateway are thin async
//! wrappers that marshal, call, and serialize.

pub mod batch;
pub mod expand;
pub mod lookup;
pub mod subsumes;
pub mod translate;
pub mod validate_code;
pub mod wire;

use crate::server::MountState;
use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use ferrotx_core::context::OperationContext;
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::lang::parse_accept_language;
use ferrotx_terminology::OperationParameters;
use serde_json::Value;
use std::time::Duration;

pub const FHIR_JSON: &str = "application/fhir+json; charset=utf-8";

/// Build the per-request context from the inbound headers.
pub fn make_context(
    state: &MountState,
    headers: &HeaderMap,
    request_id: Option<&str>,
) -> TxResult<OperationContext> {
    let languages = match headers.get("accept-language").and_then(|v| v.to_str().ok()) {
        Some(header) => parse_accept_language(header)?,
        None => Default::default(),
    };
    let deadline = Duration::from_secs(state.limits.deadline_secs);
    Ok(match request_id {
        Some(id) => OperationContext::with_request_id(id, languages, deadline),
        None => OperationContext::new(languages, deadline),
    })
}

/// Engine options for this request: wire options plus server limits and
/// the header language context.
pub fn make_options(
    state: &MountState,
    ctx: &OperationContext,
    params: &ferrotx_core::parameters::Parameters,
) -> TxResult<OperationParameters> {
    let mut options = OperationParameters::from_parameters(params)?;
    options.expansion_limit = state.limits.expansion_limit;
    if !ctx.languages().is_empty() {
        options.http_languages = Some(ctx.languages().clone());
    }
    Ok(options)
}

/// 200 with a FHIR JSON body.
pub fn fhir_response(value: Value) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, FHIR_JSON)],
        Json(value),
    )
        .into_response()
}

/// Serialize an issue to its OperationOutcome with its own status.
pub fn issue_response(issue: &TxIssue) -> Response {
    let status =
        StatusCode::from_u16(issue.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, FHIR_JSON)],
        Json(issue.to_operation_outcome()),
    )
        .into_response()
}

/// The worker boundary: success becomes a Parameters/resource response,
/// an issue becomes an OperationOutcome with its status.
pub fn complete(result: Result<Value, TxIssue>) -> Response {
    match result {
        Ok(value) => fhir_response(value),
        Err(issue) => {
            if issue.http_status >= 500 {
                tracing::error!(error = %issue, "Operation failed");
            } else {
                tracing::debug!(error = %issue, "Operation rejected");
            }
            issue_response(&issue)
        }
    }
}
