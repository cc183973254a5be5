//! HTTP middleware: request-id propagation and strict FHIR content
//! negotiation.

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Ensure each request has an X-Request-Id and mirror it on the response.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);

    let req_id_value = req
        .headers()
        .get(&header_name)
        .cloned()
        .unwrap_or_else(|| {
            HeaderValue::from_str(&Uuid::new_v4().to_string())
                .expect("uuid is a valid header value")
        });

    // Downstream handlers read the id from extensions for the context.
    req.extensions_mut().insert(RequestId(
        req_id_value.to_str().unwrap_or_default().to_string(),
    ));

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

/// Request id extension value.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Strict negotiation: FHIR JSON in and out. XML is answered with a
/// not-supported outcome rather than silently mis-served.
pub async fn content_negotiation(req: Request<Body>, next: Next) -> Response {
    let accept = req
        .headers()
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_ascii_lowercase());

    if let Some(ref accept) = accept {
        let json_ok = accept.contains("application/fhir+json")
            || accept.contains("application/json")
            || accept.contains("*/*");
        if !json_ok {
            let code = if accept.contains("xml") { "not-supported" } else { "invalid" };
            return error_response(
                StatusCode::NOT_ACCEPTABLE,
                code,
                "Only application/fhir+json is supported in Accept",
            );
        }
    }

    if matches!(*req.method(), Method::POST | Method::PUT) {
        let content_type = req
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());
        let ok = content_type
            .as_deref()
            .map(|s| {
                s.starts_with("application/fhir+json")
                    || s.starts_with("application/json")
                    || s.starts_with("application/x-www-form-urlencoded")
            })
            .unwrap_or(false);
        if !ok {
            return error_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "not-supported",
                "Content-Type must be application/fhir+json or application/x-www-form-urlencoded",
            );
        }
    }

    next.run(req).await
}

fn error_response(status: StatusCode, code: &str, msg: &str) -> Response {
    let body: Value = json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": "error",
            "code": code,
            "diagnostics": msg,
        }]
    });
    (status, Json(body)).into_response()
}
