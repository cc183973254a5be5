//! Per-mount FHIR routing.
//!
//! Each configured endpoint gets one of these routers, bound to its own
//! version-pinned Provider. Handlers are thin: marshal, build the
//! context, call the worker, serialize.

use crate::metadata;
use crate::middleware::RequestId;
use crate::operations::validate_code::Target;
use crate::operations::{
    batch, complete, expand, fhir_response, issue_response, lookup, make_context, subsumes,
    translate, validate_code, wire,
};
use crate::search::{self, SearchQuery};
use crate::server::MountState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use ferrotx_core::context::OperationContext;
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::parameters::Parameters;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub fn router(state: Arc<MountState>) -> Router {
    Router::new()
        .route("/metadata", get(get_metadata))
        // CodeSystem
        .route("/CodeSystem", get(search_code_system))
        .route("/CodeSystem/_search", post(search_code_system_post))
        .route("/CodeSystem/$lookup", get(lookup_type).post(lookup_type))
        .route("/CodeSystem/$validate-code", get(validate_cs_type).post(validate_cs_type))
        .route("/CodeSystem/$subsumes", get(subsumes_type).post(subsumes_type))
        .route("/CodeSystem/{id}", get(read_code_system))
        .route("/CodeSystem/{id}/$lookup", get(lookup_instance).post(lookup_instance))
        .route(
            "/CodeSystem/{id}/$validate-code",
            get(validate_cs_instance).post(validate_cs_instance),
        )
        .route("/CodeSystem/{id}/$subsumes", get(subsumes_instance).post(subsumes_instance))
        // ValueSet
        .route("/ValueSet", get(search_value_set))
        .route("/ValueSet/_search", post(search_value_set_post))
        .route("/ValueSet/$expand", get(expand_type).post(expand_type))
        .route("/ValueSet/$validate-code", get(validate_vs_type).post(validate_vs_type))
        .route("/ValueSet/{id}", get(read_value_set))
        .route("/ValueSet/{id}/$expand", get(expand_instance).post(expand_instance))
        .route(
            "/ValueSet/{id}/$validate-code",
            get(validate_vs_instance).post(validate_vs_instance),
        )
        // ConceptMap
        .route("/ConceptMap", get(search_concept_map))
        .route("/ConceptMap/_search", post(search_concept_map_post))
        .route("/ConceptMap/$translate", get(translate_type).post(translate_type))
        .route("/ConceptMap/{id}", get(read_concept_map))
        .route("/ConceptMap/{id}/$translate", get(translate_instance).post(translate_instance))
        // batch
        .route("/", post(post_batch))
        .with_state(state)
}

/// Marshal one operation request: context from headers, parameters from
/// the query string and (for POST) the body.
fn marshal(
    state: &MountState,
    method: &Method,
    headers: &HeaderMap,
    request_id: Option<&RequestId>,
    query: Option<&str>,
    body: &Bytes,
) -> TxResult<(OperationContext, Parameters)> {
    let ctx = make_context(state, headers, request_id.map(|r| r.0.as_str()))?;
    let mut params = match query {
        Some(query) => wire::from_query(query)?,
        None => Parameters::new(),
    };
    if *method == Method::POST && !body.is_empty() {
        let content_type = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok());
        params = wire::merge(params, wire::from_body(body, content_type)?);
    }
    Ok((ctx, params))
}

async fn get_metadata(State(state): State<Arc<MountState>>) -> Response {
    fhir_response(metadata::capability_statement(&state))
}

// ---- search & read ----

async fn run_search(state: &MountState, resource_type: &str, pairs: HashMap<String, String>) -> Response {
    let result = SearchQuery::from_pairs(&pairs)
        .and_then(|query| search::search(state, resource_type, &query));
    complete(result)
}

async fn search_code_system(
    State(state): State<Arc<MountState>>,
    Query(pairs): Query<HashMap<String, String>>,
) -> Response {
    run_search(&state, "CodeSystem", pairs).await
}

async fn search_code_system_post(
    State(state): State<Arc<MountState>>,
    body: Bytes,
) -> Response {
    run_search(&state, "CodeSystem", form_pairs(&body)).await
}

async fn search_value_set(
    State(state): State<Arc<MountState>>,
    Query(pairs): Query<HashMap<String, String>>,
) -> Response {
    run_search(&state, "ValueSet", pairs).await
}

async fn search_value_set_post(State(state): State<Arc<MountState>>, body: Bytes) -> Response {
    run_search(&state, "ValueSet", form_pairs(&body)).await
}

async fn search_concept_map(
    State(state): State<Arc<MountState>>,
    Query(pairs): Query<HashMap<String, String>>,
) -> Response {
    run_search(&state, "ConceptMap", pairs).await
}

async fn search_concept_map_post(State(state): State<Arc<MountState>>, body: Bytes) -> Response {
    run_search(&state, "ConceptMap", form_pairs(&body)).await
}

fn form_pairs(body: &Bytes) -> HashMap<String, String> {
    url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

async fn read_code_system(
    State(state): State<Arc<MountState>>,
    Path(id): Path<String>,
) -> Response {
    complete(search::read(&state, "CodeSystem", &id))
}

async fn read_value_set(State(state): State<Arc<MountState>>, Path(id): Path<String>) -> Response {
    complete(search::read(&state, "ValueSet", &id))
}

async fn read_concept_map(
    State(state): State<Arc<MountState>>,
    Path(id): Path<String>,
) -> Response {
    complete(search::read(&state, "ConceptMap", &id))
}

// ---- operations ----

macro_rules! sync_op {
    ($name:ident, $instance:ident, $run:expr) => {
        async fn $name(
            State(state): State<Arc<MountState>>,
            method: Method,
            RawQuery(query): RawQuery,
            headers: HeaderMap,
            request_id: Option<Extension<RequestId>>,
            body: Bytes,
        ) -> Response {
            let run = $run;
            let result = marshal(
                &state,
                &method,
                &headers,
                request_id.as_ref().map(|e| &e.0),
                query.as_deref(),
                &body,
            )
            .and_then(|(mut ctx, params)| run(&state, &mut ctx, &params, None));
            complete(result)
        }

        async fn $instance(
            State(state): State<Arc<MountState>>,
            method: Method,
            Path(id): Path<String>,
            RawQuery(query): RawQuery,
            headers: HeaderMap,
            request_id: Option<Extension<RequestId>>,
            body: Bytes,
        ) -> Response {
            let run = $run;
            let result = marshal(
                &state,
                &method,
                &headers,
                request_id.as_ref().map(|e| &e.0),
                query.as_deref(),
                &body,
            )
            .and_then(|(mut ctx, params)| run(&state, &mut ctx, &params, Some(id.as_str())));
            complete(result)
        }
    };
}

sync_op!(
    lookup_type,
    lookup_instance,
    |state: &MountState, ctx: &mut OperationContext, params: &Parameters, id: Option<&str>| {
        lookup::run(state, ctx, params, id)
    }
);

sync_op!(
    subsumes_type,
    subsumes_instance,
    |state: &MountState, ctx: &mut OperationContext, params: &Parameters, id: Option<&str>| {
        subsumes::run(state, ctx, params, id)
    }
);

sync_op!(
    validate_cs_type,
    validate_cs_instance,
    |state: &MountState, ctx: &mut OperationContext, params: &Parameters, id: Option<&str>| {
        validate_code::run(state, ctx, params, Target::CodeSystem, id)
    }
);

sync_op!(
    validate_vs_type,
    validate_vs_instance,
    |state: &MountState, ctx: &mut OperationContext, params: &Parameters, id: Option<&str>| {
        validate_code::run(state, ctx, params, Target::ValueSet, id)
    }
);

sync_op!(
    translate_type,
    translate_instance,
    |state: &MountState, ctx: &mut OperationContext, params: &Parameters, id: Option<&str>| {
        translate::run(state, ctx, params, id)
    }
);

async fn expand_type(
    State(state): State<Arc<MountState>>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    request_id: Option<Extension<RequestId>>,
    body: Bytes,
) -> Response {
    run_expand(state, method, None, query, headers, request_id, body).await
}

async fn expand_instance(
    State(state): State<Arc<MountState>>,
    method: Method,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    request_id: Option<Extension<RequestId>>,
    body: Bytes,
) -> Response {
    run_expand(state, method, Some(id), query, headers, request_id, body).await
}

async fn run_expand(
    state: Arc<MountState>,
    method: Method,
    id: Option<String>,
    query: Option<String>,
    headers: HeaderMap,
    request_id: Option<Extension<RequestId>>,
    body: Bytes,
) -> Response {
    let marshalled = marshal(
        &state,
        &method,
        &headers,
        request_id.as_ref().map(|e| &e.0),
        query.as_deref(),
        &body,
    );
    match marshalled {
        Ok((mut ctx, params)) => {
            complete(expand::run(&state, &mut ctx, &params, id.as_deref()).await)
        }
        Err(issue) => issue_response(&issue),
    }
}

async fn post_batch(
    State(state): State<Arc<MountState>>,
    headers: HeaderMap,
    request_id: Option<Extension<RequestId>>,
    body: Bytes,
) -> Response {
    let result: Result<Value, TxIssue> = async {
        let ctx = make_context(&state, &headers, request_id.as_ref().map(|e| e.0.0.as_str()))?;
        let bundle: Value = serde_json::from_slice(&body)
            .map_err(|e| TxIssue::invalid(format!("Request body is not valid JSON: {e}")))?;
        batch::run(&state, &ctx, &bundle).await
    }
    .await;
    complete(result)
}
