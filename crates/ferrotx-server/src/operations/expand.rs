//! The $expand worker.

use crate::server::MountState;
use ferrotx_core::context::OperationContext;
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::parameters::Parameters;
use ferrotx_terminology::cache::ExpansionKey;
use ferrotx_terminology::expand::expand;
use serde_json::Value;

/// Run $expand. Expansions of library value sets are memoized by
/// fingerprint; inline value sets are computed fresh every time.
pub async fn run(
    state: &MountState,
    ctx: &mut OperationContext,
    params: &Parameters,
    instance_id: Option<&str>,
) -> TxResult<Value> {
    let options = super::make_options(state, ctx, params)?;
    let offset = params.int_value("offset").unwrap_or(0).max(0) as usize;
    let count = params.int_value("count").and_then(|c| usize::try_from(c).ok());

    let (value_set, cacheable) = resolve_value_set(state, ctx, params, instance_id)?;

    if cacheable {
        let url = value_set.get("url").and_then(|v| v.as_str()).unwrap_or("");
        let version = value_set.get("version").and_then(|v| v.as_str());
        let key = ExpansionKey::new(url, version, options.fingerprint(), offset, count);

        let provider = state.provider.clone();
        let mut job_ctx = ctx.copy();
        let vs = value_set.clone();
        let opts = options.clone();
        let cached = state
            .provider
            .library()
            .expansion_cache()
            .get_or_compute(&key, move || {
                let expansion = expand(&provider, &mut job_ctx, &vs, &opts, offset, count)?;
                Ok(expansion.to_value_set(&vs, &opts))
            })
            .await?;
        return Ok(cached.as_ref().clone());
    }

    let expansion = expand(&state.provider, ctx, &value_set, &options, offset, count)?;
    Ok(expansion.to_value_set(&value_set, &options))
}

fn resolve_value_set(
    state: &MountState,
    ctx: &mut OperationContext,
    params: &Parameters,
    instance_id: Option<&str>,
) -> TxResult<(Value, bool)> {
    if let Some(id) = instance_id {
        let vs = state
            .provider
            .get_value_set_by_id(id)
            .ok_or_else(|| TxIssue::not_found(format!("ValueSet '{id}' is not known")))?;
        return Ok((vs, true));
    }
    if let Some(inline) = params.resource_value("valueSet") {
        return Ok((inline.clone(), false));
    }
    if let Some(url) = params.str_value("url") {
        let version = params.str_value("valueSetVersion");
        let vs = state.provider.find_value_set(ctx, url, version).ok_or_else(|| {
            TxIssue::not_found(format!("A definition for ValueSet '{url}' could not be found"))
        })?;
        return Ok((vs, true));
    }
    Err(TxIssue::invalid("Either 'url' or 'valueSet' is required"))
}
