//! The ValueSet expansion engine.
//!
//! One pipeline serves two modes: full expansion materializes the ordered
//! code list; membership mode answers "is this one coding in the set"
//! and short-circuits at the first decisive include or exclude instead
//! of materializing anything.
//!
//! The deadline is polled per concept and at filter boundaries; the size
//! cap either fails `too-costly` or, under `limitedExpansion`, truncates
//! with an information issue attached.

use crate::params::OperationParameters;
use crate::provider::{CodeSystemProvider, ConceptRef, Designation, FilterContext, FilterOp};
use crate::provider_view::Provider;
use crate::versions::resolve_version;
use ferrotx_core::context::OperationContext;
use ferrotx_core::issue::{TxIssue, TxResult};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// One row of an expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionEntry {
    pub system: String,
    pub version: Option<String>,
    pub code: String,
    pub display: Option<String>,
    pub definition: Option<String>,
    pub designations: Vec<Designation>,
    pub inactive: bool,
    pub is_abstract: bool,
}

/// A materialized expansion plus its paging metadata and issues.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub identifier: String,
    pub timestamp: String,
    /// Exact when known; -1 signals unknown (a not-closed source).
    pub total: i64,
    pub offset: usize,
    pub contains: Vec<ExpansionEntry>,
    pub issues: Vec<TxIssue>,
    pub not_closed: bool,
    pub used_parameters: Vec<(String, Value)>,
}

impl Expansion {
    /// Attach this expansion to its ValueSet resource.
    pub fn to_value_set(&self, value_set: &Value, params: &OperationParameters) -> Value {
        let contains: Vec<Value> = self.contains.iter().map(entry_json).collect();

        let mut expansion = json!({
            "identifier": format!("urn:uuid:{}", self.identifier),
            "timestamp": self.timestamp,
            "offset": self.offset,
            "contains": contains,
        });
        if self.total >= 0 {
            expansion["total"] = json!(self.total);
        }
        // Standard markers: a truncated expansion carries the too-costly
        // extension, a provisional one the unclosed extension.
        let mut extensions = Vec::new();
        if self
            .issues
            .iter()
            .any(|i| i.details_text.as_deref() == Some("limited-expansion"))
        {
            extensions.push(json!({
                "url": "http://hl7.org/fhir/StructureDefinition/valueset-toocostly",
                "valueBoolean": true,
            }));
        }
        if self.not_closed {
            extensions.push(json!({
                "url": "http://hl7.org/fhir/StructureDefinition/valueset-unclosed",
                "valueBoolean": true,
            }));
        }
        if !extensions.is_empty() {
            expansion["extension"] = Value::Array(extensions);
        }
        if !self.used_parameters.is_empty() {
            expansion["parameter"] = Value::Array(
                self.used_parameters
                    .iter()
                    .map(|(name, value)| {
                        let mut p = json!({"name": name});
                        let key = match value {
                            Value::Bool(_) => "valueBoolean",
                            Value::Number(_) => "valueInteger",
                            _ => "valueString",
                        };
                        p[key] = value.clone();
                        p
                    })
                    .collect(),
            );
        }

        let mut out = value_set.clone();
        out["expansion"] = expansion;
        if params.generate_narrative {
            let name = value_set.get("name").and_then(|v| v.as_str()).unwrap_or("ValueSet");
            out["text"] = json!({
                "status": "generated",
                "div": format!(
                    "<div xmlns=\"http://www.w3.org/1999/xhtml\"><p>Expansion of {name}: {} codes</p></div>",
                    self.contains.len()
                ),
            });
        }
        out
    }
}

fn entry_json(entry: &ExpansionEntry) -> Value {
    let mut out = json!({
        "system": entry.system,
        "code": entry.code,
    });
    if let Some(ref version) = entry.version {
        out["version"] = json!(version);
    }
    if let Some(ref display) = entry.display {
        out["display"] = json!(display);
    }
    if entry.inactive {
        out["inactive"] = json!(true);
    }
    if entry.is_abstract {
        out["abstract"] = json!(true);
    }
    if !entry.designations.is_empty() {
        out["designation"] = Value::Array(
            entry
                .designations
                .iter()
                .map(|d| {
                    let mut designation = json!({"value": d.value});
                    if let Some(ref language) = d.language {
                        designation["language"] = json!(language);
                    }
                    if let Some(ref use_coding) = d.use_coding {
                        designation["use"] = serde_json::to_value(use_coding).unwrap_or(Value::Null);
                    }
                    designation
                })
                .collect(),
        );
    }
    // Definitions travel as a designation-like extension-free property on
    // the contains entry in this server.
    if let Some(ref definition) = entry.definition {
        out["extension"] = json!([{
            "url": "http://hl7.org/fhir/StructureDefinition/valueset-concept-definition",
            "valueString": definition,
        }]);
    }
    out
}

/// Expand a ValueSet. `offset`/`count` page the logical stream.
pub fn expand(
    provider: &Provider,
    ctx: &mut OperationContext,
    value_set: &Value,
    params: &OperationParameters,
    offset: usize,
    count: Option<usize>,
) -> TxResult<Expansion> {
    let url = value_set.get("url").and_then(|v| v.as_str()).map(String::from);
    if let Some(ref url) = url {
        ctx.see_context(url)?;
    }
    let result = expand_guarded(provider, ctx, value_set, params, offset, count);
    if let Some(ref url) = url {
        ctx.leave_context(url);
    }
    result
}

fn expand_guarded(
    provider: &Provider,
    ctx: &mut OperationContext,
    value_set: &Value,
    params: &OperationParameters,
    offset: usize,
    count: Option<usize>,
) -> TxResult<Expansion> {
    ctx.dead_check("expansion start")?;

    let mut issues: Vec<TxIssue> = Vec::new();
    let mut not_closed = false;
    let mut entries: Vec<ExpansionEntry> = Vec::new();

    if let Some(compose) = value_set.get("compose") {
        // Include phase.
        if let Some(includes) = compose.get("include").and_then(|v| v.as_array()) {
            for include in includes {
                let (mut included, closed) =
                    eval_include(provider, ctx, include, params, &mut issues)?;
                not_closed |= !closed;
                entries.append(&mut included);
            }
        }
        // Exclude phase: set-minus by (system, code).
        if let Some(excludes) = compose.get("exclude").and_then(|v| v.as_array()) {
            let mut excluded: HashSet<(String, String)> = HashSet::new();
            for exclude in excludes {
                ctx.dead_check("exclude phase")?;
                let (removed, _) = eval_include(provider, ctx, exclude, params, &mut issues)?;
                for entry in removed {
                    excluded.insert((entry.system, entry.code));
                }
            }
            entries.retain(|e| !excluded.contains(&(e.system.clone(), e.code.clone())));
        }
    } else if let Some(precomputed) = value_set.get("expansion") {
        // A ValueSet may ship a precomputed expansion instead of a compose.
        if let Some(contains) = precomputed.get("contains").and_then(|v| v.as_array()) {
            for item in contains {
                entries.push(ExpansionEntry {
                    system: item.get("system").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    version: item.get("version").and_then(|v| v.as_str()).map(String::from),
                    code: item.get("code").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    display: item.get("display").and_then(|v| v.as_str()).map(String::from),
                    definition: None,
                    designations: Vec::new(),
                    inactive: item.get("inactive").and_then(|v| v.as_bool()).unwrap_or(false),
                    is_abstract: item.get("abstract").and_then(|v| v.as_bool()).unwrap_or(false),
                });
            }
        }
    }

    // Active/inactive policy.
    if params.active_only {
        entries.retain(|e| !e.inactive);
    }

    // Free-text filter over code, display, and designations.
    if let Some(ref text) = params.text_filter {
        let needle = text.to_lowercase();
        entries.retain(|e| {
            e.code.to_lowercase().contains(&needle)
                || e.display
                    .as_ref()
                    .map(|d| d.to_lowercase().contains(&needle))
                    .unwrap_or(false)
                || e.designations
                    .iter()
                    .any(|d| d.value.to_lowercase().contains(&needle))
        });
    }

    // Deduplication by (system|version, code); first occurrence wins.
    let mut seen: HashSet<(String, String)> = HashSet::new();
    entries.retain(|e| {
        let key = (
            match &e.version {
                Some(version) => format!("{}|{version}", e.system),
                None => e.system.clone(),
            },
            e.code.clone(),
        );
        seen.insert(key)
    });

    // Size cap.
    if entries.len() > params.expansion_limit {
        if params.limited_expansion {
            entries.truncate(params.expansion_limit);
            issues.push(
                TxIssue::information(format!(
                    "The expansion is limited to the first {} codes",
                    params.expansion_limit
                ))
                .with_details("limited-expansion"),
            );
        } else {
            return Err(TxIssue::too_costly(format!(
                "The value set expansion exceeds the limit of {} codes",
                params.expansion_limit
            )));
        }
    }

    let total = if not_closed { -1 } else { entries.len() as i64 };

    // Paging.
    let paged: Vec<ExpansionEntry> = entries
        .into_iter()
        .skip(offset)
        .take(count.unwrap_or(usize::MAX))
        .collect();

    let mut used_parameters: Vec<(String, Value)> = Vec::new();
    if params.active_only {
        used_parameters.push(("activeOnly".into(), json!(true)));
    }
    if params.exclude_nested {
        used_parameters.push(("excludeNested".into(), json!(true)));
    }
    if params.include_designations {
        used_parameters.push(("includeDesignations".into(), json!(true)));
    }
    if params.limited_expansion {
        used_parameters.push(("limitedExpansion".into(), json!(true)));
    }
    if let Some(ref text) = params.text_filter {
        used_parameters.push(("filter".into(), json!(text)));
    }
    if offset > 0 {
        used_parameters.push(("offset".into(), json!(offset)));
    }
    if let Some(count) = count {
        used_parameters.push(("count".into(), json!(count)));
    }
    if not_closed {
        issues.push(
            TxIssue::information("The expansion is not closed: a filter over this code system is provisional")
                .with_details("not-closed"),
        );
    }

    ctx.mark("expand");
    Ok(Expansion {
        identifier: uuid::Uuid::new_v4().to_string(),
        timestamp: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z")),
        total,
        offset,
        contains: paged,
        issues,
        not_closed,
        used_parameters,
    })
}

/// Evaluate one compose include (or exclude): returns the entries it
/// selects and whether the selection is closed.
fn eval_include(
    provider: &Provider,
    ctx: &mut OperationContext,
    include: &Value,
    params: &OperationParameters,
    issues: &mut Vec<TxIssue>,
) -> TxResult<(Vec<ExpansionEntry>, bool)> {
    ctx.dead_check("include phase")?;

    let system = include.get("system").and_then(|v| v.as_str());
    let imports: Vec<&str> = include
        .get("valueSet")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|u| u.as_str()).collect())
        .unwrap_or_default();

    if system.is_none() && imports.is_empty() {
        return Err(TxIssue::invalid(
            "A compose include without a system must import value sets",
        ));
    }

    let mut closed = true;

    // System-side selection.
    let mut base: Option<Vec<ExpansionEntry>> = match system {
        Some(system) => {
            let requested = include.get("version").and_then(|v| v.as_str());
            let version = resolve_version(&params.version_rules, system, requested)?;
            let csp = provider
                .get_code_system_provider(ctx, system, version.as_deref(), &[])?
                .ok_or_else(|| {
                    TxIssue::not_found(format!(
                        "A definition for CodeSystem '{system}' could not be found"
                    ))
                })?;

            let entries = if let Some(concepts) = include.get("concept").and_then(|v| v.as_array())
            {
                enumerate_concepts(ctx, &csp, concepts, params, issues)?
            } else if let Some(filters) = include.get("filter").and_then(|v| v.as_array()) {
                let selection = compose_filters(ctx, &csp, filters)?;
                closed &= selection.is_closed();
                realize(ctx, &csp, selection.concepts(), params)?
            } else {
                let all = csp.iterate_all()?;
                closed &= !csp.filters_not_closed();
                realize(ctx, &csp, &all, params)?
            };
            Some(entries)
        }
        None => None,
    };

    // Imports: recursive expansion, intersected with the base and with
    // each other.
    for import in imports {
        let (import_url, import_version) = match import.split_once('|') {
            Some((url, version)) => (url, Some(version.to_string())),
            None => (import, None),
        };
        let version = resolve_version(
            &params.value_set_version_rules,
            import_url,
            import_version.as_deref(),
        )?;
        let sub_vs = provider
            .find_value_set(ctx, import_url, version.as_deref())
            .ok_or_else(|| {
                TxIssue::not_found(format!(
                    "A definition for ValueSet '{import_url}' could not be found"
                ))
            })?;

        let mut sub_ctx = ctx.copy();
        let sub = expand(provider, &mut sub_ctx, &sub_vs, params, 0, None)?;
        closed &= !sub.not_closed;
        issues.extend(sub.issues.iter().filter(|i| i.is_warning_or_less()).cloned());

        base = Some(match base {
            // Intersection with the sibling selection.
            Some(existing) => {
                let keep: HashSet<(String, String)> = sub
                    .contains
                    .iter()
                    .map(|e| (e.system.clone(), e.code.clone()))
                    .collect();
                existing
                    .into_iter()
                    .filter(|e| keep.contains(&(e.system.clone(), e.code.clone())))
                    .collect()
            }
            None => sub.contains,
        });
    }

    Ok((base.unwrap_or_default(), closed))
}

/// Enumerated `concept[]` include: emit in enumeration order, resolving
/// displays from the code system when absent.
fn enumerate_concepts(
    ctx: &OperationContext,
    csp: &Arc<dyn CodeSystemProvider>,
    concepts: &[Value],
    params: &OperationParameters,
    issues: &mut Vec<TxIssue>,
) -> TxResult<Vec<ExpansionEntry>> {
    let mut out = Vec::new();
    for concept in concepts {
        ctx.dead_check("enumerated include")?;
        let Some(code) = concept.get("code").and_then(|v| v.as_str()) else {
            continue;
        };
        let given_display = concept.get("display").and_then(|v| v.as_str());
        match csp.locate(code)? {
            Some(located) => {
                let mut entry = make_entry(csp, &located.concept, params);
                if let Some(display) = given_display {
                    entry.display = Some(display.to_string());
                }
                if !(params.exclude_not_for_ui && entry.is_abstract) {
                    out.push(entry);
                }
            }
            None => {
                issues.push(TxIssue::warning(
                    ferrotx_core::issue::IssueType::CodeInvalid,
                    format!(
                        "Unknown code '{code}' in the CodeSystem '{}'",
                        csp.system()
                    ),
                ));
                out.push(ExpansionEntry {
                    system: csp.system().to_string(),
                    version: csp.version().map(String::from),
                    code: code.to_string(),
                    display: given_display.map(String::from),
                    definition: None,
                    designations: Vec::new(),
                    inactive: false,
                    is_abstract: false,
                });
            }
        }
    }
    Ok(out)
}

/// AND-compose the filters of one include. The first filter's back-end
/// order wins; later filters intersect.
fn compose_filters(
    ctx: &OperationContext,
    csp: &Arc<dyn CodeSystemProvider>,
    filters: &[Value],
) -> TxResult<FilterContext> {
    let mut composed: Option<FilterContext> = None;
    for filter in filters {
        ctx.dead_check("filter boundary")?;
        let property = filter
            .get("property")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TxIssue::invalid("A compose filter must name a property"))?;
        let op = filter
            .get("op")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TxIssue::invalid("A compose filter must carry an op"))?;
        let value = match filter.get("value").and_then(|v| v.as_str()) {
            Some(value) => value,
            None => {
                // `_value` with a data-absent-reason extension is legal on
                // the wire but cannot be evaluated.
                return Err(TxIssue::not_supported(format!(
                    "A compose filter on '{property}' carries no value"
                )));
            }
        };
        let op = FilterOp::parse(op)?;
        let selection = csp.filter(property, op, value)?;
        composed = Some(match composed {
            Some(existing) => existing.intersect(&selection),
            None => selection,
        });
    }
    composed.ok_or_else(|| TxIssue::invalid("A compose include with an empty filter list"))
}

/// Realize concept handles into entries.
fn realize(
    ctx: &OperationContext,
    csp: &Arc<dyn CodeSystemProvider>,
    concepts: &[ConceptRef],
    params: &OperationParameters,
) -> TxResult<Vec<ExpansionEntry>> {
    let mut out = Vec::new();
    for concept in concepts {
        ctx.dead_check("concept realization")?;
        let entry = make_entry(csp, concept, params);
        if params.exclude_not_for_ui && entry.is_abstract {
            continue;
        }
        out.push(entry);
    }
    Ok(out)
}

fn make_entry(
    csp: &Arc<dyn CodeSystemProvider>,
    concept: &ConceptRef,
    params: &OperationParameters,
) -> ExpansionEntry {
    let languages = params.languages();
    let designations = if params.include_designations {
        let all = csp.designations(concept);
        if params.designations.is_empty() {
            all
        } else {
            all.into_iter()
                .filter(|d| {
                    params.designations.iter().any(|wanted| {
                        d.language.as_deref() == Some(wanted.as_str())
                            || d.use_coding
                                .as_ref()
                                .and_then(|u| u.code.as_deref())
                                .map(|c| c == wanted)
                                .unwrap_or(false)
                    })
                })
                .collect()
        }
    } else {
        Vec::new()
    };

    ExpansionEntry {
        system: csp.system().to_string(),
        version: csp.version().map(String::from),
        code: concept.code.clone(),
        display: csp.display(concept, &languages),
        definition: if params.include_definition {
            csp.definition(concept)
        } else {
            None
        },
        designations,
        inactive: csp.is_inactive(concept),
        is_abstract: csp.is_abstract(concept),
    }
}

/// Membership mode: decide whether one coding is in the value set
/// without materializing the expansion. Short-circuits on the first
/// decisive include, then checks excludes.
pub fn member_of(
    provider: &Provider,
    ctx: &mut OperationContext,
    value_set: &Value,
    params: &OperationParameters,
    system: &str,
    version: Option<&str>,
    code: &str,
) -> TxResult<bool> {
    let url = value_set.get("url").and_then(|v| v.as_str()).map(String::from);
    if let Some(ref url) = url {
        ctx.see_context(url)?;
    }
    let result = member_guarded(provider, ctx, value_set, params, system, version, code);
    if let Some(ref url) = url {
        ctx.leave_context(url);
    }
    result
}

fn member_guarded(
    provider: &Provider,
    ctx: &mut OperationContext,
    value_set: &Value,
    params: &OperationParameters,
    system: &str,
    version: Option<&str>,
    code: &str,
) -> TxResult<bool> {
    ctx.dead_check("membership")?;

    if let Some(compose) = value_set.get("compose") {
        let includes = compose
            .get("include")
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]);
        let mut included = false;
        for include in includes {
            if include_matches(provider, ctx, include, params, system, version, code)? {
                included = true;
                break;
            }
        }
        if !included {
            return Ok(false);
        }
        let excludes = compose
            .get("exclude")
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]);
        for exclude in excludes {
            if include_matches(provider, ctx, exclude, params, system, version, code)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    if let Some(expansion) = value_set.get("expansion") {
        if let Some(contains) = expansion.get("contains").and_then(|v| v.as_array()) {
            return Ok(contains.iter().any(|item| {
                item.get("system").and_then(|v| v.as_str()) == Some(system)
                    && item.get("code").and_then(|v| v.as_str()) == Some(code)
            }));
        }
    }

    Ok(false)
}

/// Does one include (or exclude) select the given coding?
fn include_matches(
    provider: &Provider,
    ctx: &mut OperationContext,
    include: &Value,
    params: &OperationParameters,
    system: &str,
    version: Option<&str>,
    code: &str,
) -> TxResult<bool> {
    ctx.dead_check("membership include")?;

    let include_system = include.get("system").and_then(|v| v.as_str());

    if let Some(include_system) = include_system {
        // Coding.system comparison is case-insensitive per FHIR; the code
        // system itself decides case for the code.
        if !include_system.eq_ignore_ascii_case(system) {
            return Ok(false);
        }
        let requested = include.get("version").and_then(|v| v.as_str());
        let effective = resolve_version(&params.version_rules, include_system, requested)?;
        if let (Some(effective), Some(coding_version)) = (effective.as_deref(), version) {
            if effective != coding_version {
                return Ok(false);
            }
        }

        let Some(csp) =
            provider.get_code_system_provider(ctx, include_system, effective.as_deref(), &[])?
        else {
            ctx.note(format!(
                "CodeSystem '{include_system}' referenced by the value set is not known"
            ));
            return Ok(false);
        };

        if let Some(concepts) = include.get("concept").and_then(|v| v.as_array()) {
            let hit = concepts.iter().any(|concept| {
                concept.get("code").and_then(|v| v.as_str()).map(|enumerated| {
                    if csp.case_sensitive() {
                        enumerated == code
                    } else {
                        enumerated.eq_ignore_ascii_case(code)
                    }
                }) == Some(true)
            });
            if !hit {
                return Ok(false);
            }
        } else if let Some(filters) = include.get("filter").and_then(|v| v.as_array()) {
            if csp.locate(code)?.is_none() {
                return Ok(false);
            }
            let selection = compose_filters(ctx, &csp, filters)?;
            if !selection.contains_code(code) {
                return Ok(false);
            }
        } else if csp.locate(code)?.is_none() {
            return Ok(false);
        }
    }

    // Imports must all contain the coding (intersection semantics).
    if let Some(imports) = include.get("valueSet").and_then(|v| v.as_array()) {
        for import in imports.iter().filter_map(|u| u.as_str()) {
            let (import_url, import_version) = match import.split_once('|') {
                Some((url, version)) => (url, Some(version)),
                None => (import, None),
            };
            let effective =
                resolve_version(&params.value_set_version_rules, import_url, import_version)?;
            let sub_vs = provider
                .find_value_set(ctx, import_url, effective.as_deref())
                .ok_or_else(|| {
                    TxIssue::not_found(format!(
                        "A definition for ValueSet '{import_url}' could not be found"
                    ))
                })?;
            let mut sub_ctx = ctx.copy();
            if !member_of(provider, &mut sub_ctx, &sub_vs, params, system, version, code)? {
                return Ok(false);
            }
        }
    } else if include_system.is_none() {
        return Ok(false);
    }

    Ok(true)
}
