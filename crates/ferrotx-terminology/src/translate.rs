//! The ConceptMap translation engine: one-hop, group-oriented.
//!
//! R4 element targets carry `equivalence`; R5 carries `relationship`.
//! The engine reads either and reports the R5 relationship vocabulary;
//! the gateway's compat layer renders the version-appropriate shape.

use ferrotx_core::context::OperationContext;
use ferrotx_core::fhir::Coding;
use ferrotx_core::issue::TxResult;
use serde_json::{Value, json};

/// One translation match.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationMatch {
    /// R5 relationship code (`equivalent`, `source-is-narrower-than-target`,
    /// `source-is-broader-than-target`, `related-to`, `not-related-to`).
    pub relationship: String,
    pub concept: Coding,
    /// Canonical url of the map that produced the match.
    pub source: Option<String>,
    /// dependsOn/product parts passed through untouched.
    pub depends_on: Vec<Value>,
    pub product: Vec<Value>,
}

/// Result of a $translate invocation.
#[derive(Debug, Clone, Default)]
pub struct TranslationResult {
    pub result: bool,
    pub message: Option<String>,
    pub matches: Vec<TranslationMatch>,
}

impl TranslationResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: false,
            message: Some(message.into()),
            matches: Vec::new(),
        }
    }
}

/// Map R4 equivalence codes onto the R5 relationship vocabulary.
fn normalize_relationship(raw: &str) -> &str {
    match raw {
        "equal" | "equivalent" => "equivalent",
        "wider" | "subsumes" => "source-is-narrower-than-target",
        "narrower" | "specializes" => "source-is-broader-than-target",
        "relatedto" | "related-to" | "inexact" => "related-to",
        "unmatched" | "disjoint" | "not-related-to" => "not-related-to",
        other => other,
    }
}

/// Translate one coding through one concept map.
///
/// `reverse` swaps the source/target orientation (R3/R4 reverse
/// translation). Group order decides match order; within an element,
/// target order is preserved. No transitive closure across maps.
pub fn translate(
    ctx: &OperationContext,
    concept_map: &Value,
    coding: &Coding,
    target_system: Option<&str>,
    reverse: bool,
) -> TxResult<TranslationResult> {
    ctx.dead_check("translate")?;

    let map_url = concept_map.get("url").and_then(|v| v.as_str());
    let source_system = coding.system.as_deref();
    let Some(code) = coding.code.as_deref() else {
        return Ok(TranslationResult::failure("No code supplied to translate"));
    };

    let mut matches: Vec<TranslationMatch> = Vec::new();
    let groups = concept_map
        .get("group")
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[]);

    for group in groups {
        ctx.dead_check("translate group")?;
        let group_source = group.get("source").and_then(|v| v.as_str());
        let group_target = group.get("target").and_then(|v| v.as_str());

        // Orientation: forward matches group.source against the coding's
        // system; reverse swaps.
        let (match_side, out_side) = if reverse {
            (group_target, group_source)
        } else {
            (group_source, group_target)
        };

        if let (Some(match_side), Some(source_system)) = (match_side, source_system) {
            if !match_side.eq_ignore_ascii_case(source_system) {
                continue;
            }
        }
        if let (Some(wanted), Some(out_side)) = (target_system, out_side) {
            if !wanted.eq_ignore_ascii_case(out_side) {
                continue;
            }
        }

        let elements = group
            .get("element")
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]);
        for element in elements {
            let element_code = element.get("code").and_then(|v| v.as_str());
            let targets = element
                .get("target")
                .and_then(|v| v.as_array())
                .map(|a| a.as_slice())
                .unwrap_or(&[]);

            if reverse {
                // Reverse: find targets whose code equals ours, emit the
                // element code.
                for target in targets {
                    if target.get("code").and_then(|v| v.as_str()) != Some(code) {
                        continue;
                    }
                    let Some(element_code) = element_code else {
                        continue;
                    };
                    matches.push(make_match(
                        target,
                        element_code,
                        element.get("display").and_then(|v| v.as_str()),
                        out_side,
                        map_url,
                    ));
                }
            } else {
                if element_code != Some(code) {
                    continue;
                }
                for target in targets {
                    let Some(target_code) = target.get("code").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    matches.push(make_match(
                        target,
                        target_code,
                        target.get("display").and_then(|v| v.as_str()),
                        out_side,
                        map_url,
                    ));
                }
            }
        }
    }

    if matches.is_empty() {
        return Ok(TranslationResult::failure(format!(
            "No translation found for '{code}'{}",
            source_system.map(|s| format!(" from '{s}'")).unwrap_or_default()
        )));
    }
    Ok(TranslationResult {
        result: matches.iter().any(|m| m.relationship != "not-related-to"),
        message: None,
        matches,
    })
}

fn make_match(
    target: &Value,
    out_code: &str,
    out_display: Option<&str>,
    out_system: Option<&str>,
    map_url: Option<&str>,
) -> TranslationMatch {
    let raw_relationship = target
        .get("relationship")
        .or_else(|| target.get("equivalence"))
        .and_then(|v| v.as_str())
        .unwrap_or("related-to");
    let mut concept = Coding {
        system: out_system.map(String::from),
        version: None,
        code: Some(out_code.to_string()),
        display: out_display.map(String::from),
    };
    if concept.display.is_none() {
        concept.display = target.get("display").and_then(|v| v.as_str()).map(String::from);
    }
    TranslationMatch {
        relationship: normalize_relationship(raw_relationship).to_string(),
        concept,
        source: map_url.map(String::from),
        depends_on: target
            .get("dependsOn")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default(),
        product: target
            .get("product")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default(),
    }
}

/// Shape a result into Parameters. The `relationship_element` decides the
/// output vocabulary: R3/R4 mounts say "equivalence", R5 says
/// "relationship" (the compat layer passes the right one).
pub fn to_parameters(result: &TranslationResult, relationship_element: &str) -> Value {
    let mut params = vec![json!({"name": "result", "valueBoolean": result.result})];
    if let Some(ref message) = result.message {
        params.push(json!({"name": "message", "valueString": message}));
    }
    for m in &result.matches {
        let mut parts = Vec::new();
        let relationship = if relationship_element == "equivalence" {
            denormalize_equivalence(&m.relationship)
        } else {
            m.relationship.as_str()
        };
        parts.push(json!({"name": relationship_element, "valueCode": relationship}));
        parts.push(json!({
            "name": "concept",
            "valueCoding": serde_json::to_value(&m.concept).unwrap_or(Value::Null),
        }));
        if let Some(ref source) = m.source {
            parts.push(json!({"name": "source", "valueUri": source}));
        }
        for depends in &m.depends_on {
            parts.push(json!({"name": "dependsOn", "part": [depends]}));
        }
        for product in &m.product {
            parts.push(json!({"name": "product", "part": [product]}));
        }
        params.push(json!({"name": "match", "part": parts}));
    }
    json!({"resourceType": "Parameters", "parameter": params})
}

/// R5 relationship back to the R3/R4 equivalence vocabulary.
fn denormalize_equivalence(relationship: &str) -> &str {
    match relationship {
        "equivalent" => "equivalent",
        "source-is-narrower-than-target" => "wider",
        "source-is-broader-than-target" => "narrower",
        "related-to" => "relatedto",
        "not-related-to" => "unmatched",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map() -> Value {
        json!({
            "resourceType": "ConceptMap",
            "url": "http://example.org/cm/gender",
            "group": [{
                "source": "http://example.org/cs/local-gender",
                "target": "http://hl7.org/fhir/administrative-gender",
                "element": [
                    {"code": "A", "display": "A side", "target": [
                        {"code": "X", "display": "Male-ish", "equivalence": "equivalent"}
                    ]},
                    {"code": "B", "target": [
                        {"code": "Y", "equivalence": "wider"},
                        {"code": "Z", "equivalence": "unmatched"}
                    ]}
                ]
            }]
        })
    }

    #[test]
    fn forward_translation_finds_equivalent() {
        let ctx = OperationContext::default();
        let coding = Coding::new("http://example.org/cs/local-gender", "A");
        let result = translate(&ctx, &map(), &coding, None, false).unwrap();
        assert!(result.result);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].relationship, "equivalent");
        assert_eq!(result.matches[0].concept.code.as_deref(), Some("X"));
        assert_eq!(
            result.matches[0].concept.system.as_deref(),
            Some("http://hl7.org/fhir/administrative-gender")
        );
    }

    #[test]
    fn target_order_is_preserved() {
        let ctx = OperationContext::default();
        let coding = Coding::new("http://example.org/cs/local-gender", "B");
        let result = translate(&ctx, &map(), &coding, None, false).unwrap();
        assert_eq!(result.matches.len(), 2);
        assert_eq!(result.matches[0].concept.code.as_deref(), Some("Y"));
        assert_eq!(result.matches[0].relationship, "source-is-narrower-than-target");
        assert_eq!(result.matches[1].relationship, "not-related-to");
        // An unmatched-only result would be false; Y makes it true.
        assert!(result.result);
    }

    #[test]
    fn reverse_translation_swaps_orientation() {
        let ctx = OperationContext::default();
        let coding = Coding::new("http://hl7.org/fhir/administrative-gender", "X");
        let result = translate(&ctx, &map(), &coding, None, true).unwrap();
        assert!(result.result);
        assert_eq!(result.matches[0].concept.code.as_deref(), Some("A"));
        assert_eq!(
            result.matches[0].concept.system.as_deref(),
            Some("http://example.org/cs/local-gender")
        );
    }

    #[test]
    fn unknown_code_is_a_clean_failure() {
        let ctx = OperationContext::default();
        let coding = Coding::new("http://example.org/cs/local-gender", "nope");
        let result = translate(&ctx, &map(), &coding, None, false).unwrap();
        assert!(!result.result);
        assert!(result.message.as_deref().unwrap().contains("nope"));
    }

    #[test]
    fn target_system_filters_groups() {
        let ctx = OperationContext::default();
        let coding = Coding::new("http://example.org/cs/local-gender", "A");
        let result =
            translate(&ctx, &map(), &coding, Some("http://elsewhere.example.org"), false).unwrap();
        assert!(!result.result);
    }

    #[test]
    fn r5_relationship_element_is_read_too() {
        let ctx = OperationContext::default();
        let r5_map = json!({
            "url": "http://example.org/cm/r5",
            "group": [{
                "source": "http://example.org/src",
                "target": "http://example.org/tgt",
                "element": [{"code": "A", "target": [
                    {"code": "X", "relationship": "source-is-broader-than-target"}
                ]}]
            }]
        });
        let coding = Coding::new("http://example.org/src", "A");
        let result = translate(&ctx, &r5_map, &coding, None, false).unwrap();
        assert_eq!(result.matches[0].relationship, "source-is-broader-than-target");
    }

    #[test]
    fn parameters_shape_per_version() {
        let result = TranslationResult {
            result: true,
            message: None,
            matches: vec![TranslationMatch {
                relationship: "equivalent".into(),
                concept: Coding::new("http://example.org/tgt", "X"),
                source: Some("http://example.org/cm".into()),
                depends_on: Vec::new(),
                product: Vec::new(),
            }],
        };
        let r4 = to_parameters(&result, "equivalence");
        assert_eq!(r4["parameter"][1]["part"][0]["name"], "equivalence");
        assert_eq!(r4["parameter"][1]["part"][0]["valueCode"], "equivalent");

        let r5 = to_parameters(&result, "relationship");
        assert_eq!(r5["parameter"][1]["part"][0]["name"], "relationship");
    }
}
