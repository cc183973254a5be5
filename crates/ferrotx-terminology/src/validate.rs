//! The $validate-code engine, for both CodeSystem and ValueSet targets.
//!
//! Validation is always decisive: the outcome is a boolean plus
//! diagnostics, never a partial result. Membership questions go through
//! the expansion engine's membership mode; this module owns system
//! resolution, display checking, and the fragment/active/abstract
//! policies.

use crate::expand::member_of;
use crate::params::OperationParameters;
use crate::provider::CodeSystemProvider;
use crate::provider_view::Provider;
use crate::versions::resolve_version;
use ferrotx_core::context::OperationContext;
use ferrotx_core::fhir::{CodeableConcept, Coding};
use ferrotx_core::issue::{IssueType, TxIssue, TxResult};
use serde_json::{Value, json};
use std::sync::Arc;

/// Outcome of a validation, ready to shape into Parameters.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub result: bool,
    pub system: Option<String>,
    pub version: Option<String>,
    pub code: Option<String>,
    pub display: Option<String>,
    pub message: Option<String>,
    pub issues: Vec<TxIssue>,
}

impl ValidationOutcome {
    fn fail(message: impl Into<String>, issue: TxIssue) -> Self {
        let message = message.into();
        Self {
            result: false,
            message: Some(message),
            issues: vec![issue],
            ..Default::default()
        }
    }

    /// Shape into the wire Parameters resource.
    pub fn to_parameters(&self, membership_only: bool) -> Value {
        let mut params = vec![json!({"name": "result", "valueBoolean": self.result})];
        if let Some(ref message) = self.message {
            params.push(json!({"name": "message", "valueString": message}));
        }
        if !membership_only {
            if let Some(ref system) = self.system {
                params.push(json!({"name": "system", "valueUri": system}));
            }
            if let Some(ref version) = self.version {
                params.push(json!({"name": "version", "valueString": version}));
            }
            if let Some(ref code) = self.code {
                params.push(json!({"name": "code", "valueCode": code}));
            }
            if let Some(ref display) = self.display {
                params.push(json!({"name": "display", "valueString": display}));
            }
        }
        if !self.issues.is_empty() {
            params.push(json!({
                "name": "issues",
                "resource": ferrotx_core::issue::operation_outcome(&self.issues),
            }));
        }
        json!({"resourceType": "Parameters", "parameter": params})
    }
}

/// Validate a coding directly against a code system.
pub fn validate_in_code_system(
    provider: &Provider,
    ctx: &mut OperationContext,
    coding: &Coding,
    params: &OperationParameters,
) -> TxResult<ValidationOutcome> {
    ctx.dead_check("validate-code")?;

    let Some(system) = coding.system.as_deref() else {
        return Ok(ValidationOutcome::fail(
            "No system provided for the code",
            TxIssue::warning(IssueType::Invalid, "Coding has no system"),
        ));
    };
    let version = resolve_version(&params.version_rules, system, coding.version.as_deref())?;

    let Some(csp) = provider.get_code_system_provider(ctx, system, version.as_deref(), &[])? else {
        return Ok(ValidationOutcome::fail(
            format!("A definition for CodeSystem '{system}' could not be found"),
            TxIssue::warning(IssueType::NotFound, format!("CodeSystem '{system}' not known")),
        ));
    };

    validate_against(provider, ctx, &csp, coding, params, None)
}

/// Validate a coding (or each coding of a CodeableConcept) against a
/// value set. First positive coding wins; diagnostics accumulate.
pub fn validate_in_value_set(
    provider: &Provider,
    ctx: &mut OperationContext,
    value_set: &Value,
    codings: &[Coding],
    text: Option<&str>,
    params: &OperationParameters,
) -> TxResult<ValidationOutcome> {
    ctx.dead_check("validate-code")?;
    let _ = text;

    let mut failures: Vec<ValidationOutcome> = Vec::new();
    for coding in codings {
        let outcome = validate_coding_in_value_set(provider, ctx, value_set, coding, params)?;
        if outcome.result {
            return Ok(outcome);
        }
        failures.push(outcome);
    }

    // No positive match: merge the per-coding diagnostics.
    let mut merged = failures.pop().unwrap_or_else(|| {
        ValidationOutcome::fail(
            "No code was supplied to validate",
            TxIssue::warning(IssueType::Invalid, "Neither coding nor codeableConcept present"),
        )
    });
    for failure in failures {
        if let Some(message) = failure.message {
            merged.message = Some(match merged.message.take() {
                Some(existing) => format!("{existing}; {message}"),
                None => message,
            });
        }
        merged.issues.extend(failure.issues);
    }
    merged.result = false;
    Ok(merged)
}

fn validate_coding_in_value_set(
    provider: &Provider,
    ctx: &mut OperationContext,
    value_set: &Value,
    coding: &Coding,
    params: &OperationParameters,
) -> TxResult<ValidationOutcome> {
    let vs_url = value_set.get("url").and_then(|v| v.as_str()).unwrap_or("(inline)");

    let Some(system) = coding.system.as_deref() else {
        return Ok(ValidationOutcome::fail(
            "The coding has no system; membership cannot be decided",
            TxIssue::warning(IssueType::Invalid, "Coding has no system"),
        ));
    };
    let Some(code) = coding.code.as_deref() else {
        return Ok(ValidationOutcome::fail(
            "The coding has no code",
            TxIssue::warning(IssueType::Invalid, "Coding has no code"),
        ));
    };

    let version = resolve_version(&params.version_rules, system, coding.version.as_deref())?;
    let Some(csp) = provider.get_code_system_provider(ctx, system, version.as_deref(), &[])? else {
        return Ok(ValidationOutcome::fail(
            format!("A definition for CodeSystem '{system}' could not be found"),
            TxIssue::warning(IssueType::NotFound, format!("CodeSystem '{system}' not known")),
        ));
    };

    // Locate first: an unknown code never reaches membership.
    let base = validate_against(provider, ctx, &csp, coding, params, Some(vs_url))?;
    if !base.result {
        return Ok(base);
    }

    let mut sub_ctx = ctx.copy();
    let member = member_of(
        provider,
        &mut sub_ctx,
        value_set,
        params,
        system,
        version.as_deref(),
        code,
    )?;
    if !member {
        let message = provider.i18n().message(
            &params.languages(),
            "not-in-valueset",
            &[code, system, vs_url],
        );
        let mut outcome = base;
        outcome.result = false;
        outcome.message = Some(message.clone());
        outcome
            .issues
            .push(TxIssue::warning(IssueType::CodeInvalid, message).with_details("not-in-valueset"));
        return Ok(outcome);
    }

    Ok(base)
}

/// The code-system-level checks shared by both modes: locate, fragment
/// policy, active/abstract policy, display checking.
fn validate_against(
    provider: &Provider,
    ctx: &mut OperationContext,
    csp: &Arc<dyn CodeSystemProvider>,
    coding: &Coding,
    params: &OperationParameters,
    _vs_url: Option<&str>,
) -> TxResult<ValidationOutcome> {
    ctx.dead_check("code validation")?;
    let code = coding.code.as_deref().unwrap_or("");
    let languages = params.languages();

    let located = match csp.locate(code)? {
        Some(located) => located,
        None => {
            if csp.content_mode() == "fragment" && !params.incomplete_ok {
                let message = provider.i18n().message(
                    &languages,
                    "fragment-content",
                    &[csp.system()],
                );
                return Ok(ValidationOutcome::fail(
                    message.clone(),
                    TxIssue::warning(IssueType::NotSupported, message),
                ));
            }
            let message = match csp.version() {
                Some(version) => provider.i18n().message(
                    &languages,
                    "unknown-code-version",
                    &[code, csp.system(), version],
                ),
                None => provider
                    .i18n()
                    .message(&languages, "unknown-code", &[code, csp.system()]),
            };
            let mut outcome = ValidationOutcome::fail(
                message.clone(),
                TxIssue::warning(IssueType::CodeInvalid, message),
            );
            outcome.system = Some(csp.system().to_string());
            outcome.version = csp.version().map(String::from);
            return Ok(outcome);
        }
    };

    let concept = &located.concept;
    let mut outcome = ValidationOutcome {
        result: true,
        system: Some(csp.system().to_string()),
        version: csp.version().map(String::from),
        code: Some(concept.code.clone()),
        display: csp.display(concept, &languages),
        message: located.message.clone(),
        issues: Vec::new(),
    };
    if let Some(ref soft) = located.message {
        outcome
            .issues
            .push(TxIssue::information(soft.clone()));
    }

    // Inactive / abstract policy.
    if csp.is_inactive(concept) && params.active_only {
        let message = provider.i18n().message(&languages, "inactive-code", &[code]);
        outcome.result = false;
        outcome.message = Some(message.clone());
        outcome
            .issues
            .push(TxIssue::warning(IssueType::BusinessRule, message));
        return Ok(outcome);
    }
    if csp.is_abstract(concept) {
        let message = provider.i18n().message(&languages, "not-selectable", &[code]);
        outcome.result = false;
        outcome.message = Some(message.clone());
        outcome
            .issues
            .push(TxIssue::warning(IssueType::BusinessRule, message));
        return Ok(outcome);
    }

    // Display checking against the designation-aware display set.
    if let Some(provided) = coding.display.as_deref() {
        let mut known: Vec<String> = Vec::new();
        if let Some(display) = csp.display(concept, &Default::default()) {
            known.push(display);
        }
        known.extend(csp.designations(concept).into_iter().map(|d| d.value));

        let matches = known.iter().any(|k| k.eq_ignore_ascii_case(provided));
        if !matches && !known.is_empty() {
            let known_list = known.join("', '");
            let message = provider.i18n().message(
                &languages,
                "display-mismatch",
                &[provided, code, known_list.as_str()],
            );
            if params.display_warning {
                outcome
                    .issues
                    .push(TxIssue::warning(IssueType::Invalid, message.clone()));
                outcome.message = Some(message);
            } else {
                outcome.result = false;
                outcome.message = Some(message.clone());
                outcome
                    .issues
                    .push(TxIssue::warning(IssueType::Invalid, message).with_details("display-mismatch"));
                return Ok(outcome);
            }
        } else if matches {
            // Language check: the provided display may exist only in a
            // language the request did not ask for.
            if !languages.is_empty() {
                let best = csp.display(concept, &languages);
                if best.as_deref().map(|b| !b.eq_ignore_ascii_case(provided)).unwrap_or(false) {
                    outcome.issues.push(TxIssue::warning(
                        IssueType::Informational,
                        provider.i18n().message(&languages, "display-language", &[code]),
                    ));
                }
            }
        }
    }

    Ok(outcome)
}

/// Split the wire inputs (code+system / coding / codeableConcept) into
/// the coding list validation iterates.
pub fn codings_from_inputs(
    code: Option<&str>,
    system: Option<&str>,
    system_version: Option<&str>,
    display: Option<&str>,
    coding: Option<&Coding>,
    codeable_concept: Option<&CodeableConcept>,
) -> Vec<Coding> {
    if let Some(cc) = codeable_concept {
        return cc.coding.clone();
    }
    if let Some(coding) = coding {
        return vec![coding.clone()];
    }
    if let Some(code) = code {
        return vec![Coding {
            system: system.map(String::from),
            version: system_version.map(String::from),
            code: Some(code.to_string()),
            display: display.map(String::from),
        }];
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Library, PackageCodeSystems, ResourceStore};
    use ferrotx_core::fhir::FhirVersion;
    use serde_json::json;

    fn build_provider() -> Provider {
        let mut builder = Library::builder();
        let ids = builder.id_space();
        let mut cs_store = ResourceStore::new("CodeSystem");
        cs_store
            .add(
                json!({
                    "resourceType": "CodeSystem",
                    "url": "http://hl7.org/fhir/administrative-gender",
                    "version": "4.0.1",
                    "caseSensitive": true,
                    "content": "complete",
                    "valueSet": "http://hl7.org/fhir/ValueSet/administrative-gender",
                    "concept": [
                        {"code": "male", "display": "Male",
                         "designation": [{"language": "de", "value": "Männlich"}]},
                        {"code": "female", "display": "Female"}
                    ]
                }),
                &ids,
            )
            .unwrap();
        cs_store
            .add(
                json!({
                    "resourceType": "CodeSystem",
                    "url": "http://example.org/cs/partial",
                    "content": "fragment",
                    "concept": [{"code": "present", "display": "Present"}]
                }),
                &ids,
            )
            .unwrap();
        builder.add_package_code_systems(PackageCodeSystems {
            package_id: "test.pkg".into(),
            fhir_majors: vec![],
            is_core: false,
            store: cs_store,
        });
        let mut vs_store = ResourceStore::new("ValueSet");
        vs_store
            .add(
                json!({
                    "resourceType": "ValueSet",
                    "url": "http://hl7.org/fhir/ValueSet/administrative-gender",
                    "compose": {"include": [{"system": "http://hl7.org/fhir/administrative-gender"}]}
                }),
                &ids,
            )
            .unwrap();
        builder.add_value_set_store(vs_store);
        builder.build().clone_with_fhir_version(FhirVersion::R4)
    }

    fn gender_vs(provider: &Provider) -> Value {
        let ctx = OperationContext::default();
        provider
            .find_value_set(&ctx, "http://hl7.org/fhir/ValueSet/administrative-gender", None)
            .unwrap()
    }

    #[test]
    fn valid_code_in_value_set() {
        let provider = build_provider();
        let mut ctx = OperationContext::default();
        let vs = gender_vs(&provider);
        let coding = Coding::new("http://hl7.org/fhir/administrative-gender", "male");
        let outcome = validate_in_value_set(
            &provider,
            &mut ctx,
            &vs,
            &[coding],
            None,
            &OperationParameters::default(),
        )
        .unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.display.as_deref(), Some("Male"));
        assert_eq!(outcome.version.as_deref(), Some("4.0.1"));
    }

    #[test]
    fn unknown_code_is_decisive_false() {
        let provider = build_provider();
        let mut ctx = OperationContext::default();
        let vs = gender_vs(&provider);
        let coding = Coding::new("http://hl7.org/fhir/administrative-gender", "martian");
        let outcome = validate_in_value_set(
            &provider,
            &mut ctx,
            &vs,
            &[coding],
            None,
            &OperationParameters::default(),
        )
        .unwrap();
        assert!(!outcome.result);
        assert!(outcome.message.as_deref().unwrap().contains("martian"));
    }

    #[test]
    fn case_discipline_for_sensitive_systems() {
        let provider = build_provider();
        let mut ctx = OperationContext::default();
        let coding = Coding::new("http://hl7.org/fhir/administrative-gender", "MALE");
        let outcome =
            validate_in_code_system(&provider, &mut ctx, &coding, &OperationParameters::default())
                .unwrap();
        assert!(!outcome.result);
    }

    #[test]
    fn display_mismatch_error_and_warning_modes() {
        let provider = build_provider();
        let mut ctx = OperationContext::default();
        let coding = Coding::new("http://hl7.org/fhir/administrative-gender", "male")
            .with_display("Homme");

        let strict =
            validate_in_code_system(&provider, &mut ctx, &coding, &OperationParameters::default())
                .unwrap();
        assert!(!strict.result);
        assert!(strict.message.as_deref().unwrap().contains("Homme"));

        let mut lenient_params = OperationParameters::default();
        lenient_params.display_warning = true;
        let lenient =
            validate_in_code_system(&provider, &mut ctx, &coding, &lenient_params).unwrap();
        assert!(lenient.result);
        assert!(!lenient.issues.is_empty());
    }

    #[test]
    fn designation_counts_as_valid_display() {
        let provider = build_provider();
        let mut ctx = OperationContext::default();
        let coding = Coding::new("http://hl7.org/fhir/administrative-gender", "male")
            .with_display("Männlich");
        let outcome =
            validate_in_code_system(&provider, &mut ctx, &coding, &OperationParameters::default())
                .unwrap();
        assert!(outcome.result);
    }

    #[test]
    fn fragment_requires_incomplete_ok() {
        let provider = build_provider();
        let mut ctx = OperationContext::default();
        let coding = Coding::new("http://example.org/cs/partial", "missing");

        let strict =
            validate_in_code_system(&provider, &mut ctx, &coding, &OperationParameters::default())
                .unwrap();
        assert!(!strict.result);
        assert!(strict.message.as_deref().unwrap().contains("fragment"));

        let mut params = OperationParameters::default();
        params.incomplete_ok = true;
        let tolerant = validate_in_code_system(&provider, &mut ctx, &coding, &params).unwrap();
        assert!(!tolerant.result); // still unknown, but reported as such
        assert!(tolerant.message.as_deref().unwrap().contains("missing"));
    }

    #[test]
    fn codeable_concept_first_positive_wins() {
        let provider = build_provider();
        let mut ctx = OperationContext::default();
        let vs = gender_vs(&provider);
        let codings = vec![
            Coding::new("http://hl7.org/fhir/administrative-gender", "nonsense"),
            Coding::new("http://hl7.org/fhir/administrative-gender", "female"),
        ];
        let outcome = validate_in_value_set(
            &provider,
            &mut ctx,
            &vs,
            &codings,
            Some("gender"),
            &OperationParameters::default(),
        )
        .unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.code.as_deref(), Some("female"));
    }

    #[test]
    fn membership_only_suppresses_details() {
        let outcome = ValidationOutcome {
            result: true,
            system: Some("http://example.org".into()),
            code: Some("a".into()),
            display: Some("A".into()),
            ..Default::default()
        };
        let wire = outcome.to_parameters(true);
        let names: Vec<_> = wire["parameter"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["result"]);
    }

    #[test]
    fn codings_from_inputs_priority() {
        let cc = CodeableConcept {
            coding: vec![Coding::new("s", "c1"), Coding::new("s", "c2")],
            text: None,
        };
        assert_eq!(codings_from_inputs(None, None, None, None, None, Some(&cc)).len(), 2);

        let single = Coding::new("s", "c");
        assert_eq!(
            codings_from_inputs(Some("x"), Some("y"), None, None, Some(&single), None)[0].code,
            Some("c".to_string())
        );

        let from_parts = codings_from_inputs(Some("x"), Some("y"), Some("1.0"), None, None, None);
        assert_eq!(from_parts[0].system.as_deref(), Some("y"));
        assert_eq!(from_parts[0].version.as_deref(), Some("1.0"));
    }
}
