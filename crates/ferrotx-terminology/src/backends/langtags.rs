//! BCP-47 language tags as a code system.
//!
//! There is no stored concept list: `locate` parses the tag against the
//! core grammar and checks the primary subtags against a registry of
//! known languages, scripts, and regions. `is-a` is tag prefix
//! containment (`en` subsumes `en-US`).

use crate::provider::{
    CodeSystemProvider, ConceptProperty, ConceptRef, Designation, FilterContext, FilterOp,
    Located, PropertyValue, SubsumptionOutcome, unsupported_filter,
};
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::lang::{LanguagePreferences, LanguageTag};

pub const BCP47_URI: &str = "urn:ietf:bcp:47";

/// Known primary language subtags with English names. A working subset of
/// the IANA registry covering the languages the shipped displays use.
const LANGUAGES: &[(&str, &str)] = &[
    ("ar", "Arabic"),
    ("bn", "Bengali"),
    ("cs", "Czech"),
    ("da", "Danish"),
    ("de", "German"),
    ("el", "Greek"),
    ("en", "English"),
    ("es", "Spanish"),
    ("fi", "Finnish"),
    ("fr", "French"),
    ("he", "Hebrew"),
    ("hi", "Hindi"),
    ("hr", "Croatian"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("nl", "Dutch"),
    ("no", "Norwegian"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("sr", "Serbian"),
    ("sv", "Swedish"),
    ("te", "Telugu"),
    ("th", "Thai"),
    ("tr", "Turkish"),
    ("uk", "Ukrainian"),
    ("vi", "Vietnamese"),
    ("zh", "Chinese"),
];

const SCRIPTS: &[(&str, &str)] = &[
    ("Arab", "Arabic"),
    ("Cyrl", "Cyrillic"),
    ("Hans", "Simplified"),
    ("Hant", "Traditional"),
    ("Latn", "Latin"),
];

const REGIONS: &[(&str, &str)] = &[
    ("AT", "Austria"),
    ("AU", "Australia"),
    ("BE", "Belgium"),
    ("BR", "Brazil"),
    ("CA", "Canada"),
    ("CH", "Switzerland"),
    ("CN", "China"),
    ("DE", "Germany"),
    ("DK", "Denmark"),
    ("ES", "Spain"),
    ("FR", "France"),
    ("GB", "United Kingdom"),
    ("IN", "India"),
    ("IT", "Italy"),
    ("JP", "Japan"),
    ("KR", "Korea"),
    ("MX", "Mexico"),
    ("NL", "Netherlands"),
    ("NO", "Norway"),
    ("NZ", "New Zealand"),
    ("RU", "Russia"),
    ("TW", "Taiwan"),
    ("US", "United States"),
];

/// The language-tag code system provider.
pub struct LanguageTagCodeSystem;

impl LanguageTagCodeSystem {
    pub fn new() -> Self {
        Self
    }

    fn analyse(code: &str) -> TxResult<LanguageTag> {
        let tag = LanguageTag::parse(code)?;
        if !LANGUAGES.iter().any(|(code, _)| *code == tag.language) {
            return Err(TxIssue::code_invalid(format!(
                "Unknown primary language subtag '{}'",
                tag.language
            )));
        }
        if let Some(ref script) = tag.script {
            if !SCRIPTS.iter().any(|(code, _)| code == script) {
                return Err(TxIssue::code_invalid(format!(
                    "Unknown script subtag '{script}'"
                )));
            }
        }
        if let Some(ref region) = tag.region {
            // Numeric UN M.49 regions pass the grammar check alone.
            if region.chars().all(|c| c.is_ascii_alphabetic())
                && !REGIONS.iter().any(|(code, _)| code == region)
            {
                return Err(TxIssue::code_invalid(format!(
                    "Unknown region subtag '{region}'"
                )));
            }
        }
        Ok(tag)
    }

    fn describe(tag: &LanguageTag) -> String {
        let language = LANGUAGES
            .iter()
            .find(|(code, _)| *code == tag.language)
            .map(|(_, name)| *name)
            .unwrap_or(tag.language.as_str());
        let mut qualifiers = Vec::new();
        if let Some(ref script) = tag.script {
            if let Some((_, name)) = SCRIPTS.iter().find(|(code, _)| code == script) {
                qualifiers.push((*name).to_string());
            }
        }
        if let Some(ref region) = tag.region {
            if let Some((_, name)) = REGIONS.iter().find(|(code, _)| code == region) {
                qualifiers.push((*name).to_string());
            }
        }
        if qualifiers.is_empty() {
            language.to_string()
        } else {
            format!("{language} ({})", qualifiers.join(", "))
        }
    }
}

impl Default for LanguageTagCodeSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeSystemProvider for LanguageTagCodeSystem {
    fn system(&self) -> &str {
        BCP47_URI
    }

    fn version(&self) -> Option<&str> {
        None
    }

    fn total_count(&self) -> i64 {
        -1
    }

    fn locate(&self, code: &str) -> TxResult<Option<Located>> {
        match Self::analyse(code) {
            Ok(_) => Ok(Some(Located::clean(ConceptRef::synthesized(code)))),
            Err(issue) => {
                tracing::debug!(code = %code, reason = %issue, "Language tag rejected");
                Ok(None)
            }
        }
    }

    fn display(&self, concept: &ConceptRef, _languages: &LanguagePreferences) -> Option<String> {
        Self::analyse(&concept.code).ok().map(|tag| Self::describe(&tag))
    }

    fn designations(&self, concept: &ConceptRef) -> Vec<Designation> {
        self.display(concept, &LanguagePreferences::default())
            .map(|value| {
                vec![Designation {
                    language: Some("en".to_string()),
                    use_coding: None,
                    value,
                }]
            })
            .unwrap_or_default()
    }

    fn properties(&self, concept: &ConceptRef, filter: Option<&[String]>) -> Vec<ConceptProperty> {
        let Ok(tag) = Self::analyse(&concept.code) else {
            return Vec::new();
        };
        let wanted = |name: &str| filter.map(|f| f.iter().any(|w| w == name)).unwrap_or(true);
        let mut props = Vec::new();
        if wanted("language") {
            props.push(ConceptProperty::new("language", PropertyValue::Code(tag.language.clone())));
        }
        if let Some(script) = tag.script.filter(|_| wanted("script")) {
            props.push(ConceptProperty::new("script", PropertyValue::Code(script)));
        }
        if let Some(region) = tag.region.filter(|_| wanted("region")) {
            props.push(ConceptProperty::new("region", PropertyValue::Code(region)));
        }
        props
    }

    fn subsumes(&self, a: &ConceptRef, b: &ConceptRef) -> TxResult<SubsumptionOutcome> {
        let ta = Self::analyse(&a.code)?;
        let tb = Self::analyse(&b.code)?;
        if ta == tb {
            Ok(SubsumptionOutcome::Equivalent)
        } else if ta.is_prefix_of(&tb) {
            Ok(SubsumptionOutcome::Subsumes)
        } else if tb.is_prefix_of(&ta) {
            Ok(SubsumptionOutcome::SubsumedBy)
        } else {
            Ok(SubsumptionOutcome::NotSubsumed)
        }
    }

    fn supported_filters(&self) -> Vec<(&str, Vec<FilterOp>)> {
        vec![
            ("language", vec![FilterOp::Equal, FilterOp::Exists]),
            ("script", vec![FilterOp::Equal, FilterOp::Exists]),
            ("region", vec![FilterOp::Equal, FilterOp::Exists]),
        ]
    }

    fn filter(&self, property: &str, op: FilterOp, value: &str) -> TxResult<FilterContext> {
        // Only language = <code> has a bounded answer: the bare tag itself.
        if property == "language" && op == FilterOp::Equal {
            let concepts = match Self::analyse(value) {
                Ok(tag) if tag.script.is_none() && tag.region.is_none() => {
                    vec![ConceptRef::synthesized(tag.to_string())]
                }
                _ => Vec::new(),
            };
            return Ok(FilterContext::not_closed(concepts));
        }
        Err(unsupported_filter(BCP47_URI, property, op, value))
    }

    fn iterate_all(&self) -> TxResult<Vec<ConceptRef>> {
        Err(TxIssue::too_costly(
            "BCP-47 defines an unbounded tag space and cannot be enumerated",
        ))
    }

    fn filters_not_closed(&self) -> bool {
        true
    }
}
