//! The uniform capability surface over code-system back-ends.
//!
//! Back-ends are immutable in-memory models once loaded, so the trait is
//! synchronous and `Send + Sync`; the engines stay re-entrant without any
//! caller-side serialization. Anything slow (file parsing, downloads)
//! happens in the loader, before the first request.

use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::lang::LanguagePreferences;
use ferrotx_core::fhir::Coding;
use std::fmt;

/// Opaque handle to a concept inside one provider. The `index` is private
/// back-end state (a table offset for stored systems, unused for
/// grammar-based systems) and must not be interpreted by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConceptRef {
    pub code: String,
    pub(crate) index: usize,
}

impl ConceptRef {
    /// Handle for a synthesized concept (grammar-based back-ends).
    pub fn synthesized(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            index: usize::MAX,
        }
    }

    pub fn stored(code: impl Into<String>, index: usize) -> Self {
        Self {
            code: code.into(),
            index,
        }
    }
}

/// Result of locating a code: the concept handle plus an optional soft
/// diagnostic (e.g. "inactive code", case-normalization notes).
#[derive(Debug, Clone)]
pub struct Located {
    pub concept: ConceptRef,
    pub message: Option<String>,
}

impl Located {
    pub fn clean(concept: ConceptRef) -> Self {
        Self {
            concept,
            message: None,
        }
    }

    pub fn with_message(concept: ConceptRef, message: impl Into<String>) -> Self {
        Self {
            concept,
            message: Some(message.into()),
        }
    }
}

/// An alternate display for a concept.
#[derive(Debug, Clone, PartialEq)]
pub struct Designation {
    pub language: Option<String>,
    pub use_coding: Option<Coding>,
    pub value: String,
}

/// Typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Code(String),
    String(String),
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Coding(Coding),
    DateTime(String),
}

impl PropertyValue {
    /// The `valueX` key used when rendering into Parameters/JSON.
    pub fn wire_key(&self) -> &'static str {
        match self {
            PropertyValue::Code(_) => "valueCode",
            PropertyValue::String(_) => "valueString",
            PropertyValue::Boolean(_) => "valueBoolean",
            PropertyValue::Integer(_) => "valueInteger",
            PropertyValue::Decimal(_) => "valueDecimal",
            PropertyValue::Coding(_) => "valueCoding",
            PropertyValue::DateTime(_) => "valueDateTime",
        }
    }

    pub fn as_display_string(&self) -> String {
        match self {
            PropertyValue::Code(s) | PropertyValue::String(s) | PropertyValue::DateTime(s) => {
                s.clone()
            }
            PropertyValue::Boolean(b) => b.to_string(),
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::Decimal(d) => d.to_string(),
            PropertyValue::Coding(c) => c.to_string(),
        }
    }
}

/// One concept property.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptProperty {
    pub code: String,
    pub value: PropertyValue,
}

impl ConceptProperty {
    pub fn new(code: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            code: code.into(),
            value,
        }
    }
}

/// Subsumption test outcome, in the order the contract checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsumptionOutcome {
    Equivalent,
    Subsumes,
    SubsumedBy,
    NotSubsumed,
}

impl SubsumptionOutcome {
    pub fn as_code(&self) -> &'static str {
        match self {
            SubsumptionOutcome::Equivalent => "equivalent",
            SubsumptionOutcome::Subsumes => "subsumes",
            SubsumptionOutcome::SubsumedBy => "subsumed-by",
            SubsumptionOutcome::NotSubsumed => "not-subsumed",
        }
    }
}

/// ValueSet compose filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Equal,
    IsA,
    IsNotA,
    DescendentOf,
    Regex,
    In,
    NotIn,
    Generalizes,
    Exists,
}

impl FilterOp {
    pub fn parse(s: &str) -> TxResult<Self> {
        match s {
            "=" => Ok(FilterOp::Equal),
            "is-a" => Ok(FilterOp::IsA),
            "is-not-a" => Ok(FilterOp::IsNotA),
            "descendent-of" => Ok(FilterOp::DescendentOf),
            "regex" => Ok(FilterOp::Regex),
            "in" => Ok(FilterOp::In),
            "not-in" => Ok(FilterOp::NotIn),
            "generalizes" => Ok(FilterOp::Generalizes),
            "exists" => Ok(FilterOp::Exists),
            _ => Err(TxIssue::invalid(format!("Unknown filter operator '{s}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Equal => "=",
            FilterOp::IsA => "is-a",
            FilterOp::IsNotA => "is-not-a",
            FilterOp::DescendentOf => "descendent-of",
            FilterOp::Regex => "regex",
            FilterOp::In => "in",
            FilterOp::NotIn => "not-in",
            FilterOp::Generalizes => "generalizes",
            FilterOp::Exists => "exists",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A precomputed selection over one back-end: the ordered concepts a
/// filter yields. Restartable only by recreation — the engine iterates the
/// snapshot, the back-end is never re-queried.
#[derive(Debug, Clone)]
pub struct FilterContext {
    concepts: Vec<ConceptRef>,
    /// False when the filter set is provisional (e.g. UCUM canonical
    /// filters enumerate only the configured common units).
    closed: bool,
}

impl FilterContext {
    pub fn closed(concepts: Vec<ConceptRef>) -> Self {
        Self {
            concepts,
            closed: true,
        }
    }

    pub fn not_closed(concepts: Vec<ConceptRef>) -> Self {
        Self {
            concepts,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn concepts(&self) -> &[ConceptRef] {
        &self.concepts
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.concepts.iter().any(|c| c.code == code)
    }

    /// Intersect with another context, keeping this context's order.
    pub fn intersect(self, other: &FilterContext) -> FilterContext {
        let keep: std::collections::HashSet<&str> =
            other.concepts.iter().map(|c| c.code.as_str()).collect();
        FilterContext {
            concepts: self
                .concepts
                .into_iter()
                .filter(|c| keep.contains(c.code.as_str()))
                .collect(),
            closed: self.closed && other.closed,
        }
    }
}

/// The capability surface every code-system back-end implements.
pub trait CodeSystemProvider: Send + Sync {
    /// Canonical url of the system.
    fn system(&self) -> &str;

    /// Concrete version, if the back-end knows one.
    fn version(&self) -> Option<&str>;

    /// Partial (major.minor) version for fuzzy matching, when meaningful.
    fn partial_version(&self) -> Option<String> {
        self.version().map(|v| {
            v.splitn(3, '.').take(2).collect::<Vec<_>>().join(".")
        })
    }

    /// Concept cardinality, or -1 for intractably large / grammar-defined
    /// systems.
    fn total_count(&self) -> i64;

    fn case_sensitive(&self) -> bool {
        true
    }

    /// Content completeness: complete, fragment, example, supplement,
    /// not-present.
    fn content_mode(&self) -> &str {
        "complete"
    }

    /// Find a code. `Ok(None)` means unknown; a soft diagnostic (inactive,
    /// case-normalized) rides on the `Located`.
    fn locate(&self, code: &str) -> TxResult<Option<Located>>;

    /// Best display for the language preferences, falling back to the
    /// system's default language.
    fn display(&self, concept: &ConceptRef, languages: &LanguagePreferences) -> Option<String>;

    fn designations(&self, concept: &ConceptRef) -> Vec<Designation>;

    fn definition(&self, concept: &ConceptRef) -> Option<String> {
        let _ = concept;
        None
    }

    /// Concept properties, optionally restricted to the named ones.
    fn properties(&self, concept: &ConceptRef, filter: Option<&[String]>) -> Vec<ConceptProperty>;

    fn is_inactive(&self, concept: &ConceptRef) -> bool {
        let _ = concept;
        false
    }

    fn is_abstract(&self, concept: &ConceptRef) -> bool {
        let _ = concept;
        false
    }

    fn is_deprecated(&self, concept: &ConceptRef) -> bool {
        let _ = concept;
        false
    }

    /// Subsumption per the fixed outcome ordering: equivalent, subsumes,
    /// subsumed-by, not-subsumed. A cycle in the ancestor relation is an
    /// invariant violation and must surface as an error, never be masked.
    fn subsumes(&self, a: &ConceptRef, b: &ConceptRef) -> TxResult<SubsumptionOutcome>;

    /// The filter operators this system supports, per property.
    fn supported_filters(&self) -> Vec<(&str, Vec<FilterOp>)>;

    /// Precompute a selection for one compose filter.
    fn filter(&self, property: &str, op: FilterOp, value: &str) -> TxResult<FilterContext>;

    /// Iterate the whole system in back-end order. Back-ends with
    /// `total_count() == -1` refuse (`too-costly`).
    fn iterate_all(&self) -> TxResult<Vec<ConceptRef>>;

    /// True when this back-end's filters are provisional in general.
    fn filters_not_closed(&self) -> bool {
        false
    }

    /// Helper for diagnostics: "url|version" identity.
    fn identity(&self) -> String {
        match self.version() {
            Some(v) => format!("{}|{v}", self.system()),
            None => self.system().to_string(),
        }
    }
}

/// Shared helper: refuse a filter a back-end does not support.
pub(crate) fn unsupported_filter(
    system: &str,
    property: &str,
    op: FilterOp,
    value: &str,
) -> TxIssue {
    TxIssue::not_supported(format!(
        "Filter '{property} {op} {value}' is not supported by CodeSystem '{system}'"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_op_round_trip() {
        for op in [
            FilterOp::Equal,
            FilterOp::IsA,
            FilterOp::DescendentOf,
            FilterOp::Regex,
            FilterOp::In,
            FilterOp::NotIn,
            FilterOp::Generalizes,
            FilterOp::Exists,
        ] {
            assert_eq!(FilterOp::parse(op.as_str()).unwrap(), op);
        }
        assert!(FilterOp::parse("child-of").is_err());
    }

    #[test]
    fn filter_context_intersection_keeps_left_order() {
        let left = FilterContext::closed(vec![
            ConceptRef::stored("a", 0),
            ConceptRef::stored("b", 1),
            ConceptRef::stored("c", 2),
        ]);
        let right = FilterContext::closed(vec![
            ConceptRef::stored("c", 2),
            ConceptRef::stored("a", 0),
        ]);
        let both = left.intersect(&right);
        let codes: Vec<_> = both.concepts().iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["a", "c"]);
        assert!(both.is_closed());
    }

    #[test]
    fn intersection_with_open_context_is_open() {
        let left = FilterContext::closed(vec![ConceptRef::synthesized("mg")]);
        let right = FilterContext::not_closed(vec![ConceptRef::synthesized("mg")]);
        assert!(!left.intersect(&right).is_closed());
    }

    #[test]
    fn partial_version_truncates_to_major_minor() {
        struct Dummy;
        impl CodeSystemProvider for Dummy {
            fn system(&self) -> &str {
                "http://example.org"
            }
            fn version(&self) -> Option<&str> {
                Some("2.77.1")
            }
            fn total_count(&self) -> i64 {
                0
            }
            fn locate(&self, _: &str) -> TxResult<Option<Located>> {
                Ok(None)
            }
            fn display(&self, _: &ConceptRef, _: &LanguagePreferences) -> Option<String> {
                None
            }
            fn designations(&self, _: &ConceptRef) -> Vec<Designation> {
                Vec::new()
            }
            fn properties(&self, _: &ConceptRef, _: Option<&[String]>) -> Vec<ConceptProperty> {
                Vec::new()
            }
            fn subsumes(&self, _: &ConceptRef, _: &ConceptRef) -> TxResult<SubsumptionOutcome> {
                Ok(SubsumptionOutcome::NotSubsumed)
            }
            fn supported_filters(&self) -> Vec<(&str, Vec<FilterOp>)> {
                Vec::new()
            }
            fn filter(&self, p: &str, op: FilterOp, v: &str) -> TxResult<FilterContext> {
                Err(unsupported_filter(self.system(), p, op, v))
            }
            fn iterate_all(&self) -> TxResult<Vec<ConceptRef>> {
                Ok(Vec::new())
            }
        }
        assert_eq!(Dummy.partial_version().as_deref(), Some("2.77"));
        assert_eq!(Dummy.identity(), "http://example.org|2.77.1");
    }
}
