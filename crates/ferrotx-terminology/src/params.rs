//! The request-shaped option set the engines honor, and its fingerprint.
//!
//! Workers parse the wire Parameters into this struct once; the engines
//! never look at raw request JSON. The fingerprint hash keys the
//! expansion memoization cache: equal hashes produce equivalent output.

use crate::versions::{VersionMode, VersionRule};
use ferrotx_core::issue::TxResult;
use ferrotx_core::lang::LanguagePreferences;
use ferrotx_core::parameters::Parameters;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Default expansion size cap.
pub const DEFAULT_EXPANSION_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct OperationParameters {
    pub active_only: bool,
    pub exclude_nested: bool,
    pub generate_narrative: bool,
    /// Return a truncated expansion with a warning instead of failing
    /// when the size cap is hit.
    pub limited_expansion: bool,
    pub exclude_not_for_ui: bool,
    pub exclude_post_coordinated: bool,
    pub include_designations: bool,
    pub include_definition: bool,
    /// validate-code: only the boolean outcome, no display.
    pub membership_only: bool,
    pub default_to_latest_version: bool,
    /// Accept fragment CodeSystems for validate-code.
    pub incomplete_ok: bool,
    /// Downgrade bad-display errors to warnings.
    pub display_warning: bool,
    pub version_rules: Vec<VersionRule>,
    pub value_set_version_rules: Vec<VersionRule>,
    /// Properties to return; empty means all.
    pub properties: Vec<String>,
    /// Designation uses/languages to return; empty means all.
    pub designations: Vec<String>,
    /// Free-text filter over display + designations ($expand `filter`).
    pub text_filter: Option<String>,
    /// From the Accept-Language header.
    pub http_languages: Option<LanguagePreferences>,
    /// From the explicit displayLanguage parameter; wins over the header.
    pub display_languages: Option<LanguagePreferences>,
    /// Expansion size cap (server-configured).
    pub expansion_limit: usize,
}

impl Default for OperationParameters {
    fn default() -> Self {
        Self {
            active_only: false,
            exclude_nested: false,
            generate_narrative: false,
            limited_expansion: false,
            exclude_not_for_ui: false,
            exclude_post_coordinated: false,
            include_designations: false,
            include_definition: false,
            membership_only: false,
            default_to_latest_version: false,
            incomplete_ok: false,
            display_warning: false,
            version_rules: Vec::new(),
            value_set_version_rules: Vec::new(),
            properties: Vec::new(),
            designations: Vec::new(),
            text_filter: None,
            http_languages: None,
            display_languages: None,
            expansion_limit: DEFAULT_EXPANSION_LIMIT,
        }
    }
}

impl OperationParameters {
    /// The effective language context: explicit displayLanguage wins over
    /// Accept-Language.
    pub fn languages(&self) -> LanguagePreferences {
        self.display_languages
            .clone()
            .or_else(|| self.http_languages.clone())
            .unwrap_or_default()
    }

    /// Parse the boolean/string options from a wire Parameters resource.
    /// Worker-level parameters (url, code, coding, offset, count) are read
    /// by the workers themselves.
    pub fn from_parameters(params: &Parameters) -> TxResult<Self> {
        let mut out = Self::default();
        let flag = |name: &str, default: bool| params.bool_value(name).unwrap_or(default);

        out.active_only = flag("activeOnly", false);
        out.exclude_nested = flag("excludeNested", false);
        out.generate_narrative = flag("generateNarrative", false);
        out.limited_expansion = flag("limitedExpansion", false);
        out.exclude_not_for_ui = flag("excludeNotForUI", false);
        out.exclude_post_coordinated = flag("excludePostCoordinated", false);
        out.include_designations = flag("includeDesignations", false);
        out.include_definition = flag("includeDefinition", false);
        out.membership_only = flag("membershipOnly", false);
        out.default_to_latest_version = flag("default-to-latest-version", false);
        out.incomplete_ok = flag("incomplete-ok", false);
        out.display_warning =
            flag("lenient-display-validation", false) || flag("displayWarning", false);
        out.text_filter = params.str_value("filter").map(String::from);

        for (name, mode) in [
            ("system-version", VersionMode::Default),
            ("check-system-version", VersionMode::Check),
            ("force-system-version", VersionMode::Override),
        ] {
            for p in params.all(name) {
                if let Some(value) = p.value.as_ref().and_then(|v| v.as_str()) {
                    out.version_rules.push(VersionRule::parse(value, mode)?);
                }
            }
        }
        for (name, mode) in [
            ("default-valueset-version", VersionMode::Default),
            ("check-valueset-version", VersionMode::Check),
            ("force-valueset-version", VersionMode::Override),
        ] {
            for p in params.all(name) {
                if let Some(value) = p.value.as_ref().and_then(|v| v.as_str()) {
                    out.value_set_version_rules.push(VersionRule::parse(value, mode)?);
                }
            }
        }

        for p in params.all("property") {
            if let Some(value) = p.value.as_ref().and_then(|v| v.as_str()) {
                out.properties.push(value.to_string());
            }
        }
        for p in params.all("designation") {
            if let Some(value) = p.value.as_ref().and_then(|v| v.as_str()) {
                out.designations.push(value.to_string());
            }
        }

        if let Some(lang) = params.str_value("displayLanguage") {
            out.display_languages = Some(ferrotx_core::lang::parse_accept_language(lang)?);
        }

        Ok(out)
    }

    /// Stable fingerprint over every output-affecting option. Equal
    /// fingerprints (plus equal value-set identity and paging) imply
    /// equivalent expansions.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        (
            self.active_only,
            self.exclude_nested,
            self.generate_narrative,
            self.limited_expansion,
            self.exclude_not_for_ui,
            self.exclude_post_coordinated,
            self.include_designations,
            self.include_definition,
            self.membership_only,
            self.default_to_latest_version,
            self.incomplete_ok,
            self.display_warning,
        )
            .hash(&mut hasher);
        self.version_rules.hash(&mut hasher);
        self.value_set_version_rules.hash(&mut hasher);
        self.properties.hash(&mut hasher);
        self.designations.hash(&mut hasher);
        self.text_filter.hash(&mut hasher);
        // Hash the rendered language lists; q-weights are floats and only
        // their ordering matters for output.
        for prefs in [&self.http_languages, &self.display_languages] {
            match prefs {
                Some(prefs) => {
                    for entry in prefs.entries() {
                        match &entry.tag {
                            Some(tag) => tag.to_string().hash(&mut hasher),
                            None => "*".hash(&mut hasher),
                        }
                    }
                }
                None => 0u8.hash(&mut hasher),
            }
        }
        self.expansion_limit.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrotx_core::parameters::Parameters;
    use serde_json::json;

    #[test]
    fn parses_flags_and_lists() {
        let wire = json!({
            "resourceType": "Parameters",
            "parameter": [
                {"name": "activeOnly", "valueBoolean": true},
                {"name": "includeDesignations", "valueBoolean": true},
                {"name": "displayLanguage", "valueCode": "de"},
                {"name": "property", "valueCode": "status"},
                {"name": "property", "valueCode": "parent"},
                {"name": "check-system-version", "valueUri": "http://loinc.org|2.77"}
            ]
        });
        let params = Parameters::from_json(&wire).unwrap();
        let options = OperationParameters::from_parameters(&params).unwrap();
        assert!(options.active_only);
        assert!(options.include_designations);
        assert_eq!(options.properties, vec!["status", "parent"]);
        assert_eq!(options.version_rules.len(), 1);
        assert_eq!(options.version_rules[0].mode, VersionMode::Check);
        assert_eq!(options.languages().primary().unwrap().language, "de");
    }

    #[test]
    fn display_language_wins_over_header() {
        let mut options = OperationParameters::default();
        options.http_languages = Some(ferrotx_core::lang::parse_accept_language("en").unwrap());
        options.display_languages = Some(ferrotx_core::lang::parse_accept_language("de").unwrap());
        assert_eq!(options.languages().primary().unwrap().language, "de");
    }

    #[test]
    fn fingerprint_is_stable_and_discriminating() {
        let a = OperationParameters::default();
        let b = OperationParameters::default();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = OperationParameters::default();
        c.active_only = true;
        assert_ne!(a.fingerprint(), c.fingerprint());

        let mut d = OperationParameters::default();
        d.display_languages = Some(ferrotx_core::lang::parse_accept_language("de").unwrap());
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn bad_version_rule_is_invalid() {
        let wire = json!({
            "resourceType": "Parameters",
            "parameter": [{"name": "force-system-version", "valueUri": "no-pipe-here"}]
        });
        let params = Parameters::from_json(&wire).unwrap();
        assert!(OperationParameters::from_parameters(&params).is_err());
    }
}
