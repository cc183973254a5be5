//! Version pinning rules and the version matching policy.
//!
//! Requests may pin code-system or value-set versions three ways:
//! `default` supplies a version only when none was requested, `check`
//! asserts the requested version, and `override` replaces it outright.

use ferrotx_core::issue::{TxIssue, TxResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionMode {
    Default,
    Check,
    Override,
}

/// One pinning rule for a canonical url.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionRule {
    pub system: String,
    pub version: String,
    pub mode: VersionMode,
}

impl VersionRule {
    /// Parse the `url|version` form the version parameters carry.
    pub fn parse(value: &str, mode: VersionMode) -> TxResult<Self> {
        match value.rsplit_once('|') {
            Some((system, version)) if !system.is_empty() && !version.is_empty() => Ok(Self {
                system: system.to_string(),
                version: version.to_string(),
                mode,
            }),
            _ => Err(TxIssue::invalid(format!(
                "Version rule must be of the form url|version, not '{value}'"
            ))),
        }
    }
}

/// Resolve the effective version for `system` given the active rules and
/// the version the request supplied (if any).
pub fn resolve_version(
    rules: &[VersionRule],
    system: &str,
    requested: Option<&str>,
) -> TxResult<Option<String>> {
    let matching: Vec<&VersionRule> = rules.iter().filter(|r| r.system == system).collect();

    // Conflicting override rules are a business-rule error, not a silent pick.
    let overrides: Vec<&&VersionRule> = matching
        .iter()
        .filter(|r| r.mode == VersionMode::Override)
        .collect();
    if overrides.len() > 1 && overrides.iter().any(|r| r.version != overrides[0].version) {
        return Err(TxIssue::business_rule(format!(
            "Conflicting version rules for system '{system}': '{}' vs '{}'",
            overrides[0].version, overrides[1].version
        )));
    }

    if let Some(rule) = overrides.first() {
        return Ok(Some(rule.version.clone()));
    }

    if let Some(rule) = matching.iter().find(|r| r.mode == VersionMode::Check) {
        if let Some(requested) = requested {
            if requested != rule.version {
                return Err(TxIssue::business_rule(format!(
                    "The version '{requested}' does not match the required version '{}' for system '{system}'",
                    rule.version
                )));
            }
        }
        return Ok(Some(rule.version.clone()));
    }

    if let Some(requested) = requested {
        return Ok(Some(requested.to_string()));
    }

    Ok(matching
        .iter()
        .find(|r| r.mode == VersionMode::Default)
        .map(|r| r.version.clone()))
}

/// Major.minor truncation used by the fuzzy matching slot.
pub fn major_minor(version: &str) -> String {
    version.splitn(3, '.').take(2).collect::<Vec<_>>().join(".")
}

/// Order two version strings, numeric segment by segment, falling back
/// to lexicographic for non-numeric segments. Good enough for "latest"
/// selection across the version schemes the registries use.
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let mut left = a.split(['.', '-']);
    let mut right = b.split(['.', '-']);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (None, Some(_)) => return std::cmp::Ordering::Less,
            (Some(_), None) => return std::cmp::Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYS: &str = "http://loinc.org";

    fn rule(version: &str, mode: VersionMode) -> VersionRule {
        VersionRule {
            system: SYS.to_string(),
            version: version.to_string(),
            mode,
        }
    }

    #[test]
    fn parse_rejects_bare_urls() {
        assert!(VersionRule::parse("http://loinc.org|2.77", VersionMode::Check).is_ok());
        assert!(VersionRule::parse("http://loinc.org", VersionMode::Check).is_err());
        assert!(VersionRule::parse("|2.77", VersionMode::Check).is_err());
    }

    #[test]
    fn override_replaces_requested() {
        let rules = [rule("2.77", VersionMode::Override)];
        assert_eq!(
            resolve_version(&rules, SYS, Some("2.74")).unwrap(),
            Some("2.77".to_string())
        );
    }

    #[test]
    fn check_asserts_requested() {
        let rules = [rule("2.77", VersionMode::Check)];
        assert!(resolve_version(&rules, SYS, Some("2.74")).is_err());
        assert_eq!(
            resolve_version(&rules, SYS, Some("2.77")).unwrap(),
            Some("2.77".to_string())
        );
        assert_eq!(
            resolve_version(&rules, SYS, None).unwrap(),
            Some("2.77".to_string())
        );
    }

    #[test]
    fn default_yields_only_without_request() {
        let rules = [rule("2.77", VersionMode::Default)];
        assert_eq!(
            resolve_version(&rules, SYS, Some("2.74")).unwrap(),
            Some("2.74".to_string())
        );
        assert_eq!(
            resolve_version(&rules, SYS, None).unwrap(),
            Some("2.77".to_string())
        );
    }

    #[test]
    fn conflicting_overrides_are_rejected() {
        let rules = [rule("2.77", VersionMode::Override), rule("2.74", VersionMode::Override)];
        assert!(resolve_version(&rules, SYS, None).is_err());
    }

    #[test]
    fn unrelated_systems_pass_through() {
        let rules = [rule("2.77", VersionMode::Override)];
        assert_eq!(
            resolve_version(&rules, "http://snomed.info/sct", Some("x")).unwrap(),
            Some("x".to_string())
        );
    }

    #[test]
    fn major_minor_truncation() {
        assert_eq!(major_minor("4.0.1"), "4.0");
        assert_eq!(major_minor("2.77"), "2.77");
        assert_eq!(major_minor("5"), "5");
    }

    #[test]
    fn version_ordering_is_numeric() {
        use std::cmp::Ordering;
        assert_eq!(compare_versions("2.9", "2.77"), Ordering::Less);
        assert_eq!(compare_versions("4.0.1", "4.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
    }
}
