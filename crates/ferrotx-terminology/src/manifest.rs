//! The declarative source manifest.
//!
//! Each line is `kind[!]:payload`. The trailing `!` marks the default
//! provider for a canonical url when several sources claim it. Unknown
//! kinds are fatal: a typo in the manifest must not silently drop a
//! terminology.

use ferrotx_core::issue::{TxIssue, TxResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Built-in tables and grammars: `internal:<name>`.
    Internal,
    /// UCUM essence file: `ucum:<file>`.
    Ucum,
    /// LOINC csv table: `loinc:<file-or-url>`.
    Loinc,
    /// SNOMED RF2 snapshot directory: `snomed:<dir>`.
    Snomed,
    /// Enumerated CodeSystem artifacts distributed outside packages.
    RxNorm,
    Ndc,
    Unii,
    Cpt,
    Omop,
    /// FHIR package: `npm:<pkg>[#version]`.
    Npm,
    /// FHIR package, CodeSystems only: `npm/cs:<pkg>[#version]`.
    NpmCodeSystemsOnly,
}

impl SourceKind {
    fn parse(kind: &str) -> TxResult<Self> {
        match kind {
            "internal" => Ok(SourceKind::Internal),
            "ucum" => Ok(SourceKind::Ucum),
            "loinc" => Ok(SourceKind::Loinc),
            "snomed" => Ok(SourceKind::Snomed),
            "rxnorm" => Ok(SourceKind::RxNorm),
            "ndc" => Ok(SourceKind::Ndc),
            "unii" => Ok(SourceKind::Unii),
            "cpt" => Ok(SourceKind::Cpt),
            "omop" => Ok(SourceKind::Omop),
            "npm" => Ok(SourceKind::Npm),
            "npm/cs" => Ok(SourceKind::NpmCodeSystemsOnly),
            _ => Err(TxIssue::invalid(format!("Unknown source kind '{kind}'"))),
        }
    }

    /// Whether this kind needs an artifact fetched in the fetch phase.
    pub fn needs_artifact(&self) -> bool {
        matches!(
            self,
            SourceKind::Ucum
                | SourceKind::Loinc
                | SourceKind::Snomed
                | SourceKind::RxNorm
                | SourceKind::Ndc
                | SourceKind::Unii
                | SourceKind::Cpt
                | SourceKind::Omop
        )
    }

    /// Internal sources are the sole providers of their urls; a default
    /// marker on them is a configuration mistake.
    pub fn accepts_default(&self) -> bool {
        !matches!(self, SourceKind::Internal)
    }
}

/// One parsed manifest line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub kind: SourceKind,
    pub is_default: bool,
    pub payload: String,
}

impl SourceEntry {
    pub fn parse(line: &str) -> TxResult<Self> {
        let line = line.trim();
        let (mut kind, payload) = line
            .split_once(':')
            .ok_or_else(|| TxIssue::invalid(format!("Source entry without kind: '{line}'")))?;
        let is_default = kind.ends_with('!');
        if is_default {
            kind = &kind[..kind.len() - 1];
        }
        let kind = SourceKind::parse(kind)?;
        if is_default && !kind.accepts_default() {
            return Err(TxIssue::invalid(format!(
                "Source kind '{kind:?}' does not accept a default marker: '{line}'"
            )));
        }
        if payload.is_empty() {
            return Err(TxIssue::invalid(format!("Source entry without payload: '{line}'")));
        }
        Ok(Self {
            kind,
            is_default,
            payload: payload.to_string(),
        })
    }

    /// Split an npm payload into package id and optional pinned version.
    pub fn npm_coordinates(&self) -> (&str, Option<&str>) {
        match self.payload.split_once('#') {
            Some((package, version)) => (package, Some(version)),
            None => (self.payload.as_str(), None),
        }
    }
}

/// The whole manifest, entries in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceManifest {
    pub entries: Vec<SourceEntry>,
}

impl SourceManifest {
    /// Parse one entry per line; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> TxResult<Self> {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            entries.push(SourceEntry::parse(line)?);
        }
        Ok(Self { entries })
    }

    pub fn from_lines(lines: &[String]) -> TxResult<Self> {
        let mut entries = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(SourceEntry::parse(line)?);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_common_kinds() {
        let manifest = SourceManifest::parse(
            "# sources\n\
             internal:iso3166\n\
             ucum:ucum-essence.xml\n\
             loinc:https://example.org/Loinc.csv\n\
             npm:hl7.terminology.r4#5.5.0\n\
             npm/cs:hl7.fhir.r4.core\n",
        )
        .unwrap();
        assert_eq!(manifest.entries.len(), 5);
        assert_eq!(manifest.entries[0].kind, SourceKind::Internal);
        assert_eq!(manifest.entries[3].npm_coordinates(), ("hl7.terminology.r4", Some("5.5.0")));
        assert_eq!(manifest.entries[4].kind, SourceKind::NpmCodeSystemsOnly);
    }

    #[test]
    fn default_marker_is_recognized() {
        let entry = SourceEntry::parse("loinc!:Loinc.csv").unwrap();
        assert!(entry.is_default);
        assert_eq!(entry.payload, "Loinc.csv");
    }

    #[test]
    fn unknown_kind_is_fatal() {
        assert!(SourceEntry::parse("dicom:somewhere").is_err());
        assert!(SourceEntry::parse("no-colon-here").is_err());
    }

    #[test]
    fn default_on_internal_is_fatal() {
        assert!(SourceEntry::parse("internal!:iso3166").is_err());
        assert!(SourceEntry::parse("internal:iso3166").is_ok());
    }

    #[test]
    fn alternates_stay_in_the_payload() {
        let entry = SourceEntry::parse("loinc:/data/Loinc.csv|https://example.org/Loinc.csv").unwrap();
        assert_eq!(entry.payload, "/data/Loinc.csv|https://example.org/Loinc.csv");
    }
}
