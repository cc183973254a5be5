use crate::issue::TxIssue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// FHIR release served by a gateway mount.
///
/// The same terminology library backs every version; only the wire shapes
/// differ (see the server's compat layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FhirVersion {
    #[serde(rename = "3.0.2")]
    R3,
    #[serde(rename = "4.0.1")]
    R4,
    #[serde(rename = "5.0.0")]
    R5,
    #[serde(rename = "6.0.0")]
    R6,
}

impl FhirVersion {
    /// The FHIR major version number (3, 4, 5, 6).
    pub fn major(&self) -> u8 {
        match self {
            FhirVersion::R3 => 3,
            FhirVersion::R4 => 4,
            FhirVersion::R5 => 5,
            FhirVersion::R6 => 6,
        }
    }

    /// Core package id for this release on the FHIR package registry.
    pub fn core_package(&self) -> &'static str {
        match self {
            FhirVersion::R3 => "hl7.fhir.r3.core",
            FhirVersion::R4 => "hl7.fhir.r4.core",
            FhirVersion::R5 => "hl7.fhir.r5.core",
            FhirVersion::R6 => "hl7.fhir.r6.core",
        }
    }

    pub fn as_release(&self) -> &'static str {
        match self {
            FhirVersion::R3 => "R3",
            FhirVersion::R4 => "R4",
            FhirVersion::R5 => "R5",
            FhirVersion::R6 => "R6",
        }
    }
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FhirVersion::R3 => write!(f, "3.0.2"),
            FhirVersion::R4 => write!(f, "4.0.1"),
            FhirVersion::R5 => write!(f, "5.0.0"),
            FhirVersion::R6 => write!(f, "6.0.0"),
        }
    }
}

impl FromStr for FhirVersion {
    type Err = TxIssue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "3.0.2" | "R3" | "r3" | "3" => Ok(FhirVersion::R3),
            "4.0.1" | "R4" | "r4" | "4" => Ok(FhirVersion::R4),
            "5.0.0" | "R5" | "r5" | "5" => Ok(FhirVersion::R5),
            "6.0.0" | "R6" | "r6" | "6" => Ok(FhirVersion::R6),
            _ => Err(TxIssue::invalid(format!("Unknown FHIR version: {s}"))),
        }
    }
}

impl Default for FhirVersion {
    fn default() -> Self {
        FhirVersion::R4
    }
}

/// A single coded value on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl fmt::Display for Coding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.system, &self.code) {
            (Some(s), Some(c)) => write!(f, "{s}#{c}"),
            (None, Some(c)) => write!(f, "#{c}"),
            _ => write!(f, "(empty coding)"),
        }
    }
}

/// A set of codings plus free text, as sent by clients to $validate-code
/// and $translate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub coding: Vec<Coding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fhir_version_round_trip() {
        for (s, v) in [
            ("R3", FhirVersion::R3),
            ("4.0.1", FhirVersion::R4),
            ("r5", FhirVersion::R5),
        ] {
            assert_eq!(s.parse::<FhirVersion>().unwrap(), v);
        }
        assert!("4.9.9".parse::<FhirVersion>().is_err());
        assert_eq!(FhirVersion::R5.to_string(), "5.0.0");
        assert_eq!(FhirVersion::R3.major(), 3);
    }

    #[test]
    fn coding_serializes_without_empty_fields() {
        let c = Coding::new("http://loinc.org", "8867-4");
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["system"], "http://loinc.org");
        assert_eq!(v["code"], "8867-4");
        assert!(v.get("display").is_none());
    }

    #[test]
    fn codeable_concept_deserializes() {
        let cc: CodeableConcept = serde_json::from_value(serde_json::json!({
            "text": "Heart rate",
            "coding": [{"system": "http://loinc.org", "code": "8867-4"}]
        }))
        .unwrap();
        assert_eq!(cc.coding.len(), 1);
        assert_eq!(cc.text.as_deref(), Some("Heart rate"));
    }
}
