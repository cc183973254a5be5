//! Structured issues raised by the terminology engines.
//!
//! Engines never panic or throw ad-hoc errors: every failure is a `TxIssue`
//! carrying its FHIR issue code and the HTTP status the worker boundary
//! should answer with. A single `TxIssue` maps 1:1 to one
//! `OperationOutcome.issue[]` element.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Result alias used throughout the engines.
pub type TxResult<T> = Result<T, TxIssue>;

/// FHIR issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Information,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Information => "information",
        }
    }
}

/// The subset of FHIR issue-type codes the engines raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueType {
    /// Canonical url or server id not resolvable.
    NotFound,
    /// Malformed input (bad Accept-Language, unparseable parameter).
    Invalid,
    /// Circular ValueSet reference, conflicting version rules.
    BusinessRule,
    /// Operator or property not supported by a code system.
    NotSupported,
    /// Code unknown to its code system.
    CodeInvalid,
    /// Deadline or size cap hit without limitedExpansion.
    TooCostly,
    /// Internal bug.
    Exception,
    /// Attached informational notes (limited expansion, language fallback).
    Informational,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::NotFound => "not-found",
            IssueType::Invalid => "invalid",
            IssueType::BusinessRule => "business-rule",
            IssueType::NotSupported => "not-supported",
            IssueType::CodeInvalid => "code-invalid",
            IssueType::TooCostly => "too-costly",
            IssueType::Exception => "exception",
            IssueType::Informational => "informational",
        }
    }

    /// Default HTTP status for issues of this type.
    fn default_status(&self) -> u16 {
        match self {
            IssueType::NotFound => 404,
            IssueType::Invalid => 400,
            IssueType::BusinessRule => 422,
            IssueType::NotSupported => 400,
            IssueType::CodeInvalid => 400,
            IssueType::TooCostly => 422,
            IssueType::Exception => 500,
            IssueType::Informational => 200,
        }
    }
}

/// One structured issue: the engine-side error type and the wire-side
/// `OperationOutcome.issue` element in a single value.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{}: {}", .code.as_str(), .diagnostics)]
pub struct TxIssue {
    pub severity: Severity,
    pub code: IssueType,
    pub diagnostics: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_text: Option<String>,
    /// FHIRPath expression locating the offending element, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub http_status: u16,
}

impl TxIssue {
    pub fn new(severity: Severity, code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            diagnostics: diagnostics.into(),
            details_text: None,
            expression: None,
            location: None,
            http_status: code.default_status(),
        }
    }

    pub fn not_found(diagnostics: impl Into<String>) -> Self {
        Self::new(Severity::Error, IssueType::NotFound, diagnostics)
    }

    pub fn invalid(diagnostics: impl Into<String>) -> Self {
        Self::new(Severity::Error, IssueType::Invalid, diagnostics)
    }

    pub fn business_rule(diagnostics: impl Into<String>) -> Self {
        Self::new(Severity::Error, IssueType::BusinessRule, diagnostics)
    }

    pub fn not_supported(diagnostics: impl Into<String>) -> Self {
        Self::new(Severity::Error, IssueType::NotSupported, diagnostics)
    }

    pub fn code_invalid(diagnostics: impl Into<String>) -> Self {
        Self::new(Severity::Error, IssueType::CodeInvalid, diagnostics)
    }

    pub fn too_costly(diagnostics: impl Into<String>) -> Self {
        Self::new(Severity::Error, IssueType::TooCostly, diagnostics)
    }

    pub fn exception(diagnostics: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, IssueType::Exception, diagnostics)
    }

    pub fn warning(code: IssueType, diagnostics: impl Into<String>) -> Self {
        let mut issue = Self::new(Severity::Warning, code, diagnostics);
        issue.http_status = 200;
        issue
    }

    pub fn information(diagnostics: impl Into<String>) -> Self {
        Self::new(Severity::Information, IssueType::Informational, diagnostics)
    }

    /// Circular ValueSet reference. Responds 200 with an OperationOutcome
    /// body; the diagnostics carry the cycle path.
    pub fn circular_reference(path: &[String], url: &str) -> Self {
        let mut trail = path.to_vec();
        trail.push(url.to_string());
        let mut issue = Self::business_rule(format!(
            "Circular ValueSet reference: {}",
            trail.join(" -> ")
        ));
        issue.http_status = 200;
        issue
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details_text = Some(details.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = status;
        self
    }

    pub fn is_warning_or_less(&self) -> bool {
        matches!(self.severity, Severity::Warning | Severity::Information)
    }

    /// Render as one `OperationOutcome.issue[]` element.
    pub fn to_issue_json(&self) -> Value {
        let mut issue = json!({
            "severity": self.severity.as_str(),
            "code": self.code.as_str(),
            "diagnostics": self.diagnostics,
        });
        if let Some(ref text) = self.details_text {
            issue["details"] = json!({ "text": text });
        }
        if let Some(ref expression) = self.expression {
            issue["expression"] = json!([expression]);
        }
        if let Some(ref location) = self.location {
            issue["location"] = json!([location]);
        }
        issue
    }

    /// Render as a complete OperationOutcome resource.
    pub fn to_operation_outcome(&self) -> Value {
        json!({
            "resourceType": "OperationOutcome",
            "issue": [self.to_issue_json()],
        })
    }
}

/// Collect several issues into one OperationOutcome resource.
pub fn operation_outcome(issues: &[TxIssue]) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": issues.iter().map(TxIssue::to_issue_json).collect::<Vec<_>>(),
    })
}
