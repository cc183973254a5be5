pub mod context;
pub mod fhir;
pub mod i18n;
pub mod issue;
pub mod lang;
pub mod parameters;

pub use context::OperationContext;
pub use fhir::{CodeableConcept, Coding, FhirVersion};
pub use i18n::MessageCatalog;
pub use issue::{IssueType, Severity, TxIssue, TxResult};
pub use lang::{LanguagePreferences, LanguageTag, parse_accept_language};
pub use parameters::{ParamValue, Parameter, Parameters};
