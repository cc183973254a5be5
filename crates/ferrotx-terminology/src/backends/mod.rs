//! Concrete code-system back-ends.
//!
//! None of these share implementation except through the
//! [`CodeSystemProvider`](crate::provider::CodeSystemProvider) trait: an
//! enumerated FHIR concept tree, the UCUM unit grammar, SNOMED CT subsets,
//! the LOINC table, BCP-47 language tags, and fixed internal lists each
//! answer the same capability surface from their own native model.

pub mod enumerated;
pub mod internal;
pub mod langtags;
pub mod loinc;
pub mod snomed;
pub mod ucum;

pub use enumerated::EnumeratedCodeSystem;
pub use internal::{HgvsCodeSystem, InternalTable, internal_code_system};
pub use langtags::LanguageTagCodeSystem;
pub use loinc::LoincCodeSystem;
pub use snomed::SnomedCodeSystem;
pub use ucum::UcumCodeSystem;
