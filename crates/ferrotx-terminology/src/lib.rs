//! The FerroTX terminology evaluation engine.
//!
//! The crate is organized around three layers:
//!
//! - **Providers** ([`provider`], [`backends`]): a uniform capability
//!   surface over radically different code-system back-ends (enumerated
//!   FHIR concept trees, UCUM unit algebra, SNOMED subsets, the LOINC
//!   table, BCP-47 language tags, fixed internal lists).
//! - **Engines** ([`expand`], [`validate`], [`translate`]): value set
//!   expansion and membership, code validation, and one-hop concept map
//!   translation, all deadline-polled and re-entrant.
//! - **Registry** ([`library`], [`provider_view`], [`loader`]): the
//!   process-wide immutable Library built from a declarative source
//!   manifest, and the per-request Provider views it hands out.

pub mod backends;
pub mod cache;
pub mod expand;
pub mod library;
pub mod loader;
pub mod manifest;
pub mod params;
pub mod provider;
pub mod provider_view;
pub mod translate;
pub mod validate;
pub mod versions;

pub use cache::{ExpansionCache, ExpansionKey};
pub use expand::{Expansion, ExpansionEntry, expand, member_of};
pub use library::{Library, LibraryBuilder};
pub use loader::{LoaderConfig, load_library};
pub use manifest::{SourceEntry, SourceKind, SourceManifest};
pub use params::OperationParameters;
pub use provider::{
    CodeSystemProvider, ConceptProperty, ConceptRef, Designation, FilterContext, FilterOp,
    Located, PropertyValue, SubsumptionOutcome,
};
pub use provider_view::Provider;
pub use translate::{TranslationMatch, TranslationResult, translate};
pub use validate::{
    ValidationOutcome, codings_from_inputs, validate_in_code_system, validate_in_value_set,
};
pub use versions::{VersionMode, VersionRule};
