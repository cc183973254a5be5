//! FHIR package acquisition for the terminology library.
//!
//! Packages are fetched from npm-style registries (packages.fhir.org and
//! mirrors), extracted into an on-disk cache, and never mutated afterwards.
//! File-backed terminology sources (UCUM essence, LOINC table, SNOMED RF2)
//! go through the same cache via [`fetch_artifact`].

pub mod error;
pub mod index;
pub mod manager;

pub use error::{PackageError, PackageResult};
pub use index::{IndexedResource, read_package_index};
pub use manager::{PackageManager, PackageManagerConfig, PackagePath, fetch_artifact};
