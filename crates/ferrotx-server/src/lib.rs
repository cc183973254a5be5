//! FerroTX: a multi-version FHIR terminology server.
//!
//! One process serves R3/R4/R5 endpoints from a shared library of code
//! systems, value sets, and concept maps declared in a source manifest.
//! The evaluation engines live in `ferrotx-terminology`; this crate is
//! the HTTP surface: operation workers, the multi-version gateway, and
//! configuration.

pub mod compat;
pub mod config;
pub mod gateway;
pub mod metadata;
pub mod middleware;
pub mod operations;
pub mod search;
pub mod server;

pub use config::{AppConfig, EndpointConfig, LimitsConfig, SourcesConfig};
pub use server::{MountState, build_app, build_app_with_library};
