//! The per-request Provider: a version-pinned view over the Library.
//!
//! Each gateway mount binds one Provider per FHIR version; the engines
//! only ever talk to it, never to the Library directly. Lookup for an
//! unknown system answers `None`, never an error — "unknown" is a normal
//! outcome the engines turn into their own diagnostics.

use crate::backends::EnumeratedCodeSystem;
use crate::library::Library;
use crate::provider::CodeSystemProvider;
use crate::versions::{compare_versions, major_minor};
use ferrotx_core::context::OperationContext;
use ferrotx_core::fhir::FhirVersion;
use ferrotx_core::i18n::MessageCatalog;
use ferrotx_core::issue::TxResult;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct Provider {
    library: Arc<Library>,
    fhir_version: FhirVersion,
}

impl Provider {
    pub(crate) fn new(library: Arc<Library>, fhir_version: FhirVersion) -> Self {
        Self {
            library,
            fhir_version,
        }
    }

    pub fn fhir_version(&self) -> FhirVersion {
        self.fhir_version
    }

    pub fn i18n(&self) -> &MessageCatalog {
        self.library.i18n()
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    /// Resolve a code-system provider with the version matching policy:
    /// exact > major.minor > latest. `None` means unknown.
    pub fn get_code_system_provider(
        &self,
        ctx: &OperationContext,
        system: &str,
        version: Option<&str>,
        supplements: &[Value],
    ) -> TxResult<Option<Arc<dyn CodeSystemProvider>>> {
        ctx.dead_check("code system resolution")?;

        // Preloaded package systems for this FHIR version, core first.
        let mut exact: Option<&Value> = None;
        let mut fuzzy: Option<&Value> = None;
        let mut latest: Option<&Value> = None;
        for package in self.library.package_systems() {
            if !package.applies_to(self.fhir_version) {
                continue;
            }
            for resource in package.store.list() {
                if resource.get("url").and_then(|v| v.as_str()) != Some(system) {
                    continue;
                }
                let found = resource.get("version").and_then(|v| v.as_str());
                match version {
                    Some(wanted) => {
                        if found == Some(wanted) {
                            exact = exact.or(Some(resource));
                        } else if found.map(|f| major_minor(f) == major_minor(wanted)).unwrap_or(false)
                        {
                            fuzzy = fuzzy.or(Some(resource));
                        }
                    }
                    None => {
                        let newer = match (latest.and_then(|l| l.get("version").and_then(|v| v.as_str())), found) {
                            (Some(current), Some(found)) => {
                                compare_versions(found, current) == std::cmp::Ordering::Greater
                            }
                            (None, _) => true,
                            (_, None) => false,
                        };
                        if newer {
                            latest = Some(resource);
                        }
                    }
                }
            }
        }
        if let Some(resource) = exact.or(fuzzy) {
            return Ok(Some(self.create_code_system_provider(ctx, resource, supplements)?));
        }

        // Registered factories.
        if let Some(entry) = self.library.factory_for(system, version) {
            return Ok(Some(entry.factory.build(supplements)?));
        }

        if version.is_none() {
            if let Some(resource) = latest {
                return Ok(Some(self.create_code_system_provider(ctx, resource, supplements)?));
            }
        }

        tracing::debug!(system = %system, version = ?version, "No code system provider");
        Ok(None)
    }

    /// Wrap a CodeSystem resource (inline or preloaded) as a provider.
    pub fn create_code_system_provider(
        &self,
        _ctx: &OperationContext,
        resource: &Value,
        supplements: &[Value],
    ) -> TxResult<Arc<dyn CodeSystemProvider>> {
        let mut cs = EnumeratedCodeSystem::from_resource(resource)?;
        for supplement in supplements {
            cs.apply_supplement(supplement)?;
        }
        Ok(Arc::new(cs))
    }

    /// Walk the value-set sources in order; first match wins.
    pub fn find_value_set(
        &self,
        ctx: &OperationContext,
        url: &str,
        version: Option<&str>,
    ) -> Option<Value> {
        if ctx.dead_check("value set resolution").is_err() {
            return None;
        }
        // `url|version` canonicals carry the version inline.
        let (url, version) = match url.split_once('|') {
            Some((base, inline)) if version.is_none() => (base, Some(inline)),
            _ => (url, version),
        };
        self.library
            .value_set_stores()
            .iter()
            .find_map(|store| store.find(url, version).cloned())
    }

    pub fn get_value_set_by_id(&self, id: &str) -> Option<Value> {
        self.library
            .value_set_stores()
            .iter()
            .find_map(|store| store.by_id(id).cloned())
    }

    pub fn get_code_system_by_id(&self, id: &str) -> Option<Value> {
        self.library
            .package_systems()
            .iter()
            .filter(|p| p.applies_to(self.fhir_version))
            .find_map(|p| p.store.by_id(id).cloned())
    }

    pub fn find_concept_map(&self, url: &str, version: Option<&str>) -> Option<Value> {
        self.library
            .concept_map_stores()
            .iter()
            .find_map(|store| store.find(url, version).cloned())
    }

    pub fn get_concept_map_by_id(&self, id: &str) -> Option<Value> {
        self.library
            .concept_map_stores()
            .iter()
            .find_map(|store| store.by_id(id).cloned())
    }

    /// Every known concept map, source order preserved (for $translate
    /// without an explicit url).
    pub fn list_concept_maps(&self) -> Vec<Value> {
        self.library
            .concept_map_stores()
            .iter()
            .flat_map(|store| store.list().iter().cloned())
            .collect()
    }

    pub fn list_value_sets(&self) -> Vec<Value> {
        self.library
            .value_set_stores()
            .iter()
            .flat_map(|store| store.list().iter().cloned())
            .collect()
    }

    /// Preloaded CodeSystem resources visible to this FHIR version.
    pub fn list_code_systems(&self) -> Vec<Value> {
        self.library
            .package_systems()
            .iter()
            .filter(|p| p.applies_to(self.fhir_version))
            .flat_map(|p| p.store.list().iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{EnumeratedFactory, IdAllocator, PackageCodeSystems, ResourceStore};
    use serde_json::json;

    fn cs(url: &str, version: &str, code: &str) -> Value {
        json!({
            "resourceType": "CodeSystem",
            "url": url,
            "version": version,
            "content": "complete",
            "concept": [{"code": code, "display": code.to_uppercase()}]
        })
    }

    fn library_with_package(resources: Vec<Value>, majors: Vec<u8>) -> Arc<Library> {
        let mut builder = Library::builder();
        let ids = builder.id_space();
        let mut store = ResourceStore::new("CodeSystem");
        for r in resources {
            store.add(r, &ids).unwrap();
        }
        builder.add_package_code_systems(PackageCodeSystems {
            package_id: "test.pkg".to_string(),
            fhir_majors: majors,
            is_core: false,
            store,
        });
        builder.build()
    }

    #[test]
    fn exact_version_beats_major_minor() {
        let url = "http://example.org/cs";
        let library = library_with_package(
            vec![cs(url, "1.0.0", "old"), cs(url, "1.0.5", "mid"), cs(url, "2.0.0", "new")],
            vec![],
        );
        let provider = library.clone_with_fhir_version(FhirVersion::R4);
        let ctx = OperationContext::default();

        let got = provider
            .get_code_system_provider(&ctx, url, Some("1.0.5"), &[])
            .unwrap()
            .unwrap();
        assert!(got.locate("mid").unwrap().is_some());

        // 1.0.9 has no exact match; major.minor falls back to a 1.0.x
        let got = provider
            .get_code_system_provider(&ctx, url, Some("1.0.9"), &[])
            .unwrap()
            .unwrap();
        assert_eq!(got.partial_version().as_deref(), Some("1.0"));

        // No version: latest
        let got = provider
            .get_code_system_provider(&ctx, url, None, &[])
            .unwrap()
            .unwrap();
        assert!(got.locate("new").unwrap().is_some());
    }

    #[test]
    fn unknown_system_is_none_not_error() {
        let library = Library::builder().build();
        let provider = library.clone_with_fhir_version(FhirVersion::R5);
        let ctx = OperationContext::default();
        let got = provider
            .get_code_system_provider(&ctx, "http://nowhere.example.org", None, &[])
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn package_scoping_by_fhir_major() {
        let url = "http://example.org/cs/r5only";
        let library = library_with_package(vec![cs(url, "1.0", "x")], vec![5]);

        let ctx = OperationContext::default();
        let r5 = library.clone_with_fhir_version(FhirVersion::R5);
        assert!(r5.get_code_system_provider(&ctx, url, None, &[]).unwrap().is_some());

        let r4 = library.clone_with_fhir_version(FhirVersion::R4);
        assert!(r4.get_code_system_provider(&ctx, url, None, &[]).unwrap().is_none());
    }

    #[test]
    fn factories_resolve_after_packages() {
        let url = "http://example.org/cs/factory";
        let mut builder = Library::builder();
        builder
            .register_code_system(
                url,
                Some("3.1"),
                false,
                Arc::new(EnumeratedFactory::new(cs(url, "3.1", "f"))),
            )
            .unwrap();
        let library = builder.build();
        let provider = library.clone_with_fhir_version(FhirVersion::R4);
        let ctx = OperationContext::default();
        let got = provider.get_code_system_provider(&ctx, url, None, &[]).unwrap().unwrap();
        assert!(got.locate("f").unwrap().is_some());
    }

    #[test]
    fn value_set_canonical_with_inline_version() {
        let mut builder = Library::builder();
        let ids = IdAllocator::new("t-");
        let mut store = ResourceStore::new("ValueSet");
        for version in ["1.0", "2.0"] {
            store
                .add(
                    json!({"resourceType": "ValueSet", "url": "http://example.org/vs", "version": version}),
                    &ids,
                )
                .unwrap();
        }
        builder.add_value_set_store(store);
        let library = builder.build();
        let provider = library.clone_with_fhir_version(FhirVersion::R4);
        let ctx = OperationContext::default();

        let pinned = provider
            .find_value_set(&ctx, "http://example.org/vs|1.0", None)
            .unwrap();
        assert_eq!(pinned["version"], "1.0");
        let latest = provider.find_value_set(&ctx, "http://example.org/vs", None).unwrap();
        assert_eq!(latest["version"], "2.0");
    }
}
