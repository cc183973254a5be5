//! The process-wide terminology library.
//!
//! Built once at startup from the source manifest, then treated as
//! read-only for the life of the process: readers need no
//! synchronization. Per-request state lives in [`Provider`] views handed
//! out by [`Library::clone_with_fhir_version`].

use crate::backends::EnumeratedCodeSystem;
use crate::cache::ExpansionCache;
use crate::provider::CodeSystemProvider;
use crate::provider_view::Provider;
use crate::versions::major_minor;
use ferrotx_core::fhir::FhirVersion;
use ferrotx_core::i18n::MessageCatalog;
use ferrotx_core::issue::{TxIssue, TxResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Builds a code-system provider per request. Factories for enumerated
/// content rebuild when supplements are requested; factories over shared
/// immutable models just hand out the same `Arc`.
pub trait CodeSystemFactory: Send + Sync {
    fn build(&self, supplements: &[Value]) -> TxResult<Arc<dyn CodeSystemProvider>>;
}

/// Factory over an enumerated CodeSystem resource.
pub struct EnumeratedFactory {
    resource: Value,
    plain: OnceLock<Arc<EnumeratedCodeSystem>>,
}

impl EnumeratedFactory {
    pub fn new(resource: Value) -> Self {
        Self {
            resource,
            plain: OnceLock::new(),
        }
    }
}

impl CodeSystemFactory for EnumeratedFactory {
    fn build(&self, supplements: &[Value]) -> TxResult<Arc<dyn CodeSystemProvider>> {
        if supplements.is_empty() {
            // The supplement-free build is shared across requests.
            if let Some(provider) = self.plain.get() {
                return Ok(provider.clone());
            }
            let provider = Arc::new(EnumeratedCodeSystem::from_resource(&self.resource)?);
            let _ = self.plain.set(provider.clone());
            return Ok(provider);
        }
        let mut cs = EnumeratedCodeSystem::from_resource(&self.resource)?;
        for supplement in supplements {
            cs.apply_supplement(supplement)?;
        }
        Ok(Arc::new(cs))
    }
}

/// Factory that always yields one shared provider (UCUM, SNOMED, LOINC,
/// language tags, internal tables).
pub struct SharedFactory {
    provider: Arc<dyn CodeSystemProvider>,
}

impl SharedFactory {
    pub fn new(provider: Arc<dyn CodeSystemProvider>) -> Self {
        Self { provider }
    }
}

impl CodeSystemFactory for SharedFactory {
    fn build(&self, supplements: &[Value]) -> TxResult<Arc<dyn CodeSystemProvider>> {
        if !supplements.is_empty() {
            tracing::warn!(
                system = %self.provider.system(),
                "Supplements are not applicable to this back-end and were ignored"
            );
        }
        Ok(self.provider.clone())
    }
}

/// One registered factory with its identity.
#[derive(Clone)]
pub struct FactoryEntry {
    pub url: String,
    pub version: Option<String>,
    pub is_default: bool,
    pub factory: Arc<dyn CodeSystemFactory>,
}

/// Store of resources of one type with url/version/id lookup.
pub struct ResourceStore {
    resource_type: &'static str,
    resources: Vec<Value>,
    by_url: HashMap<String, Vec<usize>>,
    by_id: HashMap<String, usize>,
}

impl ResourceStore {
    pub fn new(resource_type: &'static str) -> Self {
        Self {
            resource_type,
            resources: Vec::new(),
            by_url: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Add a resource, assigning a server id from `ids` when it has none.
    pub fn add(&mut self, mut resource: Value, ids: &IdAllocator) -> TxResult<()> {
        if resource.get("resourceType").and_then(|v| v.as_str()) != Some(self.resource_type) {
            return Err(TxIssue::invalid(format!(
                "Expected a {} resource",
                self.resource_type
            )));
        }
        let id = match resource.get("id").and_then(|v| v.as_str()) {
            Some(id) if !self.by_id.contains_key(id) => id.to_string(),
            _ => ids.next(self.resource_type),
        };
        resource["id"] = Value::String(id.clone());

        let index = self.resources.len();
        if let Some(url) = resource.get("url").and_then(|v| v.as_str()) {
            self.by_url.entry(url.to_string()).or_default().push(index);
        }
        self.by_id.insert(id, index);
        self.resources.push(resource);
        Ok(())
    }

    pub fn find(&self, url: &str, version: Option<&str>) -> Option<&Value> {
        let indices = self.by_url.get(url)?;
        match version {
            Some(version) => indices
                .iter()
                .map(|&i| &self.resources[i])
                .find(|r| r.get("version").and_then(|v| v.as_str()) == Some(version)),
            None => indices
                .iter()
                .map(|&i| &self.resources[i])
                .max_by(|a, b| {
                    let va = a.get("version").and_then(|v| v.as_str()).unwrap_or("");
                    let vb = b.get("version").and_then(|v| v.as_str()).unwrap_or("");
                    crate::versions::compare_versions(va, vb)
                }),
        }
    }

    pub fn by_id(&self, id: &str) -> Option<&Value> {
        self.by_id.get(id).map(|&i| &self.resources[i])
    }

    pub fn list(&self) -> &[Value] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Preloaded CodeSystems from one package, tagged with the FHIR major
/// versions they apply to.
pub struct PackageCodeSystems {
    pub package_id: String,
    pub fhir_majors: Vec<u8>,
    pub is_core: bool,
    pub store: ResourceStore,
}

impl PackageCodeSystems {
    pub fn applies_to(&self, version: FhirVersion) -> bool {
        self.fhir_majors.is_empty() || self.fhir_majors.contains(&version.major())
    }
}

/// Server-unique id allocation. Providers created after load use their
/// own disjoint space via the `space_id` prefix.
pub struct IdAllocator {
    space_id: String,
    counter: AtomicU64,
}

impl IdAllocator {
    pub fn new(space_id: impl Into<String>) -> Self {
        Self {
            space_id: space_id.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self, resource_type: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let prefix = match resource_type {
            "CodeSystem" => "cs",
            "ValueSet" => "vs",
            "ConceptMap" => "cm",
            _ => "res",
        };
        format!("{prefix}-{}{n}", self.space_id)
    }
}

/// The immutable library. See the module docs for the concurrency story.
pub struct Library {
    factories: Vec<FactoryEntry>,
    /// url / url|version / url|major.minor -> index into `factories`.
    slots: HashMap<String, usize>,
    package_systems: Vec<PackageCodeSystems>,
    value_set_stores: Vec<Arc<ResourceStore>>,
    concept_map_stores: Vec<Arc<ResourceStore>>,
    i18n: MessageCatalog,
    expansion_cache: ExpansionCache,
}

impl Library {
    pub fn builder() -> LibraryBuilder {
        LibraryBuilder::new()
    }

    /// Build the per-request Provider for one FHIR version mount.
    pub fn clone_with_fhir_version(self: &Arc<Self>, version: FhirVersion) -> Provider {
        Provider::new(self.clone(), version)
    }

    pub fn i18n(&self) -> &MessageCatalog {
        &self.i18n
    }

    pub fn expansion_cache(&self) -> &ExpansionCache {
        &self.expansion_cache
    }

    pub(crate) fn factory_for(
        &self,
        system: &str,
        version: Option<&str>,
    ) -> Option<&FactoryEntry> {
        // exact > major.minor > latest (the bare slot).
        if let Some(version) = version {
            if let Some(&i) = self.slots.get(&format!("{system}|{version}")) {
                return Some(&self.factories[i]);
            }
            if let Some(&i) = self.slots.get(&format!("{system}|{}", major_minor(version))) {
                return Some(&self.factories[i]);
            }
            return None;
        }
        self.slots.get(system).map(|&i| &self.factories[i])
    }

    pub(crate) fn package_systems(&self) -> &[PackageCodeSystems] {
        &self.package_systems
    }

    pub(crate) fn value_set_stores(&self) -> &[Arc<ResourceStore>] {
        &self.value_set_stores
    }

    pub(crate) fn concept_map_stores(&self) -> &[Arc<ResourceStore>] {
        &self.concept_map_stores
    }

    /// Close every provider. Back-ends are in-memory, so this is a
    /// statistics log; the drop does the rest.
    pub fn close(&self) {
        tracing::info!(
            factories = self.factories.len(),
            packages = self.package_systems.len(),
            "Closing terminology library"
        );
    }
}

/// Accumulates sources during load; `build()` freezes them.
pub struct LibraryBuilder {
    factories: Vec<FactoryEntry>,
    slots: HashMap<String, usize>,
    package_systems: Vec<PackageCodeSystems>,
    value_set_stores: Vec<Arc<ResourceStore>>,
    concept_map_stores: Vec<Arc<ResourceStore>>,
    i18n: MessageCatalog,
    spaces: u32,
}

impl LibraryBuilder {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
            slots: HashMap::new(),
            package_systems: Vec::new(),
            value_set_stores: Vec::new(),
            concept_map_stores: Vec::new(),
            i18n: MessageCatalog::new(),
            spaces: 0,
        }
    }

    /// A fresh id space. The load space is allocated first; providers
    /// created later get disjoint spaces.
    pub fn id_space(&mut self) -> IdAllocator {
        self.spaces += 1;
        IdAllocator::new(format!("s{}-", self.spaces))
    }

    /// Register a factory under its url, url|version, and
    /// url|major.minor slots.
    ///
    /// The bare url slot follows the default rules: a declared default
    /// (`!`) owns it; otherwise the last registration wins. Two declared
    /// defaults for the same url are a configuration error.
    pub fn register_code_system(
        &mut self,
        url: &str,
        version: Option<&str>,
        is_default: bool,
        factory: Arc<dyn CodeSystemFactory>,
    ) -> TxResult<()> {
        let index = self.factories.len();
        self.factories.push(FactoryEntry {
            url: url.to_string(),
            version: version.map(String::from),
            is_default,
            factory,
        });

        if let Some(version) = version {
            self.slots.insert(format!("{url}|{version}"), index);
            self.slots.insert(format!("{url}|{}", major_minor(version)), index);
        }

        match self.slots.get(url).copied() {
            Some(existing) if self.factories[existing].is_default => {
                if is_default {
                    return Err(TxIssue::invalid(format!(
                        "Two default providers declared for '{url}'"
                    )));
                }
                // Declared default keeps the bare slot.
            }
            _ => {
                self.slots.insert(url.to_string(), index);
            }
        }
        Ok(())
    }

    pub fn add_package_code_systems(&mut self, systems: PackageCodeSystems) {
        self.package_systems.push(systems);
    }

    pub fn add_value_set_store(&mut self, store: ResourceStore) {
        self.value_set_stores.push(Arc::new(store));
    }

    pub fn add_concept_map_store(&mut self, store: ResourceStore) {
        self.concept_map_stores.push(Arc::new(store));
    }

    pub fn i18n_mut(&mut self) -> &mut MessageCatalog {
        &mut self.i18n
    }

    pub fn build(self) -> Arc<Library> {
        let mut package_systems = self.package_systems;
        // Core package systems resolve first.
        package_systems.sort_by_key(|p| !p.is_core);
        Arc::new(Library {
            factories: self.factories,
            slots: self.slots,
            package_systems,
            value_set_stores: self.value_set_stores,
            concept_map_stores: self.concept_map_stores,
            i18n: self.i18n,
            expansion_cache: ExpansionCache::new(),
        })
    }
}

impl Default for LibraryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cs(url: &str, version: &str) -> Value {
        json!({
            "resourceType": "CodeSystem",
            "url": url,
            "version": version,
            "content": "complete",
            "concept": [{"code": "a", "display": "A"}]
        })
    }

    #[test]
    fn slots_cover_url_version_and_major_minor() {
        let mut builder = Library::builder();
        builder
            .register_code_system(
                "http://example.org/cs",
                Some("2.0.1"),
                false,
                Arc::new(EnumeratedFactory::new(cs("http://example.org/cs", "2.0.1"))),
            )
            .unwrap();
        let library = builder.build();

        assert!(library.factory_for("http://example.org/cs", None).is_some());
        assert!(library.factory_for("http://example.org/cs", Some("2.0.1")).is_some());
        assert!(library.factory_for("http://example.org/cs", Some("2.0.9")).is_some()); // major.minor
        assert!(library.factory_for("http://example.org/cs", Some("3.0")).is_none());
    }

    #[test]
    fn declared_default_owns_the_bare_slot() {
        let mut builder = Library::builder();
        let url = "http://example.org/cs";
        builder
            .register_code_system(
                url,
                Some("1.0"),
                true,
                Arc::new(EnumeratedFactory::new(cs(url, "1.0"))),
            )
            .unwrap();
        builder
            .register_code_system(
                url,
                Some("2.0"),
                false,
                Arc::new(EnumeratedFactory::new(cs(url, "2.0"))),
            )
            .unwrap();
        let library = builder.build();
        let entry = library.factory_for(url, None).unwrap();
        assert_eq!(entry.version.as_deref(), Some("1.0"));
    }

    #[test]
    fn last_wins_without_default() {
        let mut builder = Library::builder();
        let url = "http://example.org/cs";
        for version in ["1.0", "2.0"] {
            builder
                .register_code_system(
                    url,
                    Some(version),
                    false,
                    Arc::new(EnumeratedFactory::new(cs(url, version))),
                )
                .unwrap();
        }
        let library = builder.build();
        assert_eq!(
            library.factory_for(url, None).unwrap().version.as_deref(),
            Some("2.0")
        );
    }

    #[test]
    fn two_defaults_are_fatal() {
        let mut builder = Library::builder();
        let url = "http://example.org/cs";
        builder
            .register_code_system(url, Some("1.0"), true, Arc::new(EnumeratedFactory::new(cs(url, "1.0"))))
            .unwrap();
        let err = builder.register_code_system(
            url,
            Some("2.0"),
            true,
            Arc::new(EnumeratedFactory::new(cs(url, "2.0"))),
        );
        assert!(err.is_err());
    }

    #[test]
    fn resource_store_assigns_ids_and_picks_latest() {
        let ids = IdAllocator::new("s1-");
        let mut store = ResourceStore::new("ValueSet");
        store
            .add(json!({"resourceType": "ValueSet", "url": "http://example.org/vs", "version": "1.0"}), &ids)
            .unwrap();
        store
            .add(json!({"resourceType": "ValueSet", "url": "http://example.org/vs", "version": "2.0"}), &ids)
            .unwrap();

        let latest = store.find("http://example.org/vs", None).unwrap();
        assert_eq!(latest["version"], "2.0");
        let pinned = store.find("http://example.org/vs", Some("1.0")).unwrap();
        assert_eq!(pinned["version"], "1.0");

        let id = latest["id"].as_str().unwrap();
        assert!(id.starts_with("vs-s1-"));
        assert!(store.by_id(id).is_some());
    }

    #[test]
    fn enumerated_factory_shares_the_plain_build() {
        let factory = EnumeratedFactory::new(cs("http://example.org/cs", "1.0"));
        let a = factory.build(&[]).unwrap();
        let b = factory.build(&[]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
