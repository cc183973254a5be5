//! The three-phase loader: fetch, cs, npm.
//!
//! Phase `fetch` materializes every file-backed artifact. Phase `cs`
//! instantiates code-system providers and registers them under their
//! url, url|version, and url|major.minor slots. Phase `npm` walks
//! package indexes into preloaded containers and value-set/concept-map
//! stores. UCUM's common-units ValueSet is wired into the UCUM provider
//! at the end, once both sides are known.

use crate::backends::{
    EnumeratedCodeSystem, HgvsCodeSystem, LanguageTagCodeSystem, LoincCodeSystem,
    SnomedCodeSystem, UcumCodeSystem, internal_code_system,
};
use crate::library::{
    EnumeratedFactory, Library, LibraryBuilder, PackageCodeSystems, ResourceStore, SharedFactory,
};
use crate::manifest::{SourceEntry, SourceKind, SourceManifest};
use crate::provider::CodeSystemProvider;
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_packages::{PackageManager, PackageManagerConfig, fetch_artifact};
use ferrotx_packages::index::{load_indexed_resource, read_package_index};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const UCUM_COMMON_UNITS_VS: &str = "http://hl7.org/fhir/ValueSet/ucum-common";

/// Loader configuration: where the cache lives and which registries to
/// ask, plus the optional base url relative payloads resolve against.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub cache_dir: PathBuf,
    pub registries: Vec<String>,
    pub base_url: Option<String>,
}

impl LoaderConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            registries: vec!["https://packages.fhir.org".to_string()],
            base_url: None,
        }
    }
}

/// Build the Library from a manifest. Fatal errors abort the load; a
/// server without its configured terminologies must not start.
pub async fn load_library(
    manifest: &SourceManifest,
    config: &LoaderConfig,
) -> TxResult<Arc<Library>> {
    let mut builder = Library::builder();
    let ids = builder.id_space();

    // fetch phase
    let mut artifacts: HashMap<usize, PathBuf> = HashMap::new();
    for (i, entry) in manifest.entries.iter().enumerate() {
        if !entry.kind.needs_artifact() {
            continue;
        }
        let spec = resolve_payload(&entry.payload, config.base_url.as_deref());
        let path = fetch_artifact(&spec, &config.cache_dir).await.map_err(|e| {
            TxIssue::exception(format!("Source '{}' could not be fetched: {e}", entry.payload))
        })?;
        artifacts.insert(i, path);
    }

    // cs phase
    let mut ucum: Option<UcumCodeSystem> = None;
    for (i, entry) in manifest.entries.iter().enumerate() {
        match entry.kind {
            SourceKind::Internal => register_internal(&mut builder, entry)?,
            SourceKind::Ucum => {
                let path = &artifacts[&i];
                ucum = Some(UcumCodeSystem::new(ucum_essence_version(path)));
                // Registration is deferred until the common-units ValueSet
                // may have been loaded by the npm phase.
            }
            SourceKind::Loinc => {
                let provider = LoincCodeSystem::load(&artifacts[&i], None)?;
                let version = provider.version().map(String::from);
                builder.register_code_system(
                    crate::backends::loinc::LOINC_URI,
                    version.as_deref(),
                    entry.is_default,
                    Arc::new(SharedFactory::new(Arc::new(provider))),
                )?;
            }
            SourceKind::Snomed => {
                let path = &artifacts[&i];
                if !path.is_dir() {
                    return Err(TxIssue::invalid(format!(
                        "snomed source must be an RF2 snapshot directory: {}",
                        path.display()
                    )));
                }
                let provider =
                    SnomedCodeSystem::load_dir(path, "900000000000207008", None)?;
                let version = provider.version().map(|s| s.to_string());
                builder.register_code_system(
                    crate::backends::snomed::SNOMED_URI,
                    version.as_deref(),
                    entry.is_default,
                    Arc::new(SharedFactory::new(Arc::new(provider))),
                )?;
            }
            SourceKind::RxNorm
            | SourceKind::Ndc
            | SourceKind::Unii
            | SourceKind::Cpt
            | SourceKind::Omop => {
                register_enumerated_artifact(&mut builder, entry, &artifacts[&i])?;
            }
            SourceKind::Npm | SourceKind::NpmCodeSystemsOnly => {} // npm phase
        }
    }

    // npm phase
    let package_manager = PackageManager::new(PackageManagerConfig {
        cache_dir: config.cache_dir.clone(),
        registries: config.registries.clone(),
    })
    .map_err(|e| TxIssue::exception(format!("Package cache unavailable: {e}")))?;

    let mut ucum_common_units: Vec<String> = Vec::new();
    for entry in &manifest.entries {
        let code_systems_only = match entry.kind {
            SourceKind::Npm => false,
            SourceKind::NpmCodeSystemsOnly => true,
            _ => continue,
        };
        let (package_id, version) = entry.npm_coordinates();
        let package = package_manager.fetch(package_id, version).await.map_err(|e| {
            TxIssue::exception(format!("Package '{package_id}' could not be loaded: {e}"))
        })?;
        let index = read_package_index(&package.root)
            .map_err(|e| TxIssue::exception(format!("Package '{package_id}' is malformed: {e}")))?;

        let mut cs_store = ResourceStore::new("CodeSystem");
        let mut vs_store = ResourceStore::new("ValueSet");
        let mut cm_store = ResourceStore::new("ConceptMap");
        for row in &index {
            let load = |store: &mut ResourceStore| -> TxResult<Value> {
                let resource = load_indexed_resource(&package.root, row).map_err(|e| {
                    TxIssue::exception(format!(
                        "Resource '{}' in '{package_id}' is unreadable: {e}",
                        row.filename
                    ))
                })?;
                store.add(resource.clone(), &ids)?;
                Ok(resource)
            };
            match row.resource_type.as_str() {
                "CodeSystem" => {
                    load(&mut cs_store)?;
                }
                "ValueSet" if !code_systems_only => {
                    let resource = load(&mut vs_store)?;
                    if row.url.as_deref() == Some(UCUM_COMMON_UNITS_VS) {
                        ucum_common_units = value_set_codes(&resource);
                    }
                }
                "ConceptMap" if !code_systems_only => {
                    load(&mut cm_store)?;
                }
                _ => {}
            }
        }

        let fhir_majors = package_fhir_majors(&package.root, package_id);
        let is_core = package_id.starts_with("hl7.fhir.") && package_id.ends_with(".core");
        tracing::info!(
            package = %package_id,
            version = %package.version,
            code_systems = cs_store.len(),
            value_sets = vs_store.len(),
            concept_maps = cm_store.len(),
            "Loaded package"
        );
        if !cs_store.is_empty() {
            builder.add_package_code_systems(PackageCodeSystems {
                package_id: format!("{package_id}#{}", package.version),
                fhir_majors,
                is_core,
                store: cs_store,
            });
        }
        if !vs_store.is_empty() {
            builder.add_value_set_store(vs_store);
        }
        if !cm_store.is_empty() {
            builder.add_concept_map_store(cm_store);
        }
    }

    // Wire the common-units ValueSet into the UCUM provider.
    if let Some(ucum) = ucum {
        let has_units = !ucum_common_units.is_empty();
        let entry = manifest
            .entries
            .iter()
            .find(|e| e.kind == SourceKind::Ucum)
            .expect("ucum provider implies a ucum entry");
        let provider = if has_units {
            ucum.with_common_units(ucum_common_units)
        } else {
            ucum
        };
        let version = provider.version().map(String::from);
        builder.register_code_system(
            crate::backends::ucum::UCUM_URI,
            version.as_deref(),
            entry.is_default,
            Arc::new(SharedFactory::new(Arc::new(provider))),
        )?;
    }

    Ok(builder.build())
}

fn resolve_payload(payload: &str, base_url: Option<&str>) -> String {
    let is_absolute = payload.starts_with("http://")
        || payload.starts_with("https://")
        || payload.starts_with('/')
        || payload.contains('|');
    match base_url {
        Some(base) if !is_absolute && !Path::new(payload).exists() => {
            format!("{}/{payload}", base.trim_end_matches('/'))
        }
        _ => payload.to_string(),
    }
}

fn register_internal(builder: &mut LibraryBuilder, entry: &SourceEntry) -> TxResult<()> {
    let provider: Arc<dyn CodeSystemProvider> = match entry.payload.as_str() {
        "lang" | "bcp47" => Arc::new(LanguageTagCodeSystem::new()),
        "hgvs" => Arc::new(HgvsCodeSystem::new()),
        name => match internal_code_system(name) {
            Some(table) => Arc::new(table),
            None => {
                return Err(TxIssue::invalid(format!("Unknown internal source '{name}'")));
            }
        },
    };
    let url = provider.system().to_string();
    let version = provider.version().map(String::from);
    builder.register_code_system(
        &url,
        version.as_deref(),
        false,
        Arc::new(SharedFactory::new(provider)),
    )
}

/// The rxnorm/ndc/unii/cpt/omop sources ship as FHIR CodeSystem
/// artifacts; they register like any enumerated system.
fn register_enumerated_artifact(
    builder: &mut LibraryBuilder,
    entry: &SourceEntry,
    path: &Path,
) -> TxResult<()> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        TxIssue::exception(format!("Cannot read source '{}': {e}", path.display()))
    })?;
    let resource: Value = serde_json::from_str(&text)
        .map_err(|e| TxIssue::invalid(format!("Source '{}' is not JSON: {e}", path.display())))?;
    // Validate eagerly: a malformed source must fail the load, not the
    // first request.
    let parsed = EnumeratedCodeSystem::from_resource(&resource)?;
    let url = parsed.system().to_string();
    let version = parsed.version().map(String::from);
    builder.register_code_system(
        &url,
        version.as_deref(),
        entry.is_default,
        Arc::new(EnumeratedFactory::new(resource)),
    )
}

/// Pull the version attribute out of a UCUM essence file without a full
/// XML parse.
fn ucum_essence_version(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let start = text.find("version=\"")? + "version=\"".len();
    let end = text[start..].find('"')? + start;
    Some(text[start..end].to_string())
}

/// Codes of a ValueSet, from its expansion or its enumerated compose.
fn value_set_codes(value_set: &Value) -> Vec<String> {
    let mut codes = Vec::new();
    if let Some(contains) = value_set
        .get("expansion")
        .and_then(|e| e.get("contains"))
        .and_then(|c| c.as_array())
    {
        codes.extend(
            contains
                .iter()
                .filter_map(|item| item.get("code").and_then(|c| c.as_str()).map(String::from)),
        );
    }
    if codes.is_empty() {
        if let Some(includes) = value_set
            .get("compose")
            .and_then(|c| c.get("include"))
            .and_then(|i| i.as_array())
        {
            for include in includes {
                if let Some(concepts) = include.get("concept").and_then(|c| c.as_array()) {
                    codes.extend(concepts.iter().filter_map(|concept| {
                        concept.get("code").and_then(|c| c.as_str()).map(String::from)
                    }));
                }
            }
        }
    }
    codes
}

/// Read the FHIR major versions a package applies to from its manifest.
fn package_fhir_majors(package_root: &Path, package_id: &str) -> Vec<u8> {
    // Core packages encode the version in their id.
    for (marker, major) in [(".r3.", 3u8), (".r4.", 4), (".r4b.", 4), (".r5.", 5), (".r6.", 6)] {
        if package_id.contains(marker) {
            return vec![major];
        }
    }
    let manifest_path = package_root.join("package").join("package.json");
    let Ok(text) = std::fs::read_to_string(&manifest_path) else {
        return Vec::new();
    };
    let Ok(manifest) = serde_json::from_str::<Value>(&text) else {
        return Vec::new();
    };
    manifest
        .get("fhirVersions")
        .and_then(|v| v.as_array())
        .map(|versions| {
            versions
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(|v| v.split('.').next())
                .filter_map(|major| major.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrotx_core::context::OperationContext;
    use ferrotx_core::fhir::FhirVersion;
    use serde_json::json;
    use std::fs;

    #[tokio::test]
    async fn loads_internal_sources() {
        let cache = tempfile::tempdir().unwrap();
        let manifest = SourceManifest::parse(
            "internal:iso3166\ninternal:us-states\ninternal:lang\ninternal:hgvs\n",
        )
        .unwrap();
        let library = load_library(&manifest, &LoaderConfig::new(cache.path())).await.unwrap();
        let provider = library.clone_with_fhir_version(FhirVersion::R4);
        let ctx = OperationContext::default();

        for (system, code) in [
            ("urn:iso:std:iso:3166", "DE"),
            ("https://www.usps.com/", "WA"),
            ("urn:ietf:bcp:47", "en-US"),
            ("http://varnomen.hgvs.org", "NM_004006.2:c.4375C>T"),
        ] {
            let csp = provider
                .get_code_system_provider(&ctx, system, None, &[])
                .unwrap()
                .unwrap_or_else(|| panic!("missing provider for {system}"));
            assert!(csp.locate(code).unwrap().is_some(), "{system} should know {code}");
        }
    }

    #[tokio::test]
    async fn loads_ucum_with_version_from_essence() {
        let cache = tempfile::tempdir().unwrap();
        let essence = cache.path().join("ucum-essence.xml");
        fs::write(&essence, r#"<root version="2.1" revision="x"/>"#).unwrap();

        let manifest =
            SourceManifest::parse(&format!("ucum:{}\n", essence.display())).unwrap();
        let library = load_library(&manifest, &LoaderConfig::new(cache.path())).await.unwrap();
        let provider = library.clone_with_fhir_version(FhirVersion::R4);
        let ctx = OperationContext::default();
        let ucum = provider
            .get_code_system_provider(&ctx, "http://unitsofmeasure.org", None, &[])
            .unwrap()
            .unwrap();
        assert_eq!(ucum.version(), Some("2.1"));
        assert!(ucum.locate("mg/dL").unwrap().is_some());
    }

    #[tokio::test]
    async fn loads_enumerated_artifact_sources() {
        let cache = tempfile::tempdir().unwrap();
        let artifact = cache.path().join("ndc-subset.json");
        fs::write(
            &artifact,
            serde_json::to_string(&json!({
                "resourceType": "CodeSystem",
                "url": "http://hl7.org/fhir/sid/ndc",
                "version": "2024",
                "content": "fragment",
                "concept": [{"code": "0002-1433-80", "display": "Insulin example"}]
            }))
            .unwrap(),
        )
        .unwrap();

        let manifest = SourceManifest::parse(&format!("ndc:{}\n", artifact.display())).unwrap();
        let library = load_library(&manifest, &LoaderConfig::new(cache.path())).await.unwrap();
        let provider = library.clone_with_fhir_version(FhirVersion::R4);
        let ctx = OperationContext::default();
        let ndc = provider
            .get_code_system_provider(&ctx, "http://hl7.org/fhir/sid/ndc", None, &[])
            .unwrap()
            .unwrap();
        assert!(ndc.locate("0002-1433-80").unwrap().is_some());
        assert_eq!(ndc.content_mode(), "fragment");
    }

    #[tokio::test]
    async fn unknown_internal_name_is_fatal() {
        let cache = tempfile::tempdir().unwrap();
        let manifest = SourceManifest::parse("internal:klingon\n").unwrap();
        assert!(load_library(&manifest, &LoaderConfig::new(cache.path())).await.is_err());
    }

    #[tokio::test]
    async fn missing_artifact_is_fatal_for_the_source() {
        let cache = tempfile::tempdir().unwrap();
        let manifest = SourceManifest::parse("loinc:/no/such/file.csv\n").unwrap();
        assert!(load_library(&manifest, &LoaderConfig::new(cache.path())).await.is_err());
    }

    #[test]
    fn payload_resolution_against_base_url() {
        assert_eq!(
            resolve_payload("Loinc.csv", Some("https://downloads.example.org/tx")),
            "https://downloads.example.org/tx/Loinc.csv"
        );
        assert_eq!(
            resolve_payload("https://elsewhere.org/x.csv", Some("https://downloads.example.org")),
            "https://elsewhere.org/x.csv"
        );
        assert_eq!(resolve_payload("/abs/path.csv", Some("https://base")), "/abs/path.csv");
    }

    #[test]
    fn value_set_codes_prefers_expansion() {
        let vs = json!({
            "expansion": {"contains": [{"code": "mg"}, {"code": "mL"}]},
            "compose": {"include": [{"concept": [{"code": "ignored"}]}]}
        });
        assert_eq!(value_set_codes(&vs), vec!["mg", "mL"]);
    }
}
