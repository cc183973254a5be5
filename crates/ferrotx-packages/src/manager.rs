//! Package manager: registry version resolution, tarball download, and the
//! shared artifact fetch cache.
//!
//! Materialized packages live at `{cache}/packages/{pkgId#version}/` and
//! are immutable once extracted; a second fetch of the same coordinates is
//! a directory-existence check. Runtime access is read-only.

use crate::error::{PackageError, PackageResult};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::Archive;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REGISTRY: &str = "https://packages.fhir.org";

/// npm-style package manifest (one version entry in a registry response).
#[derive(Debug, Clone, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub dist: PackageDist,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageDist {
    pub tarball: String,
}

/// Registry response for `GET {registry}/{package}`.
#[derive(Debug, Deserialize)]
struct RegistryResponse {
    versions: HashMap<String, PackageManifest>,
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
}

/// A materialized package on disk.
#[derive(Debug, Clone)]
pub struct PackagePath {
    pub package_id: String,
    pub version: String,
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PackageManagerConfig {
    pub cache_dir: PathBuf,
    /// Registries queried in order for version resolution.
    pub registries: Vec<String>,
}

impl PackageManagerConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            registries: vec![DEFAULT_REGISTRY.to_string()],
        }
    }
}

/// Fetches and materializes FHIR packages.
pub struct PackageManager {
    config: PackageManagerConfig,
    client: reqwest::Client,
}

impl PackageManager {
    pub fn new(config: PackageManagerConfig) -> PackageResult<Self> {
        fs::create_dir_all(config.cache_dir.join("packages"))?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { config, client })
    }

    /// Ensure `package_id` (at `version`, or the registry's latest) is
    /// materialized and return its path.
    pub async fn fetch(&self, package_id: &str, version: Option<&str>) -> PackageResult<PackagePath> {
        let (version, tarball) = match version {
            Some(v) => {
                if let Some(existing) = self.materialized(package_id, v) {
                    return Ok(existing);
                }
                (v.to_string(), self.resolve_tarball(package_id, Some(v)).await?)
            }
            None => {
                let (v, tarball) = self.resolve_latest(package_id).await?;
                if let Some(existing) = self.materialized(package_id, &v) {
                    return Ok(existing);
                }
                (v, tarball)
            }
        };

        let root = self.package_dir(package_id, &version);
        tracing::info!(package = %package_id, version = %version, "Downloading package");
        let bytes = self
            .client
            .get(&tarball)
            .send()
            .await?
            .error_for_status()
            .map_err(|_| PackageError::PackageNotFound {
                package: package_id.to_string(),
                version: version.clone(),
            })?
            .bytes()
            .await?;

        extract_tarball(&bytes, &root)?;
        Ok(PackagePath {
            package_id: package_id.to_string(),
            version,
            root,
        })
    }

    fn package_dir(&self, package_id: &str, version: &str) -> PathBuf {
        self.config
            .cache_dir
            .join("packages")
            .join(format!("{package_id}#{version}"))
    }

    fn materialized(&self, package_id: &str, version: &str) -> Option<PackagePath> {
        let root = self.package_dir(package_id, version);
        if root.join("package").is_dir() {
            tracing::debug!(package = %package_id, version = %version, "Package already materialized");
            Some(PackagePath {
                package_id: package_id.to_string(),
                version: version.to_string(),
                root,
            })
        } else {
            None
        }
    }

    /// Ask each configured registry for the manifest of a pinned version.
    async fn resolve_tarball(&self, package_id: &str, version: Option<&str>) -> PackageResult<String> {
        let version = version.expect("caller pins the version");
        for registry in &self.config.registries {
            match self.registry_response(registry, package_id).await {
                Ok(response) => {
                    if let Some(manifest) = response.versions.get(version) {
                        return Ok(manifest.dist.tarball.clone());
                    }
                }
                Err(err) => {
                    tracing::warn!(registry = %registry, package = %package_id, error = %err,
                        "Registry query failed, trying next");
                }
            }
        }
        Err(PackageError::PackageNotFound {
            package: package_id.to_string(),
            version: version.to_string(),
        })
    }

    /// Resolve the latest version by asking registries in order.
    async fn resolve_latest(&self, package_id: &str) -> PackageResult<(String, String)> {
        for registry in &self.config.registries {
            match self.registry_response(registry, package_id).await {
                Ok(response) => {
                    let latest = response
                        .dist_tags
                        .get("latest")
                        .cloned()
                        .or_else(|| newest_semver(response.versions.keys()));
                    if let Some(version) = latest {
                        if let Some(manifest) = response.versions.get(&version) {
                            return Ok((version, manifest.dist.tarball.clone()));
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(registry = %registry, package = %package_id, error = %err,
                        "Registry query failed, trying next");
                }
            }
        }
        Err(PackageError::VersionNotResolved(package_id.to_string()))
    }

    async fn registry_response(&self, registry: &str, package_id: &str) -> PackageResult<RegistryResponse> {
        let url = format!("{}/{}", registry.trim_end_matches('/'), package_id);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Crude semver-ish max for registries without dist-tags.
fn newest_semver<'a>(versions: impl Iterator<Item = &'a String>) -> Option<String> {
    versions
        .map(|v| {
            let parts: Vec<u64> = v.split(['.', '-']).map_while(|p| p.parse().ok()).collect();
            (parts, v.clone())
        })
        .max()
        .map(|(_, v)| v)
}

/// Extract a gzipped npm tarball into `dest`. Entries outside the archive
/// root are rejected.
fn extract_tarball(bytes: &[u8], dest: &Path) -> PackageResult<()> {
    let staging = dest.with_extension("partial");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let decoder = GzDecoder::new(bytes);
    let mut archive = Archive::new(decoder);
    for entry in archive.entries().map_err(|e| PackageError::archive(e.to_string()))? {
        let mut entry = entry.map_err(|e| PackageError::archive(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| PackageError::archive(e.to_string()))?
            .into_owned();
        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(PackageError::archive(format!(
                "tar entry escapes the package root: {}",
                path.display()
            )));
        }
        let entry_dest = staging.join(&path);
        if let Some(parent) = entry_dest.parent() {
            fs::create_dir_all(parent)?;
        }
        entry
            .unpack(entry_dest)
            .map_err(|e| PackageError::archive(e.to_string()))?;
    }

    // Atomic-enough publish: a package directory either fully exists or not.
    if dest.exists() {
        fs::remove_dir_all(&staging)?;
    } else {
        fs::rename(&staging, dest)?;
    }
    Ok(())
}

/// Ensure a file-backed source artifact is available locally.
///
/// - A plain path that exists is returned as-is.
/// - `a|b` alternates prefer `a` when it exists, else fall back to `b`.
/// - `http(s)` urls are downloaded into `{cache}/artifacts/{filename}`,
///   following redirects, keyed by filename; an already-cached file is
///   not re-fetched.
pub async fn fetch_artifact(spec: &str, cache_dir: &Path) -> PackageResult<PathBuf> {
    if let Some((first, second)) = spec.split_once('|') {
        let first_path = Path::new(first.trim());
        if first_path.exists() {
            return Ok(first_path.to_path_buf());
        }
        return Box::pin(fetch_artifact(second.trim(), cache_dir)).await;
    }

    if !spec.starts_with("http://") && !spec.starts_with("https://") {
        let path = Path::new(spec);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(PackageError::ArtifactDownload {
            url: spec.to_string(),
            message: "local file does not exist".to_string(),
        });
    }

    let url = Url::parse(spec)?;
    let filename = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PackageError::ArtifactDownload {
            url: spec.to_string(),
            message: "url has no file name".to_string(),
        })?;

    let artifact_dir = cache_dir.join("artifacts");
    fs::create_dir_all(&artifact_dir)?;
    let target = artifact_dir.join(filename);
    if target.is_file() {
        tracing::debug!(artifact = %filename, "Artifact already cached");
        return Ok(target);
    }

    tracing::info!(url = %spec, "Downloading artifact");
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    let response = client.get(url).send().await?;
    let response = response
        .error_for_status()
        .map_err(|e| PackageError::ArtifactDownload {
            url: spec.to_string(),
            message: e.to_string(),
        })?;
    let bytes = response.bytes().await?;

    let staging = target.with_extension("partial");
    fs::write(&staging, &bytes)?;
    fs::rename(&staging, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Build a minimal package tarball: package/package.json + one resource.
    fn make_tarball() -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let manifest = serde_json::to_vec(&json!({"name": "test.pkg", "version": "1.0.0"})).unwrap();
        let resource = serde_json::to_vec(&json!({
            "resourceType": "CodeSystem", "id": "x", "url": "http://example.org/cs/x"
        }))
        .unwrap();
        for (name, data) in [
            ("package/package.json", &manifest),
            ("package/CodeSystem-x.json", &resource),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[tokio::test]
    async fn fetches_and_materializes_package() {
        let server = MockServer::start().await;
        let tarball = make_tarball();

        Mock::given(method("GET"))
            .and(path("/test.pkg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "test.pkg",
                "dist-tags": {"latest": "1.0.0"},
                "versions": {
                    "1.0.0": {
                        "name": "test.pkg", "version": "1.0.0",
                        "dist": {"tarball": format!("{}/test.pkg/-/test.pkg-1.0.0.tgz", server.uri())}
                    }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/test.pkg/-/test.pkg-1.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(tarball))
            .mount(&server)
            .await;

        let cache = tempfile::tempdir().unwrap();
        let manager = PackageManager::new(PackageManagerConfig {
            cache_dir: cache.path().to_path_buf(),
            registries: vec![server.uri()],
        })
        .unwrap();

        let pkg = manager.fetch("test.pkg", None).await.unwrap();
        assert_eq!(pkg.version, "1.0.0");
        assert!(pkg.root.join("package/package.json").is_file());

        // Second fetch is a cache hit; no second tarball request is made
        // because the directory already exists.
        let again = manager.fetch("test.pkg", Some("1.0.0")).await.unwrap();
        assert_eq!(again.root, pkg.root);
    }

    #[tokio::test]
    async fn unknown_package_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/no.such.pkg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cache = tempfile::tempdir().unwrap();
        let manager = PackageManager::new(PackageManagerConfig {
            cache_dir: cache.path().to_path_buf(),
            registries: vec![server.uri()],
        })
        .unwrap();

        assert!(manager.fetch("no.such.pkg", None).await.is_err());
    }

    #[tokio::test]
    async fn artifact_local_path_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ucum-essence.xml");
        fs::write(&file, "<root/>").unwrap();

        let got = fetch_artifact(file.to_str().unwrap(), dir.path()).await.unwrap();
        assert_eq!(got, file);
    }

    #[tokio::test]
    async fn artifact_alternates_prefer_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("fallback.csv");
        fs::write(&second, "a,b").unwrap();

        let spec = format!("{}|{}", dir.path().join("missing.csv").display(), second.display());
        let got = fetch_artifact(&spec, dir.path()).await.unwrap();
        assert_eq!(got, second);
    }

    #[tokio::test]
    async fn artifact_download_is_cached_by_filename() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/Loinc.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("LOINC_NUM,COMPONENT\n"))
            .expect(1)
            .mount(&server)
            .await;

        let cache = tempfile::tempdir().unwrap();
        let url = format!("{}/files/Loinc.csv", server.uri());
        let first = fetch_artifact(&url, cache.path()).await.unwrap();
        let second = fetch_artifact(&url, cache.path()).await.unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with("artifacts/Loinc.csv"));
    }

    #[test]
    fn tarball_escape_is_rejected() {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let data = b"oops";
        let mut header = tar::Header::new_gnu();
        // `tar::Header::set_path` rejects `..` components outright, so the
        // malicious name is written directly into the raw header field to
        // simulate an archive crafted outside this library's safety checks.
        let name = b"../escape.txt";
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, data.as_slice()).unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        assert!(extract_tarball(&bytes, &dir.path().join("pkg")).is_err());
    }
}
