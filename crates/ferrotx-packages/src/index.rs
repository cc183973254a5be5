//! Enumeration of the conformance resources inside a materialized package.
//!
//! Recent packages ship a `package/.index.json`; older ones are scanned
//! file by file. Either way the result is the same: a list of
//! `(resourceType, url, version, id, filename)` rows the library walks to
//! decide what to preload.

use crate::error::{PackageError, PackageResult};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// One resource row from a package index.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexedResource {
    pub filename: String,
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PackageIndex {
    files: Vec<IndexedResource>,
}

/// Read the resource index of a materialized package directory (the
/// directory that contains `package/`).
pub fn read_package_index(package_root: &Path) -> PackageResult<Vec<IndexedResource>> {
    let package_dir = package_root.join("package");
    if !package_dir.is_dir() {
        return Err(PackageError::invalid_manifest(format!(
            "{} has no package/ directory",
            package_root.display()
        )));
    }

    let index_path = package_dir.join(".index.json");
    if index_path.is_file() {
        let text = fs::read_to_string(&index_path)?;
        let index: PackageIndex = serde_json::from_str(&text)?;
        return Ok(index.files);
    }

    tracing::debug!(path = %package_dir.display(), "No .index.json, scanning package files");
    scan_package_dir(&package_dir)
}

/// Build an index by opening every top-level `*.json` in `package/`.
fn scan_package_dir(package_dir: &Path) -> PackageResult<Vec<IndexedResource>> {
    #[derive(Deserialize)]
    struct ResourceHead {
        #[serde(rename = "resourceType")]
        resource_type: Option<String>,
        id: Option<String>,
        url: Option<String>,
        version: Option<String>,
    }

    let mut files = Vec::new();
    let mut entries: Vec<_> = fs::read_dir(package_dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|e| {
            e.path().extension().map(|x| x == "json").unwrap_or(false)
                && e.file_name() != "package.json"
        })
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(file = %path.display(), error = %err, "Skipping unreadable package file");
                continue;
            }
        };
        let head: ResourceHead = match serde_json::from_str(&text) {
            Ok(head) => head,
            Err(_) => continue, // not a resource file
        };
        let Some(resource_type) = head.resource_type else {
            continue;
        };
        files.push(IndexedResource {
            filename: entry.file_name().to_string_lossy().into_owned(),
            resource_type,
            id: head.id,
            url: head.url,
            version: head.version,
        });
    }

    if files.is_empty() {
        return Err(PackageError::invalid_manifest(format!(
            "{} contains no resources",
            package_dir.display()
        )));
    }
    Ok(files)
}

/// Load one resource from a materialized package by its index row.
pub fn load_indexed_resource(
    package_root: &Path,
    resource: &IndexedResource,
) -> PackageResult<serde_json::Value> {
    let path = package_root.join("package").join(&resource.filename);
    let text = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&text)?)
}
