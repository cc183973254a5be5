//! Application assembly: one Library, one Router per configured mount.

use crate::compat;
use crate::config::{AppConfig, LimitsConfig};
use crate::gateway;
use crate::middleware::{content_negotiation, request_id};
use axum::Json;
use axum::Router;
use axum::routing::get;
use ferrotx_terminology::{Library, LoaderConfig, Provider, SourceManifest, load_library};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Per-mount state: the version-pinned Provider plus the server limits.
pub struct MountState {
    pub provider: Provider,
    pub limits: LimitsConfig,
    pub relationship_element: &'static str,
    pub mount_path: String,
}

/// Load the library from the configured sources and build the app.
pub async fn build_app(config: &AppConfig) -> Result<Router, String> {
    let manifest = SourceManifest::from_lines(&config.sources.entries)
        .map_err(|e| format!("source manifest error: {e}"))?;
    let loader_config = LoaderConfig {
        cache_dir: config.sources.cache_dir.clone(),
        registries: config.sources.registries.clone(),
        base_url: config.sources.base_url.clone(),
    };
    let library = load_library(&manifest, &loader_config)
        .await
        .map_err(|e| format!("library load failed: {e}"))?;
    build_app_with_library(config, library)
}

/// Build the app over an already-built library (tests use this to skip
/// the loader).
pub fn build_app_with_library(
    config: &AppConfig,
    library: Arc<Library>,
) -> Result<Router, String> {
    config.validate()?;

    let health_library = library.clone();
    let mut router = Router::new().route(
        "/health",
        get(move || {
            let library = health_library.clone();
            async move {
                Json(json!({
                    "status": "ok",
                    "service": "ferrotx",
                    "version": env!("CARGO_PKG_VERSION"),
                    "expansionCacheEntries": library.expansion_cache().entry_count(),
                }))
            }
        }),
    );

    for endpoint in config.effective_endpoints() {
        let version = endpoint.version()?;
        let state = Arc::new(MountState {
            provider: library.clone_with_fhir_version(version),
            limits: config.limits.clone(),
            relationship_element: compat::relationship_element(version),
            mount_path: endpoint.path.clone(),
        });
        tracing::info!(mount = %endpoint.path, fhir = %version, "Binding endpoint");
        router = router.nest(&endpoint.path, gateway::router(state));
    }

    Ok(router
        .layer(axum::middleware::from_fn(content_negotiation))
        .layer(axum::middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http()))
}
