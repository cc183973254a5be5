//! Server configuration: file + environment layering, validated before
//! anything is loaded.

use ferrotx_core::fhir::FhirVersion;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("invalid server address: {e}"))
    }
}

/// Where terminology content comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Manifest entries, `kind[!]:payload` per line.
    pub entries: Vec<String>,
    pub cache_dir: PathBuf,
    pub registries: Vec<String>,
    /// Base url relative file payloads resolve against.
    pub base_url: Option<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            entries: vec![
                "internal:iso3166".to_string(),
                "internal:iso4217".to_string(),
                "internal:us-states".to_string(),
                "internal:mimetypes".to_string(),
                "internal:area-codes".to_string(),
                "internal:lang".to_string(),
                "internal:hgvs".to_string(),
            ],
            cache_dir: PathBuf::from(".ferrotx-cache"),
            registries: vec!["https://packages.fhir.org".to_string()],
            base_url: None,
        }
    }
}

/// One gateway mount: `(mount_path, fhir_version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub path: String,
    pub fhir_version: String,
}

impl EndpointConfig {
    pub fn version(&self) -> Result<FhirVersion, String> {
        FhirVersion::from_str(&self.fhir_version)
            .map_err(|e| format!("endpoint '{}': {}", self.path, e.diagnostics))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-request deadline in seconds.
    pub deadline_secs: u64,
    /// Expansion size cap.
    pub expansion_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 30,
            expansion_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Layer: defaults < optional `ferrotx.toml` < `FERROTX__*` env.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("ferrotx").required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("FERROTX")
                .separator("__")
                .try_parsing(true),
        );
        let config: AppConfig = builder
            .build()
            .map_err(|e| format!("configuration error: {e}"))?
            .try_deserialize()
            .map_err(|e| format!("configuration error: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.read_timeout_ms == 0 || self.server.write_timeout_ms == 0 {
            return Err("server timeouts must be > 0".into());
        }
        if self.limits.deadline_secs == 0 {
            return Err("limits.deadline_secs must be > 0".into());
        }
        if self.limits.expansion_limit == 0 {
            return Err("limits.expansion_limit must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid:?}"));
        }
        let endpoints = self.effective_endpoints();
        for endpoint in &endpoints {
            if !endpoint.path.starts_with('/') {
                return Err(format!("endpoint path '{}' must start with /", endpoint.path));
            }
            endpoint.version()?;
        }
        let mut paths: Vec<&str> = endpoints.iter().map(|e| e.path.as_str()).collect();
        paths.sort_unstable();
        paths.dedup();
        if paths.len() != endpoints.len() {
            return Err("endpoint paths must be unique".into());
        }
        Ok(())
    }

    /// Default mounts when none are configured: R3/R4/R5 side by side.
    pub fn effective_endpoints(&self) -> Vec<EndpointConfig> {
        if self.endpoints.is_empty() {
            return vec![
                EndpointConfig { path: "/r3".into(), fhir_version: "R3".into() },
                EndpointConfig { path: "/r4".into(), fhir_version: "R4".into() },
                EndpointConfig { path: "/r5".into(), fhir_version: "R5".into() },
            ];
        }
        self.endpoints.clone()
    }
}
