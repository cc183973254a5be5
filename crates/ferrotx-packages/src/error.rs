use thiserror::Error;

/// Errors that can occur during package acquisition.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parsing failed: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Package not found: {package}#{version}")]
    PackageNotFound { package: String, version: String },

    #[error("No registry could resolve a version for package '{0}'")]
    VersionNotResolved(String),

    #[error("Invalid package manifest: {message}")]
    InvalidManifest { message: String },

    #[error("Archive extraction failed: {message}")]
    ArchiveError { message: String },

    #[error("Artifact download failed for '{url}': {message}")]
    ArtifactDownload { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for package operations.
pub type PackageResult<T> = std::result::Result<T, PackageError>;

impl PackageError {
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            message: message.into(),
        }
    }

    pub fn archive(message: impl Into<String>) -> Self {
        Self::ArchiveError {
            message: message.into(),
        }
    }
}
