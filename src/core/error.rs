use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the updater backend.
/// Every module returns `Result<T, UpdaterError>`.
#[derive(Debug, Error)]
pub enum UpdaterError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Local state ─────────────────────────────────────
    #[error("no {0} found - run 'init' first")]
    NotInitialized(String),

    #[error("state file is corrupt: {0}")]
    CorruptState(#[source] serde_json::Error),

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status for {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("download failures: {0}")]
    DownloadsFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    // ── Resolution ──────────────────────────────────────
    #[error("mod {0:?} not found in package index")]
    ModNotFound(String),

    #[error("version {version:?} not found for mod {name:?}")]
    VersionNotFound { name: String, version: String },

    #[error("no stable non-pre version found for {0:?}")]
    NoStableVersion(String),

    #[error("no unambiguous primary archive asset in release {version} of {repo}")]
    AssetAmbiguity { repo: String, version: String },

    #[error("failed to resolve extra mods: {0}")]
    ResolveFailed(String),

    // ── Parsing ─────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::DeError),

    // ── Archive ─────────────────────────────────────────
    #[error("zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type UpdaterResult<T> = Result<T, UpdaterError>;

impl UpdaterError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UpdaterError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a request with a different URL could still succeed.
    /// Drives the orchestrator's Maven substitution after a terminal
    /// download failure.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            UpdaterError::Http(_)
                | UpdaterError::HttpStatus { .. }
                | UpdaterError::DownloadFailed { .. }
        )
    }
}
