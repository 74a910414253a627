use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the resolver core.
/// Every module returns `Result<T, ResolverError>`.
#[derive(Debug, Error)]
pub enum ResolverError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request to {url} failed: HTTP {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Parsing ─────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Unsupported JSON path '{0}' (expected \"$root\", \"field\" or \"array[].field\")")]
    UnsupportedJsonPath(String),

    #[error("JSON path '{path}' did not resolve: {reason}")]
    JsonPathMismatch { path: String, reason: String },

    // ── Descriptors ─────────────────────────────────────
    #[error("Invalid provider descriptor {origin}: {reason}")]
    InvalidDescriptor { origin: String, reason: String },

    #[error("Descriptor {origin} uses schema {found}, newest supported is {supported}")]
    UnsupportedSchema {
        origin: String,
        found: u32,
        supported: u32,
    },

    // ── Resolution ──────────────────────────────────────
    #[error("Version {version} of branch '{branch}' not found in any source")]
    VersionNotFound { branch: String, version: u32 },

    #[error("Patch {from} -> {to} of branch '{branch}' not found in any source")]
    DiffNotFound { branch: String, from: u32, to: u32 },

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type ResolverResult<T> = Result<T, ResolverError>;

impl From<std::io::Error> for ResolverError {
    fn from(source: std::io::Error) -> Self {
        ResolverError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl ResolverError {
    /// True for the "no source had it at all" conditions.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ResolverError::VersionNotFound { .. } | ResolverError::DiffNotFound { .. }
        )
    }
}

// ── Serialization for IPC consumers ─────────────────────
// Higher layers forward errors to the UI as plain strings.
impl serde::Serialize for ResolverError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
