use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One resolved version for one (branch, OS, arch) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedVersionEntry {
    pub version: u32,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_url: Option<String>,
    /// Set when `url` is an incremental step from this version, not a full build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<u32>,
}

impl CachedVersionEntry {
    pub fn full(version: u32, url: impl Into<String>) -> Self {
        Self {
            version,
            url: url.into(),
            head_url: None,
            signature_url: None,
            from_version: None,
        }
    }

    pub fn incremental(from: u32, version: u32, url: impl Into<String>) -> Self {
        Self {
            from_version: Some(from),
            ..Self::full(version, url)
        }
    }

    pub fn is_full_build(&self) -> bool {
        self.from_version.is_none()
    }
}

/// Directed `from -> to` edge of the incremental update graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchStep {
    pub from: u32,
    pub to: u32,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_url: Option<String>,
}

impl PatchStep {
    pub fn new(from: u32, to: u32, url: impl Into<String>) -> Self {
        Self {
            from,
            to,
            url: url.into(),
            signature_url: None,
        }
    }
}

/// Where a merged version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Official,
    Mirror,
}

/// A version as exposed to the download layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListing {
    pub version: u32,
    pub source: SourceKind,
    pub source_id: String,
    pub is_latest: bool,
}

/// Result of probing one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedProbeResult {
    pub source_id: String,
    pub latency_ms: Option<u64>,
    /// Bytes per second over the sample transfer.
    pub throughput_bps: u64,
    pub available: bool,
    pub measured_at: DateTime<Utc>,
}

impl SpeedProbeResult {
    pub fn unavailable(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            latency_ms: None,
            throughput_bps: 0,
            available: false,
            measured_at: Utc::now(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.available && self.throughput_bps > 0
    }
}
