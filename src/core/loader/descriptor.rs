// ─── Provider Descriptor ───
// On-disk description of one mirror (`<id>.mirror.json`). Every optional
// field has a default so older and newer files keep parsing.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{ResolverError, ResolverResult};
use crate::core::http::HttpTransport;
use crate::core::provider::memo::from_minutes;
use crate::core::provider::{
    IndexConfig, IndexProvider, MirrorProfile, PatternConfig, PatternProvider, SpeedTestConfig,
    TokenRemaps, VersionProvider, DEFAULT_MIRROR_PRIORITY, OFFICIAL_PRIORITY,
    OFFICIAL_SOURCE_ID,
};
use crate::core::version::Branch;

pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;
pub const DESCRIPTOR_SUFFIX: &str = ".mirror.json";

fn default_schema_version() -> u32 {
    1
}

fn default_priority() -> i32 {
    DEFAULT_MIRROR_PRIORITY
}

fn default_enabled() -> bool {
    true
}

fn default_index_ttl_minutes() -> u64 {
    15
}

fn default_speed_ttl_minutes() -> u64 {
    60
}

/// Discriminated by `sourceKind`; the matching block sits next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sourceKind", rename_all = "lowercase")]
pub enum SourceConfig {
    Pattern { pattern: PatternConfig },
    Index { index: IndexConfig },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheTtlConfig {
    #[serde(default = "default_index_ttl_minutes")]
    pub index_ttl_minutes: u64,
    #[serde(default = "default_speed_ttl_minutes")]
    pub speed_ttl_minutes: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            index_ttl_minutes: default_index_ttl_minutes(),
            speed_ttl_minutes: default_speed_ttl_minutes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub source: SourceConfig,
    /// `osMap`, `archMap`, `branchMap`, `platformMap`.
    #[serde(flatten)]
    pub remaps: TokenRemaps,
    #[serde(default)]
    pub diff_only_branches: Vec<Branch>,
    #[serde(default)]
    pub speed_test: Option<SpeedTestConfig>,
    #[serde(default)]
    pub cache: CacheTtlConfig,
}

impl ProviderDescriptor {
    pub fn source_kind(&self) -> &'static str {
        match self.source {
            SourceConfig::Pattern { .. } => "pattern",
            SourceConfig::Index { .. } => "index",
        }
    }

    /// Validate and normalize. `origin` names the file in diagnostics.
    pub fn sanitized(mut self, origin: &str) -> ResolverResult<Self> {
        let invalid = |reason: &str| ResolverError::InvalidDescriptor {
            origin: origin.to_string(),
            reason: reason.to_string(),
        };

        if self.schema_version > SUPPORTED_SCHEMA_VERSION {
            return Err(ResolverError::UnsupportedSchema {
                origin: origin.to_string(),
                found: self.schema_version,
                supported: SUPPORTED_SCHEMA_VERSION,
            });
        }

        self.id = self.id.trim().to_string();
        if self.id.is_empty() {
            return Err(invalid("id is empty"));
        }
        if self.id.eq_ignore_ascii_case(OFFICIAL_SOURCE_ID) {
            return Err(invalid("id 'official' is reserved"));
        }

        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            self.name = self.id.clone();
        }

        if self.priority <= OFFICIAL_PRIORITY {
            warn!(
                "{}: priority {} is reserved for the official source, using {}",
                origin,
                self.priority,
                OFFICIAL_PRIORITY + 1
            );
            self.priority = OFFICIAL_PRIORITY + 1;
        }

        match &mut self.source {
            SourceConfig::Pattern { pattern } => {
                pattern.base_url = pattern.base_url.trim().to_string();
                if pattern.full_build_url.is_none() && pattern.diff_url.is_none() {
                    return Err(invalid("pattern source needs fullBuildUrl or diffUrl"));
                }
            }
            SourceConfig::Index { index } => {
                index.url = index.url.trim().to_string();
                if index.url.is_empty() {
                    return Err(invalid("index source needs a url"));
                }
            }
        }

        if let Some(speed) = &self.speed_test {
            if speed.url.trim().is_empty() {
                self.speed_test = None;
            }
        }

        Ok(self)
    }

    pub fn profile(&self) -> MirrorProfile {
        MirrorProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            priority: self.priority,
            remaps: self.remaps.clone(),
            diff_only_branches: self.diff_only_branches.iter().copied().collect::<HashSet<_>>(),
            speed_test: self.speed_test.clone(),
            index_ttl: from_minutes(self.cache.index_ttl_minutes),
            speed_ttl: from_minutes(self.cache.speed_ttl_minutes),
        }
    }

    /// Instantiate the provider this descriptor describes.
    pub fn build(&self, transport: Arc<dyn HttpTransport>) -> ResolverResult<Arc<dyn VersionProvider>> {
        let profile = self.profile();
        let provider: Arc<dyn VersionProvider> = match &self.source {
            SourceConfig::Pattern { pattern } => {
                Arc::new(PatternProvider::new(profile, pattern.clone(), transport)?)
            }
            SourceConfig::Index { index } => {
                Arc::new(IndexProvider::new(profile, index.clone(), transport)?)
            }
        };
        Ok(provider)
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.id, DESCRIPTOR_SUFFIX)
    }
}
