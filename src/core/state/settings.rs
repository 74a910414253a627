use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{ResolverError, ResolverResult};
use crate::core::http::{APP_USER_AGENT, DEFAULT_TIMEOUT_SECS};
use crate::core::loader::ProviderDescriptor;
use crate::core::provider::memo::from_minutes;
use crate::core::resolver::{CacheTtl, DEFAULT_VERSION_TTL};
use crate::core::version::{Branch, Platform};

pub const APP_DIR_NAME: &str = "VersionSource";
pub const SETTINGS_FILE: &str = "resolver_settings.json";

fn default_manifest_ttl_minutes() -> u64 {
    5
}

/// First-party endpoint. Omitted when only mirrors are used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficialSettings {
    /// May use `{os}`, `{arch}` and `{branch}`.
    pub manifest_url: String,
    #[serde(default = "default_manifest_ttl_minutes")]
    pub manifest_ttl_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverSettings {
    pub data_dir: Option<PathBuf>,
    pub mirrors_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub version_ttl_minutes: u64,
    pub branch_ttl_minutes: HashMap<Branch, u64>,
    /// Upper bound on how long any mirror speed measurement is trusted.
    pub speed_ttl_minutes: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub official: Option<OfficialSettings>,
    /// Overrides the detected OS/arch.
    pub platform: Option<Platform>,
    /// Written into an empty mirrors directory.
    pub seed_mirrors: Vec<ProviderDescriptor>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            mirrors_dir: None,
            cache_dir: None,
            version_ttl_minutes: DEFAULT_VERSION_TTL.as_secs() / 60,
            branch_ttl_minutes: HashMap::new(),
            speed_ttl_minutes: 60,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: APP_USER_AGENT.to_string(),
            official: None,
            platform: None,
            seed_mirrors: Vec::new(),
        }
    }
}

impl ResolverSettings {
    /// Settings stored in `dir`, or defaults when the file is missing or
    /// unreadable.
    pub fn load_from(dir: &Path) -> Self {
        let path = dir.join(SETTINGS_FILE);
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring unreadable settings {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save_to(&self, dir: &Path) -> ResolverResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| ResolverError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = dir.join(SETTINGS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| ResolverError::Io { path, source: e })
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn mirrors_dir(&self) -> PathBuf {
        self.mirrors_dir
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("mirrors"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("cache"))
    }

    pub fn cache_ttl(&self) -> CacheTtl {
        CacheTtl {
            default: from_minutes(self.version_ttl_minutes),
            per_branch: self
                .branch_ttl_minutes
                .iter()
                .map(|(branch, mins)| (*branch, from_minutes(*mins)))
                .collect(),
        }
    }

    pub fn speed_ttl(&self) -> Duration {
        from_minutes(self.speed_ttl_minutes)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::current)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
