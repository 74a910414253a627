// ─── Index-API Provider ───
// Mirrors that publish one JSON document describing every build:
//
//   { "<root>": { "<branch>": { "<platform>": <files> } } }
//
// where <files> is either flat (`filename -> url`) or grouped
// (`"base" | "patch" -> filename -> url`). Version numbers are recovered from
// the filenames with operator-supplied patterns.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::contract::VersionProvider;
use super::memo::ListingCache;
use super::mirror::MirrorProfile;
use super::probe::probe_mirror;
use crate::core::error::{ResolverError, ResolverResult};
use crate::core::http::HttpTransport;
use crate::core::version::{Branch, CachedVersionEntry, PatchStep, Platform, SpeedProbeResult};

pub const DEFAULT_FULL_PATTERN: &str = r"^v?(?P<version>\d+)\.pwr$";
pub const DEFAULT_DIFF_PATTERN: &str = r"^(?P<from>\d+)(?:_to_|-|_)(?P<to>\d+)\.pwr$";

fn default_full_pattern() -> String {
    DEFAULT_FULL_PATTERN.to_string()
}

fn default_diff_pattern() -> String {
    DEFAULT_DIFF_PATTERN.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexShape {
    #[default]
    Flat,
    Grouped,
}

/// `index` block of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    pub url: String,
    /// Property holding the branch map; empty means the document root.
    #[serde(default)]
    pub root_property: Option<String>,
    #[serde(default)]
    pub shape: IndexShape,
    #[serde(default = "default_full_pattern")]
    pub full_pattern: String,
    #[serde(default = "default_diff_pattern")]
    pub diff_pattern: String,
    /// Prefix for relative URLs found in the document.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Files known for one `branch.platform` key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedFiles {
    pub full: BTreeMap<u32, String>,
    pub patches: Vec<PatchStep>,
}

/// Parsed index: `"{branch}.{platform}"` -> files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorIndex {
    entries: HashMap<String, IndexedFiles>,
}

impl MirrorIndex {
    pub fn get(&self, branch_key: &str, platform_key: &str) -> Option<&IndexedFiles> {
        self.entries.get(&format!("{}.{}", branch_key, platform_key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compiled filename patterns plus document layout.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    root_property: Option<String>,
    shape: IndexShape,
    full_pattern: Regex,
    diff_pattern: Regex,
    base_url: Option<String>,
}

impl IndexLayout {
    pub fn compile(config: &IndexConfig) -> ResolverResult<Self> {
        let full_pattern = Regex::new(&config.full_pattern)?;
        let diff_pattern = Regex::new(&config.diff_pattern)?;
        if full_pattern.captures_len() < 2 || diff_pattern.captures_len() < 3 {
            return Err(ResolverError::Other(
                "full pattern needs a version group, diff pattern needs from/to groups".into(),
            ));
        }

        Ok(Self {
            root_property: config
                .root_property
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToString::to_string),
            shape: config.shape,
            full_pattern,
            diff_pattern,
            base_url: config
                .base_url
                .as_deref()
                .map(|b| b.trim_end_matches('/').to_string()),
        })
    }

    fn parse_full(&self, filename: &str) -> Option<u32> {
        let caps = self.full_pattern.captures(filename)?;
        caps.name("version")
            .or_else(|| caps.get(1))?
            .as_str()
            .parse()
            .ok()
    }

    fn parse_diff(&self, filename: &str) -> Option<(u32, u32)> {
        let caps = self.diff_pattern.captures(filename)?;
        let from = caps.name("from").or_else(|| caps.get(1))?.as_str().parse().ok()?;
        let to = caps.name("to").or_else(|| caps.get(2))?.as_str().parse().ok()?;
        Some((from, to))
    }

    fn absolute(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if !url.contains("://") => {
                format!("{}/{}", base, url.trim_start_matches('/'))
            }
            _ => url.to_string(),
        }
    }

    /// Build the lookup table. Unparseable filenames are skipped.
    pub fn index(&self, document: &Value) -> ResolverResult<MirrorIndex> {
        let root = match &self.root_property {
            Some(property) => document.get(property).ok_or_else(|| {
                ResolverError::Other(format!("index document has no '{}' property", property))
            })?,
            None => document,
        };
        let branches = root
            .as_object()
            .ok_or_else(|| ResolverError::Other("index root is not an object".into()))?;

        let mut index = MirrorIndex::default();
        for (branch_key, platforms) in branches {
            let Some(platforms) = platforms.as_object() else {
                continue;
            };
            for (platform_key, files) in platforms {
                let mut indexed = IndexedFiles::default();
                match self.shape {
                    IndexShape::Flat => self.collect(files, &mut indexed, true, true),
                    IndexShape::Grouped => {
                        if let Some(base) = files.get("base") {
                            self.collect(base, &mut indexed, true, false);
                        }
                        if let Some(patch) = files.get("patch") {
                            self.collect(patch, &mut indexed, false, true);
                        }
                    }
                }
                indexed.patches.sort_by_key(|step| (step.from, step.to));
                index
                    .entries
                    .insert(format!("{}.{}", branch_key, platform_key), indexed);
            }
        }
        Ok(index)
    }

    fn collect(&self, files: &Value, into: &mut IndexedFiles, full: bool, diff: bool) {
        let Some(files) = files.as_object() else {
            return;
        };
        for (filename, target) in files {
            // Either a bare URL or an object with a `url` field.
            let Some(url) = target
                .as_str()
                .or_else(|| target.get("url").and_then(Value::as_str))
            else {
                continue;
            };

            if full {
                if let Some(version) = self.parse_full(filename) {
                    into.full.insert(version, self.absolute(url));
                    continue;
                }
            }
            if diff {
                if let Some((from, to)) = self.parse_diff(filename) {
                    let mut step = PatchStep::new(from, to, self.absolute(url));
                    step.signature_url = target
                        .get("signatureUrl")
                        .and_then(Value::as_str)
                        .map(|s| self.absolute(s));
                    into.patches.push(step);
                    continue;
                }
            }
            debug!("Skipping unrecognized index file '{}'", filename);
        }
    }
}

pub struct IndexProvider {
    profile: MirrorProfile,
    url: String,
    layout: IndexLayout,
    transport: Arc<dyn HttpTransport>,
    document: ListingCache<(), Arc<MirrorIndex>>,
}

impl IndexProvider {
    pub fn new(
        profile: MirrorProfile,
        config: IndexConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> ResolverResult<Self> {
        let layout = IndexLayout::compile(&config)?;
        let document = ListingCache::new(profile.index_ttl);
        Ok(Self {
            profile,
            url: config.url,
            layout,
            transport,
            document,
        })
    }

    async fn index(&self, cancel: &CancellationToken) -> ResolverResult<Arc<MirrorIndex>> {
        if let Some(index) = self.document.get(&()).await {
            return Ok(index);
        }

        let body = self.transport.get_text(&self.url, None, cancel).await?;
        let document: Value = serde_json::from_str(&body)?;
        let index = Arc::new(self.layout.index(&document)?);

        if index.is_empty() {
            warn!("Index of {} lists no recognizable builds", self.profile.id);
        } else {
            info!(
                "Indexed {} branch/platform entries from {}",
                index.len(),
                self.profile.id
            );
        }
        self.document.insert((), index.clone()).await;
        Ok(index)
    }

    async fn files(
        &self,
        platform: &Platform,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Option<IndexedFiles>> {
        let index = self.index(cancel).await?;
        let remaps = &self.profile.remaps;
        Ok(index
            .get(remaps.branch(branch), &remaps.platform_key(platform))
            .cloned())
    }
}

#[async_trait]
impl VersionProvider for IndexProvider {
    fn source_id(&self) -> &str {
        &self.profile.id
    }

    fn priority(&self) -> i32 {
        self.profile.priority
    }

    fn is_available(&self) -> bool {
        true
    }

    fn is_diff_only_branch(&self, branch: Branch) -> bool {
        self.profile.is_diff_only(branch)
    }

    fn speed_result_ttl(&self) -> Duration {
        self.profile.speed_ttl
    }

    async fn get_versions(
        &self,
        platform: Platform,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<CachedVersionEntry>> {
        let Some(files) = self.files(&platform, branch, cancel).await? else {
            return Ok(Vec::new());
        };

        if self.profile.is_diff_only(branch) {
            // One entry per target version, reached from its newest predecessor.
            let mut latest_step: BTreeMap<u32, &PatchStep> = BTreeMap::new();
            for step in &files.patches {
                let newer = latest_step
                    .get(&step.to)
                    .map(|existing| step.from > existing.from)
                    .unwrap_or(true);
                if newer {
                    latest_step.insert(step.to, step);
                }
            }
            return Ok(latest_step
                .into_values()
                .map(|step| CachedVersionEntry {
                    signature_url: step.signature_url.clone(),
                    ..CachedVersionEntry::incremental(step.from, step.to, step.url.clone())
                })
                .collect());
        }

        Ok(files
            .full
            .into_iter()
            .map(|(version, url)| CachedVersionEntry::full(version, url))
            .collect())
    }

    async fn get_patch_chain(
        &self,
        platform: Platform,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<PatchStep>> {
        Ok(self
            .files(&platform, branch, cancel)
            .await?
            .map(|files| files.patches)
            .unwrap_or_default())
    }

    async fn resolve_download_url(
        &self,
        platform: Platform,
        branch: Branch,
        version: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<Option<String>> {
        if self.profile.is_diff_only(branch) {
            return Ok(None);
        }
        Ok(self
            .files(&platform, branch, cancel)
            .await?
            .and_then(|mut files| files.full.remove(&version)))
    }

    async fn resolve_diff_url(
        &self,
        platform: Platform,
        branch: Branch,
        from: u32,
        to: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<Option<String>> {
        Ok(self.files(&platform, branch, cancel).await?.and_then(|files| {
            files
                .patches
                .into_iter()
                .find(|step| step.from == from && step.to == to)
                .map(|step| step.url)
        }))
    }

    async fn probe_speed(&self, cancel: &CancellationToken) -> SpeedProbeResult {
        probe_mirror(
            self.transport.as_ref(),
            &self.profile.id,
            self.profile.speed_test.as_ref(),
            cancel,
        )
        .await
    }

    fn discard_cached_listings(&self) {
        self.document.clear();
    }
}
