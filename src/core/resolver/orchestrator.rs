// ─── Resolution Orchestrator ───
// Fans out to every available provider, keeps the per-source buckets in the
// two cache documents, and answers queries from the merged view. One fetch
// cycle runs at a time; readers that find a fresh branch never wait on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::merge::{find_chain, merge_versions, preferred_steps, to_listings, MergedVersion};
use super::speed::SpeedSelector;
use crate::core::cache::{
    CacheRepository, PatchesCacheSnapshot, SourceBucket, VersionsCacheSnapshot,
};
use crate::core::error::{ResolverError, ResolverResult};
use crate::core::loader::ProviderLoader;
use crate::core::provider::{VersionProvider, OFFICIAL_SOURCE_ID};
use crate::core::version::{
    Branch, CachedVersionEntry, PatchStep, Platform, SourceKind, VersionListing,
};

pub const DEFAULT_VERSION_TTL: Duration = Duration::from_secs(15 * 60);

/// Freshness window of cached version data, per branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTtl {
    pub default: Duration,
    pub per_branch: HashMap<Branch, Duration>,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            default: DEFAULT_VERSION_TTL,
            per_branch: HashMap::new(),
        }
    }
}

impl CacheTtl {
    pub fn for_branch(&self, branch: Branch) -> Duration {
        self.per_branch.get(&branch).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone)]
struct CacheDocuments {
    versions: VersionsCacheSnapshot,
    patches: PatchesCacheSnapshot,
}

impl CacheDocuments {
    fn empty(platform: &Platform) -> Self {
        Self {
            versions: VersionsCacheSnapshot::new(platform),
            patches: PatchesCacheSnapshot::new(platform),
        }
    }
}

/// What one provider contributed to a fetch cycle. `None` keeps the old bucket.
struct Contribution {
    source_id: String,
    official: bool,
    versions: Option<Vec<CachedVersionEntry>>,
    patches: Option<Vec<PatchStep>>,
}

/// Ids of the loaded mirrors, most preferred first.
fn mirror_ids(providers: &[Arc<dyn VersionProvider>]) -> Vec<&str> {
    providers
        .iter()
        .filter(|p| !p.is_official())
        .map(|p| p.source_id())
        .collect()
}

/// Id of the official source, while one is loaded and usable.
fn available_official(providers: &[Arc<dyn VersionProvider>]) -> Option<&str> {
    providers
        .iter()
        .find(|p| p.is_official() && p.is_available())
        .map(|p| p.source_id())
}

fn bucket_of(provider: &dyn VersionProvider) -> SourceBucket<'_> {
    if provider.is_official() {
        SourceBucket::Official
    } else {
        SourceBucket::Mirror(provider.source_id())
    }
}

pub struct ResolutionOrchestrator {
    platform: Platform,
    /// Ascending priority, official sources included.
    providers: RwLock<Vec<Arc<dyn VersionProvider>>>,
    loader: Option<ProviderLoader>,
    repository: Arc<dyn CacheRepository>,
    /// In-memory copy of the last documents read or written.
    documents: Mutex<Option<CacheDocuments>>,
    fetch_lock: Mutex<()>,
    speed: SpeedSelector,
    ttl: CacheTtl,
}

impl ResolutionOrchestrator {
    pub fn new(platform: Platform, repository: Arc<dyn CacheRepository>) -> Self {
        Self {
            platform,
            providers: RwLock::new(Vec::new()),
            loader: None,
            repository,
            documents: Mutex::new(None),
            fetch_lock: Mutex::new(()),
            speed: SpeedSelector::new(),
            ttl: CacheTtl::default(),
        }
    }

    pub fn with_providers(mut self, mut providers: Vec<Arc<dyn VersionProvider>>) -> Self {
        providers.sort_by_key(|p| p.priority());
        *self.providers.get_mut() = providers;
        self
    }

    /// Source of mirrors for [`Self::reload_providers`].
    pub fn with_loader(mut self, loader: ProviderLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_ttl(mut self, ttl: CacheTtl) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_speed_selector(mut self, speed: SpeedSelector) -> Self {
        self.speed = speed;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub async fn providers(&self) -> Vec<Arc<dyn VersionProvider>> {
        self.providers.read().await.clone()
    }

    // ── Query API ──────────────────────────────────────

    /// Version numbers of `branch`, newest first.
    pub async fn get_versions(
        &self,
        branch: &str,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<u32>> {
        let branch = Branch::normalize(branch);
        let merged = self.merged_versions(branch, cancel).await?;
        Ok(merged.iter().map(|m| m.entry.version).collect())
    }

    /// Like [`Self::get_versions`], with the winning source of each version.
    pub async fn get_versions_with_source(
        &self,
        branch: &str,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<VersionListing>> {
        let branch = Branch::normalize(branch);
        let merged = self.merged_versions(branch, cancel).await?;
        Ok(to_listings(&merged))
    }

    /// The merged entry for `version`. A miss forces one full re-fetch
    /// before giving up with [`ResolverError::VersionNotFound`].
    pub async fn resolve_version_entry(
        &self,
        branch: &str,
        version: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<MergedVersion> {
        let branch = Branch::normalize(branch);
        let find = |merged: Vec<MergedVersion>| merged.into_iter().find(|m| m.entry.version == version);

        if let Some(hit) = self.fresh_merged(branch).await.and_then(find) {
            return Ok(hit);
        }

        debug!("Version {} of '{}' not cached, refreshing", version, branch);
        self.refresh_branch(branch, true, cancel).await?;
        self.current_merged(branch)
            .await
            .into_iter()
            .find(|m| m.entry.version == version)
            .ok_or_else(|| ResolverError::VersionNotFound {
                branch: branch.to_string(),
                version,
            })
    }

    /// Download URL for `version`.
    ///
    /// Without a usable official source, the speed-selected mirror's URL is
    /// preferred whenever that mirror offers the version. On diff-only
    /// branches the URL is an incremental patch; use
    /// [`Self::resolve_version_entry`] to see its base version.
    pub async fn resolve_url(
        &self,
        branch: &str,
        version: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<String> {
        let resolved = self.resolve_version_entry(branch, version, cancel).await?;
        if resolved.source == SourceKind::Official {
            return Ok(resolved.entry.url);
        }

        let branch = Branch::normalize(branch);
        if let Some(mirror) = self.select_best_mirror(cancel).await {
            if mirror.source_id() != resolved.source_id {
                let docs = self.documents().await;
                let preferred = docs
                    .versions
                    .bucket(SourceBucket::Mirror(mirror.source_id()), branch)
                    .and_then(|entries| {
                        entries.iter().find(|e| {
                            e.version == version && e.from_version == resolved.entry.from_version
                        })
                    });
                if let Some(entry) = preferred {
                    debug!(
                        "Using selected mirror '{}' for {} {}",
                        mirror.source_id(),
                        branch,
                        version
                    );
                    return Ok(entry.url.clone());
                }
            }
        }

        Ok(resolved.entry.url)
    }

    /// URL of the single patch `from -> to`.
    pub async fn resolve_diff_url(
        &self,
        branch: &str,
        from: u32,
        to: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<String> {
        let branch = Branch::normalize(branch);
        let find = |steps: Vec<PatchStep>| steps.into_iter().find(|s| s.from == from && s.to == to);

        if let Some(step) = self.fresh_steps(branch).await.and_then(find) {
            return Ok(step.url);
        }

        self.refresh_branch(branch, true, cancel).await?;
        self.current_steps(branch)
            .await
            .into_iter()
            .find(|s| s.from == from && s.to == to)
            .map(|s| s.url)
            .ok_or_else(|| ResolverError::DiffNotFound {
                branch: branch.to_string(),
                from,
                to,
            })
    }

    /// Fewest-hop chain of patches from `from` up to `to`.
    pub async fn resolve_patch_chain(
        &self,
        branch: &str,
        from: u32,
        to: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<PatchStep>> {
        let branch = Branch::normalize(branch);

        if let Some(chain) = self
            .fresh_steps(branch)
            .await
            .and_then(|steps| find_chain(&steps, from, to))
        {
            return Ok(chain);
        }

        self.refresh_branch(branch, true, cancel).await?;
        find_chain(&self.current_steps(branch).await, from, to).ok_or_else(|| {
            ResolverError::DiffNotFound {
                branch: branch.to_string(),
                from,
                to,
            }
        })
    }

    /// Drop `version` of `branch` from the cache, in one source or in all of
    /// them. Patches leading to it go too. Returns how many items were removed.
    pub async fn invalidate(
        &self,
        branch: &str,
        version: u32,
        source_id: Option<&str>,
    ) -> ResolverResult<usize> {
        let branch = Branch::normalize(branch);
        let official_id = {
            let providers = self.providers.read().await;
            providers
                .iter()
                .find(|p| p.is_official())
                .map(|p| p.source_id().to_string())
                .unwrap_or_else(|| OFFICIAL_SOURCE_ID.to_string())
        };

        let mut docs = self.documents().await;
        let removed = docs
            .versions
            .remove_where(branch, source_id, &official_id, |e| e.version == version)
            + docs
                .patches
                .remove_where(branch, source_id, &official_id, |s| s.to == version);

        info!(
            "Invalidated {} {} from {} ({} cache items removed)",
            branch,
            version,
            source_id.unwrap_or("all sources"),
            removed
        );
        if removed > 0 {
            self.persist(&docs).await;
        }
        Ok(removed)
    }

    /// Rebuild the mirror set from the loader. Official sources stay; the
    /// speed selection is reset. Returns the number of mirrors loaded.
    pub async fn reload_providers(&self) -> ResolverResult<usize> {
        let Some(loader) = &self.loader else {
            debug!("No provider loader configured, nothing to reload");
            return Ok(0);
        };
        let mirrors = loader.load().await?;
        let count = mirrors.len();
        self.set_mirrors(mirrors).await;
        Ok(count)
    }

    /// Replace every non-official provider with `mirrors`.
    pub async fn set_mirrors(&self, mirrors: Vec<Arc<dyn VersionProvider>>) {
        {
            let mut providers = self.providers.write().await;
            let mut next: Vec<_> = providers.iter().filter(|p| p.is_official()).cloned().collect();
            next.extend(mirrors.into_iter().filter(|p| !p.is_official()));
            next.sort_by_key(|p| p.priority());
            *providers = next;
        }
        self.speed.reset().await;
        info!("Provider set replaced, mirror selection reset");
    }

    /// Replace the whole provider set, official sources included.
    pub async fn set_providers(&self, mut providers: Vec<Arc<dyn VersionProvider>>) {
        providers.sort_by_key(|p| p.priority());
        *self.providers.write().await = providers;
        self.speed.reset().await;
    }

    pub async fn has_any_download_source(&self) -> bool {
        self.providers.read().await.iter().any(|p| p.is_available())
    }

    /// Mirror used for direct downloads. `None` while a usable official
    /// source exists or no mirror is loaded.
    pub async fn select_best_mirror(
        &self,
        cancel: &CancellationToken,
    ) -> Option<Arc<dyn VersionProvider>> {
        let mirrors: Vec<Arc<dyn VersionProvider>> = {
            let providers = self.providers.read().await;
            if available_official(&providers).is_some() {
                return None;
            }
            providers
                .iter()
                .filter(|p| !p.is_official() && p.is_available())
                .cloned()
                .collect()
        };
        self.speed.select(&mirrors, cancel).await
    }

    pub async fn selected_mirror_id(&self) -> Option<String> {
        self.speed.selected_id().await
    }

    // ── Cache views ────────────────────────────────────

    async fn merged_versions(
        &self,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<MergedVersion>> {
        if let Some(merged) = self.fresh_merged(branch).await {
            return Ok(merged);
        }
        self.refresh_branch(branch, false, cancel).await?;
        Ok(self.current_merged(branch).await)
    }

    /// Merged list, only if `branch` is fresh and non-empty.
    async fn fresh_merged(&self, branch: Branch) -> Option<Vec<MergedVersion>> {
        if !self.is_fresh(branch).await {
            return None;
        }
        let merged = self.current_merged(branch).await;
        (!merged.is_empty()).then_some(merged)
    }

    async fn current_merged(&self, branch: Branch) -> Vec<MergedVersion> {
        let providers = self.providers.read().await;
        let docs = self.documents().await;
        merge_versions(
            &docs.versions,
            branch,
            &mirror_ids(&providers),
            available_official(&providers),
        )
    }

    async fn fresh_steps(&self, branch: Branch) -> Option<Vec<PatchStep>> {
        if !self.is_fresh(branch).await {
            return None;
        }
        Some(self.current_steps(branch).await)
    }

    async fn current_steps(&self, branch: Branch) -> Vec<PatchStep> {
        let providers = self.providers.read().await;
        let docs = self.documents().await;
        preferred_steps(
            &docs.patches,
            branch,
            &mirror_ids(&providers),
            available_official(&providers).is_some(),
        )
    }

    /// Within the branch TTL, and every available provider has been asked
    /// about `branch` at least once. Providers added since the last cycle
    /// make the branch stale.
    async fn is_fresh(&self, branch: Branch) -> bool {
        let providers = self.providers.read().await;
        let docs = self.documents().await;
        if !docs
            .versions
            .is_fresh(branch, self.ttl.for_branch(branch), Utc::now())
        {
            return false;
        }
        providers
            .iter()
            .filter(|p| p.is_available())
            .all(|p| docs.versions.bucket(bucket_of(p.as_ref()), branch).is_some())
    }

    /// The cache documents for this platform, read from the repository on
    /// first use. Unreadable documents start empty.
    async fn documents(&self) -> MappedMutexGuard<'_, CacheDocuments> {
        let mut guard = self.documents.lock().await;
        let loaded = guard
            .as_ref()
            .map(|docs| docs.versions.matches(&self.platform))
            .unwrap_or(false);
        if !loaded {
            *guard = Some(self.read_documents().await);
        }
        MutexGuard::map(guard, |docs| {
            docs.get_or_insert_with(|| CacheDocuments::empty(&self.platform))
        })
    }

    async fn read_documents(&self) -> CacheDocuments {
        let platform = &self.platform;
        let versions = match self.repository.load_versions(platform).await {
            Ok(Some(doc)) if doc.matches(platform) => doc,
            Ok(_) => VersionsCacheSnapshot::new(platform),
            Err(e) => {
                warn!("Failed to read version cache: {}", e);
                VersionsCacheSnapshot::new(platform)
            }
        };
        let patches = match self.repository.load_patches(platform).await {
            Ok(Some(doc)) if doc.matches(platform) => doc,
            Ok(_) => PatchesCacheSnapshot::new(platform),
            Err(e) => {
                warn!("Failed to read patch cache: {}", e);
                PatchesCacheSnapshot::new(platform)
            }
        };
        CacheDocuments { versions, patches }
    }

    async fn persist(&self, docs: &CacheDocuments) {
        if let Err(e) = self
            .repository
            .save_versions(&self.platform, &docs.versions)
            .await
        {
            warn!("Failed to persist version cache: {}", e);
        }
        if let Err(e) = self
            .repository
            .save_patches(&self.platform, &docs.patches)
            .await
        {
            warn!("Failed to persist patch cache: {}", e);
        }
    }

    // ── Fetch cycle ────────────────────────────────────

    /// Query every available provider for `branch` and store the results.
    ///
    /// Unforced refreshes return early when another caller filled the branch
    /// while this one waited for the lock. Forced refreshes also drop
    /// provider-side memoized listings, unless a cycle finished after this
    /// call started.
    async fn refresh_branch(
        &self,
        branch: Branch,
        force: bool,
        cancel: &CancellationToken,
    ) -> ResolverResult<()> {
        let requested_at = Utc::now();
        let _fetch_guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolverError::Cancelled),
            guard = self.fetch_lock.lock() => guard,
        };

        if force {
            let docs = self.documents().await;
            if docs
                .versions
                .branch_fetched_at(branch)
                .map(|at| at >= requested_at)
                .unwrap_or(false)
            {
                debug!("'{}' refreshed while waiting, skipping forced fetch", branch);
                return Ok(());
            }
        } else if self.fresh_merged(branch).await.is_some() {
            return Ok(());
        }

        let providers = self.providers.read().await.clone();
        let mut contributions = Vec::new();

        for provider in providers.iter().filter(|p| p.is_available()) {
            if force {
                provider.discard_cached_listings();
            }
            contributions.push(self.collect(provider.as_ref(), branch, cancel).await?);
        }

        if !contributions
            .iter()
            .any(|c| c.versions.is_some() || c.patches.is_some())
            && !contributions.is_empty()
        {
            warn!("Every provider failed for '{}', keeping cached data", branch);
            return Ok(());
        }

        let mut docs = self.documents().await;
        let known = mirror_ids(&providers);
        docs.versions.retain_mirrors(&known);
        docs.patches.retain_mirrors(&known);

        for contribution in contributions {
            let bucket = if contribution.official {
                SourceBucket::Official
            } else {
                SourceBucket::Mirror(&contribution.source_id)
            };
            match contribution.versions {
                Some(versions) => docs.versions.set_bucket(bucket, branch, versions),
                // Asked but failed: an empty bucket records the attempt.
                None if docs.versions.bucket(bucket, branch).is_none() => {
                    docs.versions.set_bucket(bucket, branch, Vec::new())
                }
                None => {}
            }
            if let Some(patches) = contribution.patches {
                docs.patches.set_bucket(bucket, branch, patches);
            }
        }

        let now = Utc::now();
        docs.versions.stamp(branch, now);
        docs.patches.stamp(branch, now);
        self.persist(&docs).await;
        Ok(())
    }

    /// One provider's share of a cycle. Only cancellation is an error here.
    async fn collect(
        &self,
        provider: &dyn VersionProvider,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Contribution> {
        let id = provider.source_id();
        let versions = match provider.get_versions(self.platform, branch, cancel).await {
            Ok(versions) => {
                debug!("'{}' offers {} versions of '{}'", id, versions.len(), branch);
                Some(versions)
            }
            Err(ResolverError::Cancelled) => return Err(ResolverError::Cancelled),
            Err(e) => {
                warn!("Provider '{}' failed listing '{}': {}", id, branch, e);
                None
            }
        };

        let patches = match provider.get_patch_chain(self.platform, branch, cancel).await {
            Ok(patches) => Some(patches),
            Err(ResolverError::Cancelled) => return Err(ResolverError::Cancelled),
            Err(e) => {
                warn!("Provider '{}' failed listing patches of '{}': {}", id, branch, e);
                None
            }
        };

        Ok(Contribution {
            source_id: id.to_string(),
            official: provider.is_official(),
            versions,
            patches,
        })
    }
}
