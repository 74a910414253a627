// ─── Pattern-Template Provider ───
// Mirrors that expose builds at predictable URLs. Versions come from a
// discovery strategy; URLs are rendered from operator templates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::contract::VersionProvider;
use super::discovery::{DiscoveryConfig, VersionDiscovery};
use super::memo::ListingCache;
use super::mirror::MirrorProfile;
use super::probe::probe_mirror;
use super::template::{render, TemplateVars};
use crate::core::error::ResolverResult;
use crate::core::http::HttpTransport;
use crate::core::version::{Branch, CachedVersionEntry, PatchStep, Platform, SpeedProbeResult};

/// `pattern` block of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternConfig {
    pub base_url: String,
    #[serde(default)]
    pub full_build_url: Option<String>,
    #[serde(default)]
    pub diff_url: Option<String>,
    #[serde(default)]
    pub head_url: Option<String>,
    #[serde(default)]
    pub signature_url: Option<String>,
    pub version_discovery: DiscoveryConfig,
}

pub struct PatternProvider {
    profile: MirrorProfile,
    config: PatternConfig,
    discovery: VersionDiscovery,
    transport: Arc<dyn HttpTransport>,
    listings: ListingCache<(Platform, Branch), Vec<u32>>,
}

impl PatternProvider {
    /// Fails when the discovery block cannot be compiled (bad JSON path,
    /// bad listing pattern).
    pub fn new(
        profile: MirrorProfile,
        config: PatternConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> ResolverResult<Self> {
        let discovery = VersionDiscovery::compile(&config.version_discovery)?;
        let listings = ListingCache::new(profile.index_ttl);
        Ok(Self {
            profile,
            config,
            discovery,
            transport,
            listings,
        })
    }

    fn vars<'a>(&'a self, platform: &Platform, branch: Branch) -> TemplateVars<'a> {
        TemplateVars::new(&self.config.base_url, &self.profile.remaps, platform, branch)
    }

    async fn discover(
        &self,
        platform: Platform,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<u32>> {
        if let Some(versions) = self.listings.get(&(platform, branch)).await {
            return Ok(versions);
        }

        let vars = self.vars(&platform, branch);
        let versions = self
            .discovery
            .discover(self.transport.as_ref(), &vars, branch, cancel)
            .await?;

        debug!(
            "{} discovered {} {} versions via {}",
            self.profile.id,
            versions.len(),
            branch,
            self.discovery.method_name()
        );
        self.listings.insert((platform, branch), versions.clone()).await;
        Ok(versions)
    }

    fn full_entry(&self, platform: &Platform, branch: Branch, version: u32) -> Option<CachedVersionEntry> {
        let template = self.config.full_build_url.as_deref()?;
        let vars = self.vars(platform, branch).with_version(version);
        Some(CachedVersionEntry {
            version,
            url: render(template, &vars),
            head_url: self.config.head_url.as_deref().map(|t| render(t, &vars)),
            signature_url: self.config.signature_url.as_deref().map(|t| render(t, &vars)),
            from_version: None,
        })
    }

    fn diff_url(&self, platform: &Platform, branch: Branch, from: u32, to: u32) -> Option<String> {
        let template = self.config.diff_url.as_deref()?;
        Some(render(template, &self.vars(platform, branch).with_diff(from, to)))
    }

    fn consecutive_steps(&self, platform: &Platform, branch: Branch, versions: &[u32]) -> Vec<PatchStep> {
        versions
            .windows(2)
            .filter_map(|pair| {
                let url = self.diff_url(platform, branch, pair[0], pair[1])?;
                Some(PatchStep::new(pair[0], pair[1], url))
            })
            .collect()
    }
}

#[async_trait]
impl VersionProvider for PatternProvider {
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
        let versions = self.discover(platform, branch, cancel).await?;

        if self.profile.is_diff_only(branch) {
            // Only incremental steps; the oldest version has no predecessor here.
            return Ok(self
                .consecutive_steps(&platform, branch, &versions)
                .into_iter()
                .map(|step| CachedVersionEntry::incremental(step.from, step.to, step.url))
                .collect());
        }

        Ok(versions
            .iter()
            .filter_map(|v| self.full_entry(&platform, branch, *v))
            .collect())
    }

    async fn get_patch_chain(
        &self,
        platform: Platform,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<PatchStep>> {
        if self.config.diff_url.is_none() {
            return Ok(Vec::new());
        }
        let versions = self.discover(platform, branch, cancel).await?;
        Ok(self.consecutive_steps(&platform, branch, &versions))
    }

    async fn resolve_download_url(
        &self,
        platform: Platform,
        branch: Branch,
        version: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<Option<String>> {
        if self.profile.is_diff_only(branch) || self.config.full_build_url.is_none() {
            return Ok(None);
        }
        let versions = self.discover(platform, branch, cancel).await?;
        if versions.binary_search(&version).is_err() {
            return Ok(None);
        }
        Ok(self.full_entry(&platform, branch, version).map(|e| e.url))
    }

    async fn resolve_diff_url(
        &self,
        platform: Platform,
        branch: Branch,
        from: u32,
        to: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<Option<String>> {
        if self.config.diff_url.is_none() || from >= to {
            return Ok(None);
        }
        let versions = self.discover(platform, branch, cancel).await?;
        if versions.binary_search(&from).is_err() || versions.binary_search(&to).is_err() {
            return Ok(None);
        }
        Ok(self.diff_url(&platform, branch, from, to))
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
        self.listings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::fake::FakeTransport;
    use crate::core::provider::discovery::StaticVersions;
    use crate::core::version::{Arch, Os};

    const LINUX: Platform = Platform {
        os: Os::Linux,
        arch: Arch::Amd64,
    };

    fn config(discovery: DiscoveryConfig) -> PatternConfig {
        PatternConfig {
            base_url: "https://m.example".into(),
            full_build_url: Some("{base}/{os}/{arch}/{branch}/0/{version}.pwr".into()),
            diff_url: Some("{base}/{os}/{arch}/{branch}/{from}/{to}.pwr".into()),
            head_url: None,
            signature_url: Some("{base}/{os}/{arch}/{branch}/0/{version}.pwr.sig".into()),
            version_discovery: discovery,
        }
    }

    fn static_provider(profile: MirrorProfile) -> PatternProvider {
        let discovery = DiscoveryConfig::StaticList {
            versions: StaticVersions::All(vec![3, 1, 2]),
        };
        PatternProvider::new(profile, config(discovery), Arc::new(FakeTransport::new())).unwrap()
    }

    #[tokio::test]
    async fn json_api_listing_yields_versions() {
        let transport = Arc::new(FakeTransport::new().with_body(
            "https://m.example/api/versions",
            r#"{"items":[{"version":1},{"version":3}]}"#,
        ));
        let provider = PatternProvider::new(
            MirrorProfile::named("m1", 100),
            config(DiscoveryConfig::JsonApi {
                url: "{base}/api/versions".into(),
                json_path: "items[].version".into(),
            }),
            transport,
        )
        .unwrap();

        let entries = provider
            .get_versions(LINUX, Branch::Release, &CancellationToken::new())
            .await
            .unwrap();

        let versions: Vec<u32> = entries.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 3]);
        assert_eq!(entries[1].url, "https://m.example/linux/amd64/release/0/3.pwr");
        assert_eq!(
            entries[1].signature_url.as_deref(),
            Some("https://m.example/linux/amd64/release/0/3.pwr.sig")
        );
    }

    #[tokio::test]
    async fn listing_is_memoized_between_operations() {
        let transport = Arc::new(
            FakeTransport::new().with_body("https://m.example/api/versions", "[4, 5]"),
        );
        let provider = PatternProvider::new(
            MirrorProfile::named("m1", 100),
            config(DiscoveryConfig::JsonApi {
                url: "{base}/api/versions".into(),
                json_path: "$root".into(),
            }),
            transport.clone(),
        )
        .unwrap();
        let cancel = CancellationToken::new();

        provider.get_versions(LINUX, Branch::Release, &cancel).await.unwrap();
        provider.get_patch_chain(LINUX, Branch::Release, &cancel).await.unwrap();
        assert_eq!(transport.calls(), 1);

        provider.discard_cached_listings();
        provider.get_versions(LINUX, Branch::Release, &cancel).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn diff_only_branch_never_offers_full_builds() {
        let mut profile = MirrorProfile::named("m1", 100);
        profile.diff_only_branches.insert(Branch::PreRelease);
        let provider = static_provider(profile);
        let cancel = CancellationToken::new();

        let entries = provider
            .get_versions(LINUX, Branch::PreRelease, &cancel)
            .await
            .unwrap();
        assert!(entries.iter().all(|e| !e.is_full_build()));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://m.example/linux/amd64/pre-release/1/2.pwr");

        let url = provider
            .resolve_download_url(LINUX, Branch::PreRelease, 2, &cancel)
            .await
            .unwrap();
        assert_eq!(url, None);

        // Other branches are unaffected.
        let url = provider
            .resolve_download_url(LINUX, Branch::Release, 2, &cancel)
            .await
            .unwrap();
        assert!(url.is_some());
    }

    #[tokio::test]
    async fn patch_chain_links_consecutive_versions() {
        let provider = static_provider(MirrorProfile::named("m1", 100));

        let steps = provider
            .get_patch_chain(LINUX, Branch::Release, &CancellationToken::new())
            .await
            .unwrap();

        let edges: Vec<(u32, u32)> = steps.iter().map(|s| (s.from, s.to)).collect();
        assert_eq!(edges, vec![(1, 2), (2, 3)]);
    }

    #[tokio::test]
    async fn no_diff_template_means_full_builds_only() {
        let mut cfg = config(DiscoveryConfig::StaticList {
            versions: StaticVersions::All(vec![1, 2]),
        });
        cfg.diff_url = None;
        let provider = PatternProvider::new(
            MirrorProfile::named("m1", 100),
            cfg,
            Arc::new(FakeTransport::new()),
        )
        .unwrap();
        let cancel = CancellationToken::new();

        assert!(provider
            .get_patch_chain(LINUX, Branch::Release, &cancel)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            provider
                .resolve_diff_url(LINUX, Branch::Release, 1, 2, &cancel)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn unknown_versions_do_not_resolve() {
        let provider = static_provider(MirrorProfile::named("m1", 100));
        let cancel = CancellationToken::new();

        assert_eq!(
            provider
                .resolve_download_url(LINUX, Branch::Release, 9, &cancel)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            provider
                .resolve_diff_url(LINUX, Branch::Release, 1, 3, &cancel)
                .await
                .unwrap()
                .as_deref(),
            Some("https://m.example/linux/amd64/release/1/3.pwr")
        );
    }
}
