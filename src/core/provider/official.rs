// ─── Official Provider ───
// First-party, authenticated build manifest. Always preferred (priority 0).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::contract::{VersionProvider, OFFICIAL_PRIORITY};
use super::memo::ListingCache;
use super::template::{render, TemplateVars, TokenRemaps};
use crate::core::error::ResolverResult;
use crate::core::http::HttpTransport;
use crate::core::version::{Branch, CachedVersionEntry, PatchStep, Platform, SpeedProbeResult};

pub const OFFICIAL_SOURCE_ID: &str = "official";

/// Opaque authentication capability. Token acquisition and refresh live
/// elsewhere; the provider only asks whether one is available right now.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// Fixed token, or none. Useful for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl AccessTokenSource for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.0.clone().filter(|t| !t.trim().is_empty())
    }
}

/// Manifest served by the first-party endpoint for one (platform, branch).
/// A malformed entry is dropped on its own; the rest of the list survives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfficialManifest {
    #[serde(default, deserialize_with = "lenient_list")]
    pub versions: Vec<CachedVersionEntry>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub patches: Vec<PatchStep>,
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    let total = raw.len();
    let kept: Vec<T> = raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!("Skipping malformed manifest entry: {}", e);
                None
            }
        })
        .collect();
    if kept.len() < total {
        warn!("Official manifest: skipped {} of {} entries", total - kept.len(), total);
    }
    Ok(kept)
}

impl OfficialManifest {
    /// Fetch the manifest with the caller's bearer token.
    pub async fn fetch(
        transport: &dyn HttpTransport,
        url: &str,
        token: &str,
        cancel: &CancellationToken,
    ) -> ResolverResult<Self> {
        info!("Fetching official build manifest...");

        let body = transport.get_text(url, Some(token), cancel).await?;
        let manifest: OfficialManifest = serde_json::from_str(&body)?;

        info!(
            "Loaded {} versions and {} patches from official manifest",
            manifest.versions.len(),
            manifest.patches.len()
        );
        Ok(manifest)
    }

    pub fn find_version(&self, version: u32) -> Option<&CachedVersionEntry> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn find_patch(&self, from: u32, to: u32) -> Option<&PatchStep> {
        self.patches.iter().find(|p| p.from == from && p.to == to)
    }
}

pub struct OfficialProvider {
    manifest_url: String,
    credentials: Arc<dyn AccessTokenSource>,
    transport: Arc<dyn HttpTransport>,
    manifests: ListingCache<(Platform, Branch), Arc<OfficialManifest>>,
}

impl OfficialProvider {
    /// `manifest_url` may use `{os}`, `{arch}` and `{branch}`.
    pub fn new(
        manifest_url: impl Into<String>,
        credentials: Arc<dyn AccessTokenSource>,
        transport: Arc<dyn HttpTransport>,
        manifest_ttl: Duration,
    ) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            credentials,
            transport,
            manifests: ListingCache::new(manifest_ttl),
        }
    }

    async fn manifest(
        &self,
        platform: Platform,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Option<Arc<OfficialManifest>>> {
        let Some(token) = self.credentials.access_token() else {
            debug!("Official source unavailable: no access token");
            return Ok(None);
        };
        if let Some(manifest) = self.manifests.get(&(platform, branch)).await {
            return Ok(Some(manifest));
        }

        let remaps = TokenRemaps::default();
        let url = render(
            &self.manifest_url,
            &TemplateVars::new("", &remaps, &platform, branch),
        );
        let manifest = Arc::new(
            OfficialManifest::fetch(self.transport.as_ref(), &url, &token, cancel).await?,
        );
        self.manifests.insert((platform, branch), manifest.clone()).await;
        Ok(Some(manifest))
    }
}

#[async_trait]
impl VersionProvider for OfficialProvider {
    fn source_id(&self) -> &str {
        OFFICIAL_SOURCE_ID
    }

    fn priority(&self) -> i32 {
        OFFICIAL_PRIORITY
    }

    fn is_available(&self) -> bool {
        self.credentials.access_token().is_some()
    }

    fn is_official(&self) -> bool {
        true
    }

    async fn get_versions(
        &self,
        platform: Platform,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<CachedVersionEntry>> {
        Ok(self
            .manifest(platform, branch, cancel)
            .await?
            .map(|m| m.versions.clone())
            .unwrap_or_default())
    }

    async fn get_patch_chain(
        &self,
        platform: Platform,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<PatchStep>> {
        Ok(self
            .manifest(platform, branch, cancel)
            .await?
            .map(|m| m.patches.clone())
            .unwrap_or_default())
    }

    async fn resolve_download_url(
        &self,
        platform: Platform,
        branch: Branch,
        version: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<Option<String>> {
        Ok(self
            .manifest(platform, branch, cancel)
            .await?
            .and_then(|m| m.find_version(version).map(|v| v.url.clone())))
    }

    async fn resolve_diff_url(
        &self,
        platform: Platform,
        branch: Branch,
        from: u32,
        to: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<Option<String>> {
        Ok(self
            .manifest(platform, branch, cancel)
            .await?
            .and_then(|m| m.find_patch(from, to).map(|p| p.url.clone())))
    }

    async fn probe_speed(&self, _cancel: &CancellationToken) -> SpeedProbeResult {
        // Never ranked against mirrors.
        SpeedProbeResult::unavailable(OFFICIAL_SOURCE_ID)
    }

    fn discard_cached_listings(&self) {
        self.manifests.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::fake::FakeTransport;
    use crate::core::version::{Arch, Os};

    const URL: &str = "https://api.example/builds/{os}/{arch}/{branch}";

    fn linux() -> Platform {
        Platform::new(Os::Linux, Arch::Amd64)
    }

    #[test]
    fn deserialize_manifest() {
        let json = r#"{
            "versions": [{"version": 8, "url": "https://cdn/8.pwr", "signatureUrl": "https://cdn/8.sig"}],
            "patches": [{"from": 7, "to": 8, "url": "https://cdn/7_8.pwr"}],
            "generatedAt": "2026-01-01T00:00:00Z"
        }"#;
        let manifest: OfficialManifest = serde_json::from_str(json).unwrap();
        assert_eq!(
            manifest.find_version(8).and_then(|v| v.signature_url.as_deref()),
            Some("https://cdn/8.sig")
        );
        assert!(manifest.find_patch(7, 8).is_some());
    }

    #[test]
    fn malformed_entries_are_skipped_individually() {
        let json = r#"{
            "versions": [{"version": 3, "url": "https://cdn/3.pwr"}, {"version": 4}, "junk"],
            "patches": [{"from": 2, "to": 3}, {"from": 2, "to": 3, "url": "https://cdn/2_3.pwr"}]
        }"#;
        let manifest: OfficialManifest = serde_json::from_str(json).unwrap();

        assert_eq!(manifest.versions.len(), 1);
        assert!(manifest.find_version(3).is_some());
        assert!(manifest.find_version(4).is_none());
        assert_eq!(manifest.patches.len(), 1);
        assert_eq!(manifest.find_patch(2, 3).map(|p| p.url.as_str()), Some("https://cdn/2_3.pwr"));
    }

    #[test]
    fn null_lists_read_as_empty() {
        let manifest: OfficialManifest =
            serde_json::from_str(r#"{"versions": null}"#).unwrap();
        assert!(manifest.versions.is_empty());
        assert!(manifest.patches.is_empty());
    }

    #[tokio::test]
    async fn without_token_provider_is_unavailable_and_silent() {
        let transport = Arc::new(FakeTransport::new());
        let provider = OfficialProvider::new(
            URL,
            Arc::new(StaticToken(None)),
            transport.clone(),
            Duration::from_secs(60),
        );

        assert!(!provider.is_available());
        let versions = provider
            .get_versions(linux(), Branch::Release, &CancellationToken::new())
            .await
            .unwrap();
        assert!(versions.is_empty());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn sends_bearer_token_to_rendered_url() {
        let transport = Arc::new(FakeTransport::new().with_body(
            "https://api.example/builds/linux/amd64/pre-release",
            r#"{"versions":[{"version":3,"url":"https://cdn/3.pwr"}]}"#,
        ));
        let provider = OfficialProvider::new(
            URL,
            Arc::new(StaticToken(Some("secret".into()))),
            transport.clone(),
            Duration::from_secs(60),
        );
        let cancel = CancellationToken::new();

        let url = provider
            .resolve_download_url(linux(), Branch::PreRelease, 3, &cancel)
            .await
            .unwrap();

        assert_eq!(url.as_deref(), Some("https://cdn/3.pwr"));
        assert_eq!(transport.bearers(), vec![Some("secret".to_string())]);
        assert!(provider.is_official());
    }
}
