use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::error::ResolverResult;
use crate::core::version::{Branch, CachedVersionEntry, PatchStep, Platform, SpeedProbeResult};

/// Priority reserved for the first-party source.
pub const OFFICIAL_PRIORITY: i32 = 0;
/// Priority assumed for mirrors whose descriptor does not set one.
pub const DEFAULT_MIRROR_PRIORITY: i32 = 100;
/// How long a speed probe stays valid unless a descriptor overrides it.
pub const DEFAULT_SPEED_TTL: Duration = Duration::from_secs(60 * 60);

/// Capability set every version source implements.
///
/// Listing calls are best-effort: an unavailable provider answers with an
/// empty list, and entries that cannot be resolved are left out rather than
/// failing the whole call. An `Err` means the provider could not contribute
/// at all this cycle (network down, malformed response, bad configuration).
#[async_trait]
pub trait VersionProvider: Send + Sync {
    fn source_id(&self) -> &str;

    /// Lower is preferred.
    fn priority(&self) -> i32;

    fn is_available(&self) -> bool;

    fn is_official(&self) -> bool {
        false
    }

    /// Branches for which only incremental patches exist on this provider.
    fn is_diff_only_branch(&self, _branch: Branch) -> bool {
        false
    }

    fn speed_result_ttl(&self) -> Duration {
        DEFAULT_SPEED_TTL
    }

    /// Drop any listing the provider memoized, so the next call hits the network.
    fn discard_cached_listings(&self) {}

    async fn get_versions(
        &self,
        platform: Platform,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<CachedVersionEntry>>;

    async fn get_patch_chain(
        &self,
        platform: Platform,
        branch: Branch,
        cancel: &CancellationToken,
    ) -> ResolverResult<Vec<PatchStep>>;

    async fn resolve_download_url(
        &self,
        platform: Platform,
        branch: Branch,
        version: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<Option<String>>;

    async fn resolve_diff_url(
        &self,
        platform: Platform,
        branch: Branch,
        from: u32,
        to: u32,
        cancel: &CancellationToken,
    ) -> ResolverResult<Option<String>>;

    /// Latency + throughput sample. Providers without a probe endpoint
    /// report themselves unavailable.
    async fn probe_speed(&self, cancel: &CancellationToken) -> SpeedProbeResult;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::core::error::ResolverError;

    /// Scripted provider for orchestrator tests.
    pub struct FakeProvider {
        pub id: String,
        pub priority: i32,
        pub official: bool,
        available: AtomicBool,
        failing: AtomicBool,
        versions: Mutex<BTreeMap<Branch, Vec<CachedVersionEntry>>>,
        patches: Mutex<BTreeMap<Branch, Vec<PatchStep>>>,
        probe: Mutex<Option<(u64, bool)>>,
        pub fetches: AtomicUsize,
        pub probes: AtomicUsize,
    }

    impl FakeProvider {
        pub fn mirror(id: &str, priority: i32) -> Self {
            Self {
                id: id.to_string(),
                priority,
                official: false,
                available: AtomicBool::new(true),
                failing: AtomicBool::new(false),
                versions: Mutex::new(BTreeMap::new()),
                patches: Mutex::new(BTreeMap::new()),
                probe: Mutex::new(None),
                fetches: AtomicUsize::new(0),
                probes: AtomicUsize::new(0),
            }
        }

        pub fn official() -> Self {
            Self {
                official: true,
                ..Self::mirror("official", OFFICIAL_PRIORITY)
            }
        }

        pub fn offering(self, branch: Branch, versions: &[u32]) -> Self {
            self.set_versions(branch, versions);
            self
        }

        pub fn with_patches(self, branch: Branch, steps: &[(u32, u32)]) -> Self {
            let steps = steps
                .iter()
                .map(|(from, to)| {
                    PatchStep::new(*from, *to, format!("https://{}/{}_{}.pwr", self.id, from, to))
                })
                .collect();
            self.patches.lock().unwrap().insert(branch, steps);
            self
        }

        pub fn with_probe(self, throughput_bps: u64, available: bool) -> Self {
            *self.probe.lock().unwrap() = Some((throughput_bps, available));
            self
        }

        pub fn set_versions(&self, branch: Branch, versions: &[u32]) {
            let entries = versions
                .iter()
                .map(|v| CachedVersionEntry::full(*v, self.url_for(*v)))
                .collect();
            self.versions.lock().unwrap().insert(branch, entries);
        }

        pub fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn url_for(&self, version: u32) -> String {
            format!("https://{}/{}.pwr", self.id, version)
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VersionProvider for FakeProvider {
        fn source_id(&self) -> &str {
            &self.id
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        fn is_official(&self) -> bool {
            self.official
        }

        async fn get_versions(
            &self,
            _platform: Platform,
            branch: Branch,
            _cancel: &CancellationToken,
        ) -> ResolverResult<Vec<CachedVersionEntry>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(ResolverError::BadStatus {
                    url: format!("https://{}.example/", self.id),
                    status: 503,
                });
            }
            Ok(self
                .versions
                .lock()
                .unwrap()
                .get(&branch)
                .cloned()
                .unwrap_or_default())
        }

        async fn get_patch_chain(
            &self,
            _platform: Platform,
            branch: Branch,
            _cancel: &CancellationToken,
        ) -> ResolverResult<Vec<PatchStep>> {
            Ok(self
                .patches
                .lock()
                .unwrap()
                .get(&branch)
                .cloned()
                .unwrap_or_default())
        }

        async fn resolve_download_url(
            &self,
            _platform: Platform,
            branch: Branch,
            version: u32,
            _cancel: &CancellationToken,
        ) -> ResolverResult<Option<String>> {
            let offered = self
                .versions
                .lock()
                .unwrap()
                .get(&branch)
                .map(|entries| entries.iter().any(|e| e.version == version))
                .unwrap_or(false);
            Ok(offered.then(|| self.url_for(version)))
        }

        async fn resolve_diff_url(
            &self,
            _platform: Platform,
            _branch: Branch,
            _from: u32,
            _to: u32,
            _cancel: &CancellationToken,
        ) -> ResolverResult<Option<String>> {
            Ok(None)
        }

        async fn probe_speed(&self, _cancel: &CancellationToken) -> SpeedProbeResult {
            self.probes.fetch_add(1, Ordering::SeqCst);
            match *self.probe.lock().unwrap() {
                Some((throughput_bps, available)) => SpeedProbeResult {
                    source_id: self.id.clone(),
                    latency_ms: Some(20),
                    throughput_bps,
                    available,
                    measured_at: chrono::Utc::now(),
                },
                None => SpeedProbeResult::unavailable(&self.id),
            }
        }
    }
}
