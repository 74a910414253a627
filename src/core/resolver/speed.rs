// ─── Speed Selector ───
// Picks the mirror used for direct downloads when the official source is not
// available. Probes run concurrently; results are cached per mirror with the
// mirror's own speed TTL.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use moka::future::Cache as MokaCache;
use moka::Expiry;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::provider::memo::MAX_LISTING_TTL;
use crate::core::provider::VersionProvider;
use crate::core::version::SpeedProbeResult;

/// Best usable result: highest throughput, then lowest latency.
pub fn rank(results: &[SpeedProbeResult]) -> Option<&SpeedProbeResult> {
    results
        .iter()
        .filter(|r| r.is_usable())
        .min_by_key(|r| (Reverse(r.throughput_bps), r.latency_ms.unwrap_or(u64::MAX)))
}

/// A measurement together with how long its mirror trusts it.
#[derive(Debug, Clone)]
struct TimedMeasurement {
    result: SpeedProbeResult,
    ttl: Duration,
}

/// Each entry lives for its own mirror's TTL, re-armed when re-measured.
struct MeasurementExpiry;

impl Expiry<String, TimedMeasurement> for MeasurementExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &TimedMeasurement,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &TimedMeasurement,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub struct SpeedSelector {
    results: MokaCache<String, TimedMeasurement>,
    selected: Mutex<Option<String>>,
    /// Upper bound on any mirror's own speed TTL.
    max_ttl: Option<Duration>,
}

impl Default for SpeedSelector {
    fn default() -> Self {
        Self {
            results: MokaCache::builder().expire_after(MeasurementExpiry).build(),
            selected: Mutex::new(None),
            max_ttl: None,
        }
    }
}

impl SpeedSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = Some(max_ttl);
        self
    }

    fn ttl_for(&self, provider: &dyn VersionProvider) -> Duration {
        let ttl = match self.max_ttl {
            Some(max_ttl) => provider.speed_result_ttl().min(max_ttl),
            None => provider.speed_result_ttl(),
        };
        ttl.min(MAX_LISTING_TTL)
    }

    pub async fn selected_id(&self) -> Option<String> {
        self.selected.lock().await.clone()
    }

    /// Measurements that have not expired yet.
    pub async fn cached_results(&self) -> Vec<SpeedProbeResult> {
        self.results.run_pending_tasks().await;
        self.results.iter().map(|(_, entry)| entry.result).collect()
    }

    /// Forget the selection and every measurement.
    pub async fn reset(&self) {
        *self.selected.lock().await = None;
        self.results.invalidate_all();
    }

    /// Choose the session mirror among `mirrors` (ascending priority).
    ///
    /// A single mirror is chosen without probing. If no probe comes back
    /// usable the first mirror is used anyway.
    pub async fn select(
        &self,
        mirrors: &[Arc<dyn VersionProvider>],
        cancel: &CancellationToken,
    ) -> Option<Arc<dyn VersionProvider>> {
        let first = mirrors.first()?.clone();
        if mirrors.len() == 1 {
            *self.selected.lock().await = Some(first.source_id().to_string());
            return Some(first);
        }

        if let Some(current) = self.current_selection(mirrors).await {
            return Some(current);
        }

        let results = self.measure(mirrors, cancel).await;
        let chosen = match rank(&results) {
            Some(best) => {
                info!(
                    "Selected mirror '{}' ({} B/s, {:?} ms)",
                    best.source_id, best.throughput_bps, best.latency_ms
                );
                mirrors
                    .iter()
                    .find(|m| m.source_id() == best.source_id)
                    .cloned()
                    .unwrap_or(first)
            }
            None => {
                warn!(
                    "No mirror passed the speed probe, falling back to '{}'",
                    first.source_id()
                );
                first
            }
        };

        *self.selected.lock().await = Some(chosen.source_id().to_string());
        Some(chosen)
    }

    /// Previous selection, while it is still loaded and its measurement unexpired.
    async fn current_selection(
        &self,
        mirrors: &[Arc<dyn VersionProvider>],
    ) -> Option<Arc<dyn VersionProvider>> {
        let selected = self.selected.lock().await.clone()?;
        let provider = mirrors.iter().find(|m| m.source_id() == selected)?.clone();
        self.results.get(&selected).await.map(|_| provider)
    }

    /// Cached results where unexpired, concurrent probes for the rest.
    async fn measure(
        &self,
        mirrors: &[Arc<dyn VersionProvider>],
        cancel: &CancellationToken,
    ) -> Vec<SpeedProbeResult> {
        let mut fresh = Vec::new();
        let mut stale = Vec::new();
        for mirror in mirrors {
            match self.results.get(mirror.source_id()).await {
                Some(entry) => fresh.push(entry.result),
                None => stale.push(mirror.clone()),
            }
        }

        debug!(
            "Probing {} mirrors ({} cached results reused)",
            stale.len(),
            fresh.len()
        );
        let probed = join_all(stale.iter().map(|m| m.probe_speed(cancel))).await;

        if !cancel.is_cancelled() {
            for (mirror, result) in stale.iter().zip(&probed) {
                let entry = TimedMeasurement {
                    result: result.clone(),
                    ttl: self.ttl_for(mirror.as_ref()),
                };
                self.results.insert(result.source_id.clone(), entry).await;
            }
        }

        fresh.extend(probed);
        fresh
    }
}
