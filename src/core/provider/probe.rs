use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::http::HttpTransport;
use crate::core::version::SpeedProbeResult;

pub const DEFAULT_SAMPLE_BYTES: u64 = 1024 * 1024;

fn default_sample_bytes() -> u64 {
    DEFAULT_SAMPLE_BYTES
}

/// `speedTest` block of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedTestConfig {
    pub url: String,
    #[serde(default = "default_sample_bytes")]
    pub sample_bytes: u64,
}

/// Reachability check followed by a bounded sample download.
///
/// Never fails: anything that goes wrong yields an unavailable result.
pub async fn probe_mirror(
    transport: &dyn HttpTransport,
    source_id: &str,
    config: Option<&SpeedTestConfig>,
    cancel: &CancellationToken,
) -> SpeedProbeResult {
    let Some(config) = config else {
        return SpeedProbeResult::unavailable(source_id);
    };

    let started = Instant::now();
    match transport.head(&config.url, cancel).await {
        // 405: server refuses HEAD but is clearly up.
        Ok(status) if status < 400 || status == 405 => {}
        Ok(status) => {
            debug!("Speed probe for {} got HTTP {}", source_id, status);
            return SpeedProbeResult::unavailable(source_id);
        }
        Err(e) => {
            warn!("Speed probe for {} failed: {}", source_id, e);
            return SpeedProbeResult::unavailable(source_id);
        }
    }
    let latency_ms = started.elapsed().as_millis() as u64;

    let started = Instant::now();
    let bytes = match transport
        .sample(&config.url, config.sample_bytes.max(1), cancel)
        .await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Speed sample for {} failed: {}", source_id, e);
            return SpeedProbeResult {
                latency_ms: Some(latency_ms),
                ..SpeedProbeResult::unavailable(source_id)
            };
        }
    };
    let elapsed_ms = (started.elapsed().as_millis() as u64).max(1);
    let throughput_bps = bytes.saturating_mul(1000) / elapsed_ms;

    debug!(
        "Probed {}: {} ms latency, {} B/s",
        source_id, latency_ms, throughput_bps
    );

    SpeedProbeResult {
        source_id: source_id.to_string(),
        latency_ms: Some(latency_ms),
        throughput_bps,
        available: true,
        measured_at: Utc::now(),
    }
}
